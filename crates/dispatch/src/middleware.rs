//! Typed middleware chain wrapping the root router.
//!
//! Middlewares run outermost-first in the order the dispatcher factory
//! attached them; `Next` carries the remaining chain plus the router
//! tree that terminates it.

use std::sync::Arc;

use async_trait::async_trait;

use mb_domain::Result;
use mb_telegram::Update;

use crate::context::RequestContext;
use crate::router::Router;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        update: &Update,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()>;
}

/// The continuation of a request: the middlewares not yet run, ending
/// at the router.
pub struct Next<'a> {
    pub(crate) middlewares: &'a [Arc<dyn Middleware>],
    pub(crate) router: &'a Router,
}

impl<'a> Next<'a> {
    pub fn new(middlewares: &'a [Arc<dyn Middleware>], router: &'a Router) -> Self {
        Self {
            middlewares,
            router,
        }
    }

    pub async fn run(self, update: &Update, ctx: &mut RequestContext) -> Result<()> {
        if let Some((head, rest)) = self.middlewares.split_first() {
            return head
                .handle(
                    update,
                    ctx,
                    Next {
                        middlewares: rest,
                        router: self.router,
                    },
                )
                .await;
        }

        match self.router.find(update) {
            Some(handler) => handler.handle(update, ctx).await,
            None => {
                tracing::debug!(bot_id = %ctx.bot_id, "no handler matched update");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Handler, UpdateFilter};
    use mb_telegram::TelegramClient;

    type Log = Arc<parking_lot::Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
    }

    #[async_trait]
    impl Middleware for Recorder {
        async fn handle(
            &self,
            update: &Update,
            ctx: &mut RequestContext,
            next: Next<'_>,
        ) -> Result<()> {
            self.log.lock().push(format!("{}:enter", self.name));
            let result = next.run(update, ctx).await;
            self.log.lock().push(format!("{}:exit", self.name));
            result
        }
    }

    struct Terminal(Log);

    #[async_trait]
    impl Handler for Terminal {
        async fn handle(&self, _update: &Update, _ctx: &mut RequestContext) -> Result<()> {
            self.0.lock().push("handler".into());
            Ok(())
        }
    }

    fn update() -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": {"id": 5, "first_name": "T"},
                "chat": {"id": 5, "type": "private"},
                "text": "/go"
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn chain_runs_outermost_first_and_unwinds_in_reverse() {
        let log: Log = Arc::default();
        let mut router = Router::new("r");
        router.route(UpdateFilter::Any, Arc::new(Terminal(log.clone())));

        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Recorder {
                name: "outer",
                log: log.clone(),
            }),
            Arc::new(Recorder {
                name: "inner",
                log: log.clone(),
            }),
        ];

        let update = update();
        let client = Arc::new(TelegramClient::new("1:t"));
        let mut ctx = RequestContext::new("b", client, None, &update);
        Next::new(&middlewares, &router)
            .run(&update, &mut ctx)
            .await
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["outer:enter", "inner:enter", "handler", "inner:exit", "outer:exit"]
        );
    }

    #[tokio::test]
    async fn empty_chain_hits_router_directly() {
        let log: Log = Arc::default();
        let mut router = Router::new("r");
        router.route(UpdateFilter::Any, Arc::new(Terminal(log.clone())));

        let update = update();
        let client = Arc::new(TelegramClient::new("1:t"));
        let mut ctx = RequestContext::new("b", client, None, &update);
        Next::new(&[], &router).run(&update, &mut ctx).await.unwrap();

        assert_eq!(*log.lock(), vec!["handler"]);
    }

    #[tokio::test]
    async fn unrouted_update_is_ok() {
        let router = Router::new("r");
        let update = update();
        let client = Arc::new(TelegramClient::new("1:t"));
        let mut ctx = RequestContext::new("b", client, None, &update);
        assert!(Next::new(&[], &router).run(&update, &mut ctx).await.is_ok());
    }
}
