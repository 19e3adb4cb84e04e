//! Innermost safety net: logs handler failures under a short error id,
//! optionally tells the user, and marks the error handled so the
//! framework drops it while outer middlewares still observe it.

use async_trait::async_trait;

use mb_dispatch::{Middleware, Next, RequestContext};
use mb_domain::{Error, Result};
use mb_telegram::Update;

pub struct ErrorMiddleware {
    bot_id: String,
    notify_user: bool,
    user_message: String,
}

impl ErrorMiddleware {
    pub fn new(bot_id: &str, notify_user: bool) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            notify_user,
            user_message: "An error occurred. Please try again later.".to_string(),
        }
    }
}

#[async_trait]
impl Middleware for ErrorMiddleware {
    async fn handle(
        &self,
        update: &Update,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()> {
        let result = next.run(update, ctx).await;
        let Err(error) = result else {
            return Ok(());
        };

        let error_id = uuid::Uuid::new_v4().to_string()[..8].to_string();

        match &error {
            // Recoverable, user-visible; never an error-level log.
            Error::InsufficientTokens {
                required,
                available,
                action,
            } => {
                tracing::info!(
                    error_id = %error_id,
                    bot_id = %self.bot_id,
                    user_id = ctx.user_id.unwrap_or(0),
                    required,
                    available,
                    action = %action,
                    "insufficient tokens"
                );
                if self.notify_user {
                    let notice = format!(
                        "Not enough tokens: this action costs {required}, you have {available}. \
                         Use /buy to top up."
                    );
                    if let Err(e) = ctx.reply(&notice).await {
                        tracing::warn!(error_id = %error_id, error = %e, "could not notify user");
                    }
                }
            }
            _ => {
                tracing::error!(
                    error_id = %error_id,
                    bot_id = %self.bot_id,
                    user_id = ctx.user_id.unwrap_or(0),
                    error = %error,
                    "unhandled error in handler"
                );
                if self.notify_user {
                    let notice = format!("{}\n\nError ID: {error_id}", self.user_message);
                    if let Err(e) = ctx.reply(&notice).await {
                        tracing::warn!(error_id = %error_id, error = %e, "could not notify user");
                    }
                }
            }
        }

        // Re-raise so stats counts it and the session rolls back; the
        // dispatcher sees the marker and reports the update handled.
        ctx.handled_error = Some(error_id);
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_dispatch::{Handler, Router, UpdateFilter};
    use mb_telegram::TelegramClient;
    use std::sync::Arc;

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn handle(&self, _update: &Update, _ctx: &mut RequestContext) -> Result<()> {
            Err(Error::Other("kaput".into()))
        }
    }

    fn update() -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": {"id": 7, "first_name": "T"},
                "chat": {"id": 7, "type": "private"},
                "text": "hi"
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn failure_is_marked_handled_and_reraised() {
        let mut router = Router::new("r");
        router.route(UpdateFilter::Any, Arc::new(Failing));
        let middlewares: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(ErrorMiddleware::new("a", false))];

        let update = update();
        let client = Arc::new(TelegramClient::new("1:t"));
        let mut ctx = RequestContext::new("a", client, None, &update);
        let result = Next::new(&middlewares, &router).run(&update, &mut ctx).await;

        assert!(result.is_err());
        let error_id = ctx.handled_error.expect("error must be marked handled");
        assert_eq!(error_id.len(), 8);
    }

    #[tokio::test]
    async fn success_passes_untouched() {
        let router = Router::new("r");
        let middlewares: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(ErrorMiddleware::new("a", false))];

        let update = update();
        let client = Arc::new(TelegramClient::new("1:t"));
        let mut ctx = RequestContext::new("a", client, None, &update);
        let result = Next::new(&middlewares, &router).run(&update, &mut ctx).await;

        assert!(result.is_ok());
        assert!(ctx.handled_error.is_none());
    }
}
