//! The per-bot dispatcher: root of the handler graph, fed either by
//! the polling loop or by the webhook receiver.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mb_domain::{Error, Result};
use mb_store::StoreGateway;
use mb_telegram::{TelegramClient, Update};

use crate::context::RequestContext;
use crate::middleware::{Middleware, Next};
use crate::router::Router;

/// Long-poll window requested from the Bot API.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Consecutive poll failures tolerated before the loop gives up and
/// the bot transitions to error.
const MAX_POLL_FAILURES: u32 = 5;

pub struct Dispatcher {
    bot_id: String,
    middlewares: Vec<Arc<dyn Middleware>>,
    root: Router,
    store: Option<Arc<StoreGateway>>,
}

impl Dispatcher {
    pub fn new(bot_id: &str, root: Router, store: Option<Arc<StoreGateway>>) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            middlewares: Vec::new(),
            root,
            store,
        }
    }

    /// Attach a middleware. Attachment order is execution order,
    /// outermost first.
    pub fn push_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn root(&self) -> &Router {
        &self.root
    }

    /// Run one update through the middleware chain and router tree.
    ///
    /// A handler failure the error middleware already dealt with is
    /// reported as success; the error id stays in the logs.
    pub async fn feed_update(&self, client: &Arc<TelegramClient>, update: Update) -> Result<()> {
        let mut ctx = RequestContext::new(
            &self.bot_id,
            Arc::clone(client),
            self.store.clone(),
            &update,
        );
        let result = Next::new(&self.middlewares, &self.root)
            .run(&update, &mut ctx)
            .await;
        match result {
            Err(_) if ctx.handled_error.is_some() => {
                tracing::debug!(
                    bot_id = %self.bot_id,
                    error_id = ctx.handled_error.as_deref().unwrap_or(""),
                    "update failed but was handled"
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Validate the wire session. This is the "first polling call":
    /// it fails in exactly the cases the first `getUpdates` would
    /// (bad token, unreachable API) and completes fast.
    pub async fn establish(&self, client: &TelegramClient) -> Result<()> {
        let me = client.get_me().await?;
        tracing::info!(
            bot_id = %self.bot_id,
            username = me.username.as_deref().unwrap_or(""),
            "polling session established"
        );
        Ok(())
    }

    /// Long-poll loop. Routes updates in arrival order; observes the
    /// cancellation token between I/O cycles. Returns Ok on
    /// cancellation, Err after repeated wire failures.
    pub async fn poll_updates(
        &self,
        client: Arc<TelegramClient>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut offset: Option<i64> = None;
        let mut failures: u32 = 0;

        loop {
            let updates = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(bot_id = %self.bot_id, "polling cancelled");
                    return Ok(());
                }
                result = client.get_updates(offset, POLL_TIMEOUT_SECS) => result,
            };

            match updates {
                Ok(updates) => {
                    failures = 0;
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        if let Err(e) = self.feed_update(&client, update).await {
                            // The error middleware swallows handler
                            // failures; anything surfacing here broke
                            // in the chain itself.
                            tracing::warn!(
                                bot_id = %self.bot_id,
                                error = %e,
                                "update processing failed in middleware chain"
                            );
                        }
                        if cancel.is_cancelled() {
                            return Ok(());
                        }
                    }
                }
                Err(Error::WireRateLimited { retry_after }) => {
                    tracing::warn!(
                        bot_id = %self.bot_id,
                        retry_after,
                        "polling rate limited"
                    );
                    if wait_or_cancel(&cancel, Duration::from_secs(retry_after)).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_POLL_FAILURES {
                        tracing::error!(
                            bot_id = %self.bot_id,
                            error = %e,
                            failures,
                            "polling failed repeatedly, giving up"
                        );
                        return Err(e);
                    }
                    let backoff = Duration::from_secs(2u64.saturating_mul(failures as u64));
                    tracing::warn!(
                        bot_id = %self.bot_id,
                        error = %e,
                        failures,
                        backoff_secs = backoff.as_secs(),
                        "polling error, backing off"
                    );
                    if wait_or_cancel(&cancel, backoff).await {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Sleep unless cancelled first. Returns true when cancelled.
async fn wait_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Handler, UpdateFilter};
    use async_trait::async_trait;

    struct Counter(Arc<parking_lot::Mutex<usize>>);

    #[async_trait]
    impl Handler for Counter {
        async fn handle(&self, _update: &Update, _ctx: &mut RequestContext) -> Result<()> {
            *self.0.lock() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn feed_update_reaches_handler() {
        let count = Arc::new(parking_lot::Mutex::new(0));
        let mut root = Router::new("main_t");
        root.route(UpdateFilter::Any, Arc::new(Counter(count.clone())));

        let dispatcher = Dispatcher::new("t", root, None);
        let client = Arc::new(TelegramClient::new("1:t"));
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 9,
            "message": {
                "message_id": 1,
                "from": {"id": 2, "first_name": "A"},
                "chat": {"id": 2, "type": "private"},
                "text": "hello"
            }
        }))
        .unwrap();

        dispatcher.feed_update(&client, update).await.unwrap();
        assert_eq!(*count.lock(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_polling_immediately() {
        let dispatcher = Dispatcher::new("t", Router::new("main_t"), None);
        // Closed client: a poll attempt would error; cancellation must
        // win the select before any backoff matters.
        let client = Arc::new(TelegramClient::new("1:t"));
        client.close();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = dispatcher.poll_updates(client, cancel).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_surface_error() {
        let dispatcher = Dispatcher::new("t", Router::new("main_t"), None);
        let client = Arc::new(TelegramClient::new("1:t"));
        client.close(); // every poll fails instantly
        let cancel = CancellationToken::new();
        let result = tokio::time::timeout(
            Duration::from_secs(60),
            dispatcher.poll_updates(client, cancel),
        )
        .await
        .expect("loop must give up before the timeout");
        assert!(result.is_err());
    }
}
