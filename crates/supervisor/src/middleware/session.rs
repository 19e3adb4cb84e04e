//! Scoped store session per request: opened before the handler,
//! committed on clean return, rolled back on failure. Also maintains
//! the `bot_users` row and feeds the new-user counter on first contact.

use std::sync::Arc;

use async_trait::async_trait;

use mb_dispatch::{Middleware, Next, RequestContext};
use mb_domain::Result;
use mb_store::{repo, StoreGateway, UserProfile};
use mb_telegram::Update;

use crate::stats::StatsCollector;

pub struct SessionMiddleware {
    bot_id: String,
    store: Arc<StoreGateway>,
    collector: Arc<StatsCollector>,
}

impl SessionMiddleware {
    pub fn new(bot_id: &str, store: Arc<StoreGateway>, collector: Arc<StatsCollector>) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            store,
            collector,
        }
    }
}

#[async_trait]
impl Middleware for SessionMiddleware {
    async fn handle(
        &self,
        update: &Update,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()> {
        let mut session = self.store.begin().await?;

        // First-contact bookkeeping rides the request's transaction.
        if let Some(user) = update.from_user() {
            let profile = UserProfile {
                telegram_id: user.id,
                username: user.username.clone(),
                first_name: Some(user.first_name.clone()),
                last_name: user.last_name.clone(),
                language_code: user.language_code.clone(),
            };
            match repo::users::touch_user(session.conn(), &self.bot_id, &profile).await {
                Ok(true) => self.collector.record_new_user(&self.bot_id),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        bot_id = %self.bot_id,
                        user_id = user.id,
                        error = %e,
                        "failed to touch user row"
                    );
                }
            }
        }

        ctx.session = Some(session);
        let result = next.run(update, ctx).await;

        match ctx.session.take() {
            Some(session) => match &result {
                Ok(()) => session.commit().await?,
                Err(_) => {
                    if let Err(e) = session.rollback().await {
                        tracing::warn!(bot_id = %self.bot_id, error = %e, "session rollback failed");
                    }
                }
            },
            // A handler consumed the session (committed early); fine.
            None => {}
        }

        result
    }
}
