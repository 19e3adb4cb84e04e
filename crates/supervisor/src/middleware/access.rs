//! Access control from the bot config: blocked users are dropped, and
//! when an allowlist is configured only listed ids pass.

use std::collections::HashSet;

use async_trait::async_trait;

use mb_dispatch::{Middleware, Next, RequestContext};
use mb_domain::config::AccessConfig;
use mb_domain::Result;
use mb_telegram::Update;

pub struct AccessMiddleware {
    allowed: HashSet<i64>,
    blocked: HashSet<i64>,
}

impl AccessMiddleware {
    pub fn new(access: &AccessConfig) -> Self {
        Self {
            allowed: access.allowed_users.clone(),
            blocked: access.blocked_users.clone(),
        }
    }

    fn admits(&self, user_id: Option<i64>) -> bool {
        let Some(user_id) = user_id else {
            // Updates without a user (channel posts etc.) pass through.
            return true;
        };
        if self.blocked.contains(&user_id) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.contains(&user_id)
    }
}

#[async_trait]
impl Middleware for AccessMiddleware {
    async fn handle(
        &self,
        update: &Update,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()> {
        if !self.admits(ctx.user_id) {
            tracing::debug!(
                bot_id = %ctx.bot_id,
                user_id = ctx.user_id.unwrap_or(0),
                "update dropped by access control"
            );
            return Ok(());
        }
        next.run(update, ctx).await
    }
}
