//! Token bootstrap for billing-enabled bots: makes sure a balance row
//! exists (granting the welcome bonus on first contact) and exposes
//! the balance to handlers.

use std::sync::Arc;

use async_trait::async_trait;

use mb_dispatch::{Middleware, Next, RequestContext};
use mb_domain::Result;
use mb_store::TokenLedger;
use mb_telegram::Update;

pub struct TokenMiddleware {
    ledger: Arc<TokenLedger>,
}

impl TokenMiddleware {
    pub fn new(ledger: Arc<TokenLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Middleware for TokenMiddleware {
    async fn handle(
        &self,
        update: &Update,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()> {
        if let Some(user_id) = ctx.user_id {
            match self.ledger.ensure_initialized(user_id).await {
                Ok((balance, is_new)) => {
                    ctx.token_balance = Some(balance);
                    ctx.is_new_user = is_new;
                }
                Err(e) => {
                    // Billing trouble must not block the request.
                    tracing::error!(
                        bot_id = %ctx.bot_id,
                        user_id,
                        error = %e,
                        "token initialization failed"
                    );
                    ctx.token_balance = Some(0);
                }
            }
        }
        next.run(update, ctx).await
    }
}
