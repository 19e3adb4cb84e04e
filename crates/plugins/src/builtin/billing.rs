//! Billing UI over the token ledger: `/balance`, `/buy`, `/history`.
//!
//! Having this plugin in a bot's resolved set is what switches the
//! token middleware on for that bot.

use std::sync::Arc;

use async_trait::async_trait;

use mb_dispatch::{Handler, RequestContext, Router, UpdateFilter};
use mb_domain::{Error, Result};
use mb_store::{BillingSettings, TokenLedger};
use mb_telegram::Update;

use crate::plugin::{Plugin, PluginContext, PluginDescriptor, PluginFactory};

pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "billing",
    description: "Token balance, packages, and transaction history",
    version: "1.0.0",
    dependencies: &[],
    supports_hot_reload: true,
};

pub fn factory() -> PluginFactory {
    Arc::new(|ctx: PluginContext| {
        let ledger = match ctx.ledger.clone() {
            Some(ledger) => ledger,
            None => {
                let store = ctx.store.clone().ok_or_else(|| {
                    Error::Other("billing plugin requires a configured store".into())
                })?;
                let settings: BillingSettings =
                    serde_json::from_value(serde_json::Value::Object(ctx.config.clone()))
                        .map_err(Error::Json)?;
                Arc::new(TokenLedger::new(store, &ctx.bot_id, settings))
            }
        };
        Ok(Box::new(BillingPlugin { ledger }) as Box<dyn Plugin>)
    })
}

pub struct BillingPlugin {
    ledger: Arc<TokenLedger>,
}

impl Plugin for BillingPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn register(&self, router: &mut Router) {
        router.route(
            UpdateFilter::command("balance"),
            Arc::new(BalanceHandler {
                ledger: Arc::clone(&self.ledger),
            }),
        );
        router.route(
            UpdateFilter::command("buy"),
            Arc::new(BuyHandler {
                ledger: Arc::clone(&self.ledger),
            }),
        );
        router.route(
            UpdateFilter::callback_prefix("buy:"),
            Arc::new(BuyCallbackHandler {
                ledger: Arc::clone(&self.ledger),
            }),
        );
        router.route(
            UpdateFilter::command("history"),
            Arc::new(HistoryHandler {
                ledger: Arc::clone(&self.ledger),
            }),
        );
    }
}

struct BalanceHandler {
    ledger: Arc<TokenLedger>,
}

#[async_trait]
impl Handler for BalanceHandler {
    async fn handle(&self, _update: &Update, ctx: &mut RequestContext) -> Result<()> {
        let Some(user_id) = ctx.user_id else {
            return Ok(());
        };
        let stats = self.ledger.stats(user_id).await?;
        ctx.reply(&format!(
            "Your balance: {} tokens\nPurchased: {} | Consumed: {}",
            stats.balance, stats.total_purchased, stats.total_consumed
        ))
        .await
    }
}

struct BuyHandler {
    ledger: Arc<TokenLedger>,
}

#[async_trait]
impl Handler for BuyHandler {
    async fn handle(&self, _update: &Update, ctx: &mut RequestContext) -> Result<()> {
        let packages = self.ledger.packages();
        if packages.is_empty() {
            return ctx.reply("No token packages are available for this bot.").await;
        }
        let mut lines = vec!["Available token packages:".to_string()];
        for package in packages {
            lines.push(format!(
                "{} - {} tokens for {} stars",
                package.label, package.tokens, package.stars
            ));
        }
        lines.push("Pick a package from the payment menu to complete a purchase.".into());
        ctx.reply(&lines.join("\n")).await
    }
}

struct BuyCallbackHandler {
    ledger: Arc<TokenLedger>,
}

#[async_trait]
impl Handler for BuyCallbackHandler {
    async fn handle(&self, update: &Update, ctx: &mut RequestContext) -> Result<()> {
        let Some(callback) = &update.callback_query else {
            return Ok(());
        };
        let package_id = callback
            .data
            .as_deref()
            .and_then(|d| d.strip_prefix("buy:"))
            .unwrap_or("");
        let answer = match self.ledger.package(package_id) {
            Some(package) => format!(
                "{}: {} tokens for {} stars. Complete the payment to receive them.",
                package.label, package.tokens, package.stars
            ),
            None => "That package is no longer available.".to_string(),
        };
        ctx.client
            .answer_callback_query(&callback.id, Some(&answer), false)
            .await?;
        Ok(())
    }
}

struct HistoryHandler {
    ledger: Arc<TokenLedger>,
}

#[async_trait]
impl Handler for HistoryHandler {
    async fn handle(&self, _update: &Update, ctx: &mut RequestContext) -> Result<()> {
        let Some(user_id) = ctx.user_id else {
            return Ok(());
        };
        let history = self.ledger.history(user_id, 10).await?;
        if history.is_empty() {
            return ctx.reply("No transactions yet.").await;
        }
        let mut lines = vec!["Recent transactions:".to_string()];
        for tx in history {
            lines.push(format!(
                "{} {:+} -> {} ({})",
                tx.created_at.format("%Y-%m-%d %H:%M"),
                tx.amount,
                tx.balance_after,
                tx.transaction_type
            ));
        }
        ctx.reply(&lines.join("\n")).await
    }
}
