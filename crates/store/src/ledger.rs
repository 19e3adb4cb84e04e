//! Token billing ledger: atomic balance mutation plus an append-only
//! transaction log, always written in the same store transaction.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use sqlx::PgConnection;

use mb_domain::{Error, Result};

use crate::gateway::StoreGateway;
use crate::rows::{TokenTransactionRow, UserTokenRow};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A purchasable token package.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPackage {
    pub id: String,
    pub stars: i64,
    pub tokens: i64,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// Billing settings, usually taken from the billing plugin's config map.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BillingSettings {
    /// Tokens granted on first contact.
    #[serde(default = "d_free_tokens")]
    pub free_tokens: i64,
    /// Cost per named action; unknown actions cost 0.
    #[serde(default)]
    pub action_costs: HashMap<String, i64>,
    #[serde(default)]
    pub packages: Vec<TokenPackage>,
}

fn d_free_tokens() -> i64 {
    50
}

/// Balance snapshot for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TokenStats {
    pub balance: i64,
    pub total_purchased: i64,
    pub total_consumed: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-bot token ledger. Every mutating call writes exactly one
/// balance update and one transaction row inside one transaction;
/// `balance_after` on the log row is the committed post-state.
pub struct TokenLedger {
    store: Arc<StoreGateway>,
    bot_id: String,
    settings: BillingSettings,
    packages: HashMap<String, TokenPackage>,
}

impl TokenLedger {
    pub fn new(store: Arc<StoreGateway>, bot_id: impl Into<String>, settings: BillingSettings) -> Self {
        let packages = settings
            .packages
            .iter()
            .cloned()
            .map(|p| (p.id.clone(), p))
            .collect();
        Self {
            store,
            bot_id: bot_id.into(),
            settings,
            packages,
        }
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn action_cost(&self, action: &str) -> i64 {
        self.settings.action_costs.get(action).copied().unwrap_or(0)
    }

    pub fn package(&self, package_id: &str) -> Option<&TokenPackage> {
        self.packages.get(package_id)
    }

    pub fn packages(&self) -> Vec<&TokenPackage> {
        let mut all: Vec<&TokenPackage> = self.packages.values().collect();
        all.sort_by_key(|p| p.stars);
        all
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn get_balance(&self, telegram_id: i64) -> Result<i64> {
        let mut session = self.store.begin().await?;
        let balance = fetch_balance(session.conn(), telegram_id, &self.bot_id).await?;
        session.commit().await?;
        Ok(balance.unwrap_or(0))
    }

    pub async fn can_afford(&self, telegram_id: i64, cost: i64) -> Result<bool> {
        Ok(self.get_balance(telegram_id).await? >= cost)
    }

    pub async fn stats(&self, telegram_id: i64) -> Result<TokenStats> {
        let mut session = self.store.begin().await?;
        let row = sqlx::query_as::<_, UserTokenRow>(
            r#"
            SELECT telegram_id, bot_id, balance, total_purchased, total_consumed
            FROM user_tokens
            WHERE telegram_id = $1 AND bot_id = $2
            "#,
        )
        .bind(telegram_id)
        .bind(&self.bot_id)
        .fetch_optional(session.conn())
        .await
        .map_err(Error::store)?;
        session.commit().await?;

        Ok(row
            .map(|r| TokenStats {
                balance: r.balance,
                total_purchased: r.total_purchased,
                total_consumed: r.total_consumed,
            })
            .unwrap_or_default())
    }

    pub async fn history(&self, telegram_id: i64, limit: i64) -> Result<Vec<TokenTransactionRow>> {
        let mut session = self.store.begin().await?;
        let rows = sqlx::query_as::<_, TokenTransactionRow>(
            r#"
            SELECT id, telegram_id, bot_id, transaction_type, amount, balance_after,
                   reference_type, reference_id, stars_paid, metadata_json, created_at
            FROM token_transactions
            WHERE telegram_id = $1 AND bot_id = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(telegram_id)
        .bind(&self.bot_id)
        .bind(limit)
        .fetch_all(session.conn())
        .await
        .map_err(Error::store)?;
        session.commit().await?;
        Ok(rows)
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Ensure a balance row exists, granting the welcome bonus on first
    /// contact. Returns `(balance, is_new_user)`.
    pub async fn ensure_initialized(&self, telegram_id: i64) -> Result<(i64, bool)> {
        let mut session = self.store.begin().await?;

        if let Some(balance) = fetch_balance(session.conn(), telegram_id, &self.bot_id).await? {
            session.commit().await?;
            return Ok((balance, false));
        }

        let free = self.settings.free_tokens.max(0);
        sqlx::query(
            "INSERT INTO user_tokens (telegram_id, bot_id, balance) VALUES ($1, $2, $3)",
        )
        .bind(telegram_id)
        .bind(&self.bot_id)
        .bind(free)
        .execute(session.conn())
        .await
        .map_err(Error::store)?;

        if free > 0 {
            log_transaction(
                session.conn(),
                &LogEntry {
                    telegram_id,
                    bot_id: &self.bot_id,
                    transaction_type: "grant",
                    amount: free,
                    balance_after: free,
                    reference_type: Some("welcome"),
                    reference_id: Some("initial_bonus"),
                    stars_paid: None,
                    metadata: None,
                },
            )
            .await?;
        }

        session.commit().await?;
        tracing::info!(
            telegram_id,
            bot_id = %self.bot_id,
            free_tokens = free,
            "initialized token balance"
        );
        Ok((free, true))
    }

    /// Consume tokens for an action.
    ///
    /// The debit is a single conditional update guarded by
    /// `balance >= amount`; nothing is written when it does not match.
    pub async fn consume(
        &self,
        telegram_id: i64,
        cost: i64,
        action: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<i64> {
        if cost <= 0 {
            return Err(Error::Other("consume amount must be positive".into()));
        }

        let mut session = self.store.begin().await?;

        let new_balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE user_tokens
            SET balance = balance - $3,
                total_consumed = total_consumed + $3,
                updated_at = now()
            WHERE telegram_id = $1 AND bot_id = $2 AND balance >= $3
            RETURNING balance
            "#,
        )
        .bind(telegram_id)
        .bind(&self.bot_id)
        .bind(cost)
        .fetch_optional(session.conn())
        .await
        .map_err(Error::store)?;

        let Some(new_balance) = new_balance else {
            let available = fetch_balance(session.conn(), telegram_id, &self.bot_id)
                .await?
                .unwrap_or(0);
            session.rollback().await?;
            return Err(Error::InsufficientTokens {
                required: cost,
                available,
                action: action.to_string(),
            });
        };

        log_transaction(
            session.conn(),
            &LogEntry {
                telegram_id,
                bot_id: &self.bot_id,
                transaction_type: "consume",
                amount: -cost,
                balance_after: new_balance,
                reference_type: Some("action"),
                reference_id: Some(action),
                stars_paid: None,
                metadata,
            },
        )
        .await?;

        session.commit().await?;
        tracing::info!(
            telegram_id,
            bot_id = %self.bot_id,
            cost,
            action,
            balance = new_balance,
            "tokens consumed"
        );
        Ok(new_balance)
    }

    /// Credit tokens from a paid package. `payment_id` is the
    /// idempotency key: a repeated call returns the current balance
    /// without crediting twice.
    pub async fn purchase(
        &self,
        telegram_id: i64,
        package_id: &str,
        stars_paid: i64,
        payment_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<i64> {
        let package = self
            .packages
            .get(package_id)
            .ok_or_else(|| Error::Other(format!("unknown token package: {package_id}")))?
            .clone();

        let mut session = self.store.begin().await?;

        let already_applied: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM token_transactions
            WHERE telegram_id = $1 AND bot_id = $2
              AND transaction_type = 'purchase' AND reference_id = $3
            LIMIT 1
            "#,
        )
        .bind(telegram_id)
        .bind(&self.bot_id)
        .bind(payment_id)
        .fetch_optional(session.conn())
        .await
        .map_err(Error::store)?;

        if already_applied.is_some() {
            let balance = fetch_balance(session.conn(), telegram_id, &self.bot_id)
                .await?
                .unwrap_or(0);
            session.commit().await?;
            tracing::warn!(
                telegram_id,
                payment_id,
                "duplicate purchase ignored (idempotency key matched)"
            );
            return Ok(balance);
        }

        ensure_row(session.conn(), telegram_id, &self.bot_id).await?;

        let new_balance: i64 = sqlx::query_scalar(
            r#"
            UPDATE user_tokens
            SET balance = balance + $3,
                total_purchased = total_purchased + $3,
                updated_at = now()
            WHERE telegram_id = $1 AND bot_id = $2
            RETURNING balance
            "#,
        )
        .bind(telegram_id)
        .bind(&self.bot_id)
        .bind(package.tokens)
        .fetch_one(session.conn())
        .await
        .map_err(Error::store)?;

        let mut tx_metadata = serde_json::json!({
            "package_id": package.id,
            "package_label": package.label,
        });
        if let (Some(obj), Some(extra)) = (tx_metadata.as_object_mut(), metadata) {
            if let Some(extra_obj) = extra.as_object() {
                for (k, v) in extra_obj {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }

        log_transaction(
            session.conn(),
            &LogEntry {
                telegram_id,
                bot_id: &self.bot_id,
                transaction_type: "purchase",
                amount: package.tokens,
                balance_after: new_balance,
                reference_type: Some("payment"),
                reference_id: Some(payment_id),
                stars_paid: Some(stars_paid),
                metadata: Some(tx_metadata),
            },
        )
        .await?;

        session.commit().await?;
        tracing::info!(
            telegram_id,
            bot_id = %self.bot_id,
            tokens = package.tokens,
            stars_paid,
            balance = new_balance,
            "tokens purchased"
        );
        Ok(new_balance)
    }

    /// Credit tokens without touching `total_purchased` (admin or
    /// promotional grants).
    pub async fn grant(
        &self,
        telegram_id: i64,
        amount: i64,
        reason: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<i64> {
        self.credit(telegram_id, amount, "grant", "admin", reason, metadata)
            .await
    }

    /// Return tokens from a failed or reversed payment.
    pub async fn refund(
        &self,
        telegram_id: i64,
        amount: i64,
        payment_id: &str,
    ) -> Result<i64> {
        self.credit(telegram_id, amount, "refund", "payment", payment_id, None)
            .await
    }

    async fn credit(
        &self,
        telegram_id: i64,
        amount: i64,
        transaction_type: &str,
        reference_type: &str,
        reference_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<i64> {
        if amount <= 0 {
            return Err(Error::Other("credit amount must be positive".into()));
        }

        let mut session = self.store.begin().await?;
        ensure_row(session.conn(), telegram_id, &self.bot_id).await?;

        let new_balance: i64 = sqlx::query_scalar(
            r#"
            UPDATE user_tokens
            SET balance = balance + $3, updated_at = now()
            WHERE telegram_id = $1 AND bot_id = $2
            RETURNING balance
            "#,
        )
        .bind(telegram_id)
        .bind(&self.bot_id)
        .bind(amount)
        .fetch_one(session.conn())
        .await
        .map_err(Error::store)?;

        log_transaction(
            session.conn(),
            &LogEntry {
                telegram_id,
                bot_id: &self.bot_id,
                transaction_type,
                amount,
                balance_after: new_balance,
                reference_type: Some(reference_type),
                reference_id: Some(reference_id),
                stars_paid: None,
                metadata,
            },
        )
        .await?;

        session.commit().await?;
        tracing::info!(
            telegram_id,
            bot_id = %self.bot_id,
            amount,
            kind = transaction_type,
            balance = new_balance,
            "tokens credited"
        );
        Ok(new_balance)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SQL helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn fetch_balance(
    conn: &mut PgConnection,
    telegram_id: i64,
    bot_id: &str,
) -> Result<Option<i64>> {
    sqlx::query_scalar("SELECT balance FROM user_tokens WHERE telegram_id = $1 AND bot_id = $2")
        .bind(telegram_id)
        .bind(bot_id)
        .fetch_optional(conn)
        .await
        .map_err(Error::store)
}

async fn ensure_row(conn: &mut PgConnection, telegram_id: i64, bot_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO user_tokens (telegram_id, bot_id, balance) VALUES ($1, $2, 0) \
         ON CONFLICT (telegram_id, bot_id) DO NOTHING",
    )
    .bind(telegram_id)
    .bind(bot_id)
    .execute(conn)
    .await
    .map_err(Error::store)?;
    Ok(())
}

struct LogEntry<'a> {
    telegram_id: i64,
    bot_id: &'a str,
    transaction_type: &'a str,
    amount: i64,
    balance_after: i64,
    reference_type: Option<&'a str>,
    reference_id: Option<&'a str>,
    stars_paid: Option<i64>,
    metadata: Option<serde_json::Value>,
}

async fn log_transaction(conn: &mut PgConnection, entry: &LogEntry<'_>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO token_transactions
            (telegram_id, bot_id, transaction_type, amount, balance_after,
             reference_type, reference_id, stars_paid, metadata_json)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(entry.telegram_id)
    .bind(entry.bot_id)
    .bind(entry.transaction_type)
    .bind(entry.amount)
    .bind(entry.balance_after)
    .bind(entry.reference_type)
    .bind(entry.reference_id)
    .bind(entry.stars_paid)
    .bind(&entry.metadata)
    .execute(conn)
    .await
    .map_err(Error::store)?;
    Ok(())
}
