//! Typed row structs for the persisted tables.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BotRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub token_hash: String,
    pub is_enabled: bool,
    pub mode: String,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub config_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BotUserRow {
    pub id: i64,
    pub telegram_id: i64,
    pub bot_id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
    pub is_blocked: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BotEventRow {
    pub id: i64,
    pub bot_id: String,
    pub event_type: String,
    pub message: Option<String>,
    pub metadata_json: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PluginStateRow {
    pub bot_id: String,
    pub plugin_name: String,
    pub state_key: String,
    pub state_value: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StatsRow {
    pub bot_id: String,
    pub hour_bucket: DateTime<Utc>,
    pub message_count: i64,
    pub command_count: i64,
    pub callback_count: i64,
    pub error_count: i64,
    pub unique_users: i64,
    pub new_users: i64,
    pub command_usage: Option<serde_json::Value>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserTokenRow {
    pub telegram_id: i64,
    pub bot_id: String,
    pub balance: i64,
    pub total_purchased: i64,
    pub total_consumed: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TokenTransactionRow {
    pub id: i64,
    pub telegram_id: i64,
    pub bot_id: String,
    pub transaction_type: String,
    pub amount: i64,
    pub balance_after: i64,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub stars_paid: Option<i64>,
    pub metadata_json: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
