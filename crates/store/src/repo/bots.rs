//! Persistence for bot records and the lifecycle audit log.

use sqlx::PgConnection;

use mb_domain::config::BotConfig;
use mb_domain::{Error, Result};

use crate::rows::{BotEventRow, BotRecord};

/// SHA-256 of a bot token, stored instead of the token itself.
pub fn token_hash(token: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Insert or refresh the persistent record for a configured bot.
pub async fn upsert_bot(conn: &mut PgConnection, config: &BotConfig) -> Result<()> {
    let config_json = serde_json::to_value(config).map_err(Error::Json)?;
    sqlx::query(
        r#"
        INSERT INTO bots (id, name, description, token_hash, is_enabled, mode, config_json)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE SET
            name        = EXCLUDED.name,
            description = EXCLUDED.description,
            token_hash  = EXCLUDED.token_hash,
            is_enabled  = EXCLUDED.is_enabled,
            mode        = EXCLUDED.mode,
            config_json = EXCLUDED.config_json,
            updated_at  = now()
        "#,
    )
    .bind(&config.id)
    .bind(&config.name)
    .bind(&config.description)
    .bind(token_hash(&config.token))
    .bind(config.enabled)
    .bind(config.mode.to_string())
    .bind(config_json)
    .execute(conn)
    .await
    .map_err(Error::store)?;
    Ok(())
}

pub async fn mark_started(conn: &mut PgConnection, bot_id: &str) -> Result<()> {
    sqlx::query("UPDATE bots SET last_started_at = now(), updated_at = now() WHERE id = $1")
        .bind(bot_id)
        .execute(conn)
        .await
        .map_err(Error::store)?;
    Ok(())
}

pub async fn get_bot(conn: &mut PgConnection, bot_id: &str) -> Result<Option<BotRecord>> {
    sqlx::query_as::<_, BotRecord>("SELECT * FROM bots WHERE id = $1")
        .bind(bot_id)
        .fetch_optional(conn)
        .await
        .map_err(Error::store)
}

/// Append a lifecycle event (started, stopped, error, reloaded).
pub async fn record_event(
    conn: &mut PgConnection,
    bot_id: &str,
    event_type: &str,
    message: Option<&str>,
) -> Result<()> {
    sqlx::query("INSERT INTO bot_events (bot_id, event_type, message) VALUES ($1, $2, $3)")
        .bind(bot_id)
        .bind(event_type)
        .bind(message)
        .execute(conn)
        .await
        .map_err(Error::store)?;
    Ok(())
}

pub async fn recent_events(
    conn: &mut PgConnection,
    bot_id: &str,
    limit: i64,
) -> Result<Vec<BotEventRow>> {
    sqlx::query_as::<_, BotEventRow>(
        r#"
        SELECT id, bot_id, event_type, message, metadata_json, created_at
        FROM bot_events
        WHERE bot_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(bot_id)
    .bind(limit)
    .fetch_all(conn)
    .await
    .map_err(Error::store)
}
