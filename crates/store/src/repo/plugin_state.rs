//! General-purpose key/value scratch space for plugins, keyed by
//! `(bot_id, plugin_name, state_key)` with JSONB values.

use sqlx::PgConnection;

use mb_domain::{Error, Result};

pub async fn get_state(
    conn: &mut PgConnection,
    bot_id: &str,
    plugin_name: &str,
    state_key: &str,
) -> Result<Option<serde_json::Value>> {
    let value: Option<Option<serde_json::Value>> = sqlx::query_scalar(
        r#"
        SELECT state_value FROM plugin_states
        WHERE bot_id = $1 AND plugin_name = $2 AND state_key = $3
        "#,
    )
    .bind(bot_id)
    .bind(plugin_name)
    .bind(state_key)
    .fetch_optional(conn)
    .await
    .map_err(Error::store)?;
    Ok(value.flatten())
}

pub async fn set_state(
    conn: &mut PgConnection,
    bot_id: &str,
    plugin_name: &str,
    state_key: &str,
    value: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO plugin_states (bot_id, plugin_name, state_key, state_value)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (bot_id, plugin_name, state_key) DO UPDATE SET
            state_value = EXCLUDED.state_value,
            updated_at  = now()
        "#,
    )
    .bind(bot_id)
    .bind(plugin_name)
    .bind(state_key)
    .bind(value)
    .execute(conn)
    .await
    .map_err(Error::store)?;
    Ok(())
}

/// Delete one key. Returns true when a row was removed.
pub async fn delete_state(
    conn: &mut PgConnection,
    bot_id: &str,
    plugin_name: &str,
    state_key: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM plugin_states WHERE bot_id = $1 AND plugin_name = $2 AND state_key = $3",
    )
    .bind(bot_id)
    .bind(plugin_name)
    .bind(state_key)
    .execute(conn)
    .await
    .map_err(Error::store)?;
    Ok(result.rows_affected() > 0)
}

/// Scoped delete: every key a plugin holds for one bot.
pub async fn delete_plugin_states(
    conn: &mut PgConnection,
    bot_id: &str,
    plugin_name: &str,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM plugin_states WHERE bot_id = $1 AND plugin_name = $2")
        .bind(bot_id)
        .bind(plugin_name)
        .execute(conn)
        .await
        .map_err(Error::store)?;
    Ok(result.rows_affected())
}

/// Scoped delete: every plugin's state for one bot.
pub async fn delete_bot_states(conn: &mut PgConnection, bot_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM plugin_states WHERE bot_id = $1")
        .bind(bot_id)
        .execute(conn)
        .await
        .map_err(Error::store)?;
    Ok(result.rows_affected())
}
