//! Persistence for users seen by each bot.

use sqlx::PgConnection;

use mb_domain::{Error, Result};

use crate::rows::BotUserRow;

/// Identity fields captured on contact.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
}

/// Upsert a user row on contact, refreshing identity fields and
/// `last_seen_at`. Returns true on first contact for this bot.
pub async fn touch_user(
    conn: &mut PgConnection,
    bot_id: &str,
    profile: &UserProfile,
) -> Result<bool> {
    // xmax = 0 distinguishes a fresh insert from a conflict-update.
    let first_seen: bool = sqlx::query_scalar(
        r#"
        INSERT INTO bot_users (telegram_id, bot_id, username, first_name, last_name, language_code)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (telegram_id, bot_id) DO UPDATE SET
            username      = EXCLUDED.username,
            first_name    = EXCLUDED.first_name,
            last_name     = EXCLUDED.last_name,
            language_code = EXCLUDED.language_code,
            last_seen_at  = now()
        RETURNING (xmax = 0)
        "#,
    )
    .bind(profile.telegram_id)
    .bind(bot_id)
    .bind(&profile.username)
    .bind(&profile.first_name)
    .bind(&profile.last_name)
    .bind(&profile.language_code)
    .fetch_one(conn)
    .await
    .map_err(Error::store)?;
    Ok(first_seen)
}

pub async fn get_user(
    conn: &mut PgConnection,
    bot_id: &str,
    telegram_id: i64,
) -> Result<Option<BotUserRow>> {
    sqlx::query_as::<_, BotUserRow>(
        r#"
        SELECT id, telegram_id, bot_id, username, first_name, last_name,
               language_code, is_blocked, first_seen_at, last_seen_at
        FROM bot_users
        WHERE bot_id = $1 AND telegram_id = $2
        "#,
    )
    .bind(bot_id)
    .bind(telegram_id)
    .fetch_optional(conn)
    .await
    .map_err(Error::store)
}

pub async fn set_blocked(
    conn: &mut PgConnection,
    bot_id: &str,
    telegram_id: i64,
    blocked: bool,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE bot_users SET is_blocked = $3, last_seen_at = now() \
         WHERE bot_id = $1 AND telegram_id = $2",
    )
    .bind(bot_id)
    .bind(telegram_id)
    .bind(blocked)
    .execute(conn)
    .await
    .map_err(Error::store)?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_users(conn: &mut PgConnection, bot_id: &str) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM bot_users WHERE bot_id = $1")
        .bind(bot_id)
        .fetch_one(conn)
        .await
        .map_err(Error::store)
}
