//! Hourly statistics buckets: atomic upsert plus the query surface
//! composed from them (daily totals, hour-of-day pattern, top commands).

use std::collections::HashMap;

use chrono::{DateTime, Duration, DurationRound, Utc};
use sqlx::{PgConnection, Row};

use mb_domain::{Error, Result};

use crate::rows::StatsRow;

/// Counter deltas accumulated since the last flush, for one bot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub message_count: i64,
    pub command_count: i64,
    pub callback_count: i64,
    pub error_count: i64,
    /// Distinct users seen during the flush window (not a delta).
    pub unique_users: i64,
    pub new_users: i64,
    pub command_usage: HashMap<String, i64>,
}

impl StatsDelta {
    pub fn is_empty(&self) -> bool {
        self.message_count == 0
            && self.command_count == 0
            && self.callback_count == 0
            && self.error_count == 0
            && self.unique_users == 0
            && self.new_users == 0
            && self.command_usage.is_empty()
    }
}

/// Totals aggregated over a span of hourly buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct AggregatedStats {
    pub message_count: i64,
    pub command_count: i64,
    pub callback_count: i64,
    pub error_count: i64,
    pub new_users: i64,
}

/// Truncate a timestamp to the start of its UTC hour.
pub fn hour_bucket(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::hours(1)).unwrap_or(now)
}

/// Upsert one bot's hourly bucket. Counters increment; `unique_users`
/// takes the max of existing and incoming; `command_usage` merges
/// key-wise, summing values. A zero delta is a no-op.
pub async fn upsert_hourly(
    conn: &mut PgConnection,
    bot_id: &str,
    bucket: DateTime<Utc>,
    delta: &StatsDelta,
) -> Result<()> {
    if delta.is_empty() {
        return Ok(());
    }

    let usage_json = serde_json::to_value(&delta.command_usage).map_err(Error::Json)?;

    sqlx::query(
        r#"
        INSERT INTO bot_statistics
            (bot_id, hour_bucket, message_count, command_count, callback_count,
             error_count, unique_users, new_users, command_usage)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (bot_id, hour_bucket) DO UPDATE SET
            message_count  = bot_statistics.message_count  + EXCLUDED.message_count,
            command_count  = bot_statistics.command_count  + EXCLUDED.command_count,
            callback_count = bot_statistics.callback_count + EXCLUDED.callback_count,
            error_count    = bot_statistics.error_count    + EXCLUDED.error_count,
            unique_users   = GREATEST(bot_statistics.unique_users, EXCLUDED.unique_users),
            new_users      = bot_statistics.new_users + EXCLUDED.new_users,
            command_usage  = (
                SELECT COALESCE(jsonb_object_agg(key, total), '{}'::jsonb)
                FROM (
                    SELECT key, SUM(value::bigint) AS total
                    FROM (
                        SELECT * FROM jsonb_each_text(COALESCE(bot_statistics.command_usage, '{}'::jsonb))
                        UNION ALL
                        SELECT * FROM jsonb_each_text(COALESCE(EXCLUDED.command_usage, '{}'::jsonb))
                    ) AS entries
                    GROUP BY key
                ) AS merged
            )
        "#,
    )
    .bind(bot_id)
    .bind(bucket)
    .bind(delta.message_count)
    .bind(delta.command_count)
    .bind(delta.callback_count)
    .bind(delta.error_count)
    .bind(delta.unique_users)
    .bind(delta.new_users)
    .bind(usage_json)
    .execute(conn)
    .await
    .map_err(Error::store)?;
    Ok(())
}

/// Sum the last `days`×24 hourly buckets for one bot.
pub async fn daily_totals(
    conn: &mut PgConnection,
    bot_id: &str,
    days: i64,
) -> Result<AggregatedStats> {
    let since = Utc::now() - Duration::days(days);
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(message_count), 0)::bigint  AS message_count,
               COALESCE(SUM(command_count), 0)::bigint  AS command_count,
               COALESCE(SUM(callback_count), 0)::bigint AS callback_count,
               COALESCE(SUM(error_count), 0)::bigint    AS error_count,
               COALESCE(SUM(new_users), 0)::bigint      AS new_users
        FROM bot_statistics
        WHERE bot_id = $1 AND hour_bucket >= $2
        "#,
    )
    .bind(bot_id)
    .bind(since)
    .fetch_one(conn)
    .await
    .map_err(Error::store)?;

    Ok(AggregatedStats {
        message_count: row.get("message_count"),
        command_count: row.get("command_count"),
        callback_count: row.get("callback_count"),
        error_count: row.get("error_count"),
        new_users: row.get("new_users"),
    })
}

/// Sum across all bots over the last `days`.
pub async fn total_daily_totals(conn: &mut PgConnection, days: i64) -> Result<AggregatedStats> {
    let since = Utc::now() - Duration::days(days);
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(message_count), 0)::bigint  AS message_count,
               COALESCE(SUM(command_count), 0)::bigint  AS command_count,
               COALESCE(SUM(callback_count), 0)::bigint AS callback_count,
               COALESCE(SUM(error_count), 0)::bigint    AS error_count,
               COALESCE(SUM(new_users), 0)::bigint      AS new_users
        FROM bot_statistics
        WHERE hour_bucket >= $1
        "#,
    )
    .bind(since)
    .fetch_one(conn)
    .await
    .map_err(Error::store)?;

    Ok(AggregatedStats {
        message_count: row.get("message_count"),
        command_count: row.get("command_count"),
        callback_count: row.get("callback_count"),
        error_count: row.get("error_count"),
        new_users: row.get("new_users"),
    })
}

/// Message counts grouped by hour of day (0-23) over the last `days`.
pub async fn hourly_pattern(
    conn: &mut PgConnection,
    bot_id: &str,
    days: i64,
) -> Result<[i64; 24]> {
    let since = Utc::now() - Duration::days(days);
    let rows = sqlx::query(
        r#"
        SELECT EXTRACT(HOUR FROM hour_bucket)::int AS hour,
               COALESCE(SUM(message_count), 0)::bigint AS count
        FROM bot_statistics
        WHERE bot_id = $1 AND hour_bucket >= $2
        GROUP BY hour
        ORDER BY hour
        "#,
    )
    .bind(bot_id)
    .bind(since)
    .fetch_all(conn)
    .await
    .map_err(Error::store)?;

    let mut pattern = [0i64; 24];
    for row in rows {
        let hour: i32 = row.get("hour");
        if (0..24).contains(&hour) {
            pattern[hour as usize] = row.get("count");
        }
    }
    Ok(pattern)
}

/// Top commands by summed usage over the last `days`.
pub async fn top_commands(
    conn: &mut PgConnection,
    bot_id: &str,
    days: i64,
    limit: i64,
) -> Result<Vec<(String, i64)>> {
    let since = Utc::now() - Duration::days(days);
    let rows = sqlx::query(
        r#"
        SELECT key AS command, SUM(value::bigint)::bigint AS count
        FROM bot_statistics, jsonb_each_text(COALESCE(command_usage, '{}'::jsonb))
        WHERE bot_id = $1 AND hour_bucket >= $2
        GROUP BY key
        ORDER BY count DESC
        LIMIT $3
        "#,
    )
    .bind(bot_id)
    .bind(since)
    .bind(limit)
    .fetch_all(conn)
    .await
    .map_err(Error::store)?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get("command"), row.get("count")))
        .collect())
}

pub async fn get_bucket(
    conn: &mut PgConnection,
    bot_id: &str,
    bucket: DateTime<Utc>,
) -> Result<Option<StatsRow>> {
    sqlx::query_as::<_, StatsRow>(
        r#"
        SELECT bot_id, hour_bucket, message_count, command_count, callback_count,
               error_count, unique_users, new_users, command_usage
        FROM bot_statistics
        WHERE bot_id = $1 AND hour_bucket = $2
        "#,
    )
    .bind(bot_id)
    .bind(bucket)
    .fetch_optional(conn)
    .await
    .map_err(Error::store)
}

/// Delete buckets older than `days`. Returns how many were removed.
pub async fn cleanup_old(conn: &mut PgConnection, days: i64) -> Result<u64> {
    let cutoff = Utc::now() - Duration::days(days);
    let result = sqlx::query("DELETE FROM bot_statistics WHERE hour_bucket < $1")
        .bind(cutoff)
        .execute(conn)
        .await
        .map_err(Error::store)?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hour_bucket_truncates_to_hour() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 15, 42, 7).unwrap();
        let bucket = hour_bucket(ts);
        assert_eq!(bucket, Utc.with_ymd_and_hms(2026, 3, 14, 15, 0, 0).unwrap());
    }

    #[test]
    fn hour_bucket_is_idempotent() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 15, 42, 7).unwrap();
        assert_eq!(hour_bucket(hour_bucket(ts)), hour_bucket(ts));
    }

    #[test]
    fn empty_delta_detection() {
        assert!(StatsDelta::default().is_empty());
        let delta = StatsDelta {
            message_count: 1,
            ..StatsDelta::default()
        };
        assert!(!delta.is_empty());
        let usage_only = StatsDelta {
            command_usage: HashMap::from([("start".into(), 1)]),
            ..StatsDelta::default()
        };
        assert!(!usage_only.is_empty());
    }
}
