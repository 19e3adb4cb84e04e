//! In-memory statistics collector with periodic flush into hourly
//! store buckets.
//!
//! The hot layer is a single mutex over per-bot counters; every
//! mutation and the snapshot-and-clear happen under it, so a flush
//! sees a set of mutations fully or not at all.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use mb_domain::Result;
use mb_store::{hour_bucket, repo, StatsDelta, StoreGateway};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hot counters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Clone)]
struct BotCounters {
    messages: i64,
    commands: i64,
    callbacks: i64,
    errors: i64,
    new_users: i64,
    command_usage: HashMap<String, i64>,
    seen_users: HashSet<i64>,
}

impl BotCounters {
    fn to_delta(&self) -> StatsDelta {
        StatsDelta {
            message_count: self.messages,
            command_count: self.commands,
            callback_count: self.callbacks,
            error_count: self.errors,
            unique_users: self.seen_users.len() as i64,
            new_users: self.new_users,
            command_usage: self.command_usage.clone(),
        }
    }

    /// Fold another window's counters back in (flush-failure path).
    fn merge(&mut self, other: BotCounters) {
        self.messages += other.messages;
        self.commands += other.commands;
        self.callbacks += other.callbacks;
        self.errors += other.errors;
        self.new_users += other.new_users;
        for (command, count) in other.command_usage {
            *self.command_usage.entry(command).or_default() += count;
        }
        self.seen_users.extend(other.seen_users);
    }
}

/// Point-in-time view of one bot's in-memory counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CounterSnapshot {
    pub messages: i64,
    pub commands: i64,
    pub callbacks: i64,
    pub errors: i64,
    pub unique_users: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where flushed deltas land. The store sink is the real one; tests
/// plug in memory sinks.
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn flush_bot(
        &self,
        bot_id: &str,
        bucket: chrono::DateTime<Utc>,
        delta: &StatsDelta,
    ) -> Result<()>;
}

/// Upserts each delta into `bot_statistics`.
pub struct StoreSink {
    store: std::sync::Arc<StoreGateway>,
}

impl StoreSink {
    pub fn new(store: std::sync::Arc<StoreGateway>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StatsSink for StoreSink {
    async fn flush_bot(
        &self,
        bot_id: &str,
        bucket: chrono::DateTime<Utc>,
        delta: &StatsDelta,
    ) -> Result<()> {
        let mut session = self.store.begin().await?;
        repo::stats::upsert_hourly(session.conn(), bot_id, bucket, delta).await?;
        session.commit().await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StatsCollector {
    hot: Mutex<HashMap<String, BotCounters>>,
    flush_interval: Duration,
}

impl StatsCollector {
    pub fn new(flush_interval: Duration) -> Self {
        Self {
            hot: Mutex::new(HashMap::new()),
            flush_interval,
        }
    }

    // ── recording ───────────────────────────────────────────────────

    pub fn record_message(&self, bot_id: &str, user_id: i64) {
        let mut hot = self.hot.lock();
        let counters = hot.entry(bot_id.to_string()).or_default();
        counters.messages += 1;
        counters.seen_users.insert(user_id);
    }

    pub fn record_command(&self, bot_id: &str, command: &str, user_id: i64) {
        let mut hot = self.hot.lock();
        let counters = hot.entry(bot_id.to_string()).or_default();
        counters.commands += 1;
        *counters.command_usage.entry(command.to_string()).or_default() += 1;
        counters.seen_users.insert(user_id);
    }

    pub fn record_callback(&self, bot_id: &str, user_id: i64) {
        let mut hot = self.hot.lock();
        let counters = hot.entry(bot_id.to_string()).or_default();
        counters.callbacks += 1;
        counters.seen_users.insert(user_id);
    }

    pub fn record_error(&self, bot_id: &str) {
        self.hot.lock().entry(bot_id.to_string()).or_default().errors += 1;
    }

    pub fn record_new_user(&self, bot_id: &str) {
        self.hot
            .lock()
            .entry(bot_id.to_string())
            .or_default()
            .new_users += 1;
    }

    /// Current in-memory counters, for the admin surface.
    pub fn current_counters(&self) -> HashMap<String, CounterSnapshot> {
        self.hot
            .lock()
            .iter()
            .map(|(bot_id, counters)| {
                (
                    bot_id.clone(),
                    CounterSnapshot {
                        messages: counters.messages,
                        commands: counters.commands,
                        callbacks: counters.callbacks,
                        errors: counters.errors,
                        unique_users: counters.seen_users.len() as i64,
                    },
                )
            })
            .collect()
    }

    // ── flushing ────────────────────────────────────────────────────

    /// One flush pass: atomically snapshot-and-clear the hot counters,
    /// then upsert per bot. A bot whose upsert fails gets its counters
    /// folded back in, so nothing is lost across failed flushes.
    ///
    /// Returns the number of bots successfully flushed.
    pub async fn flush(&self, sink: &dyn StatsSink) -> usize {
        let snapshot: HashMap<String, BotCounters> = std::mem::take(&mut *self.hot.lock());
        if snapshot.is_empty() {
            return 0;
        }

        let bucket = hour_bucket(Utc::now());
        let mut flushed = 0usize;

        for (bot_id, counters) in snapshot {
            let delta = counters.to_delta();
            if delta.is_empty() {
                continue;
            }
            match sink.flush_bot(&bot_id, bucket, &delta).await {
                Ok(()) => flushed += 1,
                Err(e) => {
                    tracing::warn!(
                        bot_id = %bot_id,
                        error = %e,
                        "stats flush failed, retaining counters for next flush"
                    );
                    let mut hot = self.hot.lock();
                    hot.entry(bot_id).or_default().merge(counters);
                }
            }
        }

        if flushed > 0 {
            tracing::debug!(bots = flushed, "flushed stats");
        }
        flushed
    }

    /// Flusher loop: tick every `flush_interval`, final synchronous
    /// flush on cancellation.
    pub async fn run(&self, sink: std::sync::Arc<dyn StatsSink>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.flush_interval);
        interval.tick().await; // immediate first tick is a no-op
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.flush(sink.as_ref()).await;
                }
            }
        }
        self.flush(sink.as_ref()).await;
        tracing::info!("stats collector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct MemorySink {
        flushes: PlMutex<Vec<(String, DateTime<Utc>, StatsDelta)>>,
        fail_bots: PlMutex<HashSet<String>>,
    }

    #[async_trait]
    impl StatsSink for MemorySink {
        async fn flush_bot(
            &self,
            bot_id: &str,
            bucket: DateTime<Utc>,
            delta: &StatsDelta,
        ) -> Result<()> {
            if self.fail_bots.lock().contains(bot_id) {
                return Err(mb_domain::Error::store("simulated outage"));
            }
            self.flushes
                .lock()
                .push((bot_id.to_string(), bucket, delta.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn flush_aggregates_window_counters() {
        let collector = StatsCollector::new(Duration::from_secs(60));
        for i in 0..100 {
            collector.record_message("a", i % 30);
        }
        for _ in 0..20 {
            collector.record_command("a", "start", 1);
        }
        collector.record_callback("a", 2);
        collector.record_error("a");
        collector.record_new_user("a");

        let sink = MemorySink::default();
        assert_eq!(collector.flush(&sink).await, 1);

        let flushes = sink.flushes.lock();
        let (bot_id, bucket, delta) = &flushes[0];
        assert_eq!(bot_id, "a");
        assert_eq!(*bucket, hour_bucket(Utc::now()));
        assert_eq!(delta.message_count, 100);
        assert_eq!(delta.command_count, 20);
        assert_eq!(delta.callback_count, 1);
        assert_eq!(delta.error_count, 1);
        assert_eq!(delta.new_users, 1);
        assert_eq!(delta.unique_users, 30);
        assert_eq!(delta.command_usage.get("start"), Some(&20));
    }

    #[tokio::test]
    async fn flush_with_no_activity_writes_nothing() {
        let collector = StatsCollector::new(Duration::from_secs(60));
        let sink = MemorySink::default();
        assert_eq!(collector.flush(&sink).await, 0);
        assert!(sink.flushes.lock().is_empty());
    }

    #[tokio::test]
    async fn counters_clear_after_successful_flush() {
        let collector = StatsCollector::new(Duration::from_secs(60));
        collector.record_message("a", 1);
        let sink = MemorySink::default();
        collector.flush(&sink).await;
        assert_eq!(collector.flush(&sink).await, 0);
        assert!(collector.current_counters().is_empty());
    }

    #[tokio::test]
    async fn failed_flush_accumulates_into_next() {
        let collector = StatsCollector::new(Duration::from_secs(60));
        collector.record_message("a", 1);
        collector.record_command("a", "start", 1);

        let sink = MemorySink::default();
        sink.fail_bots.lock().insert("a".to_string());
        assert_eq!(collector.flush(&sink).await, 0);

        // More activity lands while the store is down.
        collector.record_message("a", 2);

        sink.fail_bots.lock().clear();
        assert_eq!(collector.flush(&sink).await, 1);

        let flushes = sink.flushes.lock();
        let delta = &flushes[0].2;
        assert_eq!(delta.message_count, 2);
        assert_eq!(delta.command_count, 1);
        assert_eq!(delta.unique_users, 2);
    }

    #[tokio::test]
    async fn failure_of_one_bot_does_not_lose_others() {
        let collector = StatsCollector::new(Duration::from_secs(60));
        collector.record_message("a", 1);
        collector.record_message("b", 1);

        let sink = MemorySink::default();
        sink.fail_bots.lock().insert("a".to_string());
        assert_eq!(collector.flush(&sink).await, 1);
        assert_eq!(sink.flushes.lock()[0].0, "b");

        let counters = collector.current_counters();
        assert_eq!(counters.get("a").unwrap().messages, 1);
        assert!(!counters.contains_key("b"));
    }

    #[tokio::test]
    async fn run_performs_final_flush_on_cancel() {
        let collector = Arc::new(StatsCollector::new(Duration::from_secs(3600)));
        collector.record_message("a", 1);

        let sink = Arc::new(MemorySink::default());
        let cancel = CancellationToken::new();
        let task = {
            let collector = Arc::clone(&collector);
            let sink: Arc<dyn StatsSink> = sink.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { collector.run(sink, cancel).await })
        };

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(sink.flushes.lock().len(), 1);
    }
}
