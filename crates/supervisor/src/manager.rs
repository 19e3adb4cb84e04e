//! Bot lifecycle manager.
//!
//! Owns the `bot_id → ManagedBot` map and every update-loop task. The
//! map lock is short-lived; each bot sits behind its own async mutex so
//! lifecycle operations serialize per bot while siblings proceed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mb_domain::config::{BotConfig, BotMode};
use mb_domain::{Error, Result};
use mb_store::{repo, StoreGateway};
use mb_telegram::TelegramClient;

use crate::factory::{BotRuntime, DispatcherFactory};

/// How long `start_bot` waits for the polling task to establish its
/// session before declaring the start failed.
const START_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounded join on the polling task during stop.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Settle delay between stop and start on restart.
const RESTART_DELAY: Duration = Duration::from_millis(500);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Managed bot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BotState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BotState::Stopped => "stopped",
            BotState::Starting => "starting",
            BotState::Running => "running",
            BotState::Stopping => "stopping",
            BotState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A bot's in-memory state record, exclusively owned by the manager.
pub struct ManagedBot {
    pub bot_id: String,
    pub config: BotConfig,
    pub client: Arc<TelegramClient>,
    pub runtime: BotRuntime,
    pub mode: BotMode,
    pub state: BotState,
    pub started_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    cancel: Option<CancellationToken>,
    polling_task: Option<JoinHandle<()>>,
}

impl ManagedBot {
    pub fn status(&self) -> BotStatus {
        BotStatus {
            bot_id: self.bot_id.clone(),
            name: self.config.name.clone(),
            description: self.config.description.clone(),
            mode: self.mode,
            state: self.state,
            started_at: self.started_at,
            uptime_seconds: self
                .started_at
                .map(|t| (Utc::now() - t).num_seconds().max(0)),
            error_message: self.error_message.clone(),
        }
    }
}

/// Serializable status snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BotStatus {
    pub bot_id: String,
    pub name: String,
    pub description: String,
    pub mode: BotMode,
    pub state: BotState,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_seconds: Option<i64>,
    pub error_message: Option<String>,
}

type BotSlot = Arc<Mutex<ManagedBot>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BotManager {
    bots: RwLock<HashMap<String, BotSlot>>,
    factory: Arc<DispatcherFactory>,
    store: Option<Arc<StoreGateway>>,
}

impl BotManager {
    pub fn new(factory: Arc<DispatcherFactory>, store: Option<Arc<StoreGateway>>) -> Self {
        Self {
            bots: RwLock::new(HashMap::new()),
            factory,
            store,
        }
    }

    fn slot(&self, bot_id: &str) -> Result<BotSlot> {
        self.bots
            .read()
            .get(bot_id)
            .cloned()
            .ok_or_else(|| Error::BotNotFound(bot_id.to_string()))
    }

    pub fn is_registered(&self, bot_id: &str) -> bool {
        self.bots.read().contains_key(bot_id)
    }

    pub fn bot_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bots.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    // ── create / remove ─────────────────────────────────────────────

    /// Build the wire client and handler graph for a config and
    /// register the bot in `stopped`.
    pub async fn create_bot(&self, config: BotConfig) -> Result<()> {
        if self.is_registered(&config.id) {
            return Err(Error::Other(format!(
                "bot already registered: {}",
                config.id
            )));
        }

        let client = Arc::new(TelegramClient::new(&config.token));
        let runtime = self.factory.create_dispatcher(&config).await?;

        let bot = ManagedBot {
            bot_id: config.id.clone(),
            config: config.clone(),
            client,
            runtime,
            mode: config.mode,
            state: BotState::Stopped,
            started_at: None,
            error_message: None,
            cancel: None,
            polling_task: None,
        };

        self.bots
            .write()
            .insert(config.id.clone(), Arc::new(Mutex::new(bot)));

        self.persist_bot(&config).await;
        tracing::info!(bot_id = %config.id, name = %config.name, "created bot");
        Ok(())
    }

    /// Stop (when needed) and drop a bot entirely.
    pub async fn remove_bot(&self, bot_id: &str) -> Result<()> {
        let slot = self.slot(bot_id)?;
        let state = slot.lock().await.state;
        if matches!(state, BotState::Running | BotState::Starting) {
            if let Err(e) = self.stop_bot(bot_id).await {
                tracing::warn!(bot_id, error = %e, "stop during remove failed");
            }
        }

        let bot = slot.lock().await;
        for plugin in bot.runtime.plugins.iter() {
            if let Err(e) = plugin.on_unload().await {
                tracing::warn!(bot_id, plugin = plugin.descriptor().name, error = %e, "on_unload failed");
            }
        }
        drop(bot);

        self.bots.write().remove(bot_id);
        tracing::info!(bot_id, "removed bot");
        Ok(())
    }

    // ── start / stop ────────────────────────────────────────────────

    /// Transition `stopped|error → starting → running`.
    ///
    /// In polling mode this returns once the spawned loop has
    /// established its session (or failed trying), never waiting for
    /// the loop itself to end.
    pub async fn start_bot(&self, bot_id: &str) -> Result<()> {
        let slot = self.slot(bot_id)?;
        let mut bot = slot.lock().await;

        match bot.state {
            BotState::Running | BotState::Starting => {
                return Err(Error::BotAlreadyRunning(bot_id.to_string()));
            }
            BotState::Stopping => {
                return Err(Error::Other(format!("bot is stopping: {bot_id}")));
            }
            BotState::Stopped | BotState::Error => {}
        }

        bot.state = BotState::Starting;
        bot.error_message = None;

        // A stopped bot's wire session was closed; never reuse it.
        if bot.client.is_closed() {
            bot.client = Arc::new(TelegramClient::new(&bot.config.token));
        }

        match bot.mode {
            BotMode::Webhook => {
                bot.state = BotState::Running;
                bot.started_at = Some(Utc::now());
                let client = Arc::clone(&bot.client);
                for plugin in bot.runtime.plugins.iter() {
                    if let Err(e) = plugin.on_bot_start(&client).await {
                        tracing::warn!(bot_id, plugin = plugin.descriptor().name, error = %e, "on_bot_start failed");
                    }
                }
                drop(bot);
                self.record_event(bot_id, "started", None).await;
                tracing::info!(bot_id, mode = "webhook", "started bot");
                Ok(())
            }
            BotMode::Polling => {
                let cancel = CancellationToken::new();
                let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), String>>();

                let dispatcher = Arc::clone(&bot.runtime.dispatcher);
                let client = Arc::clone(&bot.client);
                let task_slot = Arc::clone(&slot);
                let task_cancel = cancel.clone();

                let handle = tokio::spawn(async move {
                    polling_task(dispatcher, client, task_slot, task_cancel, ready_tx).await;
                });

                bot.cancel = Some(cancel.clone());
                bot.polling_task = Some(handle);
                drop(bot);

                match tokio::time::timeout(START_TIMEOUT, ready_rx).await {
                    Ok(Ok(Ok(()))) => {
                        self.record_event(bot_id, "started", None).await;
                        tracing::info!(bot_id, mode = "polling", "started bot");
                        Ok(())
                    }
                    Ok(Ok(Err(message))) => {
                        self.record_event(bot_id, "error", Some(&message)).await;
                        Err(Error::Wire(message))
                    }
                    Ok(Err(_closed)) => {
                        // Task died before reporting; its state write
                        // already happened (or never will).
                        let message = "polling task exited before establishing".to_string();
                        self.mark_error(&slot, &message).await;
                        self.record_event(bot_id, "error", Some(&message)).await;
                        Err(Error::Other(message))
                    }
                    Err(_elapsed) => {
                        cancel.cancel();
                        let message = "bot start timed out".to_string();
                        self.mark_error(&slot, &message).await;
                        self.record_event(bot_id, "error", Some(&message)).await;
                        Err(Error::Other(message))
                    }
                }
            }
        }
    }

    /// Transition `running|starting → stopping → stopped`, cancelling
    /// the polling task, joining it with a bounded timeout, and
    /// closing the wire session.
    pub async fn stop_bot(&self, bot_id: &str) -> Result<()> {
        let slot = self.slot(bot_id)?;
        let mut bot = slot.lock().await;

        if !matches!(bot.state, BotState::Running | BotState::Starting) {
            return Err(Error::BotNotRunning(bot_id.to_string()));
        }

        bot.state = BotState::Stopping;
        let cancel = bot.cancel.take();
        let task = bot.polling_task.take();
        let client = Arc::clone(&bot.client);
        for plugin in bot.runtime.plugins.iter() {
            if let Err(e) = plugin.on_bot_stop(&client).await {
                tracing::warn!(bot_id, plugin = plugin.descriptor().name, error = %e, "on_bot_stop failed");
            }
        }
        drop(bot);

        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        if let Some(mut task) = task {
            match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
                Ok(_) => {}
                Err(_elapsed) => {
                    task.abort();
                    let message = "polling task did not stop within timeout".to_string();
                    let mut bot = slot.lock().await;
                    bot.client.close();
                    bot.state = BotState::Error;
                    bot.started_at = None;
                    bot.error_message = Some(message.clone());
                    drop(bot);
                    self.record_event(bot_id, "error", Some(&message)).await;
                    return Err(Error::Other(message));
                }
            }
        }

        let mut bot = slot.lock().await;
        bot.client.close();
        bot.state = BotState::Stopped;
        bot.started_at = None;
        bot.polling_task = None;
        drop(bot);

        self.record_event(bot_id, "stopped", None).await;
        tracing::info!(bot_id, "stopped bot");
        Ok(())
    }

    /// Stop then start.
    pub async fn restart_bot(&self, bot_id: &str) -> Result<()> {
        let slot = self.slot(bot_id)?;
        let state = slot.lock().await.state;
        if matches!(state, BotState::Running | BotState::Starting) {
            self.stop_bot(bot_id).await?;
        }
        tokio::time::sleep(RESTART_DELAY).await;
        self.start_bot(bot_id).await
    }

    /// Destroy the old instance and build a new one under the same id;
    /// a previously running bot is started again when still enabled.
    pub async fn reload_bot(&self, bot_id: &str, new_config: BotConfig) -> Result<()> {
        let slot = self.slot(bot_id)?;

        // `starting` counts as running here: the in-flight start is
        // cancelled and the rebuilt bot is started again below.
        let was_running = {
            let bot = slot.lock().await;
            matches!(bot.state, BotState::Running | BotState::Starting)
        };

        if was_running {
            if let Err(e) = self.stop_bot(bot_id).await {
                tracing::warn!(bot_id, error = %e, "stop during reload failed, rebuilding anyway");
            }
        }

        {
            let bot = slot.lock().await;
            for plugin in bot.runtime.plugins.iter() {
                if let Err(e) = plugin.on_unload().await {
                    tracing::warn!(bot_id, plugin = plugin.descriptor().name, error = %e, "on_unload failed");
                }
            }
        }

        self.bots.write().remove(bot_id);
        self.create_bot(new_config.clone()).await?;

        if was_running && new_config.enabled {
            self.start_bot(bot_id).await?;
        }

        self.record_event(bot_id, "reloaded", None).await;
        tracing::info!(bot_id, "reloaded bot");
        Ok(())
    }

    // ── bulk operations ─────────────────────────────────────────────

    /// Start every enabled bot. Returns a per-bot outcome map; one
    /// failure never aborts the rest.
    pub async fn start_all(&self) -> HashMap<String, String> {
        let mut results = HashMap::new();
        for bot_id in self.bot_ids() {
            let enabled = match self.slot(&bot_id) {
                Ok(slot) => slot.lock().await.config.enabled,
                Err(_) => continue,
            };
            if !enabled {
                results.insert(bot_id, "disabled".to_string());
                continue;
            }
            match self.start_bot(&bot_id).await {
                Ok(()) => {
                    results.insert(bot_id, "started".to_string());
                }
                Err(e) => {
                    tracing::error!(bot_id = %bot_id, error = %e, "failed to start bot");
                    results.insert(bot_id, format!("error: {e}"));
                }
            }
        }
        results
    }

    /// Stop every running bot concurrently and await all of them.
    /// Individual failures are logged, never propagated.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down bot manager");
        let mut stoppable = Vec::new();
        for bot_id in self.bot_ids() {
            if let Ok(slot) = self.slot(&bot_id) {
                let state = slot.lock().await.state;
                if matches!(state, BotState::Running | BotState::Starting) {
                    stoppable.push(bot_id);
                }
            }
        }

        let stops = stoppable.iter().map(|bot_id| {
            let bot_id = bot_id.clone();
            async move {
                if let Err(e) = self.stop_bot(&bot_id).await {
                    tracing::error!(bot_id = %bot_id, error = %e, "error stopping bot during shutdown");
                }
            }
        });
        futures_util::future::join_all(stops).await;
        tracing::info!("bot manager shutdown complete");
    }

    // ── queries ─────────────────────────────────────────────────────

    pub async fn get_status(&self, bot_id: &str) -> Result<BotStatus> {
        let slot = self.slot(bot_id)?;
        let bot = slot.lock().await;
        Ok(bot.status())
    }

    pub async fn all_statuses(&self) -> Vec<BotStatus> {
        let mut statuses = Vec::new();
        for bot_id in self.bot_ids() {
            if let Ok(slot) = self.slot(&bot_id) {
                statuses.push(slot.lock().await.status());
            }
        }
        statuses
    }

    pub async fn running_count(&self) -> usize {
        let mut count = 0;
        for bot_id in self.bot_ids() {
            if let Ok(slot) = self.slot(&bot_id) {
                if slot.lock().await.state == BotState::Running {
                    count += 1;
                }
            }
        }
        count
    }

    pub fn bot_count(&self) -> usize {
        self.bots.read().len()
    }

    pub async fn bot_config(&self, bot_id: &str) -> Result<BotConfig> {
        let slot = self.slot(bot_id)?;
        let bot = slot.lock().await;
        Ok(bot.config.clone())
    }

    /// Current configs of bots whose enabled plugin set contains the
    /// given plugin; used when a plugin hot-reloads.
    pub async fn bots_using_plugin(&self, plugin_name: &str) -> Vec<(String, BotConfig)> {
        let mut affected = Vec::new();
        for bot_id in self.bot_ids() {
            if let Ok(slot) = self.slot(&bot_id) {
                let bot = slot.lock().await;
                if bot
                    .config
                    .enabled_plugins()
                    .iter()
                    .any(|name| name == plugin_name)
                {
                    affected.push((bot_id.clone(), bot.config.clone()));
                }
            }
        }
        affected
    }

    /// Dispatch target for the webhook receiver: only a `running` bot
    /// accepts inbound updates. Also returns the per-bot secret
    /// override, when configured.
    pub async fn webhook_target(
        &self,
        bot_id: &str,
    ) -> Result<(Arc<mb_dispatch::Dispatcher>, Arc<TelegramClient>, Option<String>)> {
        let slot = self.slot(bot_id)?;
        let bot = slot.lock().await;
        if bot.state != BotState::Running {
            return Err(Error::BotNotRunning(bot_id.to_string()));
        }
        Ok((
            Arc::clone(&bot.runtime.dispatcher),
            Arc::clone(&bot.client),
            bot.config.webhook.secret.clone(),
        ))
    }

    /// Running webhook-mode bots, for webhook registration.
    pub async fn webhook_bots(&self) -> Vec<(String, Arc<TelegramClient>, u32)> {
        let mut bots = Vec::new();
        for bot_id in self.bot_ids() {
            if let Ok(slot) = self.slot(&bot_id) {
                let bot = slot.lock().await;
                if bot.mode == BotMode::Webhook && bot.state == BotState::Running {
                    bots.push((
                        bot_id.clone(),
                        Arc::clone(&bot.client),
                        bot.config.webhook.max_connections,
                    ));
                }
            }
        }
        bots
    }

    // ── internal ────────────────────────────────────────────────────

    async fn mark_error(&self, slot: &BotSlot, message: &str) {
        let mut bot = slot.lock().await;
        bot.state = BotState::Error;
        bot.started_at = None;
        bot.error_message = Some(message.to_string());
        if let Some(cancel) = bot.cancel.take() {
            cancel.cancel();
        }
        bot.polling_task = None;
    }

    async fn persist_bot(&self, config: &BotConfig) {
        let Some(store) = &self.store else { return };
        let result = async {
            let mut session = store.begin().await?;
            repo::bots::upsert_bot(session.conn(), config).await?;
            session.commit().await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(bot_id = %config.id, error = %e, "failed to persist bot record");
        }
    }

    async fn record_event(&self, bot_id: &str, event_type: &str, message: Option<&str>) {
        let Some(store) = &self.store else { return };
        let result = async {
            let mut session = store.begin().await?;
            repo::bots::record_event(session.conn(), bot_id, event_type, message).await?;
            if event_type == "started" {
                repo::bots::mark_started(session.conn(), bot_id).await?;
            }
            session.commit().await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(bot_id, event_type, error = %e, "failed to record bot event");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Polling task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Body of a bot's update loop. Establishes the session, promotes the
/// bot to `running`, then polls until cancelled or broken. Owns every
/// state write after `starting`.
async fn polling_task(
    dispatcher: Arc<mb_dispatch::Dispatcher>,
    client: Arc<TelegramClient>,
    slot: BotSlot,
    cancel: CancellationToken,
    ready: oneshot::Sender<std::result::Result<(), String>>,
) {
    match dispatcher.establish(&client).await {
        Ok(()) => {
            {
                let mut bot = slot.lock().await;
                bot.state = BotState::Running;
                bot.started_at = Some(Utc::now());
                bot.error_message = None;
            }
            let _ = ready.send(Ok(()));
        }
        Err(e) => {
            let message = e.to_string();
            {
                let mut bot = slot.lock().await;
                bot.state = BotState::Error;
                bot.started_at = None;
                bot.error_message = Some(message.clone());
                bot.polling_task = None;
                bot.cancel = None;
            }
            let _ = ready.send(Err(message));
            return;
        }
    }

    match dispatcher.poll_updates(client, cancel).await {
        Ok(()) => {
            // Cancelled cleanly. stop_bot finishes the transition; a
            // loop that returned on its own settles to stopped here.
            let mut bot = slot.lock().await;
            if bot.state == BotState::Running {
                bot.state = BotState::Stopped;
                bot.started_at = None;
                bot.polling_task = None;
                bot.cancel = None;
            }
        }
        Err(e) => {
            // Wire failure is non-fatal to the supervisor: only this
            // bot moves to error and can be restarted.
            let mut bot = slot.lock().await;
            bot.state = BotState::Error;
            bot.started_at = None;
            bot.error_message = Some(e.to_string());
            bot.polling_task = None;
            bot.cancel = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::DispatcherFactory;
    use crate::stats::StatsCollector;
    use mb_plugins::PluginRegistry;

    fn manager() -> BotManager {
        let registry = Arc::new(PluginRegistry::new());
        registry.register_builtins().unwrap();
        let collector = Arc::new(StatsCollector::new(Duration::from_secs(60)));
        let factory = Arc::new(DispatcherFactory::new(registry, None, None, collector));
        BotManager::new(factory, None)
    }

    /// Webhook-mode config: the full state machine without wire I/O.
    fn webhook_config(id: &str) -> BotConfig {
        serde_yaml::from_str(&format!(
            "id: {id}\nname: Bot {id}\ntoken: \"1:x\"\nmode: webhook\n"
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn create_start_stop_cycle() {
        let manager = manager();
        manager.create_bot(webhook_config("a")).await.unwrap();

        let status = manager.get_status("a").await.unwrap();
        assert_eq!(status.state, BotState::Stopped);
        assert!(status.started_at.is_none());

        manager.start_bot("a").await.unwrap();
        let status = manager.get_status("a").await.unwrap();
        assert_eq!(status.state, BotState::Running);
        assert!(status.started_at.is_some());
        assert_eq!(manager.running_count().await, 1);

        manager.stop_bot("a").await.unwrap();
        let status = manager.get_status("a").await.unwrap();
        assert_eq!(status.state, BotState::Stopped);
        assert!(status.started_at.is_none());
        assert_eq!(manager.running_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_create_fails() {
        let manager = manager();
        manager.create_bot(webhook_config("a")).await.unwrap();
        assert!(manager.create_bot(webhook_config("a")).await.is_err());
    }

    #[tokio::test]
    async fn illegal_transitions_are_typed_and_leave_state_unchanged() {
        let manager = manager();
        manager.create_bot(webhook_config("a")).await.unwrap();

        match manager.stop_bot("a").await {
            Err(Error::BotNotRunning(id)) => assert_eq!(id, "a"),
            other => panic!("expected BotNotRunning, got {other:?}"),
        }
        assert_eq!(manager.get_status("a").await.unwrap().state, BotState::Stopped);

        manager.start_bot("a").await.unwrap();
        match manager.start_bot("a").await {
            Err(Error::BotAlreadyRunning(id)) => assert_eq!(id, "a"),
            other => panic!("expected BotAlreadyRunning, got {other:?}"),
        }
        assert_eq!(manager.get_status("a").await.unwrap().state, BotState::Running);

        match manager.start_bot("ghost").await {
            Err(Error::BotNotFound(id)) => assert_eq!(id, "ghost"),
            other => panic!("expected BotNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn restart_returns_bot_to_running() {
        let manager = manager();
        manager.create_bot(webhook_config("a")).await.unwrap();
        manager.start_bot("a").await.unwrap();

        manager.restart_bot("a").await.unwrap();
        assert_eq!(manager.get_status("a").await.unwrap().state, BotState::Running);
    }

    #[tokio::test]
    async fn reload_preserves_running_state_and_rebuilds_graph() {
        let manager = manager();
        let mut config = webhook_config("a");
        config.plugins = vec![mb_domain::config::PluginRef::named("start")];
        manager.create_bot(config.clone()).await.unwrap();
        manager.start_bot("a").await.unwrap();

        let mut new_config = config.clone();
        new_config.plugins = vec![
            mb_domain::config::PluginRef::named("start"),
            mb_domain::config::PluginRef::named("help"),
        ];
        manager.reload_bot("a", new_config).await.unwrap();

        let status = manager.get_status("a").await.unwrap();
        assert_eq!(status.state, BotState::Running);

        let (dispatcher, _, _) = manager.webhook_target("a").await.unwrap();
        assert!(dispatcher.root().contains("help"));
    }

    #[tokio::test]
    async fn reload_of_stopped_bot_stays_stopped() {
        let manager = manager();
        manager.create_bot(webhook_config("a")).await.unwrap();
        manager.reload_bot("a", webhook_config("a")).await.unwrap();
        assert_eq!(manager.get_status("a").await.unwrap().state, BotState::Stopped);
    }

    #[tokio::test]
    async fn reload_of_running_bot_with_disabled_config_leaves_it_stopped() {
        let manager = manager();
        manager.create_bot(webhook_config("a")).await.unwrap();
        manager.start_bot("a").await.unwrap();

        let mut disabled = webhook_config("a");
        disabled.enabled = false;
        manager.reload_bot("a", disabled).await.unwrap();
        assert_eq!(manager.get_status("a").await.unwrap().state, BotState::Stopped);
    }

    #[tokio::test]
    async fn start_all_skips_disabled_bots() {
        let manager = manager();
        manager.create_bot(webhook_config("a")).await.unwrap();
        let mut b = webhook_config("b");
        b.enabled = false;
        manager.create_bot(b).await.unwrap();

        let results = manager.start_all().await;
        assert_eq!(results.get("a").map(String::as_str), Some("started"));
        assert_eq!(results.get("b").map(String::as_str), Some("disabled"));
        assert_eq!(manager.running_count().await, 1);
        assert_eq!(manager.get_status("b").await.unwrap().state, BotState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let manager = manager();
        manager.create_bot(webhook_config("a")).await.unwrap();
        manager.create_bot(webhook_config("b")).await.unwrap();
        manager.start_bot("a").await.unwrap();
        manager.start_bot("b").await.unwrap();

        manager.shutdown().await;
        assert_eq!(manager.running_count().await, 0);
    }

    #[tokio::test]
    async fn webhook_target_requires_running_state() {
        let manager = manager();
        manager.create_bot(webhook_config("a")).await.unwrap();
        assert!(matches!(
            manager.webhook_target("a").await,
            Err(Error::BotNotRunning(_))
        ));
        assert!(matches!(
            manager.webhook_target("ghost").await,
            Err(Error::BotNotFound(_))
        ));

        manager.start_bot("a").await.unwrap();
        assert!(manager.webhook_target("a").await.is_ok());
    }

    #[tokio::test]
    async fn remove_bot_unregisters() {
        let manager = manager();
        manager.create_bot(webhook_config("a")).await.unwrap();
        manager.start_bot("a").await.unwrap();
        manager.remove_bot("a").await.unwrap();
        assert!(!manager.is_registered("a"));
    }

    #[tokio::test]
    async fn bots_using_plugin_matches_enabled_set() {
        let manager = manager();
        let mut a = webhook_config("a");
        a.plugins = vec![mb_domain::config::PluginRef::named("billing")];
        manager.create_bot(a).await.unwrap();
        manager.create_bot(webhook_config("b")).await.unwrap();

        let affected = manager.bots_using_plugin("billing").await;
        assert_eq!(affected.len(), 1);
        assert_eq!(affected[0].0, "a");
    }
}
