//! Application orchestration: wires the store, stats collector, plugin
//! registry, bot manager, HTTP surfaces, and the hot-reload controller,
//! then runs until a shutdown signal.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mb_domain::config::{AppConfig, ConfigManager};
use mb_plugins::{PluginLoader, PluginRegistry};
use mb_store::StoreGateway;

use crate::admin;
use crate::factory::DispatcherFactory;
use crate::http::{health, webhook};
use crate::manager::BotManager;
use crate::reload::{HotReloadController, ReloadHooks};
use crate::signals::{wait_for_signal, Signal};
use crate::stats::{StatsCollector, StatsSink, StoreSink};

pub struct Application {
    config: AppConfig,
    config_manager: Arc<ConfigManager>,
    store: Option<Arc<StoreGateway>>,
    collector: Arc<StatsCollector>,
    loader: Arc<PluginLoader>,
    manager: Arc<BotManager>,
}

impl Application {
    /// Build every component and create the configured bots.
    /// A failure here aborts startup (non-zero exit); once `run`
    /// begins, component failures degrade instead.
    pub async fn bootstrap(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        tracing::info!("multibot starting");

        // ── Store ────────────────────────────────────────────────────
        let store = if config.database.url.is_empty() {
            tracing::warn!("DATABASE_URL empty, running without a store");
            None
        } else {
            let store = StoreGateway::connect(&config.database)
                .await
                .context("connecting to the store")?;
            store
                .run_migrations()
                .await
                .context("applying store migrations")?;
            Some(Arc::new(store))
        };

        // ── Stats collector ──────────────────────────────────────────
        let collector = Arc::new(StatsCollector::new(Duration::from_secs(
            config.stats_flush_interval_secs,
        )));

        // ── Plugin registry + loader ─────────────────────────────────
        let registry = Arc::new(PluginRegistry::new());
        registry
            .register_builtins()
            .context("registering builtin plugins")?;
        let loader = Arc::new(PluginLoader::new(Arc::clone(&registry)));
        let discovered = loader.discover(&[config.plugins_dir.clone()]);
        tracing::info!(
            plugins = registry.len(),
            manifests = discovered.loaded.len(),
            "plugin registry ready"
        );

        // ── Dispatcher factory + bot manager ─────────────────────────
        let factory = Arc::new(DispatcherFactory::new(
            Arc::clone(&registry),
            Some(Arc::clone(&loader)),
            store.clone(),
            Arc::clone(&collector),
        ));
        let manager = Arc::new(BotManager::new(factory, store.clone()));

        // The admin plugin looks bots up through the manager; a weak
        // handle keeps the graph acyclic.
        admin::register(
            &registry,
            Arc::downgrade(&manager),
            Arc::clone(&collector),
            config.admin_allowed_users.clone(),
        )
        .context("registering admin plugin")?;

        // ── Bot configs ──────────────────────────────────────────────
        let config_manager = Arc::new(ConfigManager::new(config.config_dir.clone()));
        let report = config_manager.load_dir();
        tracing::info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "bot configs scanned"
        );

        for (bot_id, bot_config) in config_manager.all() {
            if let Err(e) = manager.create_bot(bot_config).await {
                tracing::error!(bot_id = %bot_id, error = %e, "failed to create bot");
            }
        }

        // ── Admin bot (ADMIN_BOT_TOKEN) ──────────────────────────────
        if !config.admin_bot_token.is_empty() {
            let admin_config = admin_bot_config(&config);
            if manager.is_registered(&admin_config.id) {
                tracing::warn!(
                    "a bot with id \"admin\" is already configured, skipping the built-in admin bot"
                );
            } else if let Err(e) = manager.create_bot(admin_config).await {
                tracing::error!(error = %e, "failed to create admin bot");
            }
        }

        Ok(Arc::new(Self {
            config,
            config_manager,
            store,
            collector,
            loader,
            manager,
        }))
    }

    /// Start everything, then block until a shutdown signal.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        // ── Stats flusher ────────────────────────────────────────────
        let flusher_cancel = CancellationToken::new();
        let flusher: Option<JoinHandle<()>> = self.store.as_ref().map(|store| {
            let collector = Arc::clone(&self.collector);
            let sink: Arc<dyn StatsSink> = Arc::new(StoreSink::new(Arc::clone(store)));
            let cancel = flusher_cancel.clone();
            tokio::spawn(async move { collector.run(sink, cancel).await })
        });

        // ── Bots ─────────────────────────────────────────────────────
        let results = self.manager.start_all().await;
        let started = results.values().filter(|v| v.as_str() == "started").count();
        tracing::info!(
            started,
            total = results.len(),
            "bot startup finished"
        );

        // ── Health server ────────────────────────────────────────────
        let http_cancel = CancellationToken::new();
        let mut servers: Vec<JoinHandle<()>> = Vec::new();
        if self.config.health.enabled {
            let state = health::HealthState {
                manager: Arc::clone(&self.manager),
                store: self.store.clone(),
            };
            let host = self.config.health.host.clone();
            let port = self.config.health.port;
            let cancel = http_cancel.clone();
            servers.push(tokio::spawn(async move {
                if let Err(e) = health::serve(state, &host, port, cancel).await {
                    tracing::error!(error = %e, "health server failed");
                }
            }));
        }

        // ── Webhook server ───────────────────────────────────────────
        if self.config.webhook.enabled {
            let state = webhook::WebhookState {
                manager: Arc::clone(&self.manager),
                secret: self.config.webhook.secret.clone(),
            };
            let webhook_config = self.config.webhook.clone();
            let cancel = http_cancel.clone();
            servers.push(tokio::spawn(async move {
                if let Err(e) = webhook::serve(state, &webhook_config, cancel).await {
                    tracing::error!(error = %e, "webhook server failed");
                }
            }));
            webhook::register_bot_webhooks(&self.manager, &self.config.webhook).await;
        }

        // ── Hot reload ───────────────────────────────────────────────
        let watcher_cancel = CancellationToken::new();
        let watcher: Option<JoinHandle<()>> = if self.config.hot_reload.enabled {
            let controller = HotReloadController::new(
                self.config.config_dir.clone(),
                self.config.plugins_dir.clone(),
                self.config.hot_reload.debounce_ms,
            );
            let hooks: Arc<dyn ReloadHooks> = Arc::clone(&self) as Arc<dyn ReloadHooks>;
            let cancel = watcher_cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = controller.run(hooks, cancel).await {
                    tracing::error!(error = %e, "hot reload controller failed");
                }
            }))
        } else {
            None
        };

        tracing::info!("multibot started");

        // ── Signal loop ──────────────────────────────────────────────
        loop {
            match wait_for_signal().await {
                Signal::Shutdown => break,
                Signal::Reload => self.rescan_configs().await,
            }
        }

        // ── Shutdown, in dependency order ────────────────────────────
        tracing::info!("multibot shutting down");

        watcher_cancel.cancel();
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }

        if self.config.webhook.enabled {
            webhook::remove_bot_webhooks(&self.manager).await;
        }
        self.manager.shutdown().await;

        flusher_cancel.cancel();
        if let Some(flusher) = flusher {
            let _ = flusher.await;
        }

        http_cancel.cancel();
        for server in servers {
            let _ = server.await;
        }

        if let Some(store) = &self.store {
            store.close().await;
        }

        tracing::info!("multibot shutdown complete");
        Ok(())
    }

    /// SIGHUP: re-scan the config directory; changed bots reload, new
    /// ones are created (and started when enabled).
    async fn rescan_configs(&self) {
        tracing::info!("re-scanning bot configs");
        let report = self.config_manager.load_dir();
        for bot_id in report.loaded {
            let Some(bot_config) = self.config_manager.get(&bot_id) else {
                continue;
            };
            if self.manager.is_registered(&bot_id) {
                if let Err(e) = self.manager.reload_bot(&bot_id, bot_config).await {
                    tracing::error!(bot_id = %bot_id, error = %e, "reload failed");
                }
            } else if let Err(e) = self.create_and_maybe_start(bot_config).await {
                tracing::error!(bot_id = %bot_id, error = %e, "create failed");
            }
        }
    }

    async fn create_and_maybe_start(
        &self,
        bot_config: mb_domain::config::BotConfig,
    ) -> mb_domain::Result<()> {
        let bot_id = bot_config.id.clone();
        let enabled = bot_config.enabled;
        self.manager.create_bot(bot_config).await?;
        if enabled {
            self.manager.start_bot(&bot_id).await?;
        }
        Ok(())
    }
}

/// Synthetic config for the supervisor's own admin bot: admin commands
/// plus the stock start/help pair, locked to the allowed user ids.
fn admin_bot_config(config: &AppConfig) -> mb_domain::config::BotConfig {
    use mb_domain::config::{AccessConfig, BotConfig, BotMode, PluginRef};

    BotConfig {
        id: "admin".into(),
        name: "Supervisor Admin".into(),
        description: "Built-in administration bot".into(),
        token: config.admin_bot_token.clone(),
        enabled: true,
        mode: BotMode::Polling,
        webhook: Default::default(),
        settings: Default::default(),
        plugins: vec![
            PluginRef::named("admin"),
            PluginRef::named("start"),
            PluginRef::named("help"),
        ],
        access: AccessConfig {
            allowed_users: config.admin_allowed_users.iter().copied().collect(),
            blocked_users: Default::default(),
            admin_users: config.admin_allowed_users.iter().copied().collect(),
        },
        rate_limiting: None,
        fsm_strategy: "USER_IN_CHAT".into(),
    }
}

#[async_trait]
impl ReloadHooks for Application {
    async fn on_config_change(&self, bot_id: &str, _path: &Path) {
        let bot_config = match self.config_manager.reload_bot_config(bot_id) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(bot_id, error = %e, "could not reload config");
                return;
            }
        };

        if bot_config.token.is_empty() {
            tracing::info!(bot_id, "reloaded config has no token, ignoring");
            return;
        }

        let result = if self.manager.is_registered(bot_id) {
            self.manager.reload_bot(bot_id, bot_config).await
        } else {
            self.create_and_maybe_start(bot_config).await
        };
        match result {
            Ok(()) => tracing::info!(bot_id, "bot reloaded from config change"),
            Err(e) => tracing::error!(bot_id, error = %e, "failed to reload bot"),
        }
    }

    async fn on_plugin_change(&self, plugin_name: &str, path: &Path) {
        // The watcher derives the name from the file; the manifest is
        // authoritative once loaded.
        let resolved = if self.loader.is_loaded(plugin_name) {
            self.loader
                .reload_plugin(plugin_name)
                .map(|()| plugin_name.to_string())
        } else {
            self.loader.load_plugin(path)
        };
        let plugin_name = match resolved {
            Ok(name) => name,
            Err(e) => {
                tracing::error!(plugin = plugin_name, error = %e, "failed to reload plugin");
                return;
            }
        };

        // Rebuild every bot whose graph includes this plugin.
        for (bot_id, bot_config) in self.manager.bots_using_plugin(&plugin_name).await {
            match self.manager.reload_bot(&bot_id, bot_config).await {
                Ok(()) => {
                    tracing::info!(bot_id = %bot_id, plugin = %plugin_name, "bot rebuilt for plugin change");
                }
                Err(e) => {
                    tracing::error!(bot_id = %bot_id, plugin = %plugin_name, error = %e, "rebuild failed");
                }
            }
        }
    }
}
