//! Dispatcher factory: turns a bot config into a fully wired handler
//! graph with the middleware chain attached.

use std::sync::Arc;

use serde_json::{Map, Value};

use mb_dispatch::{Dispatcher, Router};
use mb_domain::config::BotConfig;
use mb_domain::{Error, Result};
use mb_plugins::{Plugin, PluginContext, PluginLoader, PluginRegistry};
use mb_store::{BillingSettings, StoreGateway, TokenLedger};

use crate::middleware::{
    AccessMiddleware, ErrorMiddleware, LoggingMiddleware, RateLimitMiddleware,
    SessionMiddleware, StatsMiddleware, TokenMiddleware,
};
use crate::stats::StatsCollector;

/// Everything the manager keeps per bot: the dispatcher plus the live
/// plugin instances (retained for lifecycle hooks).
pub struct BotRuntime {
    pub dispatcher: Arc<Dispatcher>,
    pub plugins: Arc<Vec<Box<dyn Plugin>>>,
}

pub struct DispatcherFactory {
    registry: Arc<PluginRegistry>,
    loader: Option<Arc<PluginLoader>>,
    store: Option<Arc<StoreGateway>>,
    collector: Arc<StatsCollector>,
}

impl DispatcherFactory {
    pub fn new(
        registry: Arc<PluginRegistry>,
        loader: Option<Arc<PluginLoader>>,
        store: Option<Arc<StoreGateway>>,
        collector: Arc<StatsCollector>,
    ) -> Self {
        Self {
            registry,
            loader,
            store,
            collector,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Build the handler graph for one bot.
    pub async fn create_dispatcher(&self, config: &BotConfig) -> Result<BotRuntime> {
        let bot_id = &config.id;

        // 1. Default plugin list when the config names none.
        let requested: Vec<String> = if config.plugins.is_empty() {
            vec!["start".into(), "help".into(), "error_handler".into()]
        } else {
            config.enabled_plugins()
        };

        // 2. Deployment-wide manifest switch.
        let requested: Vec<String> = requested
            .into_iter()
            .filter(|name| {
                let enabled = self
                    .loader
                    .as_ref()
                    .map(|l| l.is_enabled(name))
                    .unwrap_or(true);
                if !enabled {
                    tracing::info!(bot_id = %bot_id, plugin = %name, "plugin disabled by manifest");
                }
                enabled
            })
            .collect();

        // 3. Topological ordering; fall back to the declared order
        //    (registered plugins only) when resolution fails.
        let ordered = match self.registry.resolve_dependencies(&requested) {
            Ok(ordered) => ordered,
            Err(e) => {
                tracing::error!(bot_id = %bot_id, error = %e, "plugin dependency resolution failed");
                requested
                    .iter()
                    .filter(|name| self.registry.contains(name))
                    .cloned()
                    .collect()
            }
        };

        // Billing in the resolved set switches the token middleware on.
        let ledger = self.build_ledger(config, &ordered);

        // 4. Instantiate plugins and attach their sub-routers.
        let mut root = Router::new(&format!("main_{bot_id}"));
        let mut plugins: Vec<Box<dyn Plugin>> = Vec::new();

        for name in &ordered {
            let plugin_config = self.merged_plugin_config(config, name);
            let ctx = PluginContext::new(bot_id, plugin_config)
                .with_store(self.store.clone())
                .with_ledger(ledger.clone());

            match self.registry.create(name, ctx) {
                Ok(plugin) => {
                    let mut sub = Router::new(name);
                    plugin.register(&mut sub);
                    root.include(sub);
                    if let Err(e) = plugin.on_load().await {
                        tracing::warn!(bot_id = %bot_id, plugin = %name, error = %e, "on_load failed");
                    }
                    tracing::debug!(bot_id = %bot_id, plugin = %name, "attached plugin");
                    plugins.push(plugin);
                }
                Err(e) => {
                    tracing::error!(bot_id = %bot_id, plugin = %name, error = %e, "failed to load plugin");
                }
            }
        }

        // 5. Middleware chain, outermost first.
        let mut dispatcher = Dispatcher::new(bot_id, root, self.store.clone());
        dispatcher.push_middleware(Arc::new(LoggingMiddleware::new(bot_id)));
        dispatcher.push_middleware(Arc::new(StatsMiddleware::new(
            bot_id,
            Arc::clone(&self.collector),
        )));
        if let Some(store) = &self.store {
            dispatcher.push_middleware(Arc::new(SessionMiddleware::new(
                bot_id,
                Arc::clone(store),
                Arc::clone(&self.collector),
            )));
        }
        if let Some(ledger) = &ledger {
            dispatcher.push_middleware(Arc::new(TokenMiddleware::new(Arc::clone(ledger))));
        }
        if !config.access.blocked_users.is_empty() || !config.access.allowed_users.is_empty() {
            dispatcher.push_middleware(Arc::new(AccessMiddleware::new(&config.access)));
        }
        if let Some(rate_limiting) = &config.rate_limiting {
            if rate_limiting.enabled {
                dispatcher.push_middleware(Arc::new(RateLimitMiddleware::new(
                    rate_limiting.default_rate,
                    rate_limiting.burst_size,
                    true,
                )));
            }
        }
        dispatcher.push_middleware(Arc::new(ErrorMiddleware::new(bot_id, true)));

        tracing::info!(
            bot_id = %bot_id,
            plugins = plugins.len(),
            "created dispatcher"
        );

        Ok(BotRuntime {
            dispatcher: Arc::new(dispatcher),
            plugins: Arc::new(plugins),
        })
    }

    /// Manifest defaults overlaid with the bot's per-plugin config
    /// (bot values win).
    fn merged_plugin_config(&self, config: &BotConfig, name: &str) -> Map<String, Value> {
        let mut merged = self
            .loader
            .as_ref()
            .map(|l| l.default_config(name))
            .unwrap_or_default();
        for (key, value) in config.plugin_config(name) {
            merged.insert(key, value);
        }
        merged
    }

    fn build_ledger(&self, config: &BotConfig, ordered: &[String]) -> Option<Arc<TokenLedger>> {
        if !ordered.iter().any(|name| name == "billing") {
            return None;
        }
        let store = self.store.as_ref()?;
        let billing_config = self.merged_plugin_config(config, "billing");
        let settings: BillingSettings =
            match serde_json::from_value(Value::Object(billing_config)).map_err(Error::Json) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::error!(bot_id = %config.id, error = %e, "invalid billing config, using defaults");
                    BillingSettings::default()
                }
            };
        Some(Arc::new(TokenLedger::new(
            Arc::clone(store),
            &config.id,
            settings,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn factory() -> DispatcherFactory {
        let registry = Arc::new(PluginRegistry::new());
        registry.register_builtins().unwrap();
        DispatcherFactory::new(
            registry,
            None,
            None,
            Arc::new(StatsCollector::new(Duration::from_secs(60))),
        )
    }

    fn config(yaml: &str) -> BotConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn empty_plugin_list_gets_defaults() {
        let runtime = factory()
            .create_dispatcher(&config("id: a\nname: A\ntoken: \"1:x\"\n"))
            .await
            .unwrap();

        let root = runtime.dispatcher.root();
        assert!(root.contains("start"));
        assert!(root.contains("help"));
        assert!(root.contains("error_handler"));
        assert_eq!(runtime.plugins.len(), 3);
    }

    #[tokio::test]
    async fn disabled_plugins_are_filtered() {
        let runtime = factory()
            .create_dispatcher(&config(
                "id: a\nname: A\ntoken: \"1:x\"\nplugins:\n  - name: start\n  - name: help\n    enabled: false\n",
            ))
            .await
            .unwrap();

        let root = runtime.dispatcher.root();
        assert!(root.contains("start"));
        assert!(!root.contains("help"));
    }

    #[tokio::test]
    async fn unknown_plugin_is_skipped_not_fatal() {
        let runtime = factory()
            .create_dispatcher(&config(
                "id: a\nname: A\ntoken: \"1:x\"\nplugins:\n  - name: start\n  - name: nonexistent\n",
            ))
            .await
            .unwrap();

        let root = runtime.dispatcher.root();
        assert!(root.contains("start"));
        assert!(!root.contains("nonexistent"));
        assert_eq!(runtime.plugins.len(), 1);
    }

    #[tokio::test]
    async fn billing_without_store_is_skipped() {
        // The ledger needs a store; without one the billing plugin
        // fails creation and the rest of the graph still builds.
        let runtime = factory()
            .create_dispatcher(&config(
                "id: a\nname: A\ntoken: \"1:x\"\nplugins:\n  - name: billing\n  - name: start\n",
            ))
            .await
            .unwrap();

        let root = runtime.dispatcher.root();
        assert!(root.contains("start"));
        assert!(!root.contains("billing"));
    }
}
