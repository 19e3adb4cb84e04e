//! The plugin contract.
//!
//! Plugins are compiled in: each one is a value implementing [`Plugin`],
//! built by a factory registered in the [`crate::PluginRegistry`] at
//! startup. A plugin contributes a named sub-router of handlers and may
//! override the lifecycle hooks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use mb_dispatch::Router;
use mb_domain::Result;
use mb_store::{StoreGateway, TokenLedger};
use mb_telegram::TelegramClient;

/// Static metadata a plugin declares about itself.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PluginDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub version: &'static str,
    /// Plugins that must be attached before this one.
    pub dependencies: &'static [&'static str],
    pub supports_hot_reload: bool,
}

/// Per-bot context handed to a plugin factory.
pub struct PluginContext {
    pub bot_id: String,
    /// Plugin config: manifest defaults overlaid with the bot's
    /// per-plugin config map.
    pub config: Map<String, Value>,
    pub store: Option<Arc<StoreGateway>>,
    /// Shared ledger, present when billing is active for the bot.
    pub ledger: Option<Arc<TokenLedger>>,
}

impl PluginContext {
    pub fn new(bot_id: &str, config: Map<String, Value>) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            config,
            store: None,
            ledger: None,
        }
    }

    pub fn with_store(mut self, store: Option<Arc<StoreGateway>>) -> Self {
        self.store = store;
        self
    }

    pub fn with_ledger(mut self, ledger: Option<Arc<TokenLedger>>) -> Self {
        self.ledger = ledger;
        self
    }

    /// String config value with a default.
    pub fn config_str(&self, key: &str, default: &str) -> String {
        self.config
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    /// Register this plugin's handlers on its sub-router.
    fn register(&self, router: &mut Router);

    /// Called after the plugin instance is attached to a bot's graph.
    async fn on_load(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the instance is discarded (bot reload or removal).
    async fn on_unload(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the owning bot starts.
    async fn on_bot_start(&self, _client: &TelegramClient) -> Result<()> {
        Ok(())
    }

    /// Called when the owning bot stops.
    async fn on_bot_stop(&self, _client: &TelegramClient) -> Result<()> {
        Ok(())
    }
}

/// Builds a plugin instance for one bot.
pub type PluginFactory = Arc<dyn Fn(PluginContext) -> Result<Box<dyn Plugin>> + Send + Sync>;
