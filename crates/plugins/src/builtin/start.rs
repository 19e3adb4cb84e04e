//! `/start` with a configurable welcome message.

use std::sync::Arc;

use async_trait::async_trait;

use mb_dispatch::{Handler, RequestContext, Router, UpdateFilter};
use mb_domain::Result;
use mb_telegram::Update;

use crate::plugin::{Plugin, PluginContext, PluginDescriptor, PluginFactory};

pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "start",
    description: "Handles /start with a configurable welcome message",
    version: "1.0.0",
    dependencies: &[],
    supports_hot_reload: true,
};

const DEFAULT_WELCOME: &str = "Welcome! Use /help to see available commands.";

pub fn factory() -> PluginFactory {
    Arc::new(|ctx: PluginContext| {
        Ok(Box::new(StartPlugin {
            welcome: ctx.config_str("welcome_message", DEFAULT_WELCOME),
        }) as Box<dyn Plugin>)
    })
}

pub struct StartPlugin {
    welcome: String,
}

impl Plugin for StartPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn register(&self, router: &mut Router) {
        router.route(
            UpdateFilter::command("start"),
            Arc::new(StartHandler {
                welcome: self.welcome.clone(),
            }),
        );
    }
}

struct StartHandler {
    welcome: String,
}

#[async_trait]
impl Handler for StartHandler {
    async fn handle(&self, _update: &Update, ctx: &mut RequestContext) -> Result<()> {
        ctx.reply(&self.welcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_uses_configured_welcome() {
        let mut config = serde_json::Map::new();
        config.insert("welcome_message".into(), serde_json::json!("Hi there"));
        let plugin = factory()(PluginContext::new("bot", config)).unwrap();

        let mut router = Router::new("start");
        plugin.register(&mut router);
        assert_eq!(router.route_count(), 1);
    }

    #[test]
    fn descriptor_has_no_dependencies() {
        assert!(DESCRIPTOR.dependencies.is_empty());
        assert!(DESCRIPTOR.supports_hot_reload);
    }
}
