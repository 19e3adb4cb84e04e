//! `/help` listing the bot's commands.

use std::sync::Arc;

use async_trait::async_trait;

use mb_dispatch::{Handler, RequestContext, Router, UpdateFilter};
use mb_domain::Result;
use mb_telegram::Update;

use crate::plugin::{Plugin, PluginContext, PluginDescriptor, PluginFactory};

pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "help",
    description: "Lists available commands",
    version: "1.0.0",
    dependencies: &[],
    supports_hot_reload: true,
};

pub fn factory() -> PluginFactory {
    Arc::new(|ctx: PluginContext| {
        // `config.commands` is a map of command name -> description;
        // falls back to the stock pair when absent.
        let mut commands: Vec<(String, String)> = ctx
            .config
            .get("commands")
            .and_then(|v| v.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(cmd, desc)| {
                        desc.as_str().map(|d| (cmd.clone(), d.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        if commands.is_empty() {
            commands = vec![
                ("start".into(), "Start the bot".into()),
                ("help".into(), "Show this message".into()),
            ];
        }
        commands.sort();

        Ok(Box::new(HelpPlugin { commands }) as Box<dyn Plugin>)
    })
}

pub struct HelpPlugin {
    commands: Vec<(String, String)>,
}

impl Plugin for HelpPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn register(&self, router: &mut Router) {
        let text = render_help(&self.commands);
        router.route(
            UpdateFilter::command("help"),
            Arc::new(HelpHandler { text }),
        );
    }
}

fn render_help(commands: &[(String, String)]) -> String {
    let mut lines = vec!["Available commands:".to_string()];
    for (cmd, desc) in commands {
        lines.push(format!("/{cmd} - {desc}"));
    }
    lines.join("\n")
}

struct HelpHandler {
    text: String,
}

#[async_trait]
impl Handler for HelpHandler {
    async fn handle(&self, _update: &Update, ctx: &mut RequestContext) -> Result<()> {
        ctx.reply(&self.text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_configured_commands() {
        let text = render_help(&[
            ("start".into(), "Start".into()),
            ("horoscope".into(), "Daily horoscope".into()),
        ]);
        assert!(text.starts_with("Available commands:"));
        assert!(text.contains("/start - Start"));
        assert!(text.contains("/horoscope - Daily horoscope"));
    }

    #[test]
    fn factory_falls_back_to_stock_commands() {
        let plugin = factory()(PluginContext::new("bot", Default::default())).unwrap();
        let mut router = Router::new("help");
        plugin.register(&mut router);
        assert_eq!(router.route_count(), 1);
    }
}
