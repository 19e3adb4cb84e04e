//! Admin plugin: `/status` and `/botstats` for configured admin users.
//!
//! Registered by the application after the bot manager exists; the
//! plugin reaches bots only through a weak manager handle, never
//! through back-references.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use mb_dispatch::{Handler, RequestContext, Router, UpdateFilter};
use mb_domain::Result;
use mb_plugins::{Plugin, PluginContext, PluginDescriptor, PluginFactory, PluginRegistry};
use mb_store::repo;
use mb_telegram::Update;

use crate::manager::BotManager;
use crate::stats::StatsCollector;

pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "admin",
    description: "Supervisor status and statistics commands",
    version: "1.0.0",
    dependencies: &[],
    supports_hot_reload: false,
};

/// Register the admin plugin. `global_admins` comes from
/// `ADMIN_ALLOWED_USERS`; per-bot `access.admin_users` extend it via
/// plugin config.
pub fn register(
    registry: &PluginRegistry,
    manager: Weak<BotManager>,
    collector: Arc<StatsCollector>,
    global_admins: Vec<i64>,
) -> Result<()> {
    registry.register(DESCRIPTOR, factory(manager, collector, global_admins))
}

fn factory(
    manager: Weak<BotManager>,
    collector: Arc<StatsCollector>,
    global_admins: Vec<i64>,
) -> PluginFactory {
    Arc::new(move |ctx: PluginContext| {
        let mut admins: HashSet<i64> = global_admins.iter().copied().collect();
        if let Some(extra) = ctx.config.get("admin_users").and_then(|v| v.as_array()) {
            admins.extend(extra.iter().filter_map(|v| v.as_i64()));
        }
        Ok(Box::new(AdminPlugin {
            manager: manager.clone(),
            collector: Arc::clone(&collector),
            admins: Arc::new(admins),
        }) as Box<dyn Plugin>)
    })
}

pub struct AdminPlugin {
    manager: Weak<BotManager>,
    collector: Arc<StatsCollector>,
    admins: Arc<HashSet<i64>>,
}

impl Plugin for AdminPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn register(&self, router: &mut Router) {
        router.route(
            UpdateFilter::command("status"),
            Arc::new(StatusHandler {
                manager: self.manager.clone(),
                admins: Arc::clone(&self.admins),
            }),
        );
        router.route(
            UpdateFilter::command("botstats"),
            Arc::new(StatsHandler {
                collector: Arc::clone(&self.collector),
                admins: Arc::clone(&self.admins),
            }),
        );
    }
}

fn is_admin(admins: &HashSet<i64>, user_id: Option<i64>) -> bool {
    user_id.is_some_and(|id| admins.contains(&id))
}

struct StatusHandler {
    manager: Weak<BotManager>,
    admins: Arc<HashSet<i64>>,
}

#[async_trait]
impl Handler for StatusHandler {
    async fn handle(&self, _update: &Update, ctx: &mut RequestContext) -> Result<()> {
        if !is_admin(&self.admins, ctx.user_id) {
            // Non-admins get silence, not a hint.
            return Ok(());
        }
        let Some(manager) = self.manager.upgrade() else {
            return Ok(());
        };

        let mut lines = vec!["Supervisor status:".to_string()];
        for status in manager.all_statuses().await {
            let uptime = status
                .uptime_seconds
                .map(|s| format!(", up {s}s"))
                .unwrap_or_default();
            lines.push(format!(
                "{}: {} ({}{uptime})",
                status.bot_id, status.state, status.mode
            ));
        }
        ctx.reply(&lines.join("\n")).await
    }
}

struct StatsHandler {
    collector: Arc<StatsCollector>,
    admins: Arc<HashSet<i64>>,
}

#[async_trait]
impl Handler for StatsHandler {
    async fn handle(&self, _update: &Update, ctx: &mut RequestContext) -> Result<()> {
        if !is_admin(&self.admins, ctx.user_id) {
            return Ok(());
        }

        let bot_id = ctx.bot_id.clone();
        let mut lines = vec![format!("Statistics for {bot_id}:")];

        // Persisted buckets, when a session is open.
        if let Some(session) = ctx.session_mut() {
            if let Ok(daily) = repo::stats::daily_totals(session.conn(), &bot_id, 1).await {
                lines.push(format!(
                    "last 24h: {} messages, {} commands, {} callbacks, {} errors, {} new users",
                    daily.message_count,
                    daily.command_count,
                    daily.callback_count,
                    daily.error_count,
                    daily.new_users
                ));
            }
            if let Ok(top) = repo::stats::top_commands(session.conn(), &bot_id, 7, 5).await {
                if !top.is_empty() {
                    let rendered: Vec<String> =
                        top.iter().map(|(cmd, n)| format!("/{cmd} ({n})")).collect();
                    lines.push(format!("top commands (7d): {}", rendered.join(", ")));
                }
            }
        }

        // Unflushed window.
        if let Some(current) = self.collector.current_counters().get(&bot_id) {
            lines.push(format!(
                "pending flush: {} messages, {} commands, {} callbacks, {} errors",
                current.messages, current.commands, current.callbacks, current.errors
            ));
        }

        ctx.reply(&lines.join("\n")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_check() {
        let admins: HashSet<i64> = [1, 2].into_iter().collect();
        assert!(is_admin(&admins, Some(1)));
        assert!(!is_admin(&admins, Some(3)));
        assert!(!is_admin(&admins, None));
    }

    #[test]
    fn factory_merges_config_admins() {
        let registry = PluginRegistry::new();
        let collector = Arc::new(StatsCollector::new(std::time::Duration::from_secs(60)));
        register(&registry, Weak::new(), collector, vec![10]).unwrap();

        let mut config = serde_json::Map::new();
        config.insert("admin_users".into(), serde_json::json!([20, 21]));
        let plugin = registry
            .create("admin", PluginContext::new("bot", config))
            .unwrap();

        let mut router = Router::new("admin");
        plugin.register(&mut router);
        assert_eq!(router.route_count(), 2);
    }
}
