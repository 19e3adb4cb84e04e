use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ConfigIssue, ConfigSeverity};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-bot configuration (one YAML file per bot)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    #[default]
    Polling,
    Webhook,
}

impl std::fmt::Display for BotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotMode::Polling => write!(f, "polling"),
            BotMode::Webhook => write!(f, "webhook"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Stable key; the primary identity of the bot everywhere.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Bot API token after env interpolation. Empty = skip this config.
    #[serde(default)]
    pub token: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: BotMode,
    #[serde(default)]
    pub webhook: BotWebhookConfig,
    /// Free-form per-bot settings consumed by plugins and middlewares.
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub plugins: Vec<PluginRef>,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub rate_limiting: Option<RateLimitConfig>,
    #[serde(default = "d_fsm_strategy")]
    pub fsm_strategy: String,
}

/// One entry of the bot's ordered plugin list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRef {
    pub name: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl PluginRef {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            config: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotWebhookConfig {
    #[serde(default)]
    pub path: String,
    /// Overrides the derived per-bot secret when set.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "d_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccessConfig {
    #[serde(default)]
    pub allowed_users: HashSet<i64>,
    #[serde(default)]
    pub blocked_users: HashSet<i64>,
    #[serde(default)]
    pub admin_users: HashSet<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Requests per minute.
    #[serde(default = "d_rate")]
    pub default_rate: u32,
    #[serde(default = "d_burst")]
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_rate: d_rate(),
            burst_size: d_burst(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_max_connections() -> u32 {
    40
}
fn d_rate() -> u32 {
    30
}
fn d_burst() -> u32 {
    10
}
fn d_fsm_strategy() -> String {
    "USER_IN_CHAT".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl BotConfig {
    /// Validate a bot config and return a list of issues.
    ///
    /// An empty token is NOT an issue here; the loader skips such
    /// configs with a notice instead of treating them as invalid.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.id.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "id".into(),
                message: "bot id must not be empty".into(),
            });
        }

        if self.name.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "name".into(),
                message: "bot name must not be empty".into(),
            });
        }

        if self.mode == BotMode::Webhook && self.webhook.max_connections == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "webhook.max_connections".into(),
                message: "must be greater than 0".into(),
            });
        }

        if let Some(rl) = &self.rate_limiting {
            if rl.default_rate == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "rate_limiting.default_rate".into(),
                    message: "must be greater than 0".into(),
                });
            }
            if rl.burst_size == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "rate_limiting.burst_size".into(),
                    message: "must be greater than 0".into(),
                });
            }
        }

        // Duplicate plugin entries shadow each other's config.
        let mut seen: HashSet<&str> = HashSet::new();
        for (i, plugin) in self.plugins.iter().enumerate() {
            if plugin.name.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("plugins[{i}].name"),
                    message: "plugin name must not be empty".into(),
                });
            } else if !seen.insert(&plugin.name) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: format!("plugins[{i}].name"),
                    message: format!(
                        "duplicate plugin \"{}\" shadows an earlier entry (first config wins)",
                        plugin.name
                    ),
                });
            }
        }

        issues
    }

    /// Names of the enabled plugins, in declaration order.
    pub fn enabled_plugins(&self) -> Vec<String> {
        self.plugins
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.name.clone())
            .collect()
    }

    /// The config map declared for a plugin (first entry wins).
    pub fn plugin_config(&self, name: &str) -> Map<String, Value> {
        self.plugins
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.config.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> BotConfig {
        serde_yaml::from_str(
            r#"
            id: demo
            name: Demo Bot
            token: "123:abc"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_applied() {
        let cfg = minimal();
        assert!(cfg.enabled);
        assert_eq!(cfg.mode, BotMode::Polling);
        assert_eq!(cfg.fsm_strategy, "USER_IN_CHAT");
        assert!(cfg.plugins.is_empty());
        assert!(cfg.rate_limiting.is_none());
    }

    #[test]
    fn minimal_config_is_valid() {
        assert!(minimal().validate().is_empty());
    }

    #[test]
    fn empty_id_is_error() {
        let mut cfg = minimal();
        cfg.id = String::new();
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "id"));
    }

    #[test]
    fn zero_rate_is_error() {
        let mut cfg = minimal();
        cfg.rate_limiting = Some(RateLimitConfig {
            enabled: true,
            default_rate: 0,
            burst_size: 10,
        });
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "rate_limiting.default_rate"
                && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn duplicate_plugin_is_warning() {
        let mut cfg = minimal();
        cfg.plugins = vec![PluginRef::named("start"), PluginRef::named("start")];
        let issues = cfg.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Warning);
    }

    #[test]
    fn enabled_plugins_preserve_order() {
        let cfg: BotConfig = serde_yaml::from_str(
            r#"
            id: demo
            name: Demo
            plugins:
              - name: billing
              - name: start
                enabled: false
              - name: help
                config:
                  commands:
                    help: "Show help"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.enabled_plugins(), vec!["billing", "help"]);
        assert!(cfg.plugin_config("help").contains_key("commands"));
        assert!(cfg.plugin_config("billing").is_empty());
    }

    #[test]
    fn webhook_mode_parses() {
        let cfg: BotConfig = serde_yaml::from_str(
            r#"
            id: hooked
            name: Hooked
            mode: webhook
            webhook:
              path: /custom
              max_connections: 20
            "#,
        )
        .unwrap();
        assert_eq!(cfg.mode, BotMode::Webhook);
        assert_eq!(cfg.webhook.max_connections, 20);
        assert!(cfg.webhook.secret.is_none());
    }
}
