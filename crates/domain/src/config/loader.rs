//! Loading and caching of per-bot YAML configuration files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{Error, Result};

use super::bot::BotConfig;
use super::interpolate::{first_var_reference, resolve_env_vars};
use super::ConfigSeverity;

/// Why a config file in the directory was not registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Token resolved empty: not an error, just unconfigured.
    /// Carries the name of the first `${VAR}` the token referenced.
    MissingToken(Option<String>),
    /// The file failed to parse or validate.
    Invalid(String),
}

/// Outcome of scanning a config directory.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
}

/// Loads bot configs from YAML files and keeps the latest known-good
/// snapshot per bot id.
pub struct ConfigManager {
    config_dir: PathBuf,
    bots: RwLock<HashMap<String, BotConfig>>,
}

impl ConfigManager {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            bots: RwLock::new(HashMap::new()),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Parse a single YAML config file: read, interpolate `${VAR}`
    /// references recursively, then deserialize and validate.
    pub fn load_file(path: &Path) -> Result<BotConfig> {
        if !path.exists() {
            return Err(Error::ConfigFileMissing(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let mut value: serde_json::Value = serde_yaml::from_str(&raw)?;
        resolve_env_vars(&mut value);
        let config: BotConfig = serde_json::from_value(value)?;

        for issue in config.validate() {
            match issue.severity {
                ConfigSeverity::Warning => {
                    tracing::warn!(path = %path.display(), "config: {issue}");
                }
                ConfigSeverity::Error => {
                    return Err(Error::ConfigValidation {
                        field: issue.field,
                        reason: issue.message,
                    });
                }
            }
        }
        Ok(config)
    }

    /// Scan the config directory and (re)register every valid bot
    /// config found. One broken file never aborts the scan.
    ///
    /// Configs with an empty token are skipped with a notice; disabled
    /// configs are registered (the bot is created but not started).
    pub fn load_dir(&self) -> LoadReport {
        let mut report = LoadReport::default();
        let mut fresh: HashMap<String, BotConfig> = HashMap::new();

        let entries = match std::fs::read_dir(&self.config_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    dir = %self.config_dir.display(),
                    error = %e,
                    "config directory not readable"
                );
                return report;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        for path in paths {
            match Self::load_file(&path) {
                Ok(config) if config.token.is_empty() => {
                    // Hint which env var would have supplied the token.
                    let hint = std::fs::read_to_string(&path)
                        .ok()
                        .and_then(|raw| raw_token_reference(&raw));
                    tracing::info!(
                        path = %path.display(),
                        env_hint = hint.as_deref().unwrap_or(""),
                        "skipping bot config: token not configured"
                    );
                    report.skipped.push((path, SkipReason::MissingToken(hint)));
                }
                Ok(config) => {
                    tracing::info!(
                        bot_id = %config.id,
                        name = %config.name,
                        enabled = config.enabled,
                        "loaded bot config"
                    );
                    report.loaded.push(config.id.clone());
                    fresh.insert(config.id.clone(), config);
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "invalid bot config");
                    report
                        .skipped
                        .push((path, SkipReason::Invalid(e.to_string())));
                }
            }
        }

        *self.bots.write() = fresh;
        report
    }

    /// Re-read one bot's config file from disk, by id.
    /// Looks for `<id>.yaml`, then `<id>.yml`.
    pub fn reload_bot_config(&self, bot_id: &str) -> Result<BotConfig> {
        for ext in ["yaml", "yml"] {
            let path = self.config_dir.join(format!("{bot_id}.{ext}"));
            if path.exists() {
                let config = Self::load_file(&path)?;
                self.bots.write().insert(bot_id.to_string(), config.clone());
                return Ok(config);
            }
        }
        Err(Error::ConfigFileMissing(
            self.config_dir.join(format!("{bot_id}.yaml")),
        ))
    }

    pub fn get(&self, bot_id: &str) -> Option<BotConfig> {
        self.bots.read().get(bot_id).cloned()
    }

    pub fn all(&self) -> HashMap<String, BotConfig> {
        self.bots.read().clone()
    }
}

/// Pull the raw (pre-interpolation) token value out of a YAML document
/// and return the first env var it references.
fn raw_token_reference(raw_yaml: &str) -> Option<String> {
    let value: serde_yaml::Value = serde_yaml::from_str(raw_yaml).ok()?;
    let token = value.get("token")?.as_str()?;
    first_var_reference(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_valid_configs_and_skips_empty_tokens() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "a.yaml",
            "id: a\nname: Bot A\ntoken: \"111:aaa\"\n",
        );
        write_config(
            dir.path(),
            "b.yaml",
            "id: b\nname: Bot B\ntoken: \"${MB_TEST_NO_SUCH_TOKEN}\"\n",
        );

        let manager = ConfigManager::new(dir.path());
        let report = manager.load_dir();

        assert_eq!(report.loaded, vec!["a"]);
        assert_eq!(report.skipped.len(), 1);
        match &report.skipped[0].1 {
            SkipReason::MissingToken(hint) => {
                assert_eq!(hint.as_deref(), Some("MB_TEST_NO_SUCH_TOKEN"));
            }
            other => panic!("unexpected skip reason: {other:?}"),
        }
        assert!(manager.get("a").is_some());
        assert!(manager.get("b").is_none());
    }

    #[test]
    fn broken_file_does_not_abort_scan() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "bad.yaml", "id: [unclosed\n");
        write_config(
            dir.path(),
            "good.yaml",
            "id: good\nname: Good\ntoken: \"1:x\"\n",
        );

        let manager = ConfigManager::new(dir.path());
        let report = manager.load_dir();
        assert_eq!(report.loaded, vec!["good"]);
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn disabled_config_is_registered() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "b.yaml",
            "id: b\nname: Bot B\ntoken: \"1:x\"\nenabled: false\n",
        );
        let manager = ConfigManager::new(dir.path());
        manager.load_dir();
        let cfg = manager.get("b").expect("disabled bot still registered");
        assert!(!cfg.enabled);
    }

    #[test]
    fn reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "a.yaml",
            "id: a\nname: Before\ntoken: \"1:x\"\n",
        );
        let manager = ConfigManager::new(dir.path());
        manager.load_dir();
        assert_eq!(manager.get("a").unwrap().name, "Before");

        write_config(dir.path(), "a.yaml", "id: a\nname: After\ntoken: \"1:x\"\n");
        let reloaded = manager.reload_bot_config("a").unwrap();
        assert_eq!(reloaded.name, "After");
        assert_eq!(manager.get("a").unwrap().name, "After");
    }

    #[test]
    fn reload_missing_file_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path());
        match manager.reload_bot_config("ghost") {
            Err(Error::ConfigFileMissing(_)) => {}
            other => panic!("expected ConfigFileMissing, got {other:?}"),
        }
    }

    #[test]
    fn missing_dir_yields_empty_report() {
        let manager = ConfigManager::new("/nonexistent/multibot/config");
        let report = manager.load_dir();
        assert!(report.loaded.is_empty());
        assert!(report.skipped.is_empty());
    }
}
