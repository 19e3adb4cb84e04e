//! Hot-reload controller: watches the config and plugin trees,
//! debounces bursts of filesystem events, and routes each settled
//! batch to the config / plugin reload hooks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mb_domain::Result;

/// What a settled filesystem event means for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// A bot's YAML file changed; bot id is the filename stem.
    Config { bot_id: String, path: PathBuf },
    /// A plugin manifest changed.
    Plugin { plugin_name: String, path: PathBuf },
}

/// Receiver side of the controller. Implemented by the application.
#[async_trait]
pub trait ReloadHooks: Send + Sync {
    async fn on_config_change(&self, bot_id: &str, path: &Path);
    async fn on_plugin_change(&self, plugin_name: &str, path: &Path);
}

pub struct HotReloadController {
    config_dir: PathBuf,
    plugins_dir: PathBuf,
    debounce: Duration,
}

impl HotReloadController {
    pub fn new(config_dir: PathBuf, plugins_dir: PathBuf, debounce_ms: u64) -> Self {
        Self {
            config_dir,
            plugins_dir,
            debounce: Duration::from_millis(debounce_ms),
        }
    }

    /// Watch both trees until cancelled. Events are batched: the batch
    /// settles once no new event arrives for the debounce window.
    pub async fn run(&self, hooks: std::sync::Arc<dyn ReloadHooks>, cancel: CancellationToken) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Event>();

        let mut watcher = notify::recommended_watcher(move |result| match result {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => tracing::warn!(error = %e, "filesystem watch error"),
        })
        .map_err(|e| mb_domain::Error::Other(format!("failed to create watcher: {e}")))?;

        let mut watched = 0;
        for dir in [&self.config_dir, &self.plugins_dir] {
            if dir.exists() {
                watcher
                    .watch(dir, RecursiveMode::Recursive)
                    .map_err(|e| {
                        mb_domain::Error::Other(format!("failed to watch {}: {e}", dir.display()))
                    })?;
                watched += 1;
            } else {
                tracing::warn!(dir = %dir.display(), "watch path does not exist, skipping");
            }
        }
        if watched == 0 {
            tracing::warn!("hot reload has no valid paths to watch");
            return Ok(());
        }
        tracing::info!(
            config_dir = %self.config_dir.display(),
            plugins_dir = %self.plugins_dir.display(),
            debounce_ms = self.debounce.as_millis() as u64,
            "hot reload watching"
        );

        loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let mut batch: Vec<notify::Event> = vec![first];
            // Extend the window while events keep arriving.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    event = rx.recv() => match event {
                        Some(event) => batch.push(event),
                        None => break,
                    },
                    _ = tokio::time::sleep(self.debounce) => break,
                }
            }

            self.dispatch_batch(batch, hooks.as_ref()).await;
        }

        tracing::info!("hot reload controller stopped");
        Ok(())
    }

    /// Route one settled batch, deduplicating paths.
    pub async fn dispatch_batch(&self, batch: Vec<notify::Event>, hooks: &dyn ReloadHooks) {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        for event in batch {
            let removed = matches!(event.kind, notify::EventKind::Remove(_));
            for path in event.paths {
                if !seen.insert(path.clone()) {
                    continue;
                }
                if removed {
                    tracing::info!(path = %path.display(), "watched file deleted, ignoring");
                    continue;
                }
                match classify_path(&path, &self.config_dir, &self.plugins_dir) {
                    Some(ChangeKind::Config { bot_id, path }) => {
                        tracing::info!(bot_id = %bot_id, path = %path.display(), "config change detected");
                        hooks.on_config_change(&bot_id, &path).await;
                    }
                    Some(ChangeKind::Plugin { plugin_name, path }) => {
                        tracing::info!(plugin = %plugin_name, path = %path.display(), "plugin change detected");
                        hooks.on_plugin_change(&plugin_name, &path).await;
                    }
                    None => {}
                }
            }
        }
    }
}

/// Decide what a changed path means. Hidden files, backup files, and
/// `_`-prefixed plugin files are ignored.
pub fn classify_path(path: &Path, config_dir: &Path, plugins_dir: &Path) -> Option<ChangeKind> {
    let file_name = path.file_name()?.to_str()?;
    if file_name.starts_with('.') || file_name.ends_with('~') {
        return None;
    }

    let extension = path.extension().and_then(|e| e.to_str())?;
    let stem = path.file_stem()?.to_str()?;

    match extension {
        "yaml" | "yml" if path.starts_with(config_dir) => Some(ChangeKind::Config {
            bot_id: stem.to_string(),
            path: path.to_path_buf(),
        }),
        "toml" if path.starts_with(plugins_dir) => {
            if stem.starts_with('_') {
                return None;
            }
            // Package-style plugins keep their name on the directory.
            let plugin_name = if stem == "plugin" {
                path.parent()?.file_name()?.to_str()?.to_string()
            } else {
                stem.to_string()
            };
            Some(ChangeKind::Plugin {
                plugin_name,
                path: path.to_path_buf(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingHooks {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReloadHooks for RecordingHooks {
        async fn on_config_change(&self, bot_id: &str, _path: &Path) {
            self.calls.lock().push(format!("config:{bot_id}"));
        }
        async fn on_plugin_change(&self, plugin_name: &str, _path: &Path) {
            self.calls.lock().push(format!("plugin:{plugin_name}"));
        }
    }

    fn dirs() -> (PathBuf, PathBuf) {
        (PathBuf::from("/etc/multibot/bots"), PathBuf::from("/etc/multibot/plugins"))
    }

    #[test]
    fn classifies_config_and_plugin_paths() {
        let (config_dir, plugins_dir) = dirs();

        let change = classify_path(
            &config_dir.join("support_bot.yaml"),
            &config_dir,
            &plugins_dir,
        )
        .unwrap();
        assert_eq!(
            change,
            ChangeKind::Config {
                bot_id: "support_bot".into(),
                path: config_dir.join("support_bot.yaml"),
            }
        );

        let change = classify_path(
            &plugins_dir.join("horoscope.toml"),
            &config_dir,
            &plugins_dir,
        )
        .unwrap();
        assert!(matches!(
            change,
            ChangeKind::Plugin { plugin_name, .. } if plugin_name == "horoscope"
        ));
    }

    #[test]
    fn package_entry_point_names_the_directory() {
        let (config_dir, plugins_dir) = dirs();
        let change = classify_path(
            &plugins_dir.join("horoscope/plugin.toml"),
            &config_dir,
            &plugins_dir,
        )
        .unwrap();
        assert!(matches!(
            change,
            ChangeKind::Plugin { plugin_name, .. } if plugin_name == "horoscope"
        ));
    }

    #[test]
    fn ignores_hidden_backup_underscore_and_foreign_paths() {
        let (config_dir, plugins_dir) = dirs();
        assert!(classify_path(&config_dir.join(".hidden.yaml"), &config_dir, &plugins_dir).is_none());
        assert!(classify_path(&config_dir.join("a.yaml~"), &config_dir, &plugins_dir).is_none());
        assert!(classify_path(&plugins_dir.join("_wip.toml"), &config_dir, &plugins_dir).is_none());
        assert!(classify_path(&config_dir.join("notes.txt"), &config_dir, &plugins_dir).is_none());
        // A yaml outside the config tree is not a bot config.
        assert!(classify_path(
            &PathBuf::from("/tmp/other.yaml"),
            &config_dir,
            &plugins_dir
        )
        .is_none());
    }

    #[tokio::test]
    async fn batch_routing_dedupes_and_skips_deletions() {
        let (config_dir, plugins_dir) = dirs();
        let controller = HotReloadController::new(config_dir.clone(), plugins_dir.clone(), 10);
        let hooks = RecordingHooks::default();

        let modify = |path: PathBuf| notify::Event {
            kind: notify::EventKind::Modify(notify::event::ModifyKind::Any),
            paths: vec![path],
            attrs: Default::default(),
        };
        let remove = |path: PathBuf| notify::Event {
            kind: notify::EventKind::Remove(notify::event::RemoveKind::Any),
            paths: vec![path],
            attrs: Default::default(),
        };

        controller
            .dispatch_batch(
                vec![
                    modify(config_dir.join("a.yaml")),
                    modify(config_dir.join("a.yaml")), // duplicate
                    modify(plugins_dir.join("billing.toml")),
                    remove(config_dir.join("gone.yaml")),
                ],
                &hooks,
            )
            .await;

        let calls = hooks.calls.lock().clone();
        assert_eq!(calls, vec!["config:a", "plugin:billing"]);
    }

    #[tokio::test]
    async fn run_exits_on_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        let controller = HotReloadController::new(
            tmp.path().join("bots"),
            tmp.path().join("plugins"),
            10,
        );
        std::fs::create_dir_all(tmp.path().join("bots")).unwrap();
        std::fs::create_dir_all(tmp.path().join("plugins")).unwrap();

        let hooks = Arc::new(RecordingHooks::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        controller.run(hooks, cancel).await.unwrap();
    }
}
