//! Plugin manifest loader.
//!
//! Plugins are compiled in; what lives on disk is a TOML manifest per
//! plugin that switches it on for the deployment and supplies default
//! config. The loader scans plugin directories, binds each manifest to
//! a registered plugin, and tracks name → path for hot reloads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map, Value};

use mb_domain::{Error, Result};

use crate::registry::PluginRegistry;

/// On-disk manifest for one plugin.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    /// Must name a compiled-in plugin.
    pub name: String,
    /// Deployment-wide switch; a disabled manifest keeps the plugin
    /// out of every bot's graph.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Default config, overlaid by each bot's per-plugin config.
    #[serde(default)]
    pub config: toml::Table,
}

fn d_true() -> bool {
    true
}

impl PluginManifest {
    /// Manifest config as a JSON map, the shape plugin factories eat.
    pub fn config_map(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.config) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

struct LoadedManifest {
    manifest: PluginManifest,
    path: PathBuf,
}

/// Result of scanning one or more plugin directories.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct PluginLoader {
    registry: Arc<PluginRegistry>,
    manifests: RwLock<HashMap<String, LoadedManifest>>,
}

impl PluginLoader {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            manifests: RwLock::new(HashMap::new()),
        }
    }

    /// Load a plugin manifest from a file path and bind it to its
    /// registered plugin.
    pub fn load_plugin(&self, path: &Path) -> Result<String> {
        let manifest = self.read_manifest(path)?;
        let name = manifest.name.clone();
        self.manifests.write().insert(
            name.clone(),
            LoadedManifest {
                manifest,
                path: path.to_path_buf(),
            },
        );
        tracing::info!(plugin = %name, path = %path.display(), "loaded plugin manifest");
        Ok(name)
    }

    /// Re-read a loaded plugin's manifest from its stored path.
    /// Existing plugin instances stay valid but stale; bots listing
    /// the plugin must rebuild their handler graphs.
    pub fn reload_plugin(&self, name: &str) -> Result<()> {
        let path = self
            .manifests
            .read()
            .get(name)
            .map(|m| m.path.clone())
            .ok_or_else(|| Error::PluginLoadFailed {
                path: PathBuf::from(name),
                reason: "plugin not loaded, cannot reload".into(),
            })?;
        let manifest = self.read_manifest(&path)?;
        let reloaded_name = manifest.name.clone();
        let mut manifests = self.manifests.write();
        if reloaded_name != name {
            // The manifest was renamed in place; drop the old binding.
            manifests.remove(name);
        }
        manifests.insert(reloaded_name.clone(), LoadedManifest { manifest, path });
        tracing::info!(plugin = %reloaded_name, "reloaded plugin manifest");
        Ok(())
    }

    pub fn unload_plugin(&self, name: &str) -> bool {
        let removed = self.manifests.write().remove(name).is_some();
        if removed {
            tracing::info!(plugin = name, "unloaded plugin manifest");
        }
        removed
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.manifests.read().contains_key(name)
    }

    pub fn plugin_path(&self, name: &str) -> Option<PathBuf> {
        self.manifests.read().get(name).map(|m| m.path.clone())
    }

    /// Whether a plugin is switched off deployment-wide. Plugins with
    /// no manifest are considered enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.manifests
            .read()
            .get(name)
            .map(|m| m.manifest.enabled)
            .unwrap_or(true)
    }

    /// Manifest default config for a plugin (empty without manifest).
    pub fn default_config(&self, name: &str) -> Map<String, Value> {
        self.manifests
            .read()
            .get(name)
            .map(|m| m.manifest.config_map())
            .unwrap_or_default()
    }

    /// Scan directories for plugin manifests: `*.toml` files not
    /// starting with `_`, plus sub-directories exposing a
    /// `plugin.toml` entry point. One broken manifest never aborts
    /// discovery of the rest.
    pub fn discover(&self, directories: &[PathBuf]) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for dir in directories {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(_) => {
                    tracing::warn!(dir = %dir.display(), "plugin directory not found");
                    continue;
                }
            };

            let mut paths: Vec<PathBuf> = Vec::new();
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if file_name.starts_with('_')
                    || file_name.starts_with('.')
                    || file_name.ends_with('~')
                {
                    continue;
                }
                if path.is_dir() {
                    let entry_point = path.join("plugin.toml");
                    if entry_point.exists() {
                        paths.push(entry_point);
                    }
                } else if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                    paths.push(path);
                }
            }
            paths.sort();

            for path in paths {
                match self.load_plugin(&path) {
                    Ok(name) => report.loaded.push(name),
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "failed to load plugin");
                        report.failed.push((path, e.to_string()));
                    }
                }
            }
        }

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "plugin discovery finished"
        );
        report
    }

    fn read_manifest(&self, path: &Path) -> Result<PluginManifest> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::PluginLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let manifest: PluginManifest =
            toml::from_str(&raw).map_err(|e| Error::PluginLoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if manifest.name.is_empty() {
            return Err(Error::PluginLoadFailed {
                path: path.to_path_buf(),
                reason: "manifest has no plugin name".into(),
            });
        }
        if !self.registry.contains(&manifest.name) {
            return Err(Error::PluginLoadFailed {
                path: path.to_path_buf(),
                reason: format!("no compiled-in plugin named \"{}\"", manifest.name),
            });
        }
        Ok(manifest)
    }
}
