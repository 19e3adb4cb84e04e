//! Plugin system: the plugin contract, the process-wide registry with
//! dependency resolution, the manifest loader, and the builtin plugins.

pub mod builtin;
pub mod loader;
pub mod plugin;
pub mod registry;

pub use loader::{DiscoveryReport, PluginLoader, PluginManifest};
pub use plugin::{Plugin, PluginContext, PluginDescriptor, PluginFactory};
pub use registry::PluginRegistry;
