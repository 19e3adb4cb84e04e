//! Builtin plugins: the default handler set every bot can rely on.

pub mod billing;
pub mod error_handler;
pub mod help;
pub mod start;

use mb_domain::Result;

use crate::registry::PluginRegistry;

/// Register every builtin plugin.
pub fn register_all(registry: &PluginRegistry) -> Result<()> {
    registry.register(start::DESCRIPTOR, start::factory())?;
    registry.register(help::DESCRIPTOR, help::factory())?;
    registry.register(error_handler::DESCRIPTOR, error_handler::factory())?;
    registry.register(billing::DESCRIPTOR, billing::factory())?;
    Ok(())
}
