//! Process-wide plugin registry: name → (descriptor, factory), plus
//! topological dependency resolution.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use mb_domain::{Error, Result};

use crate::plugin::{Plugin, PluginContext, PluginDescriptor, PluginFactory};

struct PluginEntry {
    descriptor: PluginDescriptor,
    factory: PluginFactory,
}

/// Central registry for all available plugins. Constructed once at
/// startup and passed by reference; never a runtime singleton.
#[derive(Default)]
pub struct PluginRegistry {
    entries: RwLock<HashMap<String, PluginEntry>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin class. Fails when the descriptor has no name;
    /// replacing an existing registration logs a warning.
    pub fn register(&self, descriptor: PluginDescriptor, factory: PluginFactory) -> Result<()> {
        if descriptor.name.is_empty() {
            return Err(Error::Other("plugin descriptor must have a name".into()));
        }
        let mut entries = self.entries.write();
        if entries.contains_key(descriptor.name) {
            tracing::warn!(plugin = descriptor.name, "replacing existing plugin");
        }
        tracing::debug!(
            plugin = descriptor.name,
            version = descriptor.version,
            "registered plugin"
        );
        entries.insert(
            descriptor.name.to_string(),
            PluginEntry {
                descriptor,
                factory,
            },
        );
        Ok(())
    }

    /// Register the builtin plugin set (start, help, error handler,
    /// billing).
    pub fn register_builtins(&self) -> Result<()> {
        crate::builtin::register_all(self)?;
        tracing::info!(count = self.len(), "builtin plugins registered");
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.entries.write().remove(name).is_some();
        if removed {
            tracing::debug!(plugin = name, "unregistered plugin");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn descriptor(&self, name: &str) -> Result<PluginDescriptor> {
        self.entries
            .read()
            .get(name)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))
    }

    /// All registered descriptors, sorted by name.
    pub fn list(&self) -> Vec<PluginDescriptor> {
        let mut all: Vec<PluginDescriptor> = self
            .entries
            .read()
            .values()
            .map(|e| e.descriptor.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(b.name));
        all
    }

    /// Create a plugin instance with per-bot config and context.
    pub fn create(&self, name: &str, ctx: PluginContext) -> Result<Box<dyn Plugin>> {
        let factory = {
            let entries = self.entries.read();
            let entry = entries
                .get(name)
                .ok_or_else(|| Error::PluginNotFound(name.to_string()))?;
            Arc::clone(&entry.factory)
        };
        factory(ctx)
    }

    /// Topologically order the requested plugins so that every
    /// dependency precedes its dependents. DFS with three colors;
    /// a back edge fails with the offending plugin's name.
    pub fn resolve_dependencies(&self, requested: &[String]) -> Result<Vec<String>> {
        let deps: HashMap<String, Vec<String>> = self
            .entries
            .read()
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    entry
                        .descriptor
                        .dependencies
                        .iter()
                        .map(|d| d.to_string())
                        .collect(),
                )
            })
            .collect();
        topo_sort(requested, &deps)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Visiting,
    Done,
}

fn topo_sort(requested: &[String], deps: &HashMap<String, Vec<String>>) -> Result<Vec<String>> {
    let mut state: HashMap<String, Color> = HashMap::new();
    let mut ordered: Vec<String> = Vec::new();

    fn visit(
        name: &str,
        deps: &HashMap<String, Vec<String>>,
        state: &mut HashMap<String, Color>,
        ordered: &mut Vec<String>,
    ) -> Result<()> {
        match state.get(name) {
            Some(Color::Done) => return Ok(()),
            Some(Color::Visiting) => return Err(Error::PluginCycle(name.to_string())),
            None => {}
        }
        let dependencies = deps
            .get(name)
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))?;

        state.insert(name.to_string(), Color::Visiting);
        for dep in dependencies {
            visit(dep, deps, state, ordered)?;
        }
        state.insert(name.to_string(), Color::Done);
        ordered.push(name.to_string());
        Ok(())
    }

    for name in requested {
        visit(name, deps, &mut state, &mut ordered)?;
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_dispatch::Router;
    use std::sync::Arc;

    fn leak(s: String) -> &'static str {
        Box::leak(s.into_boxed_str())
    }

    struct Stub(PluginDescriptor);

    impl crate::plugin::Plugin for Stub {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.0
        }
        fn register(&self, _router: &mut Router) {}
    }

    fn register_stub(registry: &PluginRegistry, name: &'static str, deps: &'static [&'static str]) {
        let descriptor = PluginDescriptor {
            name,
            description: "",
            version: "1.0.0",
            dependencies: deps,
            supports_hot_reload: true,
        };
        let for_factory = descriptor.clone();
        registry
            .register(
                descriptor,
                Arc::new(move |_ctx| Ok(Box::new(Stub(for_factory.clone())) as Box<dyn Plugin>)),
            )
            .unwrap();
    }

    #[test]
    fn register_and_create() {
        let registry = PluginRegistry::new();
        register_stub(&registry, "alpha", &[]);
        assert!(registry.contains("alpha"));
        assert_eq!(registry.descriptor("alpha").unwrap().name, "alpha");

        let plugin = registry
            .create("alpha", PluginContext::new("bot", Default::default()))
            .unwrap();
        assert_eq!(plugin.descriptor().name, "alpha");
    }

    #[test]
    fn unknown_plugin_is_typed_error() {
        let registry = PluginRegistry::new();
        match registry.create("ghost", PluginContext::new("bot", Default::default())) {
            Err(Error::PluginNotFound(name)) => assert_eq!(name, "ghost"),
            Err(other) => panic!("expected PluginNotFound, got {other:?}"),
            Ok(_) => panic!("expected PluginNotFound, got Ok"),
        }
    }

    #[test]
    fn empty_name_rejected() {
        let registry = PluginRegistry::new();
        let descriptor = PluginDescriptor {
            name: "",
            description: "",
            version: "1.0.0",
            dependencies: &[],
            supports_hot_reload: true,
        };
        let d = descriptor.clone();
        let result = registry.register(
            descriptor,
            Arc::new(move |_| Ok(Box::new(Stub(d.clone())) as Box<dyn Plugin>)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn dependencies_precede_dependents() {
        let registry = PluginRegistry::new();
        register_stub(&registry, "base", &[]);
        register_stub(&registry, "middle", &["base"]);
        register_stub(&registry, "top", &["middle", "base"]);

        let ordered = registry
            .resolve_dependencies(&["top".into(), "middle".into()])
            .unwrap();

        let index = |name: &str| ordered.iter().position(|n| n == name).unwrap();
        assert!(index("base") < index("middle"));
        assert!(index("middle") < index("top"));
        // Each plugin appears once even when reachable twice.
        assert_eq!(ordered.len(), 3);
    }

    #[test]
    fn resolution_is_idempotent_on_resolved_list() {
        let registry = PluginRegistry::new();
        register_stub(&registry, "base", &[]);
        register_stub(&registry, "top", &["base"]);

        let once = registry.resolve_dependencies(&["top".into()]).unwrap();
        let twice = registry.resolve_dependencies(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn cycle_is_detected_and_named() {
        let registry = PluginRegistry::new();
        // Leaked names keep the descriptor 'static in this test.
        register_stub(&registry, leak("a".into()), &["b"]);
        register_stub(&registry, leak("b".into()), &["a"]);

        match registry.resolve_dependencies(&["a".into()]) {
            Err(Error::PluginCycle(name)) => assert!(name == "a" || name == "b"),
            other => panic!("expected PluginCycle, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_fails_with_plugin_not_found() {
        let registry = PluginRegistry::new();
        register_stub(&registry, "lonely", &["missing"]);
        match registry.resolve_dependencies(&["lonely".into()]) {
            Err(Error::PluginNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("expected PluginNotFound, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let registry = PluginRegistry::new();
        register_stub(&registry, "selfish", &["selfish"]);
        assert!(matches!(
            registry.resolve_dependencies(&["selfish".into()]),
            Err(Error::PluginCycle(_))
        ));
    }
}
