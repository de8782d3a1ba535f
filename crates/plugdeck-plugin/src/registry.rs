//! In-memory plugin registry with persisted enable state.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use plugdeck_core::{HostError, HostResult, KvStore, Value};

use crate::descriptor::PluginDescriptor;
use crate::id::AliasTable;
use crate::manifest::{PluginKind, StudentColumn};

/// Key-value key holding a plugin's enable flag.
pub fn enabled_key(id: &str) -> String {
    format!("plugins.enabled.{id}")
}

/// Ordered set of descriptors plus the alias table derived from them.
pub struct PluginRegistry {
    plugins: IndexMap<String, PluginDescriptor>,
    aliases: AliasTable,
    kv: Arc<dyn KvStore>,
}

impl PluginRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            plugins: IndexMap::new(),
            aliases: AliasTable::new(),
            kv,
        }
    }

    /// Replace every descriptor, keeping the given order. Enable flags come
    /// from the key-value store.
    pub fn replace_all(&mut self, descriptors: Vec<PluginDescriptor>) {
        self.plugins.clear();
        for mut descriptor in descriptors {
            descriptor.enabled = self.stored_enabled(&descriptor.id);
            self.plugins.insert(descriptor.id.clone(), descriptor);
        }
        self.rebuild_aliases();
    }

    /// Insert or replace one descriptor.
    pub fn upsert(&mut self, mut descriptor: PluginDescriptor) {
        descriptor.enabled = self.stored_enabled(&descriptor.id);
        self.plugins.insert(descriptor.id.clone(), descriptor);
        self.rebuild_aliases();
    }

    /// Drop a descriptor; the alias table forgets its keys.
    pub fn remove(&mut self, id: &str) -> Option<PluginDescriptor> {
        let removed = self.plugins.shift_remove(id);
        if removed.is_some() {
            self.rebuild_aliases();
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(id)
    }

    /// Descriptor for any human-facing key.
    pub fn resolve(&self, key: &str) -> Option<&PluginDescriptor> {
        self.aliases.resolve(key).and_then(|id| self.plugins.get(id))
    }

    pub fn canonicalize(&self, key: &str) -> String {
        self.aliases.canonicalize(key)
    }

    /// Resolve a key or fail with not-found.
    pub fn require(&self, key: &str) -> HostResult<&PluginDescriptor> {
        self.resolve(key)
            .ok_or_else(|| HostError::not_found("Plugin", key))
    }

    pub fn list(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.values()
    }

    pub fn list_kind(&self, kind: PluginKind) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.values().filter(move |p| p.kind == kind)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.values().filter(|p| p.enabled)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Persist and apply a plugin's enable flag.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> HostResult<()> {
        let descriptor = self
            .plugins
            .get_mut(id)
            .ok_or_else(|| HostError::not_found("Plugin", id))?;
        self.kv.set(&enabled_key(id), Value::Bool(enabled))?;
        descriptor.enabled = enabled;
        Ok(())
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.plugins.get(id).is_some_and(|p| p.enabled)
    }

    /// Student table columns of enabled plugins; the first provider of a
    /// column key wins.
    pub fn student_columns(&self) -> Vec<(String, StudentColumn)> {
        let mut seen = HashSet::new();
        let mut columns = vec![];
        for plugin in self.enabled() {
            for column in &plugin.manifest.student_columns {
                if seen.insert(column.key.clone()) {
                    columns.push((plugin.id.clone(), column.clone()));
                }
            }
        }
        columns
    }

    /// Plugins declaring `id` as a plugin dependency.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.plugins
            .values()
            .filter(|p| {
                p.manifest
                    .dependencies
                    .iter()
                    .any(|dep| self.aliases.canonicalize(dep) == id)
            })
            .map(|p| p.id.clone())
            .collect()
    }

    fn stored_enabled(&self, id: &str) -> bool {
        self.kv.get_bool(&enabled_key(id)).unwrap_or(true)
    }

    fn rebuild_aliases(&mut self) {
        self.aliases = AliasTable::build(
            self.plugins
                .values()
                .map(|p| (p.id.as_str(), p.keys())),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PluginManifest;
    use plugdeck_core::MemoryStore;
    use std::path::Path;

    fn descriptor(json: &str) -> PluginDescriptor {
        let manifest = PluginManifest::from_json_str(json, Path::new("plugin.json")).unwrap();
        PluginDescriptor::from_manifest(Path::new("/plugins/x"), manifest, json.as_bytes())
    }

    fn registry() -> (PluginRegistry, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        let mut registry = PluginRegistry::new(kv.clone());
        registry.replace_all(vec![
            descriptor(r#"{"name":"Class Bell","aliases":["bell"],"studentColumns":[{"key":"score","label":"Score"}]}"#),
            descriptor(r#"{"name":"Roll Call","dependencies":["bell"],"studentColumns":[{"key":"score","label":"Points"},"seat"]}"#),
        ]);
        (registry, kv)
    }

    #[test]
    fn test_resolve_through_aliases() {
        let (registry, _) = registry();
        assert_eq!(registry.resolve("bell").map(|p| p.id.as_str()), Some("class-bell"));
        assert_eq!(registry.canonicalize("Roll Call"), "roll-call");
        assert!(registry.require("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_enable_state_persists() {
        let (mut registry, kv) = registry();
        assert!(registry.is_enabled("class-bell"));
        registry.set_enabled("class-bell", false).unwrap();
        assert_eq!(kv.get_bool("plugins.enabled.class-bell"), Some(false));

        // A fresh scan picks the stored flag back up.
        let again: Vec<_> = registry.list().cloned().collect();
        registry.replace_all(again);
        assert!(!registry.is_enabled("class-bell"));
    }

    #[test]
    fn test_student_columns_first_provider_wins() {
        let (registry, _) = registry();
        let columns = registry.student_columns();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].0, "class-bell");
        assert_eq!(columns[0].1.label, "Score");
        assert_eq!(columns[1].1.key, "seat");
    }

    #[test]
    fn test_dependents_of() {
        let (registry, _) = registry();
        assert_eq!(registry.dependents_of("class-bell"), vec!["roll-call"]);
        assert!(registry.dependents_of("roll-call").is_empty());
    }
}
