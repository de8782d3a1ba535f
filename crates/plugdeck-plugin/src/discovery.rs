//! Filesystem discovery of plugins and components.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use plugdeck_core::HostConfig;

use crate::descriptor::PluginDescriptor;
use crate::manifest::PluginKind;

/// Nested component directory inside a plugin.
pub const COMPONENTS_DIR: &str = "components";

/// Scans the plugins and components roots.
#[derive(Debug, Clone)]
pub struct Discovery {
    plugins_root: PathBuf,
    components_root: PathBuf,
}

impl Discovery {
    pub fn new(plugins_root: impl Into<PathBuf>, components_root: impl Into<PathBuf>) -> Self {
        Self {
            plugins_root: plugins_root.into(),
            components_root: components_root.into(),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(&config.plugins_root, &config.components_root)
    }

    /// Scan both roots. Order: plugins by directory name, then components
    /// nested in those plugins, then global components. Unreadable manifests
    /// are logged and skipped.
    pub fn scan(&self) -> Vec<PluginDescriptor> {
        let mut seen = Seen::default();
        let mut found = vec![];

        let plugin_dirs = sorted_subdirs(&self.plugins_root);
        for dir in &plugin_dirs {
            if let Some(descriptor) = load(dir) {
                seen.admit(descriptor, &mut found);
            }
        }

        for dir in &plugin_dirs {
            let Some(parent) = found
                .iter()
                .find(|p: &&PluginDescriptor| &p.dir == dir && p.parent.is_none())
                .map(|p| p.id.clone())
            else {
                continue;
            };
            for nested in sorted_subdirs(&dir.join(COMPONENTS_DIR)) {
                if let Some(mut descriptor) = load(&nested) {
                    descriptor.kind = PluginKind::Component;
                    descriptor.parent = Some(parent.clone());
                    seen.admit(descriptor, &mut found);
                }
            }
        }

        for dir in sorted_subdirs(&self.components_root) {
            if let Some(mut descriptor) = load(&dir) {
                descriptor.kind = PluginKind::Component;
                seen.admit(descriptor, &mut found);
            }
        }

        tracing::debug!(count = found.len(), "discovered plugins");
        found
    }
}

#[derive(Default)]
struct Seen {
    ids: HashSet<String>,
    entry_urls: HashSet<String>,
    name_groups: HashSet<(String, Option<String>)>,
}

impl Seen {
    fn admit(&mut self, descriptor: PluginDescriptor, found: &mut Vec<PluginDescriptor>) {
        if self.ids.contains(&descriptor.id) {
            tracing::warn!(id = %descriptor.id, dir = %descriptor.dir.display(), "duplicate plugin id, skipping");
            return;
        }
        if let Some(url) = &descriptor.entry_url {
            if self.entry_urls.contains(url) {
                tracing::debug!(id = %descriptor.id, "entry already registered, skipping");
                return;
            }
        }
        let name_group = (descriptor.manifest.name.clone(), descriptor.manifest.group.clone());
        if descriptor.is_component() && self.name_groups.contains(&name_group) {
            tracing::debug!(id = %descriptor.id, "component name already registered in group, skipping");
            return;
        }

        self.ids.insert(descriptor.id.clone());
        if let Some(url) = &descriptor.entry_url {
            self.entry_urls.insert(url.clone());
        }
        if descriptor.is_component() {
            self.name_groups.insert(name_group);
        }
        found.push(descriptor);
    }
}

fn load(dir: &Path) -> Option<PluginDescriptor> {
    match PluginDescriptor::load(dir) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "skipping plugin with unreadable manifest");
            None
        }
    }
}

fn sorted_subdirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        return vec![];
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| {
            !e.file_name().to_string_lossy().starts_with('.') && e.path().is_dir()
        })
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, manifest: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("plugin.json"), manifest).unwrap();
    }

    #[test]
    fn test_scan_order_and_dedupe() {
        let tmp = TempDir::new().unwrap();
        let plugins = tmp.path().join("plugins");
        let components = tmp.path().join("components");

        write(&plugins.join("b-roll"), r#"{"name":"Roll Call"}"#);
        write(&plugins.join("a-bell"), r#"{"name":"Class Bell"}"#);
        write(&plugins.join("c-dup"), r#"{"id":"class-bell","name":"Imposter"}"#);
        write(
            &plugins.join("a-bell").join("components").join("clock"),
            r#"{"name":"Clock","group":"widgets","entry":"index.html"}"#,
        );
        write(&components.join("clock2"), r#"{"name":"Clock","group":"widgets","entry":"index.html"}"#);
        write(&components.join("weather"), r#"{"name":"Weather","entry":"index.html"}"#);
        fs::create_dir_all(plugins.join("no-manifest")).unwrap();
        write(&plugins.join("broken"), "{not json");

        let discovery = Discovery::new(&plugins, &components);
        let ids: Vec<String> = discovery.scan().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["class-bell", "roll-call", "clock", "weather"]);

        // Same files, same registry.
        let again: Vec<String> = discovery.scan().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, again);
    }

    #[test]
    fn test_nested_component_has_parent() {
        let tmp = TempDir::new().unwrap();
        let plugins = tmp.path().join("plugins");
        write(&plugins.join("bell"), r#"{"name":"Bell"}"#);
        write(&plugins.join("bell").join("components").join("panel"), r#"{"name":"Bell panel"}"#);

        let found = Discovery::new(&plugins, tmp.path().join("none")).scan();
        let panel = found.iter().find(|d| d.id == "bell-panel").unwrap();
        assert_eq!(panel.parent.as_deref(), Some("bell"));
        assert_eq!(panel.kind, PluginKind::Component);
    }
}
