//! Plugin manifest parsing and normalization.
//!
//! Manifests in the wild are loose: capability lists come as arrays of ids,
//! arrays of objects or id-keyed objects; package dependencies as a
//! `name → version` map or as `name@version` strings. The raw shapes below
//! accept all of them and are folded into one [`PluginManifest`].

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use plugdeck_core::{HostError, HostResult, Value};
use serde::{Deserialize, Serialize};

/// Manifest file names, in lookup order.
pub const MANIFEST_FILES: &[&str] = &["plugin.json", "plugin.toml"];

/// Kind of plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Code unit with functions, hooks and timers.
    #[default]
    Plugin,
    /// UI component rendered from an HTML entry.
    Component,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plugin => write!(f, "plugin"),
            Self::Component => write!(f, "component"),
        }
    }
}

/// An action or behavior a plugin provides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub name: String,
    /// Function invoked on the provider.
    pub target: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A variable a plugin can resolve for `${plugin:variable}` interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub key: String,
    pub name: String,
    /// Getter function; the plugin's `getVariable` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

/// A column contributed to the host's student table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentColumn {
    pub key: String,
    pub label: String,
}

/// An event a plugin offers as an automation action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationEventDecl {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Function invoked when the event runs; defaults to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

impl AutomationEventDecl {
    pub fn target(&self) -> &str {
        self.function.as_deref().unwrap_or(&self.id)
    }
}

/// Normalized manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Declared id exactly as written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub kind: PluginKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub behaviors: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<VariableDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
    /// Plugin ids this plugin depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Store packages: name → version range.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub packages: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub student_columns: Vec<StudentColumn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub automation_events: Vec<AutomationEventDecl>,
    /// Functions the plugin declares up front.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<String>,
    /// Lifecycle hook → function name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub hooks: IndexMap<String, String>,
}

impl PluginManifest {
    /// Parse a `plugin.json` body.
    pub fn from_json_str(text: &str, path: &Path) -> HostResult<Self> {
        let raw: RawManifest = serde_json::from_str(text).map_err(|e| HostError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        raw.normalize(path)
    }

    /// Parse a `plugin.toml` body.
    pub fn from_toml_str(text: &str, path: &Path) -> HostResult<Self> {
        let raw: RawManifest = toml::from_str(text).map_err(|e| HostError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        raw.normalize(path)
    }

    /// Load the manifest of a plugin directory, if it has one. Also returns
    /// the raw bytes, which seed the fallback id.
    pub fn load(dir: &Path) -> HostResult<Option<(Self, Vec<u8>)>> {
        let Some(path) = manifest_path(dir) else {
            return Ok(None);
        };
        let bytes = fs::read(&path).map_err(|e| HostError::io(&path, e))?;
        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim_start_matches('\u{feff}');

        let manifest = if path.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml_str(text, &path)?
        } else {
            Self::from_json_str(text, &path)?
        };
        Ok(Some((manifest, bytes)))
    }

    /// Hook function for a lifecycle hook name, if declared.
    pub fn hook_function(&self, hook: &str) -> Option<&str> {
        self.hooks.get(hook).map(String::as_str)
    }

    /// Whether this plugin declares `id` in the given capability list.
    pub fn capability(&self, list: &[Capability], id: &str) -> Option<Capability> {
        list.iter().find(|c| c.id == id).cloned()
    }
}

/// Path of the manifest file inside `dir`.
pub fn manifest_path(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

// ==================== Raw shapes ====================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCapabilityEntry {
    Id(String),
    Full {
        #[serde(default)]
        id: Option<String>,
        #[serde(default, alias = "label", alias = "title")]
        name: Option<String>,
        #[serde(default, alias = "fn", alias = "function", alias = "handler")]
        target: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCapabilities {
    List(Vec<RawCapabilityEntry>),
    Map(IndexMap<String, RawCapabilityEntry>),
}

impl RawCapabilities {
    fn normalize(self) -> Vec<Capability> {
        let entries: Vec<(Option<String>, RawCapabilityEntry)> = match self {
            Self::List(list) => list.into_iter().map(|e| (None, e)).collect(),
            Self::Map(map) => map.into_iter().map(|(k, e)| (Some(k), e)).collect(),
        };

        entries
            .into_iter()
            .filter_map(|(key, entry)| match entry {
                // In the map form a string value is the target function.
                RawCapabilityEntry::Id(s) => match key {
                    Some(id) => Some(Capability {
                        name: id.clone(),
                        id,
                        target: s,
                        description: String::new(),
                    }),
                    None => Some(Capability {
                        name: s.clone(),
                        target: s.clone(),
                        id: s,
                        description: String::new(),
                    }),
                },
                RawCapabilityEntry::Full {
                    id,
                    name,
                    target,
                    description,
                } => {
                    let id = id.or(key).filter(|s| !s.trim().is_empty())?;
                    Some(Capability {
                        name: name.unwrap_or_else(|| id.clone()),
                        target: target.unwrap_or_else(|| id.clone()),
                        id,
                        description: description.unwrap_or_default(),
                    })
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawVariableEntry {
    Key(String),
    Full {
        #[serde(default, alias = "id")]
        key: Option<String>,
        #[serde(default, alias = "label", alias = "title")]
        name: Option<String>,
        #[serde(default, alias = "fn", alias = "getter")]
        function: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawVariables {
    List(Vec<RawVariableEntry>),
    Map(IndexMap<String, RawVariableEntry>),
}

impl RawVariables {
    fn normalize(self) -> Vec<VariableDecl> {
        let entries: Vec<(Option<String>, RawVariableEntry)> = match self {
            Self::List(list) => list.into_iter().map(|e| (None, e)).collect(),
            Self::Map(map) => map.into_iter().map(|(k, e)| (Some(k), e)).collect(),
        };

        entries
            .into_iter()
            .filter_map(|(key, entry)| match entry {
                RawVariableEntry::Key(s) => match key {
                    // `{ "temp": "Temperature" }`: the value is a label.
                    Some(k) => Some(VariableDecl {
                        key: k,
                        name: s,
                        function: None,
                    }),
                    None => Some(VariableDecl {
                        name: s.clone(),
                        key: s,
                        function: None,
                    }),
                },
                RawVariableEntry::Full {
                    key: k,
                    name,
                    function,
                } => {
                    let k = k.or(key).filter(|s| !s.trim().is_empty())?;
                    Some(VariableDecl {
                        name: name.unwrap_or_else(|| k.clone()),
                        key: k,
                        function,
                    })
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependencies {
    List(Vec<String>),
    Map(IndexMap<String, Value>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPackages {
    Map(IndexMap<String, String>),
    List(Vec<String>),
}

impl RawPackages {
    fn normalize(self) -> IndexMap<String, String> {
        match self {
            Self::Map(map) => map,
            Self::List(list) => list.iter().map(|spec| split_package_spec(spec)).collect(),
        }
    }
}

/// Split `name@range` (scoped names keep their leading `@`).
pub fn split_package_spec(spec: &str) -> (String, String) {
    let spec = spec.trim();
    match spec.rfind('@') {
        Some(at) if at > 0 => (spec[..at].to_string(), spec[at + 1..].to_string()),
        _ => (spec.to_string(), "*".to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawColumnEntry {
    Key(String),
    Full {
        #[serde(alias = "id")]
        key: String,
        #[serde(default, alias = "title", alias = "name")]
        label: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEventEntry {
    Id(String),
    Full {
        #[serde(alias = "key")]
        id: String,
        #[serde(default, alias = "label", alias = "title")]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default, alias = "fn")]
        function: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawHooks {
    List(Vec<String>),
    Map(IndexMap<String, String>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type", alias = "kind")]
    kind: Option<String>,
    #[serde(default, alias = "main")]
    entry: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "alias")]
    aliases: Option<OneOrMany>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    actions: Option<RawCapabilities>,
    #[serde(default)]
    behaviors: Option<RawCapabilities>,
    #[serde(default)]
    variables: Option<RawVariables>,
    #[serde(default, alias = "config_schema")]
    config_schema: Option<Value>,
    #[serde(default)]
    dependencies: Option<RawDependencies>,
    #[serde(default, alias = "npm_dependencies")]
    npm_dependencies: Option<RawPackages>,
    #[serde(default)]
    packages: Option<RawPackages>,
    #[serde(default, alias = "student_columns")]
    student_columns: Option<Vec<RawColumnEntry>>,
    #[serde(default, alias = "automation_events")]
    automation_events: Option<Vec<RawEventEntry>>,
    #[serde(default)]
    functions: Option<Vec<String>>,
    #[serde(default)]
    hooks: Option<RawHooks>,
}

impl RawManifest {
    fn normalize(self, path: &Path) -> HostResult<PluginManifest> {
        let name = self
            .name
            .clone()
            .or_else(|| self.id.clone())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HostError::Manifest {
                path: path.to_path_buf(),
                message: "manifest needs a name or an id".to_string(),
            })?;

        let entry = self.entry.filter(|e| !e.trim().is_empty());
        let html_entry = entry.as_deref().is_some_and(|e| {
            let e = e.to_ascii_lowercase();
            e.ends_with(".html") || e.ends_with(".htm")
        });
        let kind = match self.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("component") => PluginKind::Component,
            _ if html_entry => PluginKind::Component,
            _ => PluginKind::Plugin,
        };

        let mut packages = IndexMap::new();
        if let Some(npm) = self.npm_dependencies {
            packages.extend(npm.normalize());
        }
        if let Some(extra) = self.packages {
            packages.extend(extra.normalize());
        }

        let hooks = match self.hooks {
            Some(RawHooks::List(list)) => list.into_iter().map(|h| (h.clone(), h)).collect(),
            Some(RawHooks::Map(map)) => map,
            None => IndexMap::new(),
        };

        Ok(PluginManifest {
            id: self.id.filter(|s| !s.trim().is_empty()),
            name,
            kind,
            entry,
            version: self.version.unwrap_or_else(|| "0.0.0".to_string()),
            description: self.description.unwrap_or_default(),
            aliases: self.aliases.map(OneOrMany::into_vec).unwrap_or_default(),
            group: self.group,
            actions: self.actions.map(RawCapabilities::normalize).unwrap_or_default(),
            behaviors: self.behaviors.map(RawCapabilities::normalize).unwrap_or_default(),
            variables: self.variables.map(RawVariables::normalize).unwrap_or_default(),
            config_schema: self.config_schema,
            dependencies: match self.dependencies {
                Some(RawDependencies::List(list)) => list,
                Some(RawDependencies::Map(map)) => map.into_keys().collect(),
                None => vec![],
            },
            packages,
            student_columns: self
                .student_columns
                .unwrap_or_default()
                .into_iter()
                .map(|c| match c {
                    RawColumnEntry::Key(key) => StudentColumn {
                        label: key.clone(),
                        key,
                    },
                    RawColumnEntry::Full { key, label } => StudentColumn {
                        label: label.unwrap_or_else(|| key.clone()),
                        key,
                    },
                })
                .collect(),
            automation_events: self
                .automation_events
                .unwrap_or_default()
                .into_iter()
                .map(|e| match e {
                    RawEventEntry::Id(id) => AutomationEventDecl {
                        name: id.clone(),
                        id,
                        description: String::new(),
                        function: None,
                    },
                    RawEventEntry::Full {
                        id,
                        name,
                        description,
                        function,
                    } => AutomationEventDecl {
                        name: name.unwrap_or_else(|| id.clone()),
                        id,
                        description: description.unwrap_or_default(),
                        function,
                    },
                })
                .collect(),
            functions: self.functions.unwrap_or_default(),
            hooks,
        })
    }
}
