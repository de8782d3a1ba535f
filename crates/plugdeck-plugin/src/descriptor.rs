//! Registry entries.

use std::path::{Path, PathBuf};

use plugdeck_core::{HostError, HostResult};
use serde::{Deserialize, Serialize};

use crate::id::canonical_id;
use crate::manifest::{PluginKind, PluginManifest};

/// Marker file recording where an installed plugin came from.
pub const SOURCE_FILE: &str = ".plugdeck-source.json";

/// Where a plugin's files came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PluginSource {
    /// Copied or unpacked onto disk directly.
    Local,
    /// Installed from the package index.
    Npm { package: String, version: String },
}

impl PluginSource {
    /// Read the source marker of a plugin directory. Plugins without one are
    /// local.
    pub fn read(dir: &Path) -> Self {
        std::fs::read(dir.join(SOURCE_FILE))
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or(Self::Local)
    }

    pub fn write(&self, dir: &Path) -> HostResult<()> {
        let path = dir.join(SOURCE_FILE);
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, bytes).map_err(|e| HostError::io(&path, e))
    }
}

/// A discovered or installed plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    /// Canonical id.
    pub id: String,
    pub kind: PluginKind,
    pub source: PluginSource,
    /// Directory holding the manifest.
    pub dir: PathBuf,
    /// `file://` URL of the entry file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_url: Option<String>,
    /// Owning plugin, for components nested under a plugin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub enabled: bool,
    pub manifest: PluginManifest,
}

impl PluginDescriptor {
    /// Build a descriptor from a parsed manifest living in `dir`.
    pub fn from_manifest(dir: &Path, manifest: PluginManifest, manifest_bytes: &[u8]) -> Self {
        let id = canonical_id(&manifest, manifest_bytes);
        let entry_url = manifest
            .entry
            .as_deref()
            .and_then(|entry| url::Url::from_file_path(dir.join(entry)).ok())
            .map(|url| url.to_string());

        Self {
            id,
            kind: manifest.kind,
            source: PluginSource::read(dir),
            dir: dir.to_path_buf(),
            entry_url,
            parent: None,
            enabled: true,
            manifest,
        }
    }

    /// Load the descriptor of a plugin directory, if it holds a manifest.
    pub fn load(dir: &Path) -> HostResult<Option<Self>> {
        Ok(PluginManifest::load(dir)?
            .map(|(manifest, bytes)| Self::from_manifest(dir, manifest, &bytes)))
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Every human-facing key that should resolve to this plugin.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = vec![self.manifest.name.as_str()];
        if let Some(raw) = self.manifest.id.as_deref() {
            keys.push(raw);
        }
        keys.extend(self.manifest.aliases.iter().map(String::as_str));
        keys
    }

    pub fn is_component(&self) -> bool {
        self.kind == PluginKind::Component
    }

    /// Absolute path of the entry file.
    pub fn entry_path(&self) -> Option<PathBuf> {
        self.manifest.entry.as_deref().map(|entry| self.dir.join(entry))
    }
}
