//! Installing plugins from archives or the package index, and uninstalling
//! them.

use std::path::{Path, PathBuf};

use plugdeck_core::{HostError, HostResult};
use plugdeck_packages::{VersionSpec, fsops, unpack_bytes, unpack_file};
use serde::Serialize;
use serde_json::json;
use tempfile::TempDir;

use crate::descriptor::{PluginDescriptor, PluginSource};
use crate::events::{PLUGIN_INSTALLED, PLUGIN_UNINSTALLED};
use crate::host::LifecycleHook;
use crate::manager::{Activation, PluginManager};
use crate::manifest::manifest_path;

/// An installed plugin and how its activation went.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Installed {
    pub plugin: PluginDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation: Option<Activation>,
    /// Activation error; the files stay installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginManager {
    fn staging_dir(&self) -> HostResult<TempDir> {
        let root = &self.context().config().plugins_root;
        std::fs::create_dir_all(root).map_err(|e| HostError::io(root, e))?;
        tempfile::Builder::new()
            .prefix(".install-")
            .tempdir_in(root)
            .map_err(|e| HostError::io(root, e))
    }

    /// Install a `.zip`/`.tar*` plugin archive.
    pub async fn install_archive(&self, archive: &Path) -> HostResult<Installed> {
        let staging = self.staging_dir()?;
        let source = archive.to_path_buf();
        let dest = staging.path().to_path_buf();
        tokio::task::spawn_blocking(move || unpack_file(&source, &dest))
            .await
            .map_err(|e| HostError::Io {
                path: archive.to_path_buf(),
                source: std::io::Error::other(e),
            })??;

        self.install_staged(staging.path(), PluginSource::Local).await
    }

    /// Download a plugin published on the package index and install it.
    pub async fn install_from_index(&self, package: &str, range: &str) -> HostResult<Installed> {
        let index = self.resolver().index().clone();
        let version = index.resolve(package, &VersionSpec::parse(range)).await?;
        let bytes = index.download(package, &version).await?;

        let staging = self.staging_dir()?;
        let dest = staging.path().to_path_buf();
        tokio::task::spawn_blocking(move || unpack_bytes(&bytes, &dest))
            .await
            .map_err(|e| HostError::Download {
                package: package.to_string(),
                message: format!("unpack task failed: {e}"),
            })??;

        let source = PluginSource::Npm {
            package: package.to_string(),
            version,
        };
        self.install_staged(staging.path(), source).await
    }

    async fn install_staged(&self, staged: &Path, source: PluginSource) -> HostResult<Installed> {
        let content = locate_manifest_dir(staged).ok_or_else(|| HostError::Manifest {
            path: staged.to_path_buf(),
            message: "archive holds no plugin.json or plugin.toml".to_string(),
        })?;
        let id = PluginDescriptor::load(&content)?
            .map(|d| d.id)
            .ok_or_else(|| HostError::Manifest {
                path: content.clone(),
                message: "no manifest".to_string(),
            })?;

        // Live registrations of a previous install go first.
        self.deactivate(&id);

        let target = self.context().config().plugins_root.join(&id);
        let staged_content = content.clone();
        let dest = target.clone();
        tokio::task::spawn_blocking(move || {
            if dest.exists() {
                fsops::remove_path(&dest)?;
            }
            fsops::move_dir(&staged_content, &dest)
        })
        .await
        .map_err(|e| HostError::Io {
            path: target.clone(),
            source: std::io::Error::other(e),
        })??;
        source.write(&target)?;

        let descriptor = PluginDescriptor::load(&target)?.ok_or_else(|| HostError::Manifest {
            path: target.clone(),
            message: "manifest missing after move".to_string(),
        })?;
        self.context().registry_mut().upsert(descriptor);
        let plugin = self.context().registry().require(&id)?.clone();

        let (activation, error) = if plugin.enabled {
            match self.activate(&id).await {
                Ok(activation) => (Some(activation), None),
                Err(e) => {
                    tracing::warn!(plugin = %id, error = %e, "installed plugin failed to activate");
                    (None, Some(e.to_string()))
                }
            }
        } else {
            (None, None)
        };

        self.context().emit(
            PLUGIN_INSTALLED,
            &json!({ "id": plugin.id, "name": plugin.name(), "version": plugin.version() }),
        );
        tracing::info!(plugin = %id, dir = %target.display(), "installed plugin");
        Ok(Installed {
            plugin,
            activation,
            error,
        })
    }

    /// Remove a plugin, its files and every piece of state stored for it.
    pub async fn uninstall(&self, key: &str) -> HostResult<PluginDescriptor> {
        let descriptor = self.context().registry().require(key)?.clone();
        let id = descriptor.id.clone();

        self.run_hook(&descriptor, LifecycleHook::Uninstall).await;
        self.context()
            .emit(PLUGIN_UNINSTALLED, &json!({ "id": id, "name": descriptor.name() }));

        let nested: Vec<String> = self
            .context()
            .registry()
            .list()
            .filter(|p| p.parent.as_deref() == Some(id.as_str()))
            .map(|p| p.id.clone())
            .collect();
        for child in nested.iter().chain(std::iter::once(&id)) {
            self.deactivate(child);
        }

        let dir = descriptor.dir.clone();
        if dir.exists() {
            tokio::task::spawn_blocking(move || fsops::remove_path(&dir))
                .await
                .map_err(|e| HostError::Io {
                    path: descriptor.dir.clone(),
                    source: std::io::Error::other(e),
                })??;
        }

        let purged = self.context().purge_state(&[id.as_str(), descriptor.name()])?;
        {
            let mut registry = self.context().registry_mut();
            for child in &nested {
                registry.remove(child);
            }
            registry.remove(&id);
        }

        tracing::info!(plugin = %id, purged, "uninstalled plugin");
        Ok(descriptor)
    }
}

/// Directory holding the manifest: the staging root or its single top-level
/// directory.
fn locate_manifest_dir(staged: &Path) -> Option<PathBuf> {
    if manifest_path(staged).is_some() {
        return Some(staged.to_path_buf());
    }
    let inner = fsops::content_root(staged);
    manifest_path(&inner).map(|_| inner)
}
