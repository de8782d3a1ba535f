//! Dependency resolution: selected version → store → index download.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use plugdeck_core::{HostError, HostResult, KvStore, Value};
use serde::Serialize;

use crate::archive;
use crate::fsops;
use crate::index::PackageIndex;
use crate::link::{self, LinkMode};
use crate::store::PackageStore;
use crate::version::VersionSpec;

/// Where a resolved version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VersionSource {
    /// A version previously selected for this plugin.
    Selected,
    /// The newest matching version already in the store.
    Store,
    /// Fetched from the package index.
    Downloaded,
}

/// One dependency resolved and linked into a plugin.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    pub from: VersionSource,
    pub link: LinkMode,
}

/// Outcome of resolving all dependencies of a plugin. A failing dependency
/// does not stop the others.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveReport {
    pub resolved: Vec<ResolvedPackage>,
    /// `(package, error message)`.
    pub failed: Vec<(String, String)>,
}

impl ResolveReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Resolves declared package dependencies against the store and the index.
pub struct DependencyResolver {
    store: PackageStore,
    index: Arc<dyn PackageIndex>,
    kv: Arc<dyn KvStore>,
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl DependencyResolver {
    pub fn new(store: PackageStore, index: Arc<dyn PackageIndex>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            index,
            kv,
            in_flight: DashMap::new(),
        }
    }

    pub fn store(&self) -> &PackageStore {
        &self.store
    }

    pub fn index(&self) -> &Arc<dyn PackageIndex> {
        &self.index
    }

    /// Key-value key holding the selected version of `package` for `plugin`.
    pub fn selection_key(plugin: &str, package: &str) -> String {
        format!("packages.selected.{plugin}.{package}")
    }

    pub fn selected_version(&self, plugin: &str, package: &str) -> Option<String> {
        self.kv.get_str(&Self::selection_key(plugin, package))
    }

    pub fn select_version(&self, plugin: &str, package: &str, version: &str) -> HostResult<()> {
        self.kv.set(
            &Self::selection_key(plugin, package),
            Value::String(version.to_string()),
        )
    }

    /// Forget every selection made for a plugin.
    pub fn clear_selections(&self, plugin: &str) -> HostResult<usize> {
        self.kv.remove_prefix(&format!("packages.selected.{plugin}."))
    }

    /// Make sure some version of `name` satisfying `spec` is in the store and
    /// return it.
    pub async fn ensure(
        &self,
        plugin: &str,
        name: &str,
        spec: &VersionSpec,
    ) -> HostResult<(String, VersionSource)> {
        if let Some(selected) = self.selected_version(plugin, name) {
            if !self.store.contains(name, &selected) {
                self.download_into_store(name, &selected).await?;
            }
            return Ok((selected, VersionSource::Selected));
        }

        if let Some(stored) = self.store.newest_matching(name, spec) {
            return Ok((stored, VersionSource::Store));
        }

        let version = self.index.resolve(name, spec).await?;
        if !self.store.contains(name, &version) {
            self.download_into_store(name, &version).await?;
        }
        Ok((version, VersionSource::Downloaded))
    }

    /// Download `name@version` from the index and unpack it into the store.
    pub async fn download_into_store(&self, name: &str, version: &str) -> HostResult<()> {
        // Concurrent requests for the same version share one download.
        let key = format!("{name}@{version}");
        let gate = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let slot = InFlight {
            map: &self.in_flight,
            key,
            gate,
        };
        let _lock = slot.gate.lock().await;

        if self.store.contains(name, version) {
            return Ok(());
        }

        let result = self.fetch_and_unpack(name, version).await;
        if result.is_ok() {
            tracing::info!(package = name, version, "stored package");
        }
        result
    }

    /// Downloads currently being fetched or waited on.
    pub fn downloads_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn fetch_and_unpack(&self, name: &str, version: &str) -> HostResult<()> {
        let bytes = self.index.download(name, version).await?;
        let store = self.store.clone();
        let name_owned = name.to_string();
        let version_owned = version.to_string();

        tokio::task::spawn_blocking(move || {
            unpack_into_store(&store, &name_owned, &version_owned, &bytes)
        })
        .await
        .map_err(|e| HostError::Download {
            package: name.to_string(),
            message: format!("unpack task failed: {e}"),
        })?
    }

    /// Resolve and link every declared dependency of a plugin.
    pub async fn resolve_plugin<I, K, V>(
        &self,
        plugin: &str,
        plugin_dir: &Path,
        dependencies: I,
    ) -> ResolveReport
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut report = ResolveReport::default();

        for (name, range) in dependencies {
            let name = name.as_ref();
            let spec = VersionSpec::parse(range.as_ref());

            let outcome = async {
                let (version, from) = self.ensure(plugin, name, &spec).await?;
                let link = link::link_package(&self.store, name, &version, plugin_dir)?;
                Ok::<_, HostError>(ResolvedPackage {
                    name: name.to_string(),
                    version,
                    from,
                    link,
                })
            }
            .await;

            match outcome {
                Ok(resolved) => report.resolved.push(resolved),
                Err(e) => {
                    tracing::warn!(plugin, package = name, error = %e, "dependency not resolved");
                    report.failed.push((name.to_string(), e.to_string()));
                }
            }
        }

        report
    }

    /// Pin `name` to `version` for a plugin and relink just that package.
    pub async fn update_version(
        &self,
        plugin: &str,
        plugin_dir: &Path,
        name: &str,
        version: &str,
    ) -> HostResult<LinkMode> {
        if !self.store.contains(name, version) {
            self.download_into_store(name, version).await?;
        }
        self.select_version(plugin, name, version)?;
        link::link_package(&self.store, name, version, plugin_dir)
    }
}

/// Holds one download gate; the last holder drops the map entry.
struct InFlight<'a> {
    map: &'a DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    key: String,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // The map and this slot account for two references.
        self.map
            .remove_if(&self.key, |_, gate| Arc::strong_count(gate) <= 2);
    }
}

fn unpack_into_store(store: &PackageStore, name: &str, version: &str, bytes: &[u8]) -> HostResult<()> {
    std::fs::create_dir_all(store.root()).map_err(|e| HostError::io(store.root(), e))?;

    let staging = tempfile::Builder::new()
        .prefix(".dl-")
        .tempdir_in(store.root())
        .map_err(|e| HostError::io(store.root(), e))?;

    archive::unpack_bytes(bytes, staging.path())?;
    // npm tarballs wrap everything in `package/`.
    let content = fsops::content_root(staging.path());
    store.import_dir(name, version, &content)?;
    Ok(())
}
