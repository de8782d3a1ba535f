//! Integration tests for the package store and resolver.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use plugdeck_core::{BoxFuture, HostError, HostResult, KvStore, MemoryStore};
use plugdeck_packages::{
    DependencyResolver, PackageIndex, PackageStore, VersionSource, VersionSpec, compare_versions,
    link_package, unlink_package,
};
use tempfile::TempDir;

/// In-memory index serving tarballs built on the fly.
struct FakeIndex {
    versions: HashMap<String, Vec<String>>,
    downloads: AtomicUsize,
}

impl FakeIndex {
    fn new(entries: &[(&str, &[&str])]) -> Self {
        Self {
            versions: entries
                .iter()
                .map(|(name, versions)| {
                    (name.to_string(), versions.iter().map(|v| v.to_string()).collect())
                })
                .collect(),
            downloads: AtomicUsize::new(0),
        }
    }
}

fn npm_tarball(name: &str, version: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
        Vec::new(),
        flate2::Compression::default(),
    ));
    let manifest = format!(r#"{{"name":"{name}","version":"{version}"}}"#);
    let mut header = tar::Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "package/package.json", manifest.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

impl PackageIndex for FakeIndex {
    fn resolve<'a>(&'a self, name: &'a str, spec: &'a VersionSpec) -> BoxFuture<'a, HostResult<String>> {
        Box::pin(async move {
            self.versions
                .get(name)
                .and_then(|versions| {
                    versions
                        .iter()
                        .filter(|v| spec.matches(v))
                        .max_by(|a, b| compare_versions(a, b))
                        .cloned()
                })
                .ok_or_else(|| HostError::not_found("Package", name))
        })
    }

    fn download<'a>(&'a self, name: &'a str, version: &'a str) -> BoxFuture<'a, HostResult<Vec<u8>>> {
        Box::pin(async move {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(npm_tarball(name, version))
        })
    }
}

struct Fixture {
    _dir: TempDir,
    plugins_root: std::path::PathBuf,
    components_root: std::path::PathBuf,
    index: Arc<FakeIndex>,
    kv: Arc<MemoryStore>,
    resolver: DependencyResolver,
}

fn fixture(entries: &[(&str, &[&str])]) -> Fixture {
    let dir = TempDir::new().unwrap();
    let plugins_root = dir.path().join("plugins");
    let components_root = dir.path().join("components");
    fs::create_dir_all(&plugins_root).unwrap();
    fs::create_dir_all(&components_root).unwrap();
    let index = Arc::new(FakeIndex::new(entries));
    let kv = Arc::new(MemoryStore::new());
    let resolver = DependencyResolver::new(
        PackageStore::new(dir.path().join("store")),
        index.clone(),
        kv.clone(),
    );
    Fixture {
        _dir: dir,
        plugins_root,
        components_root,
        index,
        kv,
        resolver,
    }
}

impl Fixture {
    fn roots(&self) -> [&Path; 2] {
        [self.plugins_root.as_path(), self.components_root.as_path()]
    }
}

fn plugin_dir(root: &Path, name: &str) -> std::path::PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn test_download_once_then_reuse_store() {
    let fx = fixture(&[("dayjs", &["1.10.0", "1.11.10"])]);
    let clock = plugin_dir(&fx.plugins_root, "clock");
    let timer = plugin_dir(&fx.plugins_root, "timer");

    let first = fx.resolver.resolve_plugin("clock", &clock, [("dayjs", "^1.0.0")]).await;
    assert!(first.is_complete());
    assert_eq!(first.resolved[0].version, "1.11.10");
    assert_eq!(first.resolved[0].from, VersionSource::Downloaded);

    // npm's `package/` prefix is stripped.
    let stored = fx.resolver.store().package_dir("dayjs", "1.11.10").unwrap();
    assert!(stored.join("package.json").exists());

    let second = fx.resolver.resolve_plugin("timer", &timer, [("dayjs", "*")]).await;
    assert_eq!(second.resolved[0].from, VersionSource::Store);
    assert_eq!(fx.index.downloads.load(Ordering::SeqCst), 1);
    assert!(timer.join("node_modules").join("dayjs").join("package.json").exists());
}

#[tokio::test]
async fn test_selected_version_wins_over_newer() {
    let fx = fixture(&[("dayjs", &["1.10.0", "1.11.10"])]);
    let clock = plugin_dir(&fx.plugins_root, "clock");

    fx.resolver.select_version("clock", "dayjs", "1.10.0").unwrap();
    let report = fx.resolver.resolve_plugin("clock", &clock, [("dayjs", "^1.0.0")]).await;
    assert_eq!(report.resolved[0].version, "1.10.0");
    assert_eq!(report.resolved[0].from, VersionSource::Selected);

    assert_eq!(fx.resolver.clear_selections("clock").unwrap(), 1);
    assert!(fx.kv.keys_with_prefix("packages.selected.").is_empty());
}

#[tokio::test]
async fn test_failed_dependency_does_not_stop_others() {
    let fx = fixture(&[("dayjs", &["1.11.10"])]);
    let clock = plugin_dir(&fx.plugins_root, "clock");

    let report = fx
        .resolver
        .resolve_plugin("clock", &clock, [("missing-pkg", "*"), ("dayjs", "*")])
        .await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "missing-pkg");
    assert_eq!(report.resolved.len(), 1);
}

#[tokio::test]
async fn test_update_version_relinks() {
    let fx = fixture(&[("dayjs", &["1.10.0", "1.11.10"])]);
    let clock = plugin_dir(&fx.plugins_root, "clock");

    fx.resolver.resolve_plugin("clock", &clock, [("dayjs", "*")]).await;
    fx.resolver
        .update_version("clock", &clock, "dayjs", "1.10.0")
        .await
        .unwrap();

    assert_eq!(fx.resolver.selected_version("clock", "dayjs").as_deref(), Some("1.10.0"));
    let linked = fs::read_to_string(clock.join("node_modules/dayjs/package.json")).unwrap();
    assert!(linked.contains("1.10.0"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_remove_blocked_while_in_use() {
    let fx = fixture(&[("dayjs", &["1.11.10"])]);
    let clock = plugin_dir(&fx.plugins_root, "clock");
    fx.resolver.resolve_plugin("clock", &clock, [("dayjs", "*")]).await;

    let store = fx.resolver.store();
    assert_eq!(store.users_of("dayjs", "1.11.10", &fx.roots()), vec!["clock"]);

    match store.remove_version("dayjs", "1.11.10", &fx.roots()) {
        Err(HostError::Conflict { blocking, .. }) => assert_eq!(blocking, vec!["clock"]),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(store.contains("dayjs", "1.11.10"));

    unlink_package(&clock, "dayjs").unwrap();
    store.remove_version("dayjs", "1.11.10", &fx.roots()).unwrap();
    assert!(!store.contains("dayjs", "1.11.10"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_nested_component_counts_as_owner_plugin() {
    let fx = fixture(&[("dayjs", &["1.11.10"])]);
    fx.resolver.download_into_store("dayjs", "1.11.10").await.unwrap();

    let widget = plugin_dir(&fx.plugins_root, "clock/components/widget");
    link_package(fx.resolver.store(), "dayjs", "1.11.10", &widget).unwrap();

    assert_eq!(
        fx.resolver.store().users_of("dayjs", "1.11.10", &fx.roots()),
        vec!["clock"]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_prune_keeps_used_versions() {
    let fx = fixture(&[("dayjs", &["1.10.0", "1.11.10"])]);
    let clock = plugin_dir(&fx.plugins_root, "clock");

    fx.resolver.download_into_store("dayjs", "1.10.0").await.unwrap();
    fx.resolver.resolve_plugin("clock", &clock, [("dayjs", "1.11.10")]).await;

    let removed = fx.resolver.store().prune_unused(&fx.roots());
    assert_eq!(removed, vec![("dayjs".to_string(), "1.10.0".to_string())]);
    assert_eq!(fx.resolver.store().versions("dayjs"), vec!["1.11.10"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_global_component_blocks_removal() {
    let fx = fixture(&[("dayjs", &["1.0.0"])]);
    fx.resolver.download_into_store("dayjs", "1.0.0").await.unwrap();

    let clock = plugin_dir(&fx.components_root, "clock");
    link_package(fx.resolver.store(), "dayjs", "1.0.0", &clock).unwrap();

    let store = fx.resolver.store();
    assert_eq!(store.users_of("dayjs", "1.0.0", &fx.roots()), vec!["clock"]);
    match store.remove_version("dayjs", "1.0.0", &fx.roots()) {
        Err(HostError::Conflict { blocking, .. }) => assert_eq!(blocking, vec!["clock"]),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(store.prune_unused(&fx.roots()).is_empty());
    assert!(clock.join("node_modules/dayjs/package.json").exists());
}

#[tokio::test]
async fn test_download_gates_are_released() {
    let fx = fixture(&[("dayjs", &["1.11.10"])]);

    let (a, b, c) = tokio::join!(
        fx.resolver.download_into_store("dayjs", "1.11.10"),
        fx.resolver.download_into_store("dayjs", "1.11.10"),
        fx.resolver.download_into_store("dayjs", "1.11.10"),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(fx.index.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(fx.resolver.downloads_in_flight(), 0);

    // Already stored: returns early and still releases its gate.
    fx.resolver.download_into_store("dayjs", "1.11.10").await.unwrap();
    assert_eq!(fx.resolver.downloads_in_flight(), 0);
}
