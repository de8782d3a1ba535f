//! Linking store packages into a plugin's `node_modules`.

use std::fs;
use std::path::{Path, PathBuf};

use plugdeck_core::{HostError, HostResult};
use serde::Serialize;

use crate::fsops;
use crate::store::{MODULES_DIR, PackageStore};

/// How a package ended up in a plugin directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkMode {
    Symlinked,
    /// Symlinking failed (permissions, filesystem) and the package was copied.
    Copied,
    /// The link already pointed at the right store directory.
    AlreadyLinked,
}

/// Path of `<plugin_dir>/node_modules/<name>`.
pub fn link_path(plugin_dir: &Path, name: &str) -> PathBuf {
    plugin_dir.join(MODULES_DIR).join(name)
}

/// Make `<plugin_dir>/node_modules/<name>` resolve to the stored
/// `name@version`, replacing whatever was there before.
pub fn link_package(
    store: &PackageStore,
    name: &str,
    version: &str,
    plugin_dir: &Path,
) -> HostResult<LinkMode> {
    let target = store.package_dir(name, version)?;
    if !target.is_dir() {
        return Err(HostError::not_found("Package version", format!("{name}@{version}")));
    }

    let link = link_path(plugin_dir, name);
    if points_to(&link, &target) {
        return Ok(LinkMode::AlreadyLinked);
    }

    fsops::remove_path(&link)?;
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(|e| HostError::io(parent, e))?;
    }

    match symlink_dir(&target, &link) {
        Ok(()) => {
            tracing::debug!(package = name, version, link = %link.display(), "linked package");
            Ok(LinkMode::Symlinked)
        }
        Err(e) => {
            tracing::warn!(
                package = name,
                version,
                error = %e,
                "symlink failed, copying package instead"
            );
            fsops::copy_dir(&target, &link)?;
            Ok(LinkMode::Copied)
        }
    }
}

/// Remove a package link (or copy) from a plugin directory.
pub fn unlink_package(plugin_dir: &Path, name: &str) -> HostResult<()> {
    fsops::remove_path(&link_path(plugin_dir, name))
}

fn points_to(link: &Path, target: &Path) -> bool {
    let is_symlink = fs::symlink_metadata(link)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if !is_symlink {
        return false;
    }
    match (link.canonicalize(), target.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_then_relink_is_noop() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = PackageStore::new(dir.path().join("store"));
        let pkg = store.package_dir("dayjs", "1.11.10").unwrap();
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("index.js"), "module.exports = 1").unwrap();

        let plugin = dir.path().join("plugins").join("clock");
        fs::create_dir_all(&plugin).unwrap();

        let first = link_package(&store, "dayjs", "1.11.10", &plugin).unwrap();
        assert!(matches!(first, LinkMode::Symlinked | LinkMode::Copied));
        assert!(link_path(&plugin, "dayjs").join("index.js").exists());

        if first == LinkMode::Symlinked {
            let second = link_package(&store, "dayjs", "1.11.10", &plugin).unwrap();
            assert_eq!(second, LinkMode::AlreadyLinked);
        }

        unlink_package(&plugin, "dayjs").unwrap();
        assert!(!link_path(&plugin, "dayjs").exists());
        // The store copy survives unlinking.
        assert!(pkg.join("index.js").exists());
    }

    #[test]
    fn test_link_missing_version_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = PackageStore::new(dir.path());
        let err = link_package(&store, "dayjs", "9.9.9", dir.path()).unwrap_err();
        assert!(err.is_not_found());
    }
}
