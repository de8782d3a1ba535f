//! On-disk package store.
//!
//! Layout: `<root>/<name>/<version>/modules/<name>`. Scoped names
//! (`@scope/name`) nest one extra directory level on both sides, so the
//! package directory always resolves to what `require('<name>')` would see
//! from `<version>/modules`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use jwalk::WalkDir;
use plugdeck_core::{HostError, HostResult};
use serde::Serialize;

use crate::fsops;
use crate::version::{VersionSpec, sort_newest_first};

/// Directory, inside a plugin, that holds its linked packages.
pub const MODULES_DIR: &str = "node_modules";

/// A package version present in the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredVersion {
    pub version: String,
    /// Bytes on disk.
    pub size: u64,
}

/// A package with all its stored versions, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct StoredPackage {
    pub name: String,
    pub versions: Vec<StoredVersion>,
}

/// Content-addressed-by-name/version directory of packages.
#[derive(Debug, Clone)]
pub struct PackageStore {
    root: PathBuf,
}

impl PackageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<name>/<version>`.
    pub fn version_dir(&self, name: &str, version: &str) -> HostResult<PathBuf> {
        validate_package_name(name)?;
        validate_segment(version, "version")?;
        Ok(self.root.join(name).join(version))
    }

    /// `<root>/<name>/<version>/modules/<name>`.
    pub fn package_dir(&self, name: &str, version: &str) -> HostResult<PathBuf> {
        Ok(self.version_dir(name, version)?.join("modules").join(name))
    }

    /// Whether a version is unpacked in the store.
    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.package_dir(name, version)
            .map(|dir| dir.is_dir())
            .unwrap_or(false)
    }

    /// Stored versions of a package, newest first.
    pub fn versions(&self, name: &str) -> Vec<String> {
        if validate_package_name(name).is_err() {
            return vec![];
        }
        let Ok(entries) = fs::read_dir(self.root.join(name)) else {
            return vec![];
        };
        let mut versions: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().join("modules").join(name).is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        sort_newest_first(&mut versions);
        versions
    }

    /// Newest stored version satisfying `spec`.
    pub fn newest_matching(&self, name: &str, spec: &VersionSpec) -> Option<String> {
        self.versions(name).into_iter().find(|v| spec.matches(v))
    }

    /// Every stored package.
    pub fn list(&self) -> Vec<StoredPackage> {
        let mut names = vec![];
        let Ok(entries) = fs::read_dir(&self.root) else {
            return vec![];
        };
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            if name.starts_with('@') {
                if let Ok(scoped) = fs::read_dir(entry.path()) {
                    for inner in scoped.flatten() {
                        if let Some(inner_name) = inner.file_name().to_str() {
                            names.push(format!("{name}/{inner_name}"));
                        }
                    }
                }
            } else {
                names.push(name);
            }
        }
        names.sort();

        names
            .into_iter()
            .filter_map(|name| {
                let versions: Vec<StoredVersion> = self
                    .versions(&name)
                    .into_iter()
                    .map(|version| {
                        let size = self
                            .version_dir(&name, &version)
                            .map(|dir| fsops::dir_size(&dir))
                            .unwrap_or(0);
                        StoredVersion { version, size }
                    })
                    .collect();
                (!versions.is_empty()).then_some(StoredPackage { name, versions })
            })
            .collect()
    }

    /// Plugins and components (by directory name under one of `roots`) whose
    /// module directory resolves, by realpath, into `name@version`.
    pub fn users_of(&self, name: &str, version: &str, roots: &[&Path]) -> Vec<String> {
        let Ok(version_dir) = self.version_dir(name, version) else {
            return vec![];
        };
        let Ok(version_real) = version_dir.canonicalize() else {
            return vec![];
        };

        let mut users: Vec<String> = roots
            .iter()
            .flat_map(|root| {
                modules_dirs(root)
                    .into_iter()
                    .filter(|modules| {
                        modules
                            .join(name)
                            .canonicalize()
                            .map(|real| real.starts_with(&version_real))
                            .unwrap_or(false)
                    })
                    .filter_map(|modules| owning_plugin(root, &modules))
            })
            .collect();
        users.sort();
        users.dedup();
        users
    }

    /// Delete a version, refusing while anything under `roots` still links to it.
    pub fn remove_version(&self, name: &str, version: &str, roots: &[&Path]) -> HostResult<()> {
        let dir = self.version_dir(name, version)?;
        if !dir.exists() {
            return Err(HostError::not_found("Package version", format!("{name}@{version}")));
        }

        let users = self.users_of(name, version, roots);
        if !users.is_empty() {
            return Err(HostError::Conflict {
                message: format!("{name}@{version} is in use by {}", users.join(", ")),
                blocking: users,
            });
        }

        fs::remove_dir_all(&dir).map_err(|e| HostError::io(&dir, e))?;
        tracing::info!(package = name, version, "removed package version");

        // Drop the now-empty package directory.
        let package_root = self.root.join(name);
        if fs::read_dir(&package_root).map(|mut d| d.next().is_none()).unwrap_or(false) {
            let _ = fs::remove_dir(&package_root);
        }
        Ok(())
    }

    /// Remove every version nothing links to. Returns what was removed.
    pub fn prune_unused(&self, roots: &[&Path]) -> Vec<(String, String)> {
        let mut removed = vec![];
        for package in self.list() {
            for stored in package.versions {
                if self
                    .remove_version(&package.name, &stored.version, roots)
                    .is_ok()
                {
                    removed.push((package.name.clone(), stored.version));
                }
            }
        }
        removed
    }

    /// Move an unpacked package directory into the store slot for `name@version`.
    pub fn import_dir(&self, name: &str, version: &str, source: &Path) -> HostResult<PathBuf> {
        let dest = self.package_dir(name, version)?;
        if dest.exists() {
            fsops::remove_path(&dest)?;
        }
        fsops::move_dir(source, &dest)?;
        Ok(dest)
    }
}

/// Every `node_modules` directory under `root`, including those of nested
/// components. The walk never descends into a `node_modules` itself.
fn modules_dirs(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        return vec![];
    }

    WalkDir::new(root)
        .max_depth(4)
        .skip_hidden(false)
        .follow_links(false)
        .process_read_dir(|_depth, _path, _state, children| {
            children.retain(|child| {
                child
                    .as_ref()
                    .map(|entry| entry.file_type.is_dir())
                    .unwrap_or(false)
            });
            for child in children.iter_mut().flatten() {
                if child.file_name == MODULES_DIR {
                    child.read_children_path = None;
                }
            }
        })
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_name == MODULES_DIR)
        .map(|entry| entry.path())
        .collect()
}

fn owning_plugin(root: &Path, modules: &Path) -> Option<String> {
    let relative = modules.strip_prefix(root).ok()?;
    match relative.components().next()? {
        Component::Normal(name) => name.to_str().map(str::to_string),
        _ => None,
    }
}

/// Reject names that would escape the store root.
pub fn validate_package_name(name: &str) -> HostResult<()> {
    let invalid = |reason: &str| {
        Err(HostError::Config {
            message: format!("invalid package name '{name}': {reason}"),
        })
    };
    if name.is_empty() {
        return invalid("empty");
    }
    let parts: Vec<&str> = name.split('/').collect();
    match parts.as_slice() {
        [single] if !single.starts_with('@') => validate_segment(single, "package name"),
        [scope, inner] if scope.starts_with('@') && scope.len() > 1 => {
            validate_segment(scope, "package scope")?;
            validate_segment(inner, "package name")
        }
        _ => invalid("expected 'name' or '@scope/name'"),
    }
}

fn validate_segment(segment: &str, what: &str) -> HostResult<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\', ':'])
    {
        return Err(HostError::Config {
            message: format!("invalid {what}: '{segment}'"),
        });
    }
    Ok(())
}
