//! Versioned package store for plugdeck plugins.
//!
//! Packages live once per `(name, version)` under the store root and are
//! linked (or, failing that, copied) into each plugin's `node_modules`. The
//! [`DependencyResolver`] decides which version a plugin gets: its previous
//! selection, the newest matching stored version, or a fresh download from a
//! [`PackageIndex`].

pub mod archive;
pub mod fsops;
mod index;
mod link;
mod resolver;
mod store;
mod version;

pub use archive::{ArchiveFormat, unpack_bytes, unpack_file};
pub use index::{NpmIndex, PackageIndex};
pub use link::{LinkMode, link_package, link_path, unlink_package};
pub use resolver::{DependencyResolver, ResolveReport, ResolvedPackage, VersionSource};
pub use store::{MODULES_DIR, PackageStore, StoredPackage, StoredVersion, validate_package_name};
pub use version::{VersionSpec, compare_versions, sort_newest_first};
