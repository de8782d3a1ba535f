//! Key-value configuration store.
//!
//! The host persists small pieces of state (enable flags, version
//! selections, default capability providers, scoped plugin config) through
//! the [`KvStore`] trait. Keys are dot-separated strings.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{HostError, HostResult};

/// Persistent string-keyed JSON value store.
pub trait KvStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<Value>;

    /// Write a value.
    fn set(&self, key: &str, value: Value) -> HostResult<()>;

    /// Remove a value, returning whether it existed.
    fn remove(&self, key: &str) -> HostResult<bool>;

    /// All keys starting with `prefix`.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;

    /// Remove every key starting with `prefix`, returning how many were removed.
    fn remove_prefix(&self, prefix: &str) -> HostResult<usize> {
        let keys = self.keys_with_prefix(prefix);
        for key in &keys {
            self.remove(key)?;
        }
        Ok(keys.len())
    }

    /// Read a string value.
    fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Read a boolean value.
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }
}

/// In-memory store, used by tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> HostResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> HostResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// JSON file backed store. Every write rewrites the file atomically.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open (or lazily create) a store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> HostResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| HostError::io(&path, e))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, Value>) -> HostResult<()> {
        write_json_atomic(&self.path, entries)
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> HostResult<()> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> HostResult<bool> {
        let mut entries = self.entries.write();
        let existed = entries.remove(key).is_some();
        if existed {
            self.flush(&entries)?;
        }
        Ok(existed)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Serialize `value` to `path` through a uniquely named sibling temp file
/// and a rename, so concurrent writers never share a staging file.
pub fn write_json_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> HostResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| HostError::io(parent, e))?;

    let json = serde_json::to_vec_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| HostError::io(parent, e))?;
    tmp.write_all(&json).map_err(|e| HostError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| HostError::io(path, e.error))?;
    Ok(())
}
