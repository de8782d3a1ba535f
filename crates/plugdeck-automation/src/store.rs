//! Persisted automation items: one ordered JSON array on disk.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use plugdeck_core::{HostError, HostResult, write_json_atomic};

use crate::model::AutomationItem;

pub struct AutomationStore {
    path: PathBuf,
    items: RwLock<Vec<AutomationItem>>,
}

impl AutomationStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> HostResult<Self> {
        let path = path.into();
        let items = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| HostError::Config {
                message: format!("invalid automation file {}: {e}", path.display()),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![],
            Err(e) => return Err(HostError::io(&path, e)),
        };
        Ok(Self {
            path,
            items: RwLock::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Items in stored order.
    pub fn list(&self) -> Vec<AutomationItem> {
        self.items.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<AutomationItem> {
        self.items.read().iter().find(|i| i.id == id).cloned()
    }

    pub fn require(&self, id: &str) -> HostResult<AutomationItem> {
        self.get(id)
            .ok_or_else(|| HostError::not_found("Automation item", id))
    }

    /// Replace the item with the same id in place, or append it. Saves.
    pub fn upsert(&self, item: AutomationItem) -> HostResult<()> {
        let mut items = self.items.write();
        merge(&mut items, item);
        self.persist(&items)
    }

    /// Remove an item. Saves when something was removed.
    pub fn remove(&self, id: &str) -> HostResult<bool> {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|i| i.id != id);
        if items.len() == before {
            return Ok(false);
        }
        self.persist(&items)?;
        Ok(true)
    }

    /// Upsert every item of a JSON array. Returns how many were imported.
    pub fn import(&self, json: &str) -> HostResult<usize> {
        let incoming: Vec<AutomationItem> =
            serde_json::from_str(json).map_err(|e| HostError::Config {
                message: format!("invalid automation import: {e}"),
            })?;
        let count = incoming.len();
        let mut items = self.items.write();
        for item in incoming {
            merge(&mut items, item);
        }
        self.persist(&items)?;
        Ok(count)
    }

    /// Record a completed execution and persist it.
    pub fn stamp_success(&self, id: &str, at: &str) -> HostResult<()> {
        let mut items = self.items.write();
        // An item deleted while it ran has nothing to stamp.
        let Some(item) = items.iter_mut().find(|i| i.id == id) else {
            return Ok(());
        };
        item.last_success_at = Some(at.to_string());
        self.persist(&items)
    }

    pub fn save(&self) -> HostResult<()> {
        let items = self.items.write();
        self.persist(&items)
    }

    /// Write under the caller's write guard so disk order matches memory order.
    fn persist(&self, items: &[AutomationItem]) -> HostResult<()> {
        write_json_atomic(&self.path, items)
    }
}

fn merge(items: &mut Vec<AutomationItem>, item: AutomationItem) {
    match items.iter_mut().find(|i| i.id == item.id) {
        Some(slot) => *slot = item,
        None => items.push(item),
    }
}
