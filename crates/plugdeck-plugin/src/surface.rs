//! Plugin surfaces: UI endpoints reached by RPC messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use plugdeck_core::{HostError, HostResult, Value};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Host → surface call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    #[serde(rename = "fn")]
    pub function: String,
    #[serde(default)]
    pub args: Value,
}

/// Surface → host answer, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// A live endpoint owned by one plugin.
pub trait PluginSurface: Send + Sync {
    /// Post a request. Delivery only; the answer arrives through the bridge.
    fn send(&self, request: RpcRequest) -> HostResult<()>;

    fn is_alive(&self) -> bool;

    fn close(&self);
}

/// Surface backed by a channel; the receiving side plays the UI.
pub struct ChannelSurface {
    tx: mpsc::UnboundedSender<RpcRequest>,
    closed: AtomicBool,
}

impl ChannelSurface {
    pub fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<RpcRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                closed: AtomicBool::new(false),
            }),
            rx,
        )
    }
}

impl PluginSurface for ChannelSurface {
    fn send(&self, request: RpcRequest) -> HostResult<()> {
        if !self.is_alive() {
            return Err(HostError::not_found("Surface", request.function));
        }
        self.tx
            .send(request)
            .map_err(|e| HostError::not_found("Surface", e.0.function))
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct SurfaceEntry {
    id: u64,
    surface: Arc<dyn PluginSurface>,
}

/// At most one surface per plugin.
#[derive(Default)]
pub struct SurfaceRegistry {
    surfaces: RwLock<HashMap<String, SurfaceEntry>>,
    next_id: AtomicU64,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a surface to a plugin, closing any previous one. Returns the new
    /// surface id and the id of the replaced surface.
    pub fn open(&self, plugin: &str, surface: Arc<dyn PluginSurface>) -> (u64, Option<u64>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self
            .surfaces
            .write()
            .insert(plugin.to_string(), SurfaceEntry { id, surface });
        let replaced = previous.map(|entry| {
            entry.surface.close();
            entry.id
        });
        (id, replaced)
    }

    /// Live surface of a plugin.
    pub fn get(&self, plugin: &str) -> Option<Arc<dyn PluginSurface>> {
        self.surfaces
            .read()
            .get(plugin)
            .filter(|entry| entry.surface.is_alive())
            .map(|entry| entry.surface.clone())
    }

    /// Close and forget a plugin's surface. Returns its id.
    pub fn close(&self, plugin: &str) -> Option<u64> {
        let entry = self.surfaces.write().remove(plugin)?;
        entry.surface.close();
        Some(entry.id)
    }

    pub fn is_open(&self, plugin: &str) -> bool {
        self.get(plugin).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let req = RpcRequest {
            id: 4,
            function: "refresh".into(),
            args: serde_json::json!([1]),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({"id": 4, "fn": "refresh", "args": [1]})
        );
        let resp: RpcResponse = serde_json::from_str(r#"{"id":4,"ok":false,"error":"boom"}"#).unwrap();
        assert_eq!(resp, RpcResponse::err(4, "boom"));
    }

    #[test]
    fn test_open_replace_close() {
        let registry = SurfaceRegistry::new();
        let (first, _rx1) = ChannelSurface::pair();
        let (second, _rx2) = ChannelSurface::pair();

        let (id1, _) = registry.open("bell", first.clone());
        let (_, replaced) = registry.open("bell", second);
        assert_eq!(replaced, Some(id1));
        assert!(!first.is_alive());
        assert!(registry.is_open("bell"));

        assert!(registry.close("bell").is_some());
        assert!(!registry.is_open("bell"));
    }
}
