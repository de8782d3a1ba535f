//! Cross-boundary function calls.
//!
//! A call first looks for an in-process function, then for a live surface of
//! the target plugin. Surface calls are correlated request/response pairs
//! bounded by the configured RPC timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use plugdeck_core::{CallOutcome, HostError, HostResult, Value};
use tokio::sync::oneshot;

use crate::context::HostContext;
use crate::functions::FunctionCall;
use crate::surface::{PluginSurface, RpcRequest, RpcResponse};

/// Correlates surface requests with their responses.
pub struct RpcBridge {
    pending: DashMap<u64, oneshot::Sender<RpcResponse>>,
    next_id: AtomicU64,
    timeout: Duration,
}

/// Removes a pending entry however the waiting call ends.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, oneshot::Sender<RpcResponse>>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl RpcBridge {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Requests still waiting for an answer.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send `{id, fn, args}` to a surface and wait for the matching answer.
    pub async fn request(
        &self,
        plugin: &str,
        surface: &dyn PluginSurface,
        function: &str,
        args: Value,
    ) -> HostResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        surface.send(RpcRequest {
            id,
            function: function.to_string(),
            args,
        })?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) if response.ok => Ok(response.result.unwrap_or(Value::Null)),
            Ok(Ok(response)) => Err(HostError::plugin(
                plugin,
                response.error.unwrap_or_else(|| "call failed".to_string()),
            )),
            Ok(Err(_)) => Err(HostError::plugin(plugin, "surface closed before answering")),
            Err(_) => {
                tracing::warn!(plugin, function, id, "surface call timed out");
                Err(HostError::Timeout {
                    plugin: plugin.to_string(),
                    function: function.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Route an answer from a surface to its waiting caller. Unmatched and
    /// late answers are dropped.
    pub fn deliver_response(&self, response: RpcResponse) -> bool {
        match self.pending.remove(&response.id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => {
                tracing::debug!(id = response.id, "dropping unmatched rpc response");
                false
            }
        }
    }
}

impl HostContext {
    /// Call `function` on `target` (any plugin key).
    ///
    /// Order: registered in-process function, then the plugin's live surface.
    /// With neither, the call fails with not-found. The missing-plugin hook
    /// runs once for that failure only when the target has no registered
    /// functions at all; a loaded plugin lacking one function does not trigger it.
    pub async fn call_function(
        &self,
        target: &str,
        function: &str,
        args: Value,
        caller: Option<&str>,
    ) -> HostResult<Value> {
        let id = self.canonicalize(target);

        if let Some(registered) = self.functions().get(&id, function) {
            return registered(FunctionCall {
                args,
                caller: caller.map(str::to_string),
            })
            .await;
        }

        if let Some(surface) = self.surfaces().get(&id) {
            return self
                .bridge()
                .request(&id, surface.as_ref(), function, args)
                .await;
        }

        if !self.functions().has_plugin(&id) {
            if let Some(hook) = self.missing_plugin_hook() {
                hook(&id, function);
            }
        }
        Err(HostError::not_found("Plugin function", format!("{id}.{function}")))
    }

    /// [`call_function`](Self::call_function) folded into `{ok, result | error}`.
    pub async fn call(&self, target: &str, function: &str, args: Value) -> CallOutcome {
        self.call_function(target, function, args, None).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::ChannelSurface;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_answered() {
        let bridge = std::sync::Arc::new(RpcBridge::new(Duration::from_secs(1)));
        let (surface, mut rx) = ChannelSurface::pair();

        let responder = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let req = rx.recv().await.unwrap();
                assert_eq!(req.function, "sum");
                bridge.deliver_response(RpcResponse::ok(req.id, json!(3)));
            })
        };

        let out = bridge.request("calc", surface.as_ref(), "sum", json!([1, 2])).await;
        responder.await.unwrap();
        assert_eq!(out.unwrap(), json!(3));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_and_cleans_up() {
        let bridge = RpcBridge::new(Duration::from_millis(8_000));
        let (surface, _rx) = ChannelSurface::pair();

        let err = bridge
            .request("calc", surface.as_ref(), "sum", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Timeout { timeout_ms: 8_000, .. }));
        assert_eq!(bridge.pending_count(), 0);

        // A late answer finds nobody waiting.
        assert!(!bridge.deliver_response(RpcResponse::ok(1, Value::Null)));
    }

    #[tokio::test]
    async fn test_error_response_is_plugin_error() {
        let bridge = std::sync::Arc::new(RpcBridge::new(Duration::from_secs(1)));
        let (surface, mut rx) = ChannelSurface::pair();
        let b = bridge.clone();
        tokio::spawn(async move {
            let req = rx.recv().await.unwrap();
            b.deliver_response(RpcResponse::err(req.id, "no such widget"));
        });

        let err = bridge
            .request("calc", surface.as_ref(), "sum", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Plugin { .. }));
    }
}
