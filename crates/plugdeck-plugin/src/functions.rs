//! In-process function registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use plugdeck_core::{BoxFuture, HostResult, Value};

/// Arguments of one call.
#[derive(Debug, Clone, Default)]
pub struct FunctionCall {
    pub args: Value,
    /// Canonical id of the calling plugin, if the call came from one.
    pub caller: Option<String>,
}

impl FunctionCall {
    pub fn new(args: Value) -> Self {
        Self { args, caller: None }
    }

    pub fn from_caller(args: Value, caller: impl Into<String>) -> Self {
        Self {
            args,
            caller: Some(caller.into()),
        }
    }
}

/// A callable registered by a plugin.
pub type PluginFunction = Arc<dyn Fn(FunctionCall) -> BoxFuture<'static, HostResult<Value>> + Send + Sync>;

/// Wrap an async closure as a [`PluginFunction`].
pub fn function<F, Fut>(f: F) -> PluginFunction
where
    F: Fn(FunctionCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HostResult<Value>> + Send + 'static,
{
    Arc::new(move |call| Box::pin(f(call)))
}

/// Per-plugin map of function name → callable.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, HashMap<String, PluginFunction>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: &str, name: &str, function: PluginFunction) {
        self.functions
            .write()
            .entry(plugin.to_string())
            .or_default()
            .insert(name.to_string(), function);
    }

    pub fn get(&self, plugin: &str, name: &str) -> Option<PluginFunction> {
        self.functions
            .read()
            .get(plugin)
            .and_then(|fns| fns.get(name))
            .cloned()
    }

    pub fn has_plugin(&self, plugin: &str) -> bool {
        self.functions.read().contains_key(plugin)
    }

    /// Registered function names of a plugin, sorted.
    pub fn names(&self, plugin: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .read()
            .get(plugin)
            .map(|fns| fns.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Drop every function of a plugin. Returns how many were removed.
    pub fn unregister_plugin(&self, plugin: &str) -> usize {
        self.functions
            .write()
            .remove(plugin)
            .map(|fns| fns.len())
            .unwrap_or(0)
    }

    /// Total number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_call_unregister() {
        let registry = FunctionRegistry::new();
        registry.register(
            "bell",
            "ring",
            function(|call: FunctionCall| async move { Ok(json!({ "rang": call.args })) }),
        );

        let f = registry.get("bell", "ring").unwrap();
        let out = f(FunctionCall::new(json!(3))).await.unwrap();
        assert_eq!(out, json!({ "rang": 3 }));
        assert_eq!(registry.names("bell"), vec!["ring"]);

        assert_eq!(registry.unregister_plugin("bell"), 1);
        assert!(registry.get("bell", "ring").is_none());
        assert!(registry.is_empty());
    }
}
