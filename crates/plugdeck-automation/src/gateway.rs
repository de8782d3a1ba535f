//! How the automation engine reaches plugins.

use plugdeck_core::{BoxFuture, HostResult, Value};
use plugdeck_plugin::{HostContext, PluginTimers};
use serde_json::json;

/// Plugin-facing operations the engine needs.
pub trait PluginGateway: Send + Sync {
    /// Call a plugin function.
    fn call_plugin<'a>(&'a self, plugin: &'a str, function: &'a str, args: Value) -> BoxFuture<'a, HostResult<Value>>;

    /// Read a plugin variable through its getter.
    fn read_variable<'a>(&'a self, plugin: &'a str, name: &'a str) -> BoxFuture<'a, HostResult<Value>>;

    /// Run an automation event of a plugin. Declared events map to their
    /// target function; anything else is called by name.
    fn fire_event<'a>(&'a self, plugin: &'a str, event: &'a str, args: Value) -> BoxFuture<'a, HostResult<Value>> {
        self.call_plugin(plugin, event, args)
    }

    /// Consistent copy of every plugin's periods and minute triggers.
    fn timer_snapshot(&self) -> Vec<(String, PluginTimers)>;
}

/// Default getter exported by plugins with variables.
pub const DEFAULT_VARIABLE_GETTER: &str = "getVariable";

impl PluginGateway for HostContext {
    fn call_plugin<'a>(&'a self, plugin: &'a str, function: &'a str, args: Value) -> BoxFuture<'a, HostResult<Value>> {
        Box::pin(self.call_function(plugin, function, args, None))
    }

    fn read_variable<'a>(&'a self, plugin: &'a str, name: &'a str) -> BoxFuture<'a, HostResult<Value>> {
        let getter = self
            .registry()
            .resolve(plugin)
            .and_then(|p| p.manifest.variables.iter().find(|v| v.key == name))
            .and_then(|v| v.function.clone())
            .unwrap_or_else(|| DEFAULT_VARIABLE_GETTER.to_string());

        Box::pin(async move {
            self.call_function(plugin, &getter, json!({ "key": name }), None)
                .await
        })
    }

    fn fire_event<'a>(&'a self, plugin: &'a str, event: &'a str, args: Value) -> BoxFuture<'a, HostResult<Value>> {
        let function = self
            .registry()
            .resolve(plugin)
            .and_then(|p| p.manifest.automation_events.iter().find(|e| e.id == event))
            .map(|e| e.target().to_string())
            .unwrap_or_else(|| event.to_string());

        Box::pin(async move { self.call_function(plugin, &function, args, None).await })
    }

    fn timer_snapshot(&self) -> Vec<(String, PluginTimers)> {
        self.timers().snapshot()
    }
}
