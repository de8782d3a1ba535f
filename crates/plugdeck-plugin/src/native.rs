//! Plugins compiled into the host binary.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use plugdeck_core::{BoxFuture, HostError, HostResult, Value};

use crate::descriptor::PluginDescriptor;
use crate::functions::{FunctionCall, PluginFunction, function};
use crate::host::{CodeHost, HostApi, PluginModule};
use crate::manifest::AutomationEventDecl;

/// A code unit built from Rust closures.
#[derive(Default, Clone)]
pub struct NativePlugin {
    functions: IndexMap<String, PluginFunction>,
    events: Vec<AutomationEventDecl>,
}

impl NativePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export an async function.
    pub fn function<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(FunctionCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostResult<Value>> + Send + 'static,
    {
        self.functions.insert(name.to_string(), function(f));
        self
    }

    /// Declare an automation event in code.
    pub fn automation_event(mut self, event: AutomationEventDecl) -> Self {
        self.events.push(event);
        self
    }
}

impl PluginModule for NativePlugin {
    fn exports(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    fn automation_events(&self) -> Vec<AutomationEventDecl> {
        self.events.clone()
    }

    fn has_export(&self, function: &str) -> bool {
        self.functions.contains_key(function)
    }

    fn call(&self, function: &str, call: FunctionCall) -> BoxFuture<'static, HostResult<Value>> {
        match self.functions.get(function) {
            Some(f) => f(call),
            None => {
                let err = HostError::not_found("Plugin function", function);
                Box::pin(async move { Err(err) })
            }
        }
    }
}

/// Builds a [`NativePlugin`] for one load, with the host API bound to it.
pub type NativeFactory = Arc<dyn Fn(HostApi) -> NativePlugin + Send + Sync>;

/// Host for [`NativePlugin`]s, keyed by plugin id or name.
#[derive(Default)]
pub struct NativeHost {
    factories: RwLock<HashMap<String, NativeFactory>>,
}

impl NativeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, key: &str, factory: F)
    where
        F: Fn(HostApi) -> NativePlugin + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(key.to_string(), Arc::new(factory));
    }

    fn factory(&self, descriptor: &PluginDescriptor) -> Option<NativeFactory> {
        let factories = self.factories.read();
        std::iter::once(descriptor.id.as_str())
            .chain(descriptor.keys())
            .find_map(|key| factories.get(key).cloned())
    }
}

impl CodeHost for NativeHost {
    fn name(&self) -> &'static str {
        "native"
    }

    fn can_load(&self, descriptor: &PluginDescriptor) -> bool {
        self.factory(descriptor).is_some()
    }

    fn load(&self, descriptor: &PluginDescriptor, api: HostApi) -> HostResult<Arc<dyn PluginModule>> {
        let factory = self
            .factory(descriptor)
            .ok_or_else(|| HostError::not_found("Native plugin", descriptor.id.clone()))?;
        Ok(Arc::new(factory(api)))
    }
}
