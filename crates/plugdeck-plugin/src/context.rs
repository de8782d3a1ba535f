//! The process-wide runtime context shared by the manager, code hosts and the
//! automation engine.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use plugdeck_core::{HostConfig, HostResult, KvStore, Value};
use serde::Serialize;

use crate::bridge::RpcBridge;
use crate::events::{EventBus, EventSink, Owner, SubscriptionId};
use crate::functions::FunctionRegistry;
use crate::host::{LogProgressSink, LogShortcutSink, ProgressSink, ShortcutSink};
use crate::registry::{PluginRegistry, enabled_key};
use crate::surface::{PluginSurface, SurfaceRegistry};
use crate::timers::TimerRegistry;

/// Called with `(plugin, function)` when a call finds neither a registered
/// function nor a live surface.
pub type MissingPluginHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// What [`HostContext::teardown`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Teardown {
    pub functions: usize,
    pub subscriptions: usize,
    pub periods: usize,
    pub minute_triggers: usize,
    pub surface_closed: bool,
}

/// Registries owned by the host process.
pub struct HostContext {
    config: HostConfig,
    kv: Arc<dyn KvStore>,
    registry: RwLock<PluginRegistry>,
    functions: FunctionRegistry,
    events: EventBus,
    timers: TimerRegistry,
    surfaces: SurfaceRegistry,
    bridge: RpcBridge,
    missing_plugin_hook: RwLock<Option<MissingPluginHook>>,
    shortcuts: RwLock<Arc<dyn ShortcutSink>>,
    progress: RwLock<Arc<dyn ProgressSink>>,
}

impl HostContext {
    pub fn new(config: HostConfig, kv: Arc<dyn KvStore>) -> Arc<Self> {
        let bridge = RpcBridge::new(config.rpc_timeout());
        Arc::new(Self {
            registry: RwLock::new(PluginRegistry::new(kv.clone())),
            config,
            kv,
            functions: FunctionRegistry::new(),
            events: EventBus::new(),
            timers: TimerRegistry::new(),
            surfaces: SurfaceRegistry::new(),
            bridge,
            missing_plugin_hook: RwLock::new(None),
            shortcuts: RwLock::new(Arc::new(LogShortcutSink)),
            progress: RwLock::new(Arc::new(LogProgressSink)),
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn registry(&self) -> RwLockReadGuard<'_, PluginRegistry> {
        self.registry.read()
    }

    pub fn registry_mut(&self) -> RwLockWriteGuard<'_, PluginRegistry> {
        self.registry.write()
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }

    pub fn bridge(&self) -> &RpcBridge {
        &self.bridge
    }

    /// Canonical id of any plugin key.
    pub fn canonicalize(&self, key: &str) -> String {
        self.registry.read().canonicalize(key)
    }

    pub fn set_missing_plugin_hook(&self, hook: MissingPluginHook) {
        *self.missing_plugin_hook.write() = Some(hook);
    }

    pub(crate) fn missing_plugin_hook(&self) -> Option<MissingPluginHook> {
        self.missing_plugin_hook.read().clone()
    }

    pub fn set_shortcut_sink(&self, sink: Arc<dyn ShortcutSink>) {
        *self.shortcuts.write() = sink;
    }

    pub fn shortcut_sink(&self) -> Arc<dyn ShortcutSink> {
        self.shortcuts.read().clone()
    }

    pub fn set_progress_sink(&self, sink: Arc<dyn ProgressSink>) {
        *self.progress.write() = sink;
    }

    pub fn progress_sink(&self) -> Arc<dyn ProgressSink> {
        self.progress.read().clone()
    }

    /// Attach a surface to a plugin. Subscriptions of a replaced surface are
    /// dropped.
    pub fn open_surface(&self, plugin: &str, surface: Arc<dyn PluginSurface>) -> u64 {
        let id = self.canonicalize(plugin);
        let (surface_id, replaced) = self.surfaces.open(&id, surface);
        if let Some(old) = replaced {
            self.events.remove_owner(&Owner::Surface(old));
        }
        surface_id
    }

    pub fn close_surface(&self, plugin: &str) -> bool {
        let id = self.canonicalize(plugin);
        match self.surfaces.close(&id) {
            Some(surface_id) => {
                self.events.remove_owner(&Owner::Surface(surface_id));
                true
            }
            None => false,
        }
    }

    pub fn subscribe(&self, event: &str, owner: Owner, sink: Arc<dyn EventSink>) -> SubscriptionId {
        self.events.subscribe(event, owner, sink)
    }

    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        self.events.emit(event, payload)
    }

    /// Remove every runtime registration of a plugin: functions, event
    /// subscriptions, timers and its surface.
    pub fn teardown(&self, plugin: &str) -> Teardown {
        let functions = self.functions.unregister_plugin(plugin);
        let subscriptions = self.events.remove_owner(&Owner::Plugin(plugin.to_string()));
        let timers = self.timers.clear(plugin).unwrap_or_default();
        let surface_closed = self.close_surface(plugin);

        let report = Teardown {
            functions,
            subscriptions,
            periods: timers.periods.len(),
            minute_triggers: timers.minute_triggers.len(),
            surface_closed,
        };
        tracing::debug!(plugin, ?report, "tore down plugin registrations");
        report
    }

    /// Key-value key of a scoped plugin setting.
    pub fn config_key(plugin: &str, key: &str) -> String {
        format!("plugin_config.{plugin}.{key}")
    }

    pub fn config_get(&self, plugin: &str, key: &str) -> Option<Value> {
        self.kv.get(&Self::config_key(plugin, key))
    }

    pub fn config_set(&self, plugin: &str, key: &str, value: Value) -> HostResult<()> {
        self.kv.set(&Self::config_key(plugin, key), value)
    }

    /// Drop persisted state stored under a plugin's id or name.
    pub fn purge_state(&self, keys: &[&str]) -> HostResult<usize> {
        let mut removed = 0;
        for key in keys.iter().filter(|k| !k.is_empty()) {
            if self.kv.remove(&enabled_key(key))? {
                removed += 1;
            }
            removed += self.kv.remove_prefix(&format!("packages.selected.{key}."))?;
            removed += self.kv.remove_prefix(&format!("plugin_config.{key}."))?;
        }
        Ok(removed)
    }
}
