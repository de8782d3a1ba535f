//! Code hosts and the API handed to plugin code.
//!
//! A [`CodeHost`] turns a plugin directory into a [`PluginModule`]: a loaded
//! code unit exporting named functions. Plugins talk back to the host through
//! a [`HostApi`] bound to their canonical id.

use std::sync::{Arc, Weak};

use plugdeck_core::{BoxFuture, HostError, HostResult, Value};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityKind;
use crate::context::HostContext;
use crate::descriptor::PluginDescriptor;
use crate::events::{EventSink, Owner, SubscriptionId};
use crate::functions::FunctionCall;
use crate::manifest::AutomationEventDecl;
use crate::timers::{MinuteTrigger, PeriodSpec};

/// Lifecycle hooks a module may export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleHook {
    /// Run once after the module is loaded and its functions registered.
    Init,
    /// Run before a plugin is disabled.
    Disabled,
    /// Run before a plugin's files are removed.
    Uninstall,
}

impl LifecycleHook {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Disabled => "disabled",
            Self::Uninstall => "uninstall",
        }
    }

    /// Function implementing this hook: a manifest override or the hook name.
    pub fn function<'a>(&self, descriptor: &'a PluginDescriptor) -> &'a str {
        descriptor
            .manifest
            .hook_function(self.name())
            .unwrap_or(self.name())
    }
}

/// Loads plugin code.
pub trait CodeHost: Send + Sync {
    /// Host name (e.g. "rhai", "native").
    fn name(&self) -> &'static str;

    /// Whether this host knows how to load the plugin.
    fn can_load(&self, descriptor: &PluginDescriptor) -> bool;

    /// Load a fresh code unit.
    fn load(&self, descriptor: &PluginDescriptor, api: HostApi) -> HostResult<Arc<dyn PluginModule>>;
}

/// A loaded code unit.
pub trait PluginModule: Send + Sync {
    /// Exported function names.
    fn exports(&self) -> Vec<String>;

    /// Automation events the code itself declares.
    fn automation_events(&self) -> Vec<AutomationEventDecl> {
        vec![]
    }

    /// Invoke an exported function.
    fn call(&self, function: &str, call: FunctionCall) -> BoxFuture<'static, HostResult<Value>>;

    fn has_export(&self, function: &str) -> bool {
        self.exports().iter().any(|f| f == function)
    }

    /// Release resources. Called once, after the module's registrations are
    /// torn down.
    fn unload(&self) {}
}

/// Desktop shortcut a plugin asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortcutRequest {
    pub name: String,
    /// Function the shortcut invokes on the requesting plugin.
    #[serde(rename = "fn", alias = "function")]
    pub function: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub icon: Option<String>,
}

/// Creates desktop shortcuts on behalf of plugins.
pub trait ShortcutSink: Send + Sync {
    fn request_shortcut(&self, plugin: &str, request: &ShortcutRequest) -> HostResult<()>;
}

/// Default sink: records the request in the log.
pub struct LogShortcutSink;

impl ShortcutSink for LogShortcutSink {
    fn request_shortcut(&self, plugin: &str, request: &ShortcutRequest) -> HostResult<()> {
        tracing::info!(plugin, name = %request.name, function = %request.function, "shortcut requested");
        Ok(())
    }
}

/// Startup progress reported by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(default)]
    pub message: String,
}

/// Receives startup progress (the splash screen in a GUI shell).
pub trait ProgressSink: Send + Sync {
    fn report(&self, plugin: &str, progress: &Progress);
}

pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn report(&self, plugin: &str, progress: &Progress) {
        tracing::debug!(plugin, percent = ?progress.percent, message = %progress.message, "plugin progress");
    }
}

/// Host services bound to one plugin.
///
/// Holds the context weakly: loaded modules live inside the context, so a
/// strong reference would keep it alive forever.
#[derive(Clone)]
pub struct HostApi {
    ctx: Weak<HostContext>,
    plugin: String,
}

impl HostApi {
    pub fn new(ctx: &Arc<HostContext>, plugin: impl Into<String>) -> Self {
        Self {
            ctx: Arc::downgrade(ctx),
            plugin: plugin.into(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin
    }

    fn ctx(&self) -> HostResult<Arc<HostContext>> {
        self.ctx
            .upgrade()
            .ok_or_else(|| HostError::plugin(&self.plugin, "host is shutting down"))
    }

    pub async fn call_function(&self, target: &str, function: &str, args: Value) -> HostResult<Value> {
        let ctx = self.ctx()?;
        ctx.call_function(target, function, args, Some(self.plugin.as_str())).await
    }

    pub async fn call_capability(
        &self,
        kind: CapabilityKind,
        id: &str,
        args: Value,
        preferred: Option<&str>,
    ) -> HostResult<Value> {
        let ctx = self.ctx()?;
        ctx.call_capability(kind, id, args, preferred, Some(self.plugin.as_str()))
            .await
    }

    pub async fn call_action(&self, id: &str, args: Value) -> HostResult<Value> {
        self.call_capability(CapabilityKind::Action, id, args, None).await
    }

    pub async fn call_behavior(&self, id: &str, args: Value) -> HostResult<Value> {
        self.call_capability(CapabilityKind::Behavior, id, args, None).await
    }

    pub fn emit(&self, event: &str, payload: &Value) -> HostResult<usize> {
        Ok(self.ctx()?.emit(event, payload))
    }

    pub fn subscribe(&self, event: &str, sink: Arc<dyn EventSink>) -> HostResult<SubscriptionId> {
        Ok(self
            .ctx()?
            .subscribe(event, Owner::Plugin(self.plugin.clone()), sink))
    }

    /// Subscribe one of this plugin's own functions. It is called with
    /// `{event, payload}`.
    pub fn subscribe_function(&self, event: &str, function: &str) -> HostResult<SubscriptionId> {
        let sink = Arc::new(FunctionSink {
            ctx: self.ctx.clone(),
            plugin: self.plugin.clone(),
            function: function.to_string(),
        });
        self.subscribe(event, sink)
    }

    pub fn add_minute_trigger(&self, trigger: MinuteTrigger) -> HostResult<()> {
        self.ctx()?.timers().add_minute_trigger(&self.plugin, trigger)
    }

    pub fn clear_minute_triggers(&self) -> HostResult<()> {
        self.ctx()?.timers().clear_minute_triggers(&self.plugin);
        Ok(())
    }

    pub fn list_minute_triggers(&self) -> HostResult<Vec<MinuteTrigger>> {
        Ok(self.ctx()?.timers().list(&self.plugin).minute_triggers)
    }

    pub fn add_period(&self, period: PeriodSpec) -> HostResult<()> {
        self.ctx()?.timers().add_period(&self.plugin, period)
    }

    pub fn clear_periods(&self) -> HostResult<()> {
        self.ctx()?.timers().clear_periods(&self.plugin);
        Ok(())
    }

    pub fn list_periods(&self) -> HostResult<Vec<PeriodSpec>> {
        Ok(self.ctx()?.timers().list(&self.plugin).periods)
    }

    pub fn request_shortcut(&self, request: &ShortcutRequest) -> HostResult<()> {
        self.ctx()?
            .shortcut_sink()
            .request_shortcut(&self.plugin, request)
    }

    pub fn config_get(&self, key: &str) -> HostResult<Option<Value>> {
        Ok(self.ctx()?.config_get(&self.plugin, key))
    }

    pub fn config_set(&self, key: &str, value: Value) -> HostResult<()> {
        self.ctx()?.config_set(&self.plugin, key, value)
    }

    pub fn report_progress(&self, percent: Option<f64>, message: impl Into<String>) -> HostResult<()> {
        let progress = Progress {
            percent,
            message: message.into(),
        };
        self.ctx()?.progress_sink().report(&self.plugin, &progress);
        Ok(())
    }
}

/// Event sink calling a plugin function on a spawned task.
struct FunctionSink {
    ctx: Weak<HostContext>,
    plugin: String,
    function: String,
}

impl EventSink for FunctionSink {
    fn deliver(&self, event: &str, payload: &Value) -> bool {
        let Some(ctx) = self.ctx.upgrade() else {
            return false;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(plugin = %self.plugin, event, "no runtime to deliver event on");
            return true;
        };

        let plugin = self.plugin.clone();
        let function = self.function.clone();
        let args = serde_json::json!({ "event": event, "payload": payload });
        runtime.spawn(async move {
            if let Err(e) = ctx.call_function(&plugin, &function, args, None).await {
                tracing::warn!(plugin = %plugin, function = %function, error = %e, "event handler failed");
            }
        });
        true
    }

    fn is_alive(&self) -> bool {
        self.ctx.strong_count() > 0
    }
}
