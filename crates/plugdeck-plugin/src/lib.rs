//! Plugin runtime for plugdeck.
//!
//! Plugins are directories holding a manifest (`plugin.json` or
//! `plugin.toml`) and, optionally, code. This crate discovers them, gives
//! each a canonical id, loads their code through a [`CodeHost`], and routes
//! calls between plugins:
//!
//! - in-process through the [`FunctionRegistry`],
//! - to a plugin's UI [surface](PluginSurface) through the [`RpcBridge`],
//!   bounded by a timeout,
//! - by capability (action/behavior) to whichever plugin provides it.
//!
//! Everything shared lives in one [`HostContext`]; lifecycles are driven by
//! the [`PluginManager`].
//!
//! # Example
//!
//! ```ignore
//! use plugdeck_core::{HostConfig, JsonFileStore};
//! use plugdeck_plugin::{HostContext, PluginManager};
//!
//! let config = HostConfig::load(&HostConfig::default_path())?;
//! let kv = Arc::new(JsonFileStore::open(&config.state_file)?);
//! let manager = PluginManager::from_context(HostContext::new(config, kv));
//!
//! manager.discover();
//! manager.activate_all().await;
//! let outcome = manager.context().call("bell", "ring", json!({})).await;
//! ```

mod bridge;
mod capability;
mod context;
mod descriptor;
mod discovery;
mod events;
mod functions;
mod host;
mod id;
mod installer;
mod manager;
mod manifest;
pub mod native;
mod registry;
pub mod rhai;
mod surface;
mod timers;

pub use bridge::RpcBridge;
pub use capability::{CapabilityInfo, CapabilityKind, default_provider_key};
pub use context::{HostContext, MissingPluginHook, Teardown};
pub use descriptor::{PluginDescriptor, PluginSource, SOURCE_FILE};
pub use discovery::{COMPONENTS_DIR, Discovery};
pub use events::{
    ChannelSink, EventBus, EventSink, Owner, PLUGIN_DISABLED, PLUGIN_ENABLED, PLUGIN_INSTALLED,
    PLUGIN_UNINSTALLED, SubscriptionId,
};
pub use functions::{FunctionCall, FunctionRegistry, PluginFunction, function};
pub use host::{
    CodeHost, HostApi, LifecycleHook, LogProgressSink, LogShortcutSink, PluginModule, Progress,
    ProgressSink, ShortcutRequest, ShortcutSink,
};
pub use id::{AliasTable, canonical_id, clean_id, hash_id, slugify};
pub use installer::Installed;
pub use manager::{Activation, ActivationReport, PluginManager};
pub use manifest::{
    AutomationEventDecl, Capability, MANIFEST_FILES, PluginKind, PluginManifest, StudentColumn,
    VariableDecl, manifest_path, split_package_spec,
};
pub use native::{NativeFactory, NativeHost, NativePlugin};
pub use registry::{PluginRegistry, enabled_key};
pub use rhai::RhaiHost;
pub use surface::{ChannelSurface, PluginSurface, RpcRequest, RpcResponse, SurfaceRegistry};
pub use timers::{
    MinuteTrigger, PeriodSpec, PluginTimers, TimerAction, TimerRegistry, WeekFilter, parse_hhmm,
};
