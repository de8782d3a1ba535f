//! Plugin lifecycle: load, enable, disable, reload.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use plugdeck_core::{HostError, HostResult, Value};
use plugdeck_packages::{
    DependencyResolver, LinkMode, NpmIndex, PackageIndex, PackageStore, ResolveReport,
};
use serde::Serialize;
use serde_json::json;

use crate::context::{HostContext, Teardown};
use crate::descriptor::PluginDescriptor;
use crate::discovery::Discovery;
use crate::events::{PLUGIN_DISABLED, PLUGIN_ENABLED};
use crate::functions::{FunctionCall, PluginFunction};
use crate::host::{CodeHost, HostApi, LifecycleHook, PluginModule};
use crate::manifest::AutomationEventDecl;
use crate::rhai::RhaiHost;

/// Result of activating one plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    pub plugin: String,
    /// Code host that loaded the plugin; `None` for surface-only plugins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<&'static str>,
    pub exports: Vec<String>,
    pub packages: ResolveReport,
}

/// Result of activating every enabled plugin.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    pub activated: Vec<Activation>,
    /// `(plugin, error message)`.
    pub failed: Vec<(String, String)>,
}

/// Owns loaded code units and drives plugin lifecycles against the shared
/// [`HostContext`].
pub struct PluginManager {
    ctx: Arc<HostContext>,
    hosts: Vec<Arc<dyn CodeHost>>,
    modules: RwLock<HashMap<String, Arc<dyn PluginModule>>>,
    resolver: Arc<DependencyResolver>,
}

impl PluginManager {
    /// A manager with the Rhai host.
    pub fn new(ctx: Arc<HostContext>, resolver: Arc<DependencyResolver>) -> Self {
        Self {
            ctx,
            hosts: vec![Arc::new(RhaiHost::new())],
            modules: RwLock::new(HashMap::new()),
            resolver,
        }
    }

    /// A manager resolving packages against the configured index and store.
    pub fn from_context(ctx: Arc<HostContext>) -> Self {
        let config = ctx.config();
        let index: Arc<dyn PackageIndex> = Arc::new(NpmIndex::new(config.package_index_url.clone()));
        let store = PackageStore::new(config.store_root.clone());
        let resolver = Arc::new(DependencyResolver::new(store, index, ctx.kv().clone()));
        Self::new(ctx, resolver)
    }

    /// Register another code host. Hosts added later are consulted first.
    pub fn with_host(mut self, host: Arc<dyn CodeHost>) -> Self {
        self.hosts.insert(0, host);
        self
    }

    pub fn context(&self) -> &Arc<HostContext> {
        &self.ctx
    }

    pub fn resolver(&self) -> &Arc<DependencyResolver> {
        &self.resolver
    }

    /// Rescan the plugin roots and replace the registry. Loaded plugins that
    /// disappeared are deactivated.
    pub fn discover(&self) -> usize {
        let descriptors = Discovery::from_config(self.ctx.config()).scan();
        let count = descriptors.len();
        self.ctx.registry_mut().replace_all(descriptors);

        let gone: Vec<String> = {
            let registry = self.ctx.registry();
            self.modules
                .read()
                .keys()
                .filter(|id| registry.get(id).is_none())
                .cloned()
                .collect()
        };
        for id in gone {
            self.deactivate(&id);
        }

        tracing::info!(plugins = count, "discovered plugins");
        count
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.modules.read().contains_key(&self.ctx.canonicalize(key))
    }

    /// Canonical ids of plugins with loaded code.
    pub fn active_plugins(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.modules.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn module(&self, id: &str) -> Option<Arc<dyn PluginModule>> {
        self.modules.read().get(id).cloned()
    }

    /// Resolve packages, load code, register exports and run `init`.
    /// Activating an active plugin is a no-op.
    pub async fn activate(&self, key: &str) -> HostResult<Activation> {
        let descriptor = self.ctx.registry().require(key)?.clone();
        let id = descriptor.id.clone();

        if let Some(module) = self.module(&id) {
            return Ok(Activation {
                plugin: id,
                host: None,
                exports: module.exports(),
                packages: ResolveReport::default(),
            });
        }
        if !descriptor.enabled {
            return Err(HostError::plugin(&id, "plugin is disabled"));
        }

        let packages = self
            .resolver
            .resolve_plugin(&id, &descriptor.dir, &descriptor.manifest.packages)
            .await;

        let Some(host) = self.host_for(&descriptor) else {
            tracing::debug!(plugin = %id, "no code to load");
            return Ok(Activation {
                plugin: id,
                host: None,
                exports: vec![],
                packages,
            });
        };

        let api = HostApi::new(&self.ctx, id.clone());
        let loader = host.clone();
        let for_load = descriptor.clone();
        let module = tokio::task::spawn_blocking(move || loader.load(&for_load, api))
            .await
            .map_err(|e| HostError::plugin(&id, format!("load task failed: {e}")))??;

        let exports = module.exports();
        for name in &exports {
            self.ctx
                .functions()
                .register(&id, name, module_function(module.clone(), name.clone()));
        }
        self.modules.write().insert(id.clone(), module.clone());

        let init = LifecycleHook::Init.function(&descriptor);
        if module.has_export(init) {
            if let Err(e) = module.call(init, FunctionCall::new(Value::Null)).await {
                tracing::warn!(plugin = %id, error = %e, "init failed");
                self.deactivate(&id);
                return Err(e);
            }
        }

        tracing::info!(plugin = %id, host = host.name(), exports = exports.len(), "activated plugin");
        Ok(Activation {
            plugin: id,
            host: Some(host.name()),
            exports,
            packages,
        })
    }

    fn host_for(&self, descriptor: &PluginDescriptor) -> Option<Arc<dyn CodeHost>> {
        self.hosts
            .iter()
            .find(|host| host.can_load(descriptor))
            .cloned()
    }

    /// Activate every enabled plugin, dependencies first. One failure does
    /// not stop the others.
    pub async fn activate_all(&self) -> ActivationReport {
        let mut report = ActivationReport::default();
        for id in self.activation_order() {
            match self.activate(&id).await {
                Ok(activation) => report.activated.push(activation),
                Err(e) => {
                    tracing::warn!(plugin = %id, error = %e, "activation failed");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        report
    }

    /// Enabled plugins ordered so declared plugin dependencies come first.
    /// Cycles are broken at the first revisit.
    fn activation_order(&self) -> Vec<String> {
        let registry = self.ctx.registry();
        let mut order = vec![];
        let mut visited = HashSet::new();

        fn visit(
            registry: &crate::registry::PluginRegistry,
            id: &str,
            visited: &mut HashSet<String>,
            order: &mut Vec<String>,
        ) {
            if !visited.insert(id.to_string()) {
                return;
            }
            let Some(descriptor) = registry.get(id) else {
                return;
            };
            for dep in &descriptor.manifest.dependencies {
                visit(registry, &registry.canonicalize(dep), visited, order);
            }
            if descriptor.enabled {
                order.push(id.to_string());
            }
        }

        for descriptor in registry.enabled() {
            visit(&registry, &descriptor.id, &mut visited, &mut order);
        }
        order
    }

    /// Drop every runtime registration and the loaded code of a plugin.
    pub(crate) fn deactivate(&self, id: &str) -> Teardown {
        let report = self.ctx.teardown(id);
        let removed = self.modules.write().remove(id);
        if let Some(module) = removed {
            module.unload();
        }
        report
    }

    /// Run a lifecycle hook if the plugin exports it. Failures are logged.
    pub(crate) async fn run_hook(&self, descriptor: &PluginDescriptor, hook: LifecycleHook) {
        let Some(module) = self.module(&descriptor.id) else {
            return;
        };
        let function = hook.function(descriptor);
        if !module.has_export(function) {
            return;
        }
        if let Err(e) = module.call(function, FunctionCall::new(Value::Null)).await {
            tracing::warn!(plugin = %descriptor.id, hook = hook.name(), error = %e, "hook failed");
        }
    }

    pub async fn enable(&self, key: &str) -> HostResult<Activation> {
        let id = self.ctx.registry().require(key)?.id.clone();
        self.ctx.registry_mut().set_enabled(&id, true)?;
        let activation = self.activate(&id).await?;
        self.ctx.emit(PLUGIN_ENABLED, &json!({ "id": id }));
        Ok(activation)
    }

    /// Run the `disabled` hook, tear everything down and persist the flag.
    /// Timers and subscriptions are not restored by a later enable; the
    /// plugin's `init` registers them again.
    pub async fn disable(&self, key: &str) -> HostResult<Teardown> {
        let descriptor = self.ctx.registry().require(key)?.clone();
        self.run_hook(&descriptor, LifecycleHook::Disabled).await;

        let report = self.deactivate(&descriptor.id);
        self.ctx.registry_mut().set_enabled(&descriptor.id, false)?;
        self.ctx.emit(PLUGIN_DISABLED, &json!({ "id": descriptor.id }));
        tracing::info!(plugin = %descriptor.id, ?report, "disabled plugin");
        Ok(report)
    }

    /// Discard the loaded code and bind a fresh copy from disk.
    pub async fn reload(&self, key: &str) -> HostResult<Activation> {
        let descriptor = self.ctx.registry().require(key)?.clone();
        self.deactivate(&descriptor.id);

        if let Some(mut fresh) = PluginDescriptor::load(&descriptor.dir)? {
            fresh.parent = descriptor.parent.clone();
            if fresh.id != descriptor.id {
                tracing::warn!(old = %descriptor.id, new = %fresh.id, "plugin id changed on reload");
                self.ctx.registry_mut().remove(&descriptor.id);
            }
            let id = fresh.id.clone();
            self.ctx.registry_mut().upsert(fresh);
            return self.activate(&id).await;
        }
        Err(HostError::Manifest {
            path: descriptor.dir,
            message: "manifest disappeared".to_string(),
        })
    }

    /// Pin one package of a plugin to `version` and relink it.
    pub async fn update_version(&self, key: &str, package: &str, version: &str) -> HostResult<LinkMode> {
        let descriptor = self.ctx.registry().require(key)?.clone();
        self.resolver
            .update_version(&descriptor.id, &descriptor.dir, package, version)
            .await
    }

    /// Automation events of enabled plugins: manifest declarations, then
    /// those declared by loaded code, de-duplicated per plugin by id.
    pub fn automation_events(&self) -> Vec<(String, AutomationEventDecl)> {
        let registry = self.ctx.registry();
        let mut events = vec![];
        for descriptor in registry.enabled() {
            let mut seen = HashSet::new();
            let from_code = self
                .module(&descriptor.id)
                .map(|m| m.automation_events())
                .unwrap_or_default();
            for event in descriptor.manifest.automation_events.iter().cloned().chain(from_code) {
                if seen.insert(event.id.clone()) {
                    events.push((descriptor.id.clone(), event));
                }
            }
        }
        events
    }

    /// Tear down every loaded plugin without running hooks.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.modules.read().keys().cloned().collect();
        for id in ids {
            self.deactivate(&id);
        }
    }
}

fn module_function(module: Arc<dyn PluginModule>, name: String) -> PluginFunction {
    Arc::new(move |call: FunctionCall| module.call(&name, call))
}
