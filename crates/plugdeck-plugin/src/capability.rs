//! Action/behavior indirection.
//!
//! Callers name a capability (`"bell.ring"`) instead of a plugin; the
//! provider is chosen at call time: the caller's preferred provider, else the
//! persisted default, else the only provider there is.

use std::collections::BTreeMap;
use std::fmt;

use plugdeck_core::{HostError, HostResult, Value};
use serde::{Deserialize, Serialize};

use crate::context::HostContext;
use crate::manifest::{Capability, PluginManifest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Action,
    Behavior,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Behavior => "behavior",
        }
    }

    fn declared<'a>(&self, manifest: &'a PluginManifest) -> &'a [Capability] {
        match self {
            Self::Action => &manifest.actions,
            Self::Behavior => &manifest.behaviors,
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key-value key of the default provider for a capability.
pub fn default_provider_key(kind: CapabilityKind, id: &str) -> String {
    format!("capabilities.default.{kind}.{id}")
}

/// A capability with everyone who provides it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityInfo {
    pub kind: CapabilityKind,
    pub id: String,
    pub name: String,
    pub providers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
}

impl HostContext {
    /// Enabled plugins declaring the capability, in registry order.
    pub fn providers(&self, kind: CapabilityKind, id: &str) -> Vec<(String, Capability)> {
        self.registry()
            .enabled()
            .filter_map(|plugin| {
                kind.declared(&plugin.manifest)
                    .iter()
                    .find(|c| c.id == id)
                    .map(|c| (plugin.id.clone(), c.clone()))
            })
            .collect()
    }

    pub fn default_provider(&self, kind: CapabilityKind, id: &str) -> Option<String> {
        self.kv().get_str(&default_provider_key(kind, id))
    }

    /// Persist (or with `None`, clear) the default provider of a capability.
    pub fn set_default_provider(
        &self,
        kind: CapabilityKind,
        id: &str,
        provider: Option<&str>,
    ) -> HostResult<()> {
        let key = default_provider_key(kind, id);
        match provider {
            None => {
                self.kv().remove(&key)?;
                Ok(())
            }
            Some(provider) => {
                let provider = self.canonicalize(provider);
                if !self.providers(kind, id).iter().any(|(p, _)| *p == provider) {
                    return Err(HostError::not_found(
                        "Capability provider",
                        format!("{provider} for {kind} '{id}'"),
                    ));
                }
                self.kv().set(&key, Value::String(provider))
            }
        }
    }

    /// Pick the provider for a capability call.
    pub fn resolve_provider(
        &self,
        kind: CapabilityKind,
        id: &str,
        preferred: Option<&str>,
    ) -> HostResult<(String, Capability)> {
        let providers = self.providers(kind, id);
        let pick = |wanted: &str| providers.iter().find(|(p, _)| p == wanted).cloned();

        if let Some(preferred) = preferred {
            if let Some(found) = pick(&self.canonicalize(preferred)) {
                return Ok(found);
            }
        }
        if let Some(default) = self.default_provider(kind, id) {
            if let Some(found) = pick(&default) {
                return Ok(found);
            }
        }
        match providers.as_slice() {
            [] => Err(HostError::not_found(
                if kind == CapabilityKind::Action { "Action" } else { "Behavior" },
                id,
            )),
            [only] => Ok(only.clone()),
            many => Err(HostError::Ambiguous {
                kind: kind.as_str(),
                id: id.to_string(),
                providers: many.iter().map(|(p, _)| p.clone()).collect(),
            }),
        }
    }

    pub async fn call_capability(
        &self,
        kind: CapabilityKind,
        id: &str,
        args: Value,
        preferred: Option<&str>,
        caller: Option<&str>,
    ) -> HostResult<Value> {
        let (provider, capability) = self.resolve_provider(kind, id, preferred)?;
        tracing::debug!(%kind, id, provider = %provider, target = %capability.target, "calling capability");
        self.call_function(&provider, &capability.target, args, caller)
            .await
    }

    pub async fn call_action(&self, id: &str, args: Value, preferred: Option<&str>) -> HostResult<Value> {
        self.call_capability(CapabilityKind::Action, id, args, preferred, None)
            .await
    }

    pub async fn call_behavior(&self, id: &str, args: Value, preferred: Option<&str>) -> HostResult<Value> {
        self.call_capability(CapabilityKind::Behavior, id, args, preferred, None)
            .await
    }

    /// Every capability of a kind declared by an enabled plugin, sorted by id.
    pub fn list_capabilities(&self, kind: CapabilityKind) -> Vec<CapabilityInfo> {
        let mut by_id: BTreeMap<String, CapabilityInfo> = BTreeMap::new();
        for plugin in self.registry().enabled() {
            for capability in kind.declared(&plugin.manifest) {
                by_id
                    .entry(capability.id.clone())
                    .or_insert_with(|| CapabilityInfo {
                        kind,
                        id: capability.id.clone(),
                        name: capability.name.clone(),
                        providers: vec![],
                        default_provider: None,
                    })
                    .providers
                    .push(plugin.id.clone());
            }
        }
        for info in by_id.values_mut() {
            info.default_provider = self.default_provider(kind, &info.id);
        }
        by_id.into_values().collect()
    }
}
