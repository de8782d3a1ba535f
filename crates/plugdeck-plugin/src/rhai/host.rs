//! Rhai code host.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use plugdeck_core::{BoxFuture, HostError, HostResult, Value};
use rhai::{AST, CallFnOptions, Dynamic, Engine, FnAccess, Scope};

use super::api::build_engine;
use super::convert::{dynamic_to_json, json_to_dynamic};
use crate::descriptor::PluginDescriptor;
use crate::functions::FunctionCall;
use crate::host::{CodeHost, HostApi, PluginModule};
use crate::manifest::AutomationEventDecl;

/// Script loaded when a plugin names no entry.
pub const DEFAULT_ENTRY: &str = "main.rhai";

/// Function a script may define to declare automation events in code.
const EVENTS_FUNCTION: &str = "automation_events";

/// Loads `.rhai` plugins.
///
/// Exported functions take up to two parameters: the call arguments and the
/// calling plugin's id.
#[derive(Debug, Default, Clone, Copy)]
pub struct RhaiHost;

impl RhaiHost {
    pub fn new() -> Self {
        Self
    }

    fn script_path(descriptor: &PluginDescriptor) -> Option<PathBuf> {
        let path = descriptor
            .entry_path()
            .unwrap_or_else(|| descriptor.dir.join(DEFAULT_ENTRY));
        let is_script = path.extension().is_some_and(|ext| ext == "rhai");
        (is_script && path.is_file()).then_some(path)
    }
}

impl CodeHost for RhaiHost {
    fn name(&self) -> &'static str {
        "rhai"
    }

    fn can_load(&self, descriptor: &PluginDescriptor) -> bool {
        !descriptor.is_component() && Self::script_path(descriptor).is_some()
    }

    fn load(&self, descriptor: &PluginDescriptor, api: HostApi) -> HostResult<Arc<dyn PluginModule>> {
        let plugin = descriptor.id.clone();
        let path = Self::script_path(descriptor).ok_or_else(|| {
            HostError::not_found("Plugin entry", descriptor.dir.join(DEFAULT_ENTRY).display().to_string())
        })?;
        let source = std::fs::read_to_string(&path).map_err(|e| HostError::io(&path, e))?;

        let engine = build_engine(api);
        let ast = engine
            .compile(&source)
            .map_err(|e| HostError::plugin(&plugin, format!("compile error in {}: {e}", path.display())))?;

        // Top-level statements run once, on load.
        engine
            .run_ast(&ast)
            .map_err(|e| HostError::plugin(&plugin, e.to_string()))?;

        let mut arities: HashMap<String, usize> = HashMap::new();
        for func in ast.iter_functions() {
            if func.access == FnAccess::Private || func.name.starts_with('_') {
                continue;
            }
            let arity = func.params.len();
            arities
                .entry(func.name.to_string())
                .and_modify(|a| *a = (*a).max(arity))
                .or_insert(arity);
        }

        let mut module = RhaiModule {
            plugin,
            engine: Arc::new(engine),
            ast: Arc::new(ast),
            arities,
            events: vec![],
        };
        if module.arities.get(EVENTS_FUNCTION) == Some(&0) {
            let declared = module.call_blocking(EVENTS_FUNCTION, FunctionCall::new(Value::Null))?;
            module.events = parse_events(&module.plugin, declared);
        }

        tracing::debug!(
            plugin = %module.plugin,
            exports = module.arities.len(),
            script = %path.display(),
            "loaded rhai plugin"
        );
        Ok(Arc::new(module))
    }
}

/// A compiled script and its exports.
pub struct RhaiModule {
    plugin: String,
    engine: Arc<Engine>,
    ast: Arc<AST>,
    arities: HashMap<String, usize>,
    events: Vec<AutomationEventDecl>,
}

impl RhaiModule {
    fn call_blocking(&self, function: &str, call: FunctionCall) -> HostResult<Value> {
        invoke(&self.engine, &self.ast, &self.plugin, function, self.arity(function)?, call)
    }

    fn arity(&self, function: &str) -> HostResult<usize> {
        self.arities
            .get(function)
            .copied()
            .ok_or_else(|| HostError::not_found("Plugin function", format!("{}.{function}", self.plugin)))
    }
}

fn invoke(
    engine: &Engine,
    ast: &AST,
    plugin: &str,
    function: &str,
    arity: usize,
    call: FunctionCall,
) -> HostResult<Value> {
    let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
    let mut scope = Scope::new();
    let args = json_to_dynamic(&call.args);
    let caller = call.caller.map(Dynamic::from).unwrap_or(Dynamic::UNIT);

    let result = match arity {
        0 => engine.call_fn_with_options::<Dynamic>(options, &mut scope, ast, function, ()),
        1 => engine.call_fn_with_options::<Dynamic>(options, &mut scope, ast, function, (args,)),
        _ => engine.call_fn_with_options::<Dynamic>(options, &mut scope, ast, function, (args, caller)),
    };
    result
        .map(|value| dynamic_to_json(&value))
        .map_err(|e| HostError::plugin(plugin, e.to_string()))
}

fn parse_events(plugin: &str, declared: Value) -> Vec<AutomationEventDecl> {
    let Value::Array(entries) = declared else {
        tracing::warn!(plugin, "automation_events() must return an array");
        return vec![];
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            let parsed = match entry {
                Value::String(id) => Some(AutomationEventDecl {
                    name: id.clone(),
                    id,
                    description: String::new(),
                    function: None,
                }),
                Value::Object(mut obj) => {
                    if !obj.contains_key("name") {
                        if let Some(id) = obj.get("id").cloned() {
                            obj.insert("name".into(), id);
                        }
                    }
                    serde_json::from_value(Value::Object(obj)).ok()
                }
                _ => None,
            };
            if parsed.is_none() {
                tracing::warn!(plugin, "ignoring malformed automation event declaration");
            }
            parsed
        })
        .collect()
}

impl PluginModule for RhaiModule {
    fn exports(&self) -> Vec<String> {
        let mut names: Vec<String> = self.arities.keys().cloned().collect();
        names.sort();
        names
    }

    fn automation_events(&self) -> Vec<AutomationEventDecl> {
        self.events.clone()
    }

    fn has_export(&self, function: &str) -> bool {
        self.arities.contains_key(function)
    }

    fn call(&self, function: &str, call: FunctionCall) -> BoxFuture<'static, HostResult<Value>> {
        let arity = match self.arity(function) {
            Ok(arity) => arity,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let engine = self.engine.clone();
        let ast = self.ast.clone();
        let plugin = self.plugin.clone();
        let function = function.to_string();

        Box::pin(async move {
            let task_plugin = plugin.clone();
            tokio::task::spawn_blocking(move || {
                invoke(&engine, &ast, &task_plugin, &function, arity, call)
            })
            .await
            .map_err(|e| HostError::plugin(&plugin, format!("script task failed: {e}")))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_events_accepts_strings_and_objects() {
        let events = parse_events(
            "bell",
            json!(["ring", {"id": "mute", "description": "Silence"}, 3]),
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "ring");
        assert_eq!(events[1].name, "mute");
        assert_eq!(events[1].target(), "mute");
    }

    #[test]
    fn test_parse_events_rejects_non_array() {
        assert!(parse_events("bell", json!({"id": "ring"})).is_empty());
    }
}
