//! `${plugin:variable}` substitution in action parameters.

use std::sync::LazyLock;

use plugdeck_core::BoxFuture;
use regex::Regex;
use serde_json::{Map, Value};

use crate::gateway::PluginGateway;

/// Token source naming the triggering protocol's own parameters.
pub const PROTOCOL_SOURCE: &str = "protocol";

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^:{}]+):([^{}]+)\}").expect("token regex"));

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every token in `text`. Tokens that cannot be resolved become "".
pub async fn interpolate(text: &str, params: &Map<String, Value>, gateway: &dyn PluginGateway) -> String {
    if !text.contains("${") {
        return text.to_string();
    }

    // (start, end, source, name) of every token, collected before any await.
    let tokens: Vec<(usize, usize, String, String)> = TOKEN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps.get(1)?.as_str().trim().to_string(),
                caps.get(2)?.as_str().trim().to_string(),
            ))
        })
        .collect();

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, end, source, name) in tokens {
        out.push_str(&text[last..start]);
        let resolved = if source == PROTOCOL_SOURCE {
            params.get(&name).map(render)
        } else {
            match gateway.read_variable(&source, &name).await {
                Ok(value) => Some(render(&value)),
                Err(e) => {
                    tracing::debug!(plugin = %source, variable = %name, error = %e, "variable unresolved");
                    None
                }
            }
        };
        out.push_str(&resolved.unwrap_or_default());
        last = end;
    }
    out.push_str(&text[last..]);
    out
}

/// Interpolate every string inside a JSON value.
pub fn interpolate_value<'a>(
    value: Value,
    params: &'a Map<String, Value>,
    gateway: &'a dyn PluginGateway,
) -> BoxFuture<'a, Value> {
    Box::pin(async move {
        match value {
            Value::String(s) => Value::String(interpolate(&s, params, gateway).await),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(interpolate_value(item, params, gateway).await);
                }
                Value::Array(out)
            }
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, interpolate_value(v, params, gateway).await);
                }
                Value::Object(out)
            }
            other => other,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugdeck_core::{HostError, HostResult};
    use plugdeck_plugin::PluginTimers;
    use serde_json::json;

    struct Vars;

    impl PluginGateway for Vars {
        fn call_plugin<'a>(&'a self, _: &'a str, _: &'a str, _: Value) -> BoxFuture<'a, HostResult<Value>> {
            Box::pin(async { Ok(Value::Null) })
        }

        fn read_variable<'a>(&'a self, plugin: &'a str, name: &'a str) -> BoxFuture<'a, HostResult<Value>> {
            Box::pin(async move {
                match (plugin, name) {
                    ("weather", "temp") => Ok(json!(21)),
                    ("roster", "class") => Ok(json!("7B")),
                    _ => Err(HostError::not_found("Plugin function", format!("{plugin}.{name}"))),
                }
            })
        }

        fn timer_snapshot(&self) -> Vec<(String, PluginTimers)> {
            vec![]
        }
    }

    #[tokio::test]
    async fn test_tokens_resolve_or_vanish() {
        let params = json!({"room": "204"});
        let params = params.as_object().unwrap();
        let out = interpolate(
            "Class ${roster:class} in ${protocol:room}: ${weather:temp}C ${ghost:x}!",
            params,
            &Vars,
        )
        .await;
        assert_eq!(out, "Class 7B in 204: 21C !");
    }

    #[tokio::test]
    async fn test_interpolate_nested_values() {
        let params = Map::new();
        let value = json!({"text": "${roster:class}", "list": ["${weather:temp}", 3], "n": 1});
        let out = interpolate_value(value, &params, &Vars).await;
        assert_eq!(out, json!({"text": "7B", "list": ["21", 3], "n": 1}));
    }
}
