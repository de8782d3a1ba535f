//! Conversion between Rhai values and JSON.

use plugdeck_core::Value;
use rhai::{Array, Dynamic, Map};

/// Convert a Rhai Dynamic to a JSON value.
pub fn dynamic_to_json(val: &Dynamic) -> Value {
    if val.is_unit() {
        Value::Null
    } else if val.is_bool() {
        Value::Bool(val.as_bool().unwrap_or(false))
    } else if val.is_int() {
        Value::from(val.as_int().unwrap_or(0))
    } else if val.is_float() {
        serde_json::Number::from_f64(val.as_float().unwrap_or(0.0))
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else if val.is_string() {
        Value::String(val.clone().into_string().unwrap_or_default())
    } else if val.is_char() {
        Value::String(val.as_char().map(String::from).unwrap_or_default())
    } else if val.is_array() {
        let arr = val.clone().into_array().unwrap_or_default();
        Value::Array(arr.iter().map(dynamic_to_json).collect())
    } else if val.is_map() {
        let map = val.clone().cast::<Map>();
        Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_json(&v)))
                .collect(),
        )
    } else {
        Value::String(val.to_string())
    }
}

/// Convert a JSON value to a Rhai Dynamic.
pub fn json_to_dynamic(val: &Value) -> Dynamic {
    match val {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Dynamic::from(i),
            None => Dynamic::from(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => {
            let arr: Array = items.iter().map(json_to_dynamic).collect();
            Dynamic::from(arr)
        }
        Value::Object(obj) => {
            let map: Map = obj
                .iter()
                .map(|(k, v)| (k.as_str().into(), json_to_dynamic(v)))
                .collect();
            Dynamic::from(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_values_survive() {
        let value = json!({"name": "bell", "count": 3, "ratio": 0.5, "tags": ["a", null, true]});
        assert_eq!(dynamic_to_json(&json_to_dynamic(&value)), value);
    }

    #[test]
    fn test_unit_is_null() {
        assert_eq!(dynamic_to_json(&Dynamic::UNIT), Value::Null);
    }
}
