//! Automation items as persisted.
//!
//! Triggers, predicates and actions keep their `type` tag and every other
//! field as raw JSON, so items written by newer versions (or by hand) survive
//! a load/save cycle untouched. Interpretation happens when they are used.

use plugdeck_plugin::parse_hhmm;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_true() -> bool {
    true
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One rule: triggers → conditions → confirmation → actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub confirm: Confirm,
    /// RFC 3339 timestamp of the last completed execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AutomationItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            triggers: vec![],
            conditions: Conditions::default(),
            actions: vec![],
            confirm: Confirm::default(),
            last_success_at: None,
            extra: Map::new(),
        }
    }

    /// Whether a `time` trigger matches `hhmm`.
    pub fn has_time(&self, hhmm: &str) -> bool {
        self.triggers.iter().any(|t| t.time().as_deref() == Some(hhmm))
    }

    /// Whether a `protocol` trigger matches `text` (leading `/` and case
    /// ignored).
    pub fn has_protocol(&self, text: &str) -> bool {
        let wanted = normalize_protocol(text);
        self.triggers
            .iter()
            .filter_map(Trigger::protocol)
            .any(|p| normalize_protocol(p) == wanted)
    }
}

pub fn normalize_protocol(text: &str) -> String {
    text.trim().trim_start_matches('/').to_lowercase()
}

fn param_str<'a>(params: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| params.get(*k).and_then(Value::as_str))
}

/// What starts an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Trigger {
    /// A daily wall-clock trigger.
    pub fn at(hhmm: &str) -> Self {
        let mut params = Map::new();
        params.insert("time".into(), Value::String(hhmm.to_string()));
        Self {
            kind: "time".to_string(),
            params,
        }
    }

    /// A trigger fired by protocol text.
    pub fn protocol_text(text: &str) -> Self {
        let mut params = Map::new();
        params.insert("text".into(), Value::String(text.to_string()));
        Self {
            kind: "protocol".to_string(),
            params,
        }
    }

    /// Normalized `HH:MM` of a `time` trigger.
    pub fn time(&self) -> Option<String> {
        if self.kind != "time" {
            return None;
        }
        param_str(&self.params, &["time", "at", "value"]).and_then(|t| parse_hhmm(t).ok())
    }

    pub fn protocol(&self) -> Option<&str> {
        if self.kind != "protocol" {
            return None;
        }
        param_str(&self.params, &["text", "protocol", "value"])
    }
}

/// How a list of results combines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    And,
    Or,
}

impl Mode {
    /// Combine results. Empty input is `true` for both modes.
    pub fn combine(self, mut results: impl Iterator<Item = bool>) -> bool {
        let mut any = false;
        match self {
            Self::And => results.all(|r| r),
            Self::Or => {
                for r in results {
                    any = true;
                    if r {
                        return true;
                    }
                }
                !any
            }
        }
    }
}

/// Top-level condition tree: groups of leaf predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub groups: Vec<ConditionGroup>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub items: Vec<Predicate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A leaf condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub negate: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Predicate {
    pub fn new(kind: &str, value: Value) -> Self {
        Self {
            kind: kind.to_string(),
            negate: false,
            value,
            extra: Map::new(),
        }
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }
}

/// One step of an item. Decoded by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Action {
    pub fn new(kind: &str, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.to_string(),
            params,
        }
    }

    /// Tagged JSON object, the executor's decode input.
    pub fn to_value(&self) -> Value {
        let mut object = self.params.clone();
        object.insert("type".into(), Value::String(self.kind.clone()));
        Value::Object(object)
    }
}

fn default_confirm_timeout() -> u64 {
    30
}

/// Confirmation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirm {
    #[serde(default)]
    pub enabled: bool,
    /// Seconds before an unanswered prompt approves.
    #[serde(default = "default_confirm_timeout", alias = "timeoutSeconds")]
    pub timeout: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Confirm {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: default_confirm_timeout(),
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_survive() {
        let raw = json!({
            "id": "morning",
            "name": "Morning bell",
            "enabled": true,
            "triggers": [{"type": "time", "time": "08:00"}, {"type": "sunrise", "offset": -5}],
            "conditions": {"mode": "or", "groups": [
                {"mode": "and", "items": [{"type": "moonPhase", "value": "full", "weight": 2}]}
            ]},
            "actions": [{"type": "teleport", "to": "mars"}],
            "confirm": {"enabled": false, "timeout": 30},
            "color": "#ff0000"
        });
        let item: AutomationItem = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.extra["color"], "#ff0000");
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn test_trigger_accessors() {
        assert_eq!(Trigger::at("8:05").time().as_deref(), Some("08:05"));
        assert_eq!(Trigger::protocol_text("x").time(), None);

        let mut item = AutomationItem::new("a", "A");
        item.triggers.push(Trigger::protocol_text("/Lights-Off"));
        assert!(item.has_protocol("lights-off"));
        assert!(item.has_protocol("/LIGHTS-OFF"));
        assert!(!item.has_protocol("lights-on"));
    }

    #[test]
    fn test_mode_combine_empty_is_true() {
        assert!(Mode::And.combine(std::iter::empty()));
        assert!(Mode::Or.combine(std::iter::empty()));
        assert!(!Mode::Or.combine([false, false].into_iter()));
        assert!(Mode::Or.combine([false, true].into_iter()));
        assert!(!Mode::And.combine([true, false].into_iter()));
    }

    #[test]
    fn test_confirm_timeout_alias() {
        let c: Confirm = serde_json::from_value(json!({"enabled": true, "timeoutSeconds": 5})).unwrap();
        assert_eq!(c.timeout, 5);
    }
}
