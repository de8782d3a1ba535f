//! Structured `{ok, result | error}` results for callers that must not see a Rust error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, HostResult};

/// Outcome of a cross-boundary call, shaped like the wire response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl CallOutcome {
    /// A successful outcome.
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            kind: None,
        }
    }

    /// A failed outcome.
    pub fn failure(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
            kind: Some(kind),
        }
    }
}

impl From<HostResult<Value>> for CallOutcome {
    fn from(result: HostResult<Value>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(err) => Self::failure(err.kind(), err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostError;

    #[test]
    fn test_outcome_from_error() {
        let outcome: CallOutcome = Err(HostError::not_found("Plugin", "weather")).into();
        assert!(!outcome.ok);
        assert_eq!(outcome.kind, Some(ErrorKind::NotFound));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["ok"], false);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_outcome_success_shape() {
        let outcome: CallOutcome = Ok(serde_json::json!(42)).into();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true, "result": 42}));
    }
}
