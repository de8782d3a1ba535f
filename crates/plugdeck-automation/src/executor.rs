//! Running an item's actions.
//!
//! Actions run one after another. A failing action is logged and recorded in
//! its outcome; the remaining actions still run.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use plugdeck_core::{BoxFuture, HostError, HostResult, Value};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use strum::{Display, EnumString};
use tokio::process::Command;

use crate::gateway::PluginGateway;
use crate::interpolate::interpolate_value;
use crate::model::Action;

/// Starts external programs for `command`, `openApp` and `power` actions.
pub trait CommandRunner: Send + Sync {
    /// Run `command` through the platform shell and wait for it.
    fn shell<'a>(&'a self, command: &'a str) -> BoxFuture<'a, HostResult<()>>;

    /// Run `program` and wait for it to exit successfully.
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> BoxFuture<'a, HostResult<()>>;

    /// Start `program` without waiting for it.
    fn launch<'a>(&'a self, program: &'a str, args: &'a [String]) -> BoxFuture<'a, HostResult<()>>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

fn spawn_error(program: &str, e: std::io::Error) -> HostError {
    HostError::io(PathBuf::from(program), e)
}

async fn wait_success(program: &str, mut command: Command) -> HostResult<()> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| spawn_error(program, e))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = if stderr.trim().is_empty() {
        format!("exited with {}", output.status)
    } else {
        format!("exited with {}: {}", output.status, stderr.trim())
    };
    Err(HostError::Io {
        path: PathBuf::from(program),
        source: std::io::Error::other(message),
    })
}

impl CommandRunner for TokioCommandRunner {
    fn shell<'a>(&'a self, command: &'a str) -> BoxFuture<'a, HostResult<()>> {
        Box::pin(async move {
            let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
            let mut cmd = Command::new(shell);
            cmd.arg(flag).arg(command);
            wait_success(shell, cmd).await
        })
    }

    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> BoxFuture<'a, HostResult<()>> {
        Box::pin(async move {
            let mut cmd = Command::new(program);
            cmd.args(args);
            wait_success(program, cmd).await
        })
    }

    fn launch<'a>(&'a self, program: &'a str, args: &'a [String]) -> BoxFuture<'a, HostResult<()>> {
        Box::pin(async move {
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map(drop)
                .map_err(|e| spawn_error(program, e))
        })
    }
}

/// System power operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PowerOp {
    Shutdown,
    Restart,
    #[serde(alias = "logout")]
    #[strum(to_string = "logoff", serialize = "logout")]
    Logoff,
}

impl PowerOp {
    /// Program and arguments performing the operation on this platform.
    pub fn command(self) -> (String, Vec<String>) {
        let owned = |program: &str, args: &[&str]| {
            (program.to_string(), args.iter().map(|a| a.to_string()).collect::<Vec<_>>())
        };
        if cfg!(windows) {
            match self {
                Self::Shutdown => owned("shutdown", &["/s", "/t", "0"]),
                Self::Restart => owned("shutdown", &["/r", "/t", "0"]),
                Self::Logoff => owned("shutdown", &["/l"]),
            }
        } else if cfg!(target_os = "macos") {
            let script = match self {
                Self::Shutdown => "tell application \"System Events\" to shut down",
                Self::Restart => "tell application \"System Events\" to restart",
                Self::Logoff => "tell application \"System Events\" to log out",
            };
            owned("osascript", &["-e", script])
        } else {
            match self {
                Self::Shutdown => owned("systemctl", &["poweroff"]),
                Self::Restart => owned("systemctl", &["reboot"]),
                Self::Logoff => owned("loginctl", &["terminate-session", "self"]),
            }
        }
    }
}

/// Decoded action, after interpolation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActionKind {
    #[serde(rename_all = "camelCase")]
    PluginEvent {
        #[serde(alias = "plugin")]
        plugin_id: String,
        #[serde(alias = "fn", alias = "function")]
        event: String,
        #[serde(default, alias = "args")]
        params: Value,
    },
    Power {
        #[serde(alias = "op", alias = "mode")]
        action: PowerOp,
    },
    OpenApp {
        path: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Command {
        command: String,
    },
    Wait {
        seconds: f64,
    },
}

impl ActionKind {
    pub fn decode(value: Value) -> HostResult<Self> {
        serde_json::from_value(value).map_err(|e| HostError::Serialization(e.to_string()))
    }
}

/// How one action went.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub index: usize,
    pub kind: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ActionExecutor {
    gateway: Arc<dyn PluginGateway>,
    runner: Arc<dyn CommandRunner>,
}

impl ActionExecutor {
    pub fn new(gateway: Arc<dyn PluginGateway>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { gateway, runner }
    }

    pub fn gateway(&self) -> &Arc<dyn PluginGateway> {
        &self.gateway
    }

    /// Run `actions` in order. `params` feeds `${protocol:...}` tokens.
    pub async fn execute(
        &self,
        item_id: &str,
        actions: &[Action],
        params: &Map<String, Value>,
    ) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(actions.len());
        for (index, action) in actions.iter().enumerate() {
            let result = self.run_one(action, params).await;
            match &result {
                Ok(()) => tracing::info!(item = item_id, index, kind = %action.kind, "action done"),
                Err(e) => tracing::warn!(item = item_id, index, kind = %action.kind, error = %e, "action failed"),
            }
            outcomes.push(ActionOutcome {
                index,
                kind: action.kind.clone(),
                ok: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }
        outcomes
    }

    async fn run_one(&self, action: &Action, params: &Map<String, Value>) -> HostResult<()> {
        let mut decoded = match interpolate_value(
            Value::Object(action.params.clone()),
            params,
            self.gateway.as_ref(),
        )
        .await
        {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        decoded.insert("type".into(), Value::String(action.kind.clone()));

        match ActionKind::decode(Value::Object(decoded))? {
            ActionKind::PluginEvent {
                plugin_id,
                event,
                params,
            } => {
                self.gateway.fire_event(&plugin_id, &event, params).await?;
            }
            ActionKind::Power { action } => {
                let (program, args) = action.command();
                tracing::warn!(op = %action, "running power operation");
                self.runner.run(&program, &args).await?;
            }
            ActionKind::OpenApp { path, args } => self.runner.launch(&path, &args).await?,
            ActionKind::Command { command } => self.runner.shell(&command).await?,
            ActionKind::Wait { seconds } => {
                if seconds > 0.0 && seconds.is_finite() {
                    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_aliases() {
        let kind = ActionKind::decode(json!({"type": "pluginEvent", "plugin": "bell", "fn": "ring"})).unwrap();
        assert_eq!(
            kind,
            ActionKind::PluginEvent {
                plugin_id: "bell".into(),
                event: "ring".into(),
                params: Value::Null,
            }
        );

        let kind = ActionKind::decode(json!({"type": "power", "action": "Logout"}));
        assert!(kind.is_err(), "serde aliases are case-sensitive");
        let kind = ActionKind::decode(json!({"type": "power", "op": "logout"})).unwrap();
        assert_eq!(kind, ActionKind::Power { action: PowerOp::Logoff });
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        assert!(ActionKind::decode(json!({"type": "teleport", "to": "mars"})).is_err());
    }

    #[test]
    fn test_power_op_from_str() {
        assert_eq!("RESTART".parse::<PowerOp>().unwrap(), PowerOp::Restart);
        assert_eq!("logout".parse::<PowerOp>().unwrap(), PowerOp::Logoff);
        let (program, _) = PowerOp::Shutdown.command();
        assert!(!program.is_empty());
    }
}
