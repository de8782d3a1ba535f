//! Error types shared by every plugdeck crate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors that can occur anywhere in the plugin and automation runtime.
#[derive(Debug, Error)]
pub enum HostError {
    /// A plugin, capability, function, package or version could not be resolved.
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// Several plugins provide a capability and none is selected.
    #[error("Multiple providers for {kind} '{id}' and none selected: {providers:?}")]
    Ambiguous {
        kind: &'static str,
        id: String,
        providers: Vec<String>,
    },

    /// A plugin did not answer within the RPC bound.
    #[error("Plugin '{plugin}' did not answer '{function}' within {timeout_ms}ms")]
    Timeout {
        plugin: String,
        function: String,
        timeout_ms: u64,
    },

    /// The operation conflicts with current state (e.g. package version in use).
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        blocking: Vec<String>,
    },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    Permission { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest could not be read or is invalid.
    #[error("Invalid manifest at {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    /// A plugin reported a failure while handling a call.
    #[error("Plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    /// Package download or index lookup failed.
    #[error("Download of '{package}' failed: {message}")]
    Download { package: String, message: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl HostError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::Permission { path },
            std::io::ErrorKind::NotFound => Self::NotFound {
                what: "Path",
                name: path.display().to_string(),
            },
            _ => Self::Io { path, source },
        }
    }

    /// Create a not-found error.
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Create a plugin failure.
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Coarse classification used in structured call results.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Ambiguous { .. } => ErrorKind::Ambiguous,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Permission { .. } => ErrorKind::Permission,
            Self::Io { .. } | Self::Download { .. } => ErrorKind::Io,
            Self::Manifest { .. } | Self::Config { .. } | Self::Serialization(_) => {
                ErrorKind::Invalid
            }
            Self::Plugin { .. } => ErrorKind::Plugin,
        }
    }

    /// Whether this error means the target simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error taxonomy exposed to callers of structured results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotFound,
    Ambiguous,
    Timeout,
    Conflict,
    Permission,
    Io,
    Invalid,
    Plugin,
}
