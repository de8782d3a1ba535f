//! Host configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};

/// Default bound for a plugin surface to answer an RPC call.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 8_000;

/// Default package index.
pub const DEFAULT_PACKAGE_INDEX: &str = "https://registry.npmjs.org";

/// Configuration for the plugin host and automation engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct HostConfig {
    /// Directory holding one subdirectory per installed plugin.
    pub plugins_root: PathBuf,

    /// Directory holding globally shared components.
    pub components_root: PathBuf,

    /// Root of the package store.
    pub store_root: PathBuf,

    /// Key-value state file (enable flags, selections, defaults).
    pub state_file: PathBuf,

    /// Persisted automation items.
    pub automation_file: PathBuf,

    /// RPC bound in milliseconds.
    #[builder(default = "DEFAULT_RPC_TIMEOUT_MS")]
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Base URL of the package index.
    #[builder(default = "DEFAULT_PACKAGE_INDEX.to_string()")]
    #[serde(default = "default_package_index")]
    pub package_index_url: String,

    /// Semester start used for biweek parity.
    #[builder(default)]
    #[serde(default)]
    pub biweek_base_date: Option<NaiveDate>,

    /// Swap even and odd weeks.
    #[builder(default = "false")]
    #[serde(default)]
    pub biweek_invert: bool,
}

fn default_rpc_timeout() -> u64 {
    DEFAULT_RPC_TIMEOUT_MS
}

fn default_package_index() -> String {
    DEFAULT_PACKAGE_INDEX.to_string()
}

impl HostConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let roots = [
            ("plugins_root", &self.plugins_root),
            ("components_root", &self.components_root),
            ("store_root", &self.store_root),
        ];
        for (name, root) in roots {
            match root {
                Some(path) if path.as_os_str().is_empty() => {
                    return Err(format!("{name} cannot be empty"));
                }
                None => return Err(format!("{name} is required")),
                _ => {}
            }
        }
        if self.rpc_timeout_ms == Some(0) {
            return Err("rpc_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

impl HostConfig {
    /// Create a new config builder.
    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::default()
    }

    /// Lay every directory out under a single data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            plugins_root: data_dir.join("plugins"),
            components_root: data_dir.join("components"),
            store_root: data_dir.join("packages"),
            state_file: data_dir.join("state.json"),
            automation_file: data_dir.join("automations.json"),
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            package_index_url: DEFAULT_PACKAGE_INDEX.to_string(),
            biweek_base_date: None,
            biweek_invert: false,
        }
    }

    /// Every directory whose plugins can link packages from the store.
    pub fn package_user_roots(&self) -> [&Path; 2] {
        [self.plugins_root.as_path(), self.components_root.as_path()]
    }

    /// Platform default location of the config file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("plugdeck")
            .join("config.toml")
    }

    /// Platform default data directory.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("plugdeck")
    }

    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> HostResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| HostError::io(path, e))?;
        toml::from_str(&content).map_err(|e| HostError::Config {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// RPC bound as a duration.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new(Self::default_data_dir())
    }
}
