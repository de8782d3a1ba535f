//! Rhai plugin host.
//!
//! Plugins written in Rhai export plain script functions; the host API is
//! registered on a per-plugin engine under `host_*`, `config_*` and `log_*`.

mod api;
mod convert;
mod host;

pub use convert::{dynamic_to_json, json_to_dynamic};
pub use host::{DEFAULT_ENTRY, RhaiHost, RhaiModule};
