//! Core types for plugdeck.
//!
//! This crate provides the ambient pieces shared by the package store, the
//! plugin runtime and the automation engine: the error taxonomy, the host
//! configuration, the key-value store used for persisted host state, and the
//! structured `{ok, result | error}` call outcome.

mod config;
mod error;
mod kv;
mod outcome;

pub use config::{DEFAULT_PACKAGE_INDEX, DEFAULT_RPC_TIMEOUT_MS, HostConfig, HostConfigBuilder};
pub use error::{ErrorKind, HostError, HostResult};
pub use kv::{JsonFileStore, KvStore, MemoryStore, write_json_atomic};
pub use outcome::CallOutcome;

/// Dynamic value passed across the plugin boundary.
pub use serde_json::Value;

/// Type alias for boxed futures returned by object-safe async trait methods.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
