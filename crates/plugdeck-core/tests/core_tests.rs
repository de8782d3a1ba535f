use plugdeck_core::{CallOutcome, ErrorKind, HostConfig, HostError, JsonFileStore, KvStore};
use serde_json::json;
use tempfile::TempDir;

#[test]
fn test_missing_config_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let config = HostConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.rpc_timeout_ms, plugdeck_core::DEFAULT_RPC_TIMEOUT_MS);
    assert!(config.plugins_root.ends_with("plugins"));
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "plugins_root = [").unwrap();

    let err = HostConfig::load(&path).unwrap_err();
    assert!(matches!(err, HostError::Config { .. }));
}

#[test]
fn test_store_survives_reopen_and_prefix_purge() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let store = JsonFileStore::open(&path).unwrap();
    store.set("plugin_config.clock.format", json!("24h")).unwrap();
    store.set("plugin_config.clock.tz", json!("UTC")).unwrap();
    store.set("plugins.enabled.clock", json!(false)).unwrap();
    assert_eq!(store.remove_prefix("plugin_config.clock.").unwrap(), 2);
    drop(store);

    let store = JsonFileStore::open(&path).unwrap();
    assert!(store.keys_with_prefix("plugin_config.").is_empty());
    assert_eq!(store.get_bool("plugins.enabled.clock"), Some(false));
}

#[test]
fn test_timeout_outcome_kind() {
    let err = HostError::Timeout {
        plugin: "weather".into(),
        function: "forecast".into(),
        timeout_ms: 8000,
    };
    let outcome: CallOutcome = Err(err).into();
    assert_eq!(outcome.kind, Some(ErrorKind::Timeout));
    assert!(outcome.error.unwrap().contains("8000ms"));
}
