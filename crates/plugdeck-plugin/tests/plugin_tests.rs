//! Integration tests for plugin lifecycles, the call bridge and capabilities.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use plugdeck_core::{BoxFuture, CallOutcome, HostConfig, HostError, HostResult, KvStore, MemoryStore};
use plugdeck_packages::{DependencyResolver, PackageIndex, PackageStore, VersionSpec};
use plugdeck_plugin::{
    CapabilityKind, ChannelSink, ChannelSurface, HostContext, NativeHost, NativePlugin, Owner,
    PLUGIN_INSTALLED, PLUGIN_UNINSTALLED, PluginManager, RpcResponse, enabled_key, function,
};
use serde_json::{Value, json};
use tempfile::TempDir;

struct NoIndex;

impl PackageIndex for NoIndex {
    fn resolve<'a>(&'a self, name: &'a str, _spec: &'a VersionSpec) -> BoxFuture<'a, HostResult<String>> {
        Box::pin(async move { Err(HostError::not_found("Package", name)) })
    }

    fn download<'a>(&'a self, name: &'a str, _version: &'a str) -> BoxFuture<'a, HostResult<Vec<u8>>> {
        Box::pin(async move { Err(HostError::not_found("Package", name)) })
    }
}

fn setup() -> (TempDir, Arc<HostContext>, Arc<dyn KvStore>) {
    let dir = TempDir::new().unwrap();
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let ctx = HostContext::new(HostConfig::new(dir.path()), kv.clone());
    (dir, ctx, kv)
}

fn manager(ctx: &Arc<HostContext>) -> PluginManager {
    let store = PackageStore::new(ctx.config().store_root.clone());
    let resolver = DependencyResolver::new(store, Arc::new(NoIndex), ctx.kv().clone());
    PluginManager::new(ctx.clone(), Arc::new(resolver))
}

fn write_plugin(ctx: &HostContext, dir: &str, manifest: &str, script: Option<&str>) {
    let path = ctx.config().plugins_root.join(dir);
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join("plugin.json"), manifest).unwrap();
    if let Some(script) = script {
        fs::write(path.join("main.rhai"), script).unwrap();
    }
}

const BELL_SCRIPT: &str = r#"
fn init() {
    host_subscribe("school:bell", "on_bell");
}

fn schedule() {
    host_add_minute_trigger(#{ id: "morning", time: "8:00", "fn": "ring" });
    host_add_period(#{
        id: "lesson",
        start: "08:00",
        end: "08:45",
        weekdays: [1, 2, 3, 4, 5],
        startActions: [#{ "fn": "ring" }]
    });
    host_list_minute_triggers().len()
}

fn ring() { "ding" }

fn on_bell(message) {
    config_set("last", message.payload);
}

fn disabled() {
    log_info("going quiet");
}
"#;

#[tokio::test]
async fn test_disable_tears_down_and_enable_does_not_resurrect_timers() {
    let (_dir, ctx, kv) = setup();
    write_plugin(&ctx, "bell", r#"{"name":"Bell","aliases":["school-bell"]}"#, Some(BELL_SCRIPT));
    let manager = manager(&ctx);

    assert_eq!(manager.discover(), 1);
    let report = manager.activate_all().await;
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    assert_eq!(report.activated[0].host, Some("rhai"));

    let scheduled = ctx.call_function("school-bell", "schedule", Value::Null, None).await.unwrap();
    assert_eq!(scheduled, json!(1));
    let timers = ctx.timers().list("bell");
    assert_eq!(timers.minute_triggers[0].time, "08:00");
    assert_eq!(timers.periods.len(), 1);
    assert_eq!(ctx.events().subscriber_count("school:bell"), 1);

    let teardown = manager.disable("Bell").await.unwrap();
    assert_eq!(teardown.minute_triggers, 1);
    assert_eq!(teardown.periods, 1);
    assert_eq!(teardown.subscriptions, 1);
    assert!(teardown.functions >= 4);
    assert!(ctx.timers().list("bell").is_empty());
    assert!(!ctx.functions().has_plugin("bell"));
    assert!(!manager.is_active("bell"));
    assert_eq!(kv.get_bool(&enabled_key("bell")), Some(false));

    manager.enable("bell").await.unwrap();
    assert!(ctx.timers().list("bell").is_empty());
    assert_eq!(ctx.events().subscriber_count("school:bell"), 1);
    let rung = ctx.call_function("bell", "ring", Value::Null, None).await.unwrap();
    assert_eq!(rung, json!("ding"));
}

#[tokio::test]
async fn test_disabled_plugin_is_not_activated() {
    let (_dir, ctx, kv) = setup();
    write_plugin(&ctx, "bell", r#"{"name":"Bell"}"#, Some(BELL_SCRIPT));
    kv.set(&enabled_key("bell"), json!(false)).unwrap();
    let manager = manager(&ctx);

    manager.discover();
    let report = manager.activate_all().await;
    assert!(report.activated.is_empty());
    assert!(manager.activate("bell").await.is_err());
}

#[tokio::test]
async fn test_missing_function_runs_hook_once() {
    let (_dir, ctx, _kv) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    ctx.set_missing_plugin_hook(Arc::new(move |plugin: &str, function: &str| {
        assert_eq!((plugin, function), ("ghost", "haunt"));
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    let err = ctx
        .call_function("ghost", "haunt", Value::Null, None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let outcome: CallOutcome = ctx.call("ghost", "haunt", Value::Null).await;
    assert!(!outcome.ok);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // A loaded plugin without that one function is not reported as missing.
    ctx.functions()
        .register("ghost", "boo", function(|_call| async { Ok(json!("boo")) }));
    let err = ctx
        .call_function("ghost", "haunt", Value::Null, None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_surface_call_and_close() {
    let (_dir, ctx, _kv) = setup();
    write_plugin(&ctx, "clock", r#"{"name":"Clock","entry":"index.html"}"#, None);
    let manager = manager(&ctx);
    manager.discover();

    let (surface, mut rx) = ChannelSurface::pair();
    ctx.open_surface("Clock", surface);

    let responder = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.function, "now");
            ctx.bridge()
                .deliver_response(RpcResponse::ok(request.id, json!("08:00")));
        })
    };
    let now = ctx.call_function("clock", "now", Value::Null, None).await.unwrap();
    responder.await.unwrap();
    assert_eq!(now, json!("08:00"));

    assert!(ctx.close_surface("clock"));
    let err = ctx.call_function("clock", "now", Value::Null, None).await.unwrap_err();
    assert!(err.is_not_found());
}

fn lamp(label: &'static str) -> impl Fn(plugdeck_plugin::HostApi) -> NativePlugin + Send + Sync {
    move |api| {
        NativePlugin::new()
            .function("on", move |_call| async move { Ok(json!(label)) })
            .function("announce", move |call| {
                let api = api.clone();
                async move {
                    api.emit("lamp:on", &call.args)?;
                    Ok(json!(call.caller))
                }
            })
    }
}

#[tokio::test]
async fn test_capability_resolution_order() {
    let (_dir, ctx, _kv) = setup();
    let action = r#""actions":[{"id":"light.on","name":"Light on","fn":"on"}]"#;
    write_plugin(&ctx, "lamp-a", &format!(r#"{{"name":"Lamp A",{action}}}"#), None);
    write_plugin(&ctx, "lamp-b", &format!(r#"{{"name":"Lamp B",{action}}}"#), None);

    let native = NativeHost::new();
    native.register("lamp-a", lamp("a"));
    native.register("lamp-b", lamp("b"));
    let manager = manager(&ctx).with_host(Arc::new(native));
    manager.discover();
    manager.activate_all().await;

    let err = ctx.call_action("light.on", Value::Null, None).await.unwrap_err();
    assert!(matches!(err, HostError::Ambiguous { ref providers, .. } if providers.len() == 2));

    let preferred = ctx.call_action("light.on", Value::Null, Some("Lamp B")).await.unwrap();
    assert_eq!(preferred, json!("b"));

    ctx.set_default_provider(CapabilityKind::Action, "light.on", Some("lamp-a"))
        .unwrap();
    assert_eq!(ctx.call_action("light.on", Value::Null, None).await.unwrap(), json!("a"));
    assert!(
        ctx.set_default_provider(CapabilityKind::Action, "light.on", Some("ghost"))
            .unwrap_err()
            .is_not_found()
    );

    ctx.set_default_provider(CapabilityKind::Action, "light.on", None)
        .unwrap();
    manager.disable("lamp-a").await.unwrap();
    assert_eq!(ctx.call_action("light.on", Value::Null, None).await.unwrap(), json!("b"));

    let listed = ctx.list_capabilities(CapabilityKind::Action);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].providers, vec!["lamp-b"]);
    assert!(ctx.call_behavior("light.on", Value::Null, None).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_native_plugin_sees_caller_and_emits() {
    let (_dir, ctx, _kv) = setup();
    write_plugin(&ctx, "lamp", r#"{"name":"Lamp"}"#, None);
    let native = NativeHost::new();
    native.register("Lamp", lamp("a"));
    let manager = manager(&ctx).with_host(Arc::new(native));
    manager.discover();
    manager.activate("lamp").await.unwrap();

    let (sink, mut rx) = ChannelSink::pair();
    ctx.subscribe("lamp:on", Owner::Host, sink);

    let caller = ctx
        .call_function("lamp", "announce", json!({"room": 4}), Some("bell"))
        .await
        .unwrap();
    assert_eq!(caller, json!("bell"));
    assert_eq!(rx.try_recv().unwrap(), ("lamp:on".to_string(), json!({"room": 4})));
}

fn plugin_archive(path: &Path) {
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
        file,
        flate2::Compression::default(),
    ));
    let entries = [
        ("bell-1.0.0/plugin.json", r#"{"id":"Bell","name":"School Bell","version":"1.0.0"}"#),
        (
            "bell-1.0.0/main.rhai",
            r#"fn init() { host_progress(100, "ready"); } fn ring(args) { "ding " + args.times }"#,
        ),
    ];
    for (name, body) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, body.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[tokio::test]
async fn test_install_and_uninstall_archive() {
    let (dir, ctx, kv) = setup();
    let archive = dir.path().join("bell.tar.gz");
    plugin_archive(&archive);
    let manager = manager(&ctx);

    let (sink, mut rx) = ChannelSink::pair();
    ctx.subscribe(PLUGIN_INSTALLED, Owner::Host, sink.clone());
    ctx.subscribe(PLUGIN_UNINSTALLED, Owner::Host, sink);

    let installed = manager.install_archive(&archive).await.unwrap();
    assert_eq!(installed.plugin.id, "bell");
    assert!(installed.error.is_none());
    let plugin_dir = ctx.config().plugins_root.join("bell");
    assert!(plugin_dir.join("main.rhai").is_file());
    assert_eq!(rx.try_recv().unwrap().0, PLUGIN_INSTALLED);

    let rung = ctx
        .call_function("School Bell", "ring", json!({"times": 2}), None)
        .await
        .unwrap();
    assert_eq!(rung, json!("ding 2"));

    ctx.config_set("bell", "volume", json!(7)).unwrap();
    manager.uninstall("bell").await.unwrap();

    assert!(!plugin_dir.exists());
    assert!(ctx.config_get("bell", "volume").is_none());
    assert!(kv.keys_with_prefix("plugin_config.bell.").is_empty());
    assert!(ctx.registry().is_empty());
    assert!(!ctx.functions().has_plugin("bell"));
    assert_eq!(rx.try_recv().unwrap().0, PLUGIN_UNINSTALLED);
}

#[tokio::test]
async fn test_reinstall_replaces_previous_copy() {
    let (dir, ctx, _kv) = setup();
    let archive = dir.path().join("bell.tgz");
    plugin_archive(&archive);
    let manager = manager(&ctx);

    manager.install_archive(&archive).await.unwrap();
    fs::write(ctx.config().plugins_root.join("bell").join("stale.txt"), "x").unwrap();
    manager.install_archive(&archive).await.unwrap();

    assert!(!ctx.config().plugins_root.join("bell").join("stale.txt").exists());
    assert_eq!(ctx.registry().len(), 1);
    assert!(manager.is_active("bell"));
}

#[tokio::test]
async fn test_canonicalize_is_idempotent() {
    let (_dir, ctx, _kv) = setup();
    write_plugin(
        &ctx,
        "clock",
        r#"{"id":"Clock.Widget","name":"Clock","aliases":["timer","Big Clock"]}"#,
        None,
    );
    write_plugin(&ctx, "bell", r#"{"name":"Bell","aliases":["timer"]}"#, None);
    manager(&ctx).discover();

    for key in ["Clock.Widget", "clock.widget", "Clock", "timer", "Big Clock", "Bell", "nope", "-._-a", ""] {
        let once = ctx.canonicalize(key);
        assert_eq!(ctx.canonicalize(&once), once, "key {key:?}");
    }
    // Directories are scanned in name order, so "bell" claims the alias.
    assert_eq!(ctx.canonicalize("timer"), "bell");
    assert_eq!(ctx.canonicalize("Big Clock"), "clock.widget");
}
