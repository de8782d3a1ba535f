//! Host services exposed to Rhai scripts.
//!
//! Script functions run on blocking threads, so async host calls are driven
//! to completion with the runtime handle.

use std::future::Future;

use plugdeck_core::HostError;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map};

use super::convert::{dynamic_to_json, json_to_dynamic};
use crate::host::{HostApi, ShortcutRequest};
use crate::timers::{MinuteTrigger, PeriodSpec};

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

fn script_error(e: HostError) -> Box<EvalAltResult> {
    e.to_string().into()
}

fn block_on<F: Future>(fut: F) -> RhaiResult<F::Output> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|_| "host call made outside the plugin runtime")?;
    Ok(handle.block_on(fut))
}

/// Build the engine for one plugin, with the host API bound to it.
pub fn build_engine(api: HostApi) -> Engine {
    let mut engine = Engine::new();

    // Configure safety limits
    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(64);
    engine.set_max_operations(1_000_000);
    engine.set_max_modules(100);
    engine.set_max_string_size(1024 * 1024); // 1MB strings
    engine.set_max_array_size(10_000);
    engine.set_max_map_size(10_000);
    engine.disable_symbol("eval");

    register_logging(&mut engine, &api);
    register_calls(&mut engine, &api);
    register_events(&mut engine, &api);
    register_timers(&mut engine, &api);
    register_settings(&mut engine, &api);

    engine
}

fn register_logging(engine: &mut Engine, api: &HostApi) {
    let plugin = api.plugin_id().to_string();
    let id = plugin.clone();
    engine.register_fn("plugin_id", move || -> String { id.clone() });

    let id = plugin.clone();
    engine.register_fn("log_info", move |msg: &str| {
        tracing::info!(target: "plugin", plugin = %id, "{}", msg);
    });
    let id = plugin.clone();
    engine.register_fn("log_warn", move |msg: &str| {
        tracing::warn!(target: "plugin", plugin = %id, "{}", msg);
    });
    engine.register_fn("log_error", move |msg: &str| {
        tracing::error!(target: "plugin", plugin = %plugin, "{}", msg);
    });
}

fn register_calls(engine: &mut Engine, api: &HostApi) {
    let a = api.clone();
    engine.register_fn(
        "host_call",
        move |target: &str, function: &str, args: Dynamic| -> RhaiResult<Dynamic> {
            let result = block_on(a.call_function(target, function, dynamic_to_json(&args)))?;
            result.map(|v| json_to_dynamic(&v)).map_err(script_error)
        },
    );
    let a = api.clone();
    engine.register_fn(
        "host_call",
        move |target: &str, function: &str| -> RhaiResult<Dynamic> {
            let result = block_on(a.call_function(target, function, serde_json::Value::Null))?;
            result.map(|v| json_to_dynamic(&v)).map_err(script_error)
        },
    );
    let a = api.clone();
    engine.register_fn(
        "host_call_action",
        move |id: &str, args: Dynamic| -> RhaiResult<Dynamic> {
            let result = block_on(a.call_action(id, dynamic_to_json(&args)))?;
            result.map(|v| json_to_dynamic(&v)).map_err(script_error)
        },
    );
    let a = api.clone();
    engine.register_fn(
        "host_call_behavior",
        move |id: &str, args: Dynamic| -> RhaiResult<Dynamic> {
            let result = block_on(a.call_behavior(id, dynamic_to_json(&args)))?;
            result.map(|v| json_to_dynamic(&v)).map_err(script_error)
        },
    );
}

fn register_events(engine: &mut Engine, api: &HostApi) {
    let a = api.clone();
    engine.register_fn(
        "host_emit",
        move |event: &str, payload: Dynamic| -> RhaiResult<i64> {
            let delivered = a.emit(event, &dynamic_to_json(&payload)).map_err(script_error)?;
            Ok(delivered as i64)
        },
    );
    let a = api.clone();
    engine.register_fn(
        "host_subscribe",
        move |event: &str, function: &str| -> RhaiResult<()> {
            a.subscribe_function(event, function)
                .map(|_| ())
                .map_err(script_error)
        },
    );
    let a = api.clone();
    engine.register_fn("host_request_shortcut", move |spec: Map| -> RhaiResult<()> {
        let request: ShortcutRequest = rhai::serde::from_dynamic(&Dynamic::from(spec))?;
        a.request_shortcut(&request).map_err(script_error)
    });
}

fn register_timers(engine: &mut Engine, api: &HostApi) {
    let a = api.clone();
    engine.register_fn("host_add_minute_trigger", move |spec: Map| -> RhaiResult<()> {
        let trigger: MinuteTrigger = rhai::serde::from_dynamic(&Dynamic::from(spec))?;
        a.add_minute_trigger(trigger).map_err(script_error)
    });
    let a = api.clone();
    engine.register_fn("host_clear_minute_triggers", move || -> RhaiResult<()> {
        a.clear_minute_triggers().map_err(script_error)
    });
    let a = api.clone();
    engine.register_fn("host_list_minute_triggers", move || -> RhaiResult<Array> {
        let list = a.list_minute_triggers().map_err(script_error)?;
        Ok(rhai::serde::to_dynamic(&list)?.into_array().unwrap_or_default())
    });

    let a = api.clone();
    engine.register_fn("host_add_period", move |spec: Map| -> RhaiResult<()> {
        let period: PeriodSpec = rhai::serde::from_dynamic(&Dynamic::from(spec))?;
        a.add_period(period).map_err(script_error)
    });
    let a = api.clone();
    engine.register_fn("host_clear_periods", move || -> RhaiResult<()> {
        a.clear_periods().map_err(script_error)
    });
    let a = api.clone();
    engine.register_fn("host_list_periods", move || -> RhaiResult<Array> {
        let list = a.list_periods().map_err(script_error)?;
        Ok(rhai::serde::to_dynamic(&list)?.into_array().unwrap_or_default())
    });
}

fn register_settings(engine: &mut Engine, api: &HostApi) {
    let a = api.clone();
    engine.register_fn("config_get", move |key: &str| -> RhaiResult<Dynamic> {
        let value = a.config_get(key).map_err(script_error)?;
        Ok(value.as_ref().map(json_to_dynamic).unwrap_or(Dynamic::UNIT))
    });
    let a = api.clone();
    engine.register_fn("config_set", move |key: &str, value: Dynamic| -> RhaiResult<()> {
        a.config_set(key, dynamic_to_json(&value)).map_err(script_error)
    });

    let a = api.clone();
    engine.register_fn("host_progress", move |percent: f64, message: &str| -> RhaiResult<()> {
        a.report_progress(Some(percent), message).map_err(script_error)
    });
    let a = api.clone();
    engine.register_fn("host_progress", move |percent: i64, message: &str| -> RhaiResult<()> {
        a.report_progress(Some(percent as f64), message)
            .map_err(script_error)
    });
    let a = api.clone();
    engine.register_fn("host_progress", move |message: &str| -> RhaiResult<()> {
        a.report_progress(None, message).map_err(script_error)
    });
}
