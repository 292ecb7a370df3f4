//! Script evaluation with the Boa engine
//!
//! Every execute request gets a fresh `Context`: globals installed from the
//! wrapped context, sentinel values revived into closures and dates, user
//! code run inside a function wrapper. Host callbacks are performed by a
//! native `__host_invoke` that blocks on a stdio round-trip while the
//! script is mid-run.

use boa_engine::{
    Context, JsError, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source,
};
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, error};
use uuid::Uuid;

use hooklet_ipc::{HostMessage, MessageEnvelope, RunnerMessage, ScriptOutcome, SyncStdioTransport};

/// Installed before any context globals. Revives wire sentinels and provides
/// the default `$throw` (a context-supplied one shadows it).
const PRELUDE: &str = r#"
function __hooklet_make_invoke(path) {
    return function () {
        var args = Array.prototype.slice.call(arguments);
        return JSON.parse(__host_invoke(path, JSON.stringify(args)));
    };
}

function __hooklet_revive(value) {
    if (value === null || typeof value !== "object") {
        return value;
    }
    if (value.__hooklet === "invoke") {
        return __hooklet_make_invoke(value.path);
    }
    if (value.__hooklet === "cycle") {
        return null;
    }
    if (value.__hooklet === "date") {
        return new Date(value.iso);
    }
    if (Array.isArray(value)) {
        for (var i = 0; i < value.length; i++) {
            value[i] = __hooklet_revive(value[i]);
        }
        return value;
    }
    for (var key in value) {
        if (Object.prototype.hasOwnProperty.call(value, key)) {
            value[key] = __hooklet_revive(value[key]);
        }
    }
    return value;
}

var $throw = function (message, statusCode) {
    var error = new Error(message);
    error.statusCode = statusCode;
    throw error;
};
"#;

/// Serializes the script's return value; `undefined` collapses to null
const RESULT_SNIPPET: &str = r#"
(function () {
    var text = JSON.stringify(__hooklet_result);
    return text === undefined ? "null" : text;
})()
"#;

/// Snapshots the mergeable globals after the script ran
const MUTATIONS_SNIPPET: &str = r#"
(function () {
    var out = {};
    if (typeof $body !== "undefined") { out["$body"] = $body; }
    if (typeof $query !== "undefined") { out["$query"] = $query; }
    if (typeof $params !== "undefined") { out["$params"] = $params; }
    if (typeof $share !== "undefined") { out["$share"] = $share; }
    if (typeof $data !== "undefined") { out["$data"] = $data; }
    if (typeof $statusCode !== "undefined") { out["$statusCode"] = $statusCode; }
    if (typeof $result !== "undefined") { out["$result"] = $result; }
    var text = JSON.stringify(out);
    return text === undefined ? "{}" : text;
})()
"#;

/// Run one execute request and produce its terminal reply
pub fn run(
    code: &str,
    context: &JsonValue,
    allowed_modules: &[String],
    correlation_id: Uuid,
) -> RunnerMessage {
    let started_at = Utc::now();
    match evaluate(code, context, allowed_modules) {
        Ok((value, mutations)) => RunnerMessage::Completed {
            correlation_id,
            outcome: ScriptOutcome::new(value, mutations, started_at, Utc::now()),
        },
        Err(message) => RunnerMessage::ScriptError {
            correlation_id,
            message,
        },
    }
}

fn evaluate(
    code: &str,
    context: &JsonValue,
    allowed_modules: &[String],
) -> Result<(JsonValue, JsonValue), String> {
    let mut engine = Context::default();

    engine
        .register_global_builtin_callable(
            JsString::from("__host_invoke"),
            2,
            NativeFunction::from_fn_ptr(host_invoke),
        )
        .map_err(|e| format!("engine setup failed: {}", e))?;

    eval_in(&mut engine, PRELUDE)?;
    eval_in(&mut engine, &modules_script(allowed_modules))?;
    eval_in(&mut engine, &globals_script(context))?;

    let wrapped = format!("var __hooklet_result = (function () {{\n{}\n}})();", code);
    eval_in(&mut engine, &wrapped)?;

    let value = eval_json(&mut engine, RESULT_SNIPPET)?;
    let mutations = eval_json(&mut engine, MUTATIONS_SNIPPET)?;
    Ok((value, mutations))
}

fn eval_in(engine: &mut Context, source: &str) -> Result<JsValue, String> {
    engine
        .eval(Source::from_bytes(source))
        .map_err(|e| e.to_string())
}

/// Evaluate a snippet that returns a JSON string and parse it
fn eval_json(engine: &mut Context, source: &str) -> Result<JsonValue, String> {
    let value = eval_in(engine, source)?;
    if value.is_undefined() || value.is_null() {
        return Ok(JsonValue::Null);
    }
    let text = value
        .to_string(engine)
        .map_err(|e| e.to_string())?
        .to_std_string_escaped();
    serde_json::from_str(&text).map_err(|e| format!("result serialization failed: {}", e))
}

/// One `var` declaration per identifier-safe top-level context key, each
/// value revived from its JSON wire shape
fn globals_script(context: &JsonValue) -> String {
    let mut script = String::new();
    let Some(entries) = context.as_object() else {
        return script;
    };
    for (key, value) in entries {
        if !is_identifier_safe(key) {
            debug!(key, "skipping context key unfit for a global name");
            continue;
        }
        // Double encoding: the value's JSON text becomes a JS string
        // literal, decoded back with JSON.parse inside the engine
        let Ok(literal) = serde_json::to_string(&value.to_string()) else {
            continue;
        };
        script.push_str(&format!(
            "var {} = __hooklet_revive(JSON.parse({}));\n",
            key, literal
        ));
    }
    script
}

/// `$modules` holds one invoke proxy per allowed module name; resolution of
/// the call itself stays on the host side
fn modules_script(allowed_modules: &[String]) -> String {
    let mut script = String::from("var $modules = {};\n");
    for name in allowed_modules {
        let (Ok(key), Ok(path)) = (
            serde_json::to_string(name),
            serde_json::to_string(&format!("$modules.{}", name)),
        ) else {
            continue;
        };
        script.push_str(&format!(
            "$modules[{}] = __hooklet_make_invoke({});\n",
            key, path
        ));
    }
    script
}

fn is_identifier_safe(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c == '$' || c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '$' || c == '_' || c.is_ascii_alphanumeric())
}

/// Native `__host_invoke(path, argsJson)`: blocking invoke round-trip on
/// stdio, returns the host's reply as a JSON string
fn host_invoke(_this: &JsValue, args: &[JsValue], engine: &mut Context) -> JsResult<JsValue> {
    let path = match args.first() {
        Some(v) if !v.is_undefined() => v.to_string(engine)?.to_std_string_escaped(),
        _ => {
            return Err(JsError::from(
                JsNativeError::typ().with_message("__host_invoke: path is required"),
            ))
        }
    };

    let args_json = match args.get(1) {
        Some(v) if !v.is_undefined() => v.to_string(engine)?.to_std_string_escaped(),
        _ => "[]".to_string(),
    };
    let call_args: Vec<JsonValue> = serde_json::from_str(&args_json).map_err(|e| {
        JsError::from(
            JsNativeError::typ().with_message(format!("__host_invoke: bad arguments: {}", e)),
        )
    })?;

    let value = round_trip(&path, call_args)
        .map_err(|message| JsError::from(JsNativeError::error().with_message(message)))?;

    let text = serde_json::to_string(&value)
        .map_err(|e| JsError::from(JsNativeError::error().with_message(e.to_string())))?;
    Ok(JsValue::from(JsString::from(text)))
}

/// What the host's next message means for a pending invocation
#[derive(Debug)]
enum ReplyOutcome {
    Value(JsonValue),
    CallbackError(String),
    /// The host broke correlation; the channel can no longer be trusted
    ProtocolFault(String),
}

fn classify_reply(expected: Uuid, message: HostMessage) -> ReplyOutcome {
    match message {
        HostMessage::InvokeResult {
            invocation_id,
            value,
        } if invocation_id == expected => ReplyOutcome::Value(value),

        HostMessage::InvokeError {
            invocation_id,
            message,
        } if invocation_id == expected => ReplyOutcome::CallbackError(message),

        other => ReplyOutcome::ProtocolFault(format!(
            "unexpected message during invoke {}: {:?}",
            expected, other
        )),
    }
}

/// Send `invoke`, block until the matching reply arrives
///
/// The runner issues one invoke at a time, so the very next reply must carry
/// this invocation's id; anything else desyncs the channel and the process
/// reports `fatal` and exits.
fn round_trip(path: &str, args: Vec<JsonValue>) -> Result<JsonValue, String> {
    let invocation_id = Uuid::new_v4();
    let mut transport = SyncStdioTransport::new();

    transport
        .send(&MessageEnvelope::new(RunnerMessage::Invoke {
            invocation_id,
            path: path.to_string(),
            args,
        }))
        .map_err(|e| format!("invoke send failed: {}", e))?;

    let envelope: MessageEnvelope<HostMessage> = transport
        .receive()
        .map_err(|e| format!("invoke reply read failed: {}", e))?;

    match classify_reply(invocation_id, envelope.message) {
        ReplyOutcome::Value(value) => Ok(value),
        ReplyOutcome::CallbackError(message) => Err(message),
        ReplyOutcome::ProtocolFault(message) => {
            error!("{}", message);
            let _ = transport.send(&MessageEnvelope::new(RunnerMessage::Fatal { message }));
            std::process::exit(1);
        }
    }
}
