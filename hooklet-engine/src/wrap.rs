//! Context serializer
//!
//! Projects the live context graph into a wire-safe JSON shape for the
//! worker. Functions become path-addressed invoke placeholders, revisited
//! objects become cycle sentinels, and a fixed set of well-known top-level
//! keys get dedicated reducers instead of generic traversal.

use crate::context::{ContextValue, ScriptContext};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashSet;
use std::sync::Arc;

/// Discriminator key for wire sentinels inside the wrapped context
pub const SENTINEL_KEY: &str = "__hooklet";

/// Headers the request reducer lets through
const REQUEST_HEADER_SUBSET: &[&str] = &[
    "content-type",
    "accept",
    "accept-language",
    "user-agent",
    "x-request-id",
];

/// Build an invoke placeholder for a dotted path
pub fn invoke_placeholder(path: &str) -> JsonValue {
    json!({ SENTINEL_KEY: "invoke", "path": path })
}

fn cycle_sentinel() -> JsonValue {
    json!({ SENTINEL_KEY: "cycle" })
}

fn date_sentinel(iso: String) -> JsonValue {
    json!({ SENTINEL_KEY: "date", "iso": iso })
}

/// Project the live context into its wire shape
pub fn wrap(context: &ScriptContext) -> JsonValue {
    let mut visited: HashSet<usize> = HashSet::new();
    visited.insert(Arc::as_ptr(context.root()) as usize);

    let mut out = Map::new();
    for key in context.root().keys() {
        let Some(value) = context.get(&key) else {
            continue;
        };
        let wrapped = match key.as_str() {
            "$req" => reduce_request(&value),
            "$res" => reduce_response(&value),
            "$cache" => reduce_callable_map(&value, "$cache"),
            "$user" => reduce_user(&value),
            "$repos" => reduce_repositories(&value),
            "$headers" => reduce_headers(&value),
            _ => wrap_value(&value, &key, &mut visited),
        };
        if let Some(wrapped) = wrapped {
            out.insert(key, wrapped);
        }
    }
    JsonValue::Object(out)
}

/// Generic depth-first traversal with identity-keyed cycle detection
fn wrap_value(value: &ContextValue, path: &str, visited: &mut HashSet<usize>) -> Option<JsonValue> {
    match value {
        ContextValue::Null => Some(JsonValue::Null),
        ContextValue::Bool(b) => Some(JsonValue::Bool(*b)),
        ContextValue::Number(n) => Some(JsonValue::Number(n.clone())),
        ContextValue::String(s) => Some(JsonValue::String(s.clone())),
        ContextValue::Date(d) => Some(JsonValue::String(d.to_rfc3339())),
        ContextValue::Function(_) => Some(invoke_placeholder(path)),
        ContextValue::Array(items) => {
            let wrapped = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    wrap_value(item, &format!("{}.{}", path, i), visited)
                        .unwrap_or(JsonValue::Null)
                })
                .collect();
            Some(JsonValue::Array(wrapped))
        }
        ContextValue::Object(obj) => {
            let identity = Arc::as_ptr(obj) as usize;
            if !visited.insert(identity) {
                // Already on the traversal path or seen before: emit the
                // sentinel instead of recursing, cycles must not overflow
                return Some(cycle_sentinel());
            }
            let mut out = Map::new();
            for key in obj.keys() {
                if let Some(field) = obj.get(&key) {
                    if let Some(wrapped) = wrap_value(&field, &format!("{}.{}", path, key), visited)
                    {
                        out.insert(key, wrapped);
                    }
                }
            }
            Some(JsonValue::Object(out))
        }
    }
}

/// Keep only method, URL, client IP and a small header subset
fn reduce_request(value: &ContextValue) -> Option<JsonValue> {
    let obj = value.as_object()?;
    let mut out = Map::new();

    for field in ["method", "url"] {
        if let Some(v) = obj.get(field) {
            out.insert(field.to_string(), v.to_json_lossy());
        }
    }

    let headers = obj.get("headers").map(|h| h.to_json_lossy());
    let header_map = headers.as_ref().and_then(|h| h.as_object());

    // Client IP: an explicit field wins, else the first forwarded hop
    let ip = obj
        .get("ip")
        .map(|v| v.to_json_lossy())
        .filter(|v| v.is_string())
        .or_else(|| {
            header_map
                .and_then(|h| h.get("x-forwarded-for"))
                .and_then(|v| v.as_str())
                .and_then(|s| s.split(',').next())
                .map(|s| JsonValue::String(s.trim().to_string()))
        });
    if let Some(ip) = ip {
        out.insert("ip".to_string(), ip);
    }

    if let Some(header_map) = header_map {
        let mut subset = Map::new();
        for name in REQUEST_HEADER_SUBSET {
            if let Some(v) = header_map.get(*name) {
                subset.insert(name.to_string(), v.clone());
            }
        }
        out.insert("headers".to_string(), JsonValue::Object(subset));
    }

    Some(JsonValue::Object(out))
}

/// The response projection is just the current status code
fn reduce_response(value: &ContextValue) -> Option<JsonValue> {
    let obj = value.as_object()?;
    let mut out = Map::new();
    if let Some(status) = obj.get("statusCode") {
        out.insert("statusCode".to_string(), status.to_json_lossy());
    }
    Some(JsonValue::Object(out))
}

/// Enumerate method names into one invoke placeholder per method
fn reduce_callable_map(value: &ContextValue, base_path: &str) -> Option<JsonValue> {
    let obj = value.as_object()?;
    let mut out = Map::new();
    for key in obj.keys() {
        if let Some(ContextValue::Function(_)) = obj.get(&key) {
            let path = format!("{}.{}", base_path, key);
            out.insert(key, invoke_placeholder(&path));
        }
    }
    Some(JsonValue::Object(out))
}

/// Current-user reducer: shallow copy, dates survive as date values,
/// functions are dropped silently
fn reduce_user(value: &ContextValue) -> Option<JsonValue> {
    let obj = value.as_object()?;
    let mut out = Map::new();
    for key in obj.keys() {
        match obj.get(&key) {
            Some(ContextValue::Date(d)) => {
                out.insert(key, date_sentinel(d.to_rfc3339()));
            }
            Some(ContextValue::Function(_)) | None => {}
            Some(plain) => {
                out.insert(key, plain.to_json_lossy());
            }
        }
    }
    Some(JsonValue::Object(out))
}

/// Each repository keeps its method names; calls are routed by name through
/// `$repos.<name>.<method>`, not by walking repository internals
fn reduce_repositories(value: &ContextValue) -> Option<JsonValue> {
    let obj = value.as_object()?;
    let mut out = Map::new();
    for repo_name in obj.keys() {
        let Some(repo) = obj.get(&repo_name) else {
            continue;
        };
        let Some(repo_obj) = repo.as_object() else {
            continue;
        };
        let mut methods = Map::new();
        for method in repo_obj.keys() {
            if let Some(ContextValue::Function(_)) = repo_obj.get(&method) {
                let path = format!("$repos.{}.{}", repo_name, method);
                methods.insert(method, invoke_placeholder(&path));
            }
        }
        out.insert(repo_name, JsonValue::Object(methods));
    }
    Some(JsonValue::Object(out))
}

/// Headers reduce to a plain string map
fn reduce_headers(value: &ContextValue) -> Option<JsonValue> {
    let obj = value.as_object()?;
    let mut out = Map::new();
    for key in obj.keys() {
        match obj.get(&key) {
            Some(ContextValue::String(s)) => {
                out.insert(key, JsonValue::String(s));
            }
            Some(ContextValue::Number(n)) => {
                out.insert(key, JsonValue::String(n.to_string()));
            }
            Some(ContextValue::Bool(b)) => {
                out.insert(key, JsonValue::String(b.to_string()));
            }
            _ => {}
        }
    }
    Some(JsonValue::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextObject, HostFunction};
    use chrono::TimeZone;
    use serde_json::json;

    fn noop_fn() -> ContextValue {
        ContextValue::Function(HostFunction::from_sync(|_| Ok(JsonValue::Null)))
    }

    #[test]
    fn test_plain_values_copy_through() {
        let ctx = ScriptContext::new()
            .with_json("$body", json!({"name": "Ann", "tags": ["a", "b"]}))
            .with_json("$statusCode", json!(200));
        let wrapped = wrap(&ctx);
        assert_eq!(wrapped["$body"], json!({"name": "Ann", "tags": ["a", "b"]}));
        assert_eq!(wrapped["$statusCode"], json!(200));
    }

    #[test]
    fn test_function_becomes_placeholder_with_path() {
        let helpers = ContextObject::new();
        helpers.set("slugify", noop_fn());
        let ctx = ScriptContext::new().with("helpers", ContextValue::Object(Arc::new(helpers)));

        let wrapped = wrap(&ctx);
        assert_eq!(
            wrapped["helpers"]["slugify"],
            json!({"__hooklet": "invoke", "path": "helpers.slugify"})
        );
    }

    #[test]
    fn test_cycle_becomes_sentinel_not_overflow() {
        let node = Arc::new(ContextObject::new());
        node.set("name", ContextValue::String("loop".to_string()));
        node.set("me", ContextValue::Object(node.clone()));

        let ctx = ScriptContext::new().with("$data", ContextValue::Object(node));
        let wrapped = wrap(&ctx);
        assert_eq!(wrapped["$data"]["name"], json!("loop"));
        assert_eq!(wrapped["$data"]["me"], json!({"__hooklet": "cycle"}));
    }

    #[test]
    fn test_deep_cycle_through_two_objects() {
        let a = Arc::new(ContextObject::new());
        let b = Arc::new(ContextObject::new());
        a.set("b", ContextValue::Object(b.clone()));
        b.set("a", ContextValue::Object(a.clone()));

        let ctx = ScriptContext::new().with("$data", ContextValue::Object(a));
        let wrapped = wrap(&ctx);
        assert_eq!(wrapped["$data"]["b"]["a"], json!({"__hooklet": "cycle"}));
    }

    #[test]
    fn test_request_reducer() {
        let headers = ContextObject::new();
        headers.set("content-type", ContextValue::String("application/json".into()));
        headers.set("x-forwarded-for", ContextValue::String("10.0.0.9, 172.16.0.1".into()));
        headers.set("cookie", ContextValue::String("secret=1".into()));

        let req = ContextObject::new();
        req.set("method", ContextValue::String("POST".into()));
        req.set("url", ContextValue::String("/api/orders".into()));
        req.set("headers", ContextValue::Object(Arc::new(headers)));
        req.set("socket", noop_fn());

        let ctx = ScriptContext::new().with("$req", ContextValue::Object(Arc::new(req)));
        let wrapped = wrap(&ctx);

        assert_eq!(wrapped["$req"]["method"], json!("POST"));
        assert_eq!(wrapped["$req"]["url"], json!("/api/orders"));
        assert_eq!(wrapped["$req"]["ip"], json!("10.0.0.9"));
        assert_eq!(wrapped["$req"]["headers"]["content-type"], json!("application/json"));
        assert!(wrapped["$req"]["headers"].get("cookie").is_none());
        assert!(wrapped["$req"].get("socket").is_none());
    }

    #[test]
    fn test_repository_reducer_keeps_method_names_only() {
        let users = ContextObject::new();
        users.set("find", noop_fn());
        users.set("create", noop_fn());
        users.set("tableName", ContextValue::String("users".into()));

        let repos = ContextObject::new();
        repos.set("users", ContextValue::Object(Arc::new(users)));

        let ctx = ScriptContext::new().with("$repos", ContextValue::Object(Arc::new(repos)));
        let wrapped = wrap(&ctx);

        assert_eq!(
            wrapped["$repos"]["users"]["find"],
            json!({"__hooklet": "invoke", "path": "$repos.users.find"})
        );
        assert_eq!(
            wrapped["$repos"]["users"]["create"],
            json!({"__hooklet": "invoke", "path": "$repos.users.create"})
        );
        // Non-function members are dropped, not walked
        assert!(wrapped["$repos"]["users"].get("tableName").is_none());
    }

    #[test]
    fn test_cache_reducer_enumerates_methods() {
        let cache = ContextObject::new();
        cache.set("get", noop_fn());
        cache.set("set", noop_fn());

        let ctx = ScriptContext::new().with("$cache", ContextValue::Object(Arc::new(cache)));
        let wrapped = wrap(&ctx);
        assert_eq!(
            wrapped["$cache"]["get"],
            json!({"__hooklet": "invoke", "path": "$cache.get"})
        );
    }

    #[test]
    fn test_user_reducer_preserves_dates_drops_functions() {
        let user = ContextObject::new();
        user.set("name", ContextValue::String("ann".into()));
        user.set(
            "createdAt",
            ContextValue::Date(chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        );
        user.set("can", noop_fn());

        let ctx = ScriptContext::new().with("$user", ContextValue::Object(Arc::new(user)));
        let wrapped = wrap(&ctx);
        assert_eq!(wrapped["$user"]["name"], json!("ann"));
        assert_eq!(wrapped["$user"]["createdAt"][SENTINEL_KEY], json!("date"));
        assert!(wrapped["$user"].get("can").is_none());
    }

    #[test]
    fn test_array_order_and_length_preserved() {
        let ctx = ScriptContext::new()
            .with("$data", ContextValue::from(json!([3, "two", null, {"k": 1}])));
        let wrapped = wrap(&ctx);
        assert_eq!(wrapped["$data"], json!([3, "two", null, {"k": 1}]));
    }
}
