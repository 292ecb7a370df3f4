//! Live script context model
//!
//! The context is a dynamic, schema-less graph: a small set of well-known
//! top-level keys plus whatever the caller adds. It is modeled as a tagged
//! value tree. Objects are `Arc`-shared with interior mutability, which
//! makes cycles expressible and gives the serializer a stable identity to
//! key its visited set on. Functions stay host-side as async callbacks and
//! never cross the process boundary.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// An async host-side callback reachable from script code
#[derive(Clone)]
pub struct HostFunction {
    inner: Arc<dyn Fn(Vec<JsonValue>) -> BoxFuture<'static, Result<JsonValue, String>> + Send + Sync>,
}

impl HostFunction {
    /// Wrap an async callback
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<JsonValue>) -> BoxFuture<'static, Result<JsonValue, String>>
            + Send
            + Sync
            + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Wrap a synchronous callback
    pub fn from_sync<F>(f: F) -> Self
    where
        F: Fn(Vec<JsonValue>) -> Result<JsonValue, String> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |args| {
            let f = f.clone();
            Box::pin(async move { f(args) })
        })
    }

    /// Invoke the callback
    pub async fn call(&self, args: Vec<JsonValue>) -> Result<JsonValue, String> {
        (self.inner)(args).await
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFunction")
    }
}

/// One node of the live context graph
#[derive(Debug, Clone)]
pub enum ContextValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<ContextValue>),
    Object(Arc<ContextObject>),
    Function(HostFunction),
}

impl ContextValue {
    /// Create an empty object node
    pub fn object() -> Self {
        ContextValue::Object(Arc::new(ContextObject::new()))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, ContextValue::Object(_))
    }

    pub fn as_object(&self) -> Option<&Arc<ContextObject>> {
        match self {
            ContextValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Project a function-free subtree into plain JSON; functions become
    /// `Null`, shared objects are followed without cycle protection, so this
    /// is only for values known to be plain data
    pub fn to_json_lossy(&self) -> JsonValue {
        match self {
            ContextValue::Null => JsonValue::Null,
            ContextValue::Bool(b) => JsonValue::Bool(*b),
            ContextValue::Number(n) => JsonValue::Number(n.clone()),
            ContextValue::String(s) => JsonValue::String(s.clone()),
            ContextValue::Date(d) => JsonValue::String(d.to_rfc3339()),
            ContextValue::Array(items) => {
                JsonValue::Array(items.iter().map(|v| v.to_json_lossy()).collect())
            }
            ContextValue::Object(obj) => {
                let fields = obj.read_fields();
                JsonValue::Object(
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_json_lossy()))
                        .collect(),
                )
            }
            ContextValue::Function(_) => JsonValue::Null,
        }
    }
}

impl From<JsonValue> for ContextValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => ContextValue::Null,
            JsonValue::Bool(b) => ContextValue::Bool(b),
            JsonValue::Number(n) => ContextValue::Number(n),
            JsonValue::String(s) => ContextValue::String(s),
            JsonValue::Array(items) => {
                ContextValue::Array(items.into_iter().map(ContextValue::from).collect())
            }
            JsonValue::Object(map) => {
                let obj = ContextObject::new();
                for (k, v) in map {
                    obj.set(k, ContextValue::from(v));
                }
                ContextValue::Object(Arc::new(obj))
            }
        }
    }
}

/// A mutable, identity-carrying object node
#[derive(Debug, Default)]
pub struct ContextObject {
    fields: RwLock<BTreeMap<String, ContextValue>>,
}

impl ContextObject {
    pub fn new() -> Self {
        Self {
            fields: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn read_fields(&self) -> RwLockReadGuard<'_, BTreeMap<String, ContextValue>> {
        match self.fields.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn write_fields(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ContextValue>> {
        match self.fields.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, key: &str) -> Option<ContextValue> {
        self.read_fields().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: ContextValue) {
        self.write_fields().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<ContextValue> {
        self.write_fields().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.read_fields().keys().cloned().collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read_fields().contains_key(key)
    }
}

/// The live context for one execution request
///
/// Owned by the caller; the engine only ever sends a reduced copy to the
/// worker and mutates the live graph through the merge step after the worker
/// has fully finished.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    root: Arc<ContextObject>,
}

/// Top-level fields a worker may report mutations for
pub const MERGEABLE_FIELDS: &[&str] = &[
    "$body",
    "$query",
    "$params",
    "$share",
    "$data",
    "$statusCode",
    "$result",
];

impl ScriptContext {
    pub fn new() -> Self {
        Self {
            root: Arc::new(ContextObject::new()),
        }
    }

    pub fn root(&self) -> &Arc<ContextObject> {
        &self.root
    }

    pub fn get(&self, key: &str) -> Option<ContextValue> {
        self.root.get(key)
    }

    pub fn set(&self, key: impl Into<String>, value: ContextValue) {
        self.root.set(key, value);
    }

    /// Builder-style field assignment
    pub fn with(self, key: impl Into<String>, value: ContextValue) -> Self {
        self.root.set(key, value);
        self
    }

    /// Builder-style assignment from plain JSON
    pub fn with_json(self, key: impl Into<String>, value: JsonValue) -> Self {
        self.root.set(key, ContextValue::from(value));
        self
    }
}

impl Default for ScriptContext {
    fn default() -> Self {
        Self::new()
    }
}
