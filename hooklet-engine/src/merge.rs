//! Context merge
//!
//! Folds the mutations a worker reported back into the live context. Only
//! the mergeable top-level fields can be written; everything else the worker
//! saw was a reduced projection and its reported shape is ignored.

use crate::context::{ContextValue, ScriptContext, MERGEABLE_FIELDS};
use serde_json::Value as JsonValue;
use tracing::{debug, trace};

/// Apply worker-reported mutations to the live context
///
/// Plain objects merge shallow-recursively with reported keys winning.
/// A reported field containing an array anywhere in its subtree, or whose
/// live counterpart is not a plain object, replaces the field wholesale.
pub fn merge(context: &ScriptContext, mutations: &JsonValue) {
    let Some(reported) = mutations.as_object() else {
        return;
    };

    for field in MERGEABLE_FIELDS {
        let Some(value) = reported.get(*field) else {
            continue;
        };
        trace!(field, "merging reported mutation");

        if !mergeable_recursively(value) {
            context.set(*field, ContextValue::from(value.clone()));
            continue;
        }

        match context.get(field) {
            Some(ContextValue::Object(live)) => {
                // mergeable_recursively guarantees an object here
                if let Some(map) = value.as_object() {
                    merge_object(&ContextValue::Object(live), map);
                }
            }
            _ => {
                context.set(*field, ContextValue::from(value.clone()));
            }
        }
    }

    debug!("context merge complete");
}

/// A value merges recursively only when it is a plain object tree; arrays
/// anywhere force wholesale replacement of the owning field
fn mergeable_recursively(value: &JsonValue) -> bool {
    match value {
        JsonValue::Object(map) => map.values().all(|v| match v {
            JsonValue::Array(_) => false,
            JsonValue::Object(_) => mergeable_recursively(v),
            _ => true,
        }),
        _ => false,
    }
}

fn merge_object(live: &ContextValue, reported: &serde_json::Map<String, JsonValue>) {
    let ContextValue::Object(live_obj) = live else {
        return;
    };

    for (key, value) in reported {
        match (live_obj.get(key), value) {
            (Some(ContextValue::Object(nested)), JsonValue::Object(map)) => {
                merge_object(&ContextValue::Object(nested), map);
            }
            _ => {
                live_obj.set(key.clone(), ContextValue::from(value.clone()));
            }
        }
    }
}
