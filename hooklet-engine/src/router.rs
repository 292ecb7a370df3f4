//! Invocation router
//!
//! Resolves an invoke placeholder's dotted path against the real, unwrapped
//! context and performs the call. A failing callback is reported as a
//! structured invocation error so a single bad round-trip cannot corrupt
//! the worker channel.

use crate::context::{ContextValue, ScriptContext};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors produced while routing one invocation
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("Invalid invocation path '{path}': segment '{segment}' not found")]
    InvalidPath { path: String, segment: String },

    #[error("Invalid invocation path '{path}': '{segment}' is not callable")]
    NotCallable { path: String, segment: String },

    #[error("Invocation '{path}' failed: {message}")]
    CallbackFailed { path: String, message: String },
}

/// Routes worker invocations onto the live context
pub struct InvocationRouter<'a> {
    context: &'a ScriptContext,
}

impl<'a> InvocationRouter<'a> {
    pub fn new(context: &'a ScriptContext) -> Self {
        Self { context }
    }

    /// Resolve `path` segment-by-segment and call the resolved function
    pub async fn invoke(
        &self,
        path: &str,
        args: Vec<JsonValue>,
    ) -> Result<JsonValue, InvocationError> {
        debug!(path, arg_count = args.len(), "routing invocation");

        let function = self.resolve(path)?;
        match function.call(args).await {
            Ok(value) => Ok(value),
            Err(message) => {
                warn!(path, %message, "host callback failed");
                Err(InvocationError::CallbackFailed {
                    path: path.to_string(),
                    message,
                })
            }
        }
    }

    fn resolve(&self, path: &str) -> Result<crate::context::HostFunction, InvocationError> {
        let mut current = ContextValue::Object(self.context.root().clone());

        for segment in path.split('.') {
            let next = match &current {
                ContextValue::Object(obj) => obj.get(segment),
                ContextValue::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index).cloned()),
                _ => None,
            };

            current = next.ok_or_else(|| InvocationError::InvalidPath {
                path: path.to_string(),
                segment: segment.to_string(),
            })?;
        }

        match current {
            ContextValue::Function(function) => Ok(function),
            _ => {
                let last = path.rsplit('.').next().unwrap_or(path);
                Err(InvocationError::NotCallable {
                    path: path.to_string(),
                    segment: last.to_string(),
                })
            }
        }
    }
}
