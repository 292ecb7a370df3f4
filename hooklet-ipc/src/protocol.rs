//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Messages sent from the host engine to a runner process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Execute a transformed script against a wrapped context
    Execute {
        code: String,
        context: JsonValue,
        allowed_modules: Vec<String>,
        correlation_id: Uuid,
    },

    /// Result of a host-side callback requested by the runner
    InvokeResult {
        invocation_id: Uuid,
        value: JsonValue,
    },

    /// A host-side callback failed; delivered into the running script
    InvokeError {
        invocation_id: Uuid,
        message: String,
    },

    /// Health check ping
    Ping { correlation_id: Uuid },

    /// Graceful shutdown signal
    Shutdown,
}

/// Messages sent from a runner process to the host engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerMessage {
    /// Runner finished booting and can accept work
    Ready { worker_id: String, pid: u32 },

    /// Script finished normally
    #[serde(rename = "result")]
    Completed {
        correlation_id: Uuid,
        outcome: ScriptOutcome,
    },

    /// Script threw
    #[serde(rename = "error")]
    ScriptError {
        correlation_id: Uuid,
        message: String,
    },

    /// Script is calling back into a host-side function
    Invoke {
        invocation_id: Uuid,
        path: String,
        args: Vec<JsonValue>,
    },

    /// Health check response
    Pong {
        correlation_id: Uuid,
        worker_id: String,
    },

    /// Unrecoverable runner fault; the process exits after sending this
    Fatal { message: String },
}

/// Outcome of a completed script run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptOutcome {
    /// Value the script returned
    pub value: JsonValue,
    /// Final values of the mergeable context fields, keyed by field name
    pub mutations: JsonValue,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl ScriptOutcome {
    pub fn new(
        value: JsonValue,
        mutations: JsonValue,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let duration_ms = (completed_at - started_at).num_milliseconds();
        Self {
            value,
            mutations,
            started_at,
            completed_at,
            duration_ms,
        }
    }
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
