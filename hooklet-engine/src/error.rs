//! Error types for script execution

use thiserror::Error;

/// Script engine errors surfaced to callers
#[derive(Error, Debug)]
pub enum EngineError {
    /// No worker became available within the acquire timeout
    #[error("Worker pool exhausted: no worker became available within {waited_ms} ms")]
    PoolExhausted { waited_ms: u64 },

    /// Execution exceeded its time budget; the worker was destroyed
    #[error("Script execution exceeded its {budget_ms} ms budget")]
    Timeout { budget_ms: u64 },

    /// The worker process exited or disconnected before replying
    #[error("Worker process failed: {reason}")]
    WorkerCrash { reason: String },

    /// The script itself threw; the common business-logic failure path
    #[error("Script error: {message}")]
    Script { message: String },

    /// A worker process could not be started
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// The pool has been shut down and accepts no more work
    #[error("Worker pool is shut down")]
    PoolClosed,

    /// Transport-level failure talking to a worker
    #[error("IPC error: {0}")]
    Ipc(#[from] hooklet_ipc::IpcError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] hooklet_config::ConfigError),
}

impl EngineError {
    /// Infrastructure failures, as opposed to the script's own errors
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, EngineError::Script { .. })
    }

    /// Whether the caller may reasonably retry the request as-is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::PoolExhausted { .. } | EngineError::WorkerCrash { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_errors_are_not_infrastructure() {
        let err = EngineError::Script {
            message: "TypeError: x is undefined".to_string(),
        };
        assert!(!err.is_infrastructure());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(EngineError::PoolExhausted { waited_ms: 100 }.is_infrastructure());
        assert!(EngineError::Timeout { budget_ms: 200 }.is_infrastructure());
        assert!(EngineError::WorkerCrash { reason: "exit".into() }.is_infrastructure());
        assert!(EngineError::PoolExhausted { waited_ms: 100 }.is_retryable());
        assert!(!EngineError::Timeout { budget_ms: 200 }.is_retryable());
    }
}
