//! Execution orchestrator
//!
//! Drives one script request end to end: transform the source, wrap the
//! context, borrow a worker, run the execute exchange under a hard deadline,
//! relay invoke round-trips onto the live context, merge reported mutations
//! and hand the worker back. A timeout never asks the script to stop; the
//! worker process is killed and destroyed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::ScriptContext;
use crate::error::EngineError;
use crate::merge::merge;
use crate::modules::ModuleCatalog;
use crate::pool::{PoolStats, WorkerHandle, WorkerPool};
use crate::router::InvocationRouter;
use crate::transform::transform;
use crate::wrap::wrap;
use hooklet_config::EngineConfig;
use hooklet_ipc::{HostMessage, IpcError, IpcTransport, MessageEnvelope, RunnerMessage};

/// One call into the engine
pub struct ScriptRequest {
    pub source: String,
    pub context: ScriptContext,
    /// Falls back to the configured default when absent
    pub timeout: Option<Duration>,
    /// Falls back to the engine's module catalog when absent
    pub allowed_modules: Option<Vec<String>>,
}

impl ScriptRequest {
    pub fn new(source: impl Into<String>, context: ScriptContext) -> Self {
        Self {
            source: source.into(),
            context,
            timeout: None,
            allowed_modules: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_allowed_modules(mut self, modules: Vec<String>) -> Self {
        self.allowed_modules = Some(modules);
        self
    }
}

/// What a finished execution produced
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub value: JsonValue,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// The engine facade callers hold
pub struct ScriptEngine {
    pool: Arc<WorkerPool>,
    config: EngineConfig,
    modules: Arc<dyn ModuleCatalog>,
}

impl ScriptEngine {
    pub fn new(config: EngineConfig, modules: Arc<dyn ModuleCatalog>) -> Self {
        Self {
            pool: Arc::new(WorkerPool::new(config.pool.clone())),
            config,
            modules,
        }
    }

    /// Spin up the worker pool
    pub async fn start(&self) -> Result<(), EngineError> {
        info!("starting script engine");
        self.pool.start().await
    }

    /// Drain and stop the worker pool
    pub async fn shutdown(&self) {
        info!("stopping script engine");
        self.pool.shutdown().await;
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Execute one script request
    pub async fn execute(&self, request: ScriptRequest) -> Result<ExecutionOutcome, EngineError> {
        let code = transform(&request.source);
        let wrapped = wrap(&request.context);
        let timeout = request.timeout.unwrap_or(self.config.default_script_timeout);
        let allowed_modules = request
            .allowed_modules
            .clone()
            .unwrap_or_else(|| self.modules.enabled_modules());

        // Acquisition has its own timeout; nothing was sent yet on failure
        let worker = self.pool.acquire().await?;
        debug!(worker_id = %worker.id, timeout_ms = timeout.as_millis() as u64, "worker acquired");

        self.run_on_worker(worker, code, &request.context, wrapped, allowed_modules, timeout)
            .await
    }

    async fn run_on_worker(
        &self,
        mut worker: WorkerHandle,
        code: String,
        context: &ScriptContext,
        wrapped: JsonValue,
        allowed_modules: Vec<String>,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, EngineError> {
        let correlation_id = Uuid::new_v4();
        let execute = MessageEnvelope::new(HostMessage::Execute {
            code,
            context: wrapped,
            allowed_modules,
            correlation_id,
        });

        if let Err(e) = worker.transport().send(&execute).await {
            warn!(worker_id = %worker.id, "failed to send execute: {}", e);
            self.fail_worker(worker).await;
            return Err(EngineError::WorkerCrash {
                reason: format!("send failed: {}", e),
            });
        }

        let router = InvocationRouter::new(context);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        enum Event {
            Deadline,
            Message(Result<MessageEnvelope<RunnerMessage>, IpcError>),
        }

        loop {
            let event = tokio::select! {
                _ = &mut deadline => Event::Deadline,
                received = worker.transport().receive::<RunnerMessage>() => Event::Message(received),
            };

            match event {
                Event::Deadline => {
                    // Past-budget processes are killed, never reasoned with
                    warn!(worker_id = %worker.id, budget_ms = timeout.as_millis() as u64, "execution timed out, killing worker");
                    self.fail_worker(worker).await;
                    return Err(EngineError::Timeout {
                        budget_ms: timeout.as_millis() as u64,
                    });
                }

                Event::Message(Err(IpcError::ConnectionClosed)) => {
                    self.fail_worker(worker).await;
                    return Err(EngineError::WorkerCrash {
                        reason: "worker exited before replying".to_string(),
                    });
                }

                Event::Message(Err(e)) => {
                    self.fail_worker(worker).await;
                    return Err(EngineError::Ipc(e));
                }

                Event::Message(Ok(envelope)) => match envelope.message {
                    RunnerMessage::Invoke { invocation_id, path, args } => {
                        // The budget keeps running while the host callback
                        // executes; expiry mid-invoke still kills the worker
                        let reply = tokio::select! {
                            _ = &mut deadline => None,
                            routed = router.invoke(&path, args) => Some(match routed {
                                Ok(value) => HostMessage::InvokeResult { invocation_id, value },
                                Err(e) => HostMessage::InvokeError {
                                    invocation_id,
                                    message: e.to_string(),
                                },
                            }),
                        };
                        let Some(reply) = reply else {
                            warn!(worker_id = %worker.id, budget_ms = timeout.as_millis() as u64, "execution timed out during host callback, killing worker");
                            self.fail_worker(worker).await;
                            return Err(EngineError::Timeout {
                                budget_ms: timeout.as_millis() as u64,
                            });
                        };

                        let reply_envelope = MessageEnvelope::new(reply);
                        let sent = tokio::select! {
                            _ = &mut deadline => None,
                            result = worker.transport().send(&reply_envelope) => Some(result),
                        };
                        match sent {
                            None => {
                                warn!(worker_id = %worker.id, budget_ms = timeout.as_millis() as u64, "execution timed out delivering invoke reply, killing worker");
                                self.fail_worker(worker).await;
                                return Err(EngineError::Timeout {
                                    budget_ms: timeout.as_millis() as u64,
                                });
                            }
                            Some(Err(e)) => {
                                self.fail_worker(worker).await;
                                return Err(EngineError::WorkerCrash {
                                    reason: format!("invoke reply failed: {}", e),
                                });
                            }
                            Some(Ok(())) => {}
                        }
                    }

                    RunnerMessage::Completed { correlation_id: id, outcome } => {
                        if id != correlation_id {
                            warn!(expected = %correlation_id, got = %id, "dropping stale result");
                            continue;
                        }
                        merge(context, &outcome.mutations);
                        worker.executions += 1;
                        self.pool.release(worker).await;
                        return Ok(ExecutionOutcome {
                            value: outcome.value,
                            started_at: outcome.started_at,
                            completed_at: outcome.completed_at,
                            duration_ms: outcome.duration_ms,
                        });
                    }

                    RunnerMessage::ScriptError { correlation_id: id, message } => {
                        if id != correlation_id {
                            warn!(expected = %correlation_id, got = %id, "dropping stale error");
                            continue;
                        }
                        // The worker is healthy, only the script failed
                        worker.executions += 1;
                        worker.failures += 1;
                        self.pool.release(worker).await;
                        return Err(EngineError::Script { message });
                    }

                    RunnerMessage::Fatal { message } => {
                        self.fail_worker(worker).await;
                        return Err(EngineError::WorkerCrash { reason: message });
                    }

                    other => {
                        debug!(worker_id = %worker.id, "ignoring stray message: {:?}", other);
                    }
                },
            }
        }
    }

    async fn fail_worker(&self, mut worker: WorkerHandle) {
        worker.failures += 1;
        self.pool.discard(worker).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::StaticModuleCatalog;

    fn test_engine() -> ScriptEngine {
        let mut config = EngineConfig::default();
        config.pool.runner.path = Some("/nonexistent/hooklet-runner".into());
        config.pool.acquire_timeout = Duration::from_millis(100);
        ScriptEngine::new(config, Arc::new(StaticModuleCatalog::empty()))
    }

    #[tokio::test]
    async fn test_execute_without_runner_fails_before_sending() {
        let engine = test_engine();
        let request = ScriptRequest::new("return 1+1", ScriptContext::new());
        let result = engine.execute(request).await;
        // The runner binary does not exist, acquisition must fail cleanly
        assert!(matches!(result, Err(EngineError::Spawn(_))));
        assert_eq!(engine.pool_stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_request_builder() {
        let request = ScriptRequest::new("return 1", ScriptContext::new())
            .with_timeout(Duration::from_millis(250))
            .with_allowed_modules(vec!["moment".to_string()]);
        assert_eq!(request.timeout, Some(Duration::from_millis(250)));
        assert_eq!(request.allowed_modules.as_deref(), Some(&["moment".to_string()][..]));
    }
}
