//! Worker process pool
//!
//! Manages a bounded set of runner processes. The orchestrator borrows one
//! worker per execution and either returns it healthy or discards it; a
//! worker only ever dies through the pool's destroy path. When every worker
//! is busy and the pool is at `max`, acquirers queue FIFO until a slot frees
//! or the acquire timeout elapses.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use hooklet_config::{PoolConfig, RunnerConfig};
use hooklet_ipc::{
    ChildProcessTransport, HostMessage, IpcTransport, MessageEnvelope, RunnerMessage,
};

/// How long a freshly spawned runner gets to report ready
const SPAWN_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a ping may take before the worker counts as unresponsive
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// One borrowed runner process
pub struct WorkerHandle {
    pub id: Uuid,
    pub pid: u32,
    pub spawned_at: DateTime<Utc>,
    pub executions: u64,
    pub failures: u64,
    last_active: Instant,
    child: Child,
    transport: ChildProcessTransport,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("executions", &self.executions)
            .finish()
    }
}

impl WorkerHandle {
    /// Start a runner process and wait for its ready handshake
    pub async fn spawn(config: &RunnerConfig) -> Result<Self, EngineError> {
        let path = runner_path(config)?;
        debug!(path = %path.display(), "spawning worker process");

        let mut child = Command::new(&path)
            .arg("--max-memory-mb")
            .arg(config.max_memory_mb.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {}", path.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Spawn("worker stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Spawn("worker stdout not captured".to_string()))?;
        let mut transport = ChildProcessTransport::new(stdin, stdout);

        let ready = tokio::time::timeout(
            SPAWN_HANDSHAKE_TIMEOUT,
            transport.receive::<RunnerMessage>(),
        )
        .await
        .map_err(|_| EngineError::Spawn("worker did not report ready in time".to_string()))?
        .map_err(|e| EngineError::Spawn(format!("worker handshake failed: {}", e)))?;

        let (worker_id, pid) = match ready.message {
            RunnerMessage::Ready { worker_id, pid } => (worker_id, pid),
            other => {
                return Err(EngineError::Spawn(format!(
                    "unexpected handshake message: {:?}",
                    other
                )))
            }
        };

        let id = worker_id.parse().unwrap_or_else(|_| Uuid::new_v4());
        info!(worker_id = %id, pid, "worker process ready");

        Ok(Self {
            id,
            pid,
            spawned_at: Utc::now(),
            executions: 0,
            failures: 0,
            last_active: Instant::now(),
            child,
            transport,
        })
    }

    /// Whether the OS process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ping/pong health round-trip
    pub async fn ping(&mut self) -> Result<(), EngineError> {
        let correlation_id = Uuid::new_v4();
        self.transport
            .send(&MessageEnvelope::new(HostMessage::Ping { correlation_id }))
            .await?;

        let reply = tokio::time::timeout(PING_TIMEOUT, self.transport.receive::<RunnerMessage>())
            .await
            .map_err(|_| EngineError::WorkerCrash {
                reason: "ping timed out".to_string(),
            })??;

        match reply.message {
            RunnerMessage::Pong { correlation_id: id, .. } if id == correlation_id => Ok(()),
            other => Err(EngineError::WorkerCrash {
                reason: format!("unexpected ping reply: {:?}", other),
            }),
        }
    }

    /// Channel to this worker, exclusive to the borrower
    pub(crate) fn transport(&mut self) -> &mut ChildProcessTransport {
        &mut self.transport
    }

    pub(crate) fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// Forcibly terminate the process
    pub async fn kill(&mut self) {
        let _ = self.transport.close().await;
        if let Err(e) = self.child.start_kill() {
            debug!(worker_id = %self.id, "kill failed (already dead): {}", e);
        }
        let _ = self.child.wait().await;
    }

    /// Ask the runner to exit, then make sure it did
    async fn shutdown(mut self) {
        let _ = self
            .transport
            .send(&MessageEnvelope::new(HostMessage::Shutdown))
            .await;
        let _ = tokio::time::timeout(Duration::from_millis(500), self.child.wait()).await;
        self.kill().await;
    }
}

/// Pool state snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub waiting: usize,
}

struct PoolState {
    idle: VecDeque<WorkerHandle>,
    /// Live workers, idle plus borrowed
    total: usize,
    waiters: VecDeque<oneshot::Sender<WorkerHandle>>,
    shutting_down: bool,
}

/// Bounded pool of runner processes
pub struct WorkerPool {
    config: PoolConfig,
    state: Arc<Mutex<PoolState>>,
    evictor: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                waiters: VecDeque::new(),
                shutting_down: false,
            })),
            evictor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Pre-spawn `min` workers and start the eviction sweep
    pub async fn start(&self) -> Result<(), EngineError> {
        info!(min = self.config.min, max = self.config.max, "starting worker pool");

        for _ in 0..self.config.min {
            let worker = WorkerHandle::spawn(&self.config.runner).await?;
            let mut state = self.state.lock().await;
            state.total += 1;
            state.idle.push_back(worker);
        }

        let state = self.state.clone();
        let min = self.config.min;
        let idle_timeout = self.config.idle_timeout;
        let interval = self.config.eviction_interval;
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                Self::evict_idle(&state, min, idle_timeout).await;
            }
        });
        *self.evictor.lock().await = Some(handle);

        Ok(())
    }

    /// Borrow a worker, waiting up to the acquire timeout
    pub async fn acquire(&self) -> Result<WorkerHandle, EngineError> {
        let started = Instant::now();

        loop {
            let remaining = self
                .config
                .acquire_timeout
                .checked_sub(started.elapsed())
                .unwrap_or(Duration::ZERO);

            enum Plan {
                Borrow(WorkerHandle),
                Spawn,
                Wait(oneshot::Receiver<WorkerHandle>),
            }

            let plan = {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return Err(EngineError::PoolClosed);
                }
                if let Some(worker) = state.idle.pop_front() {
                    Plan::Borrow(worker)
                } else if state.total < self.config.max {
                    state.total += 1;
                    Plan::Spawn
                } else {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Plan::Wait(rx)
                }
            };

            match plan {
                Plan::Borrow(worker) => {
                    if let Some(worker) = self.validate(worker).await {
                        return Ok(worker);
                    }
                    // Dead idle worker was destroyed, try again
                    continue;
                }
                Plan::Spawn => match WorkerHandle::spawn(&self.config.runner).await {
                    Ok(worker) => return Ok(worker),
                    Err(e) => {
                        self.state.lock().await.total -= 1;
                        return Err(e);
                    }
                },
                Plan::Wait(mut rx) => {
                    if remaining.is_zero() {
                        return Err(EngineError::PoolExhausted {
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    match tokio::time::timeout(remaining, &mut rx).await {
                        Ok(Ok(worker)) => {
                            if let Some(worker) = self.validate(worker).await {
                                return Ok(worker);
                            }
                            continue;
                        }
                        // Sender dropped, e.g. shutdown cleared the queue
                        Ok(Err(_)) => continue,
                        Err(_) => {
                            // A hand-off may land in the instant the timer
                            // fires; reclaim it so the slot is not lost with
                            // the channel
                            rx.close();
                            if let Ok(worker) = rx.try_recv() {
                                self.offer(worker).await;
                            }
                            return Err(EngineError::PoolExhausted {
                                waited_ms: started.elapsed().as_millis() as u64,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Return a healthy worker
    pub async fn release(&self, mut worker: WorkerHandle) {
        worker.touch();
        self.offer(worker).await;
    }

    /// Kill a worker and remove it from the pool
    ///
    /// Used after timeouts and crashes; a process that ran past its budget
    /// is never reused. A replacement is spawned only when acquirers are
    /// actually queued, otherwise capacity recovers lazily on demand.
    pub async fn discard(&self, mut worker: WorkerHandle) {
        warn!(worker_id = %worker.id, "discarding worker");
        worker.kill().await;

        let respawn = {
            let mut state = self.state.lock().await;
            state.total -= 1;
            let needed =
                !state.shutting_down && !state.waiters.is_empty() && state.total < self.config.max;
            if needed {
                state.total += 1;
            }
            needed
        };

        if respawn {
            match WorkerHandle::spawn(&self.config.runner).await {
                Ok(worker) => self.offer(worker).await,
                Err(e) => {
                    warn!("failed to spawn replacement worker: {}", e);
                    self.state.lock().await.total -= 1;
                }
            }
        }
    }

    /// Current pool occupancy
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            total: state.total,
            idle: state.idle.len(),
            busy: state.total - state.idle.len(),
            waiting: state.waiters.len(),
        }
    }

    /// Stop the eviction sweep and drain every idle worker
    pub async fn shutdown(&self) {
        info!("shutting down worker pool");
        if let Some(handle) = self.evictor.lock().await.take() {
            handle.abort();
        }

        let (drained, waiters) = {
            let mut state = self.state.lock().await;
            state.shutting_down = true;
            state.total -= state.idle.len();
            let drained: Vec<_> = state.idle.drain(..).collect();
            let waiters: Vec<_> = state.waiters.drain(..).collect();
            (drained, waiters)
        };
        drop(waiters); // wakes queued acquirers, they observe PoolClosed

        for worker in drained {
            worker.shutdown().await;
        }
    }

    /// Hand a worker to the oldest live waiter, or park it idle
    async fn offer(&self, worker: WorkerHandle) {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            state.total -= 1;
            drop(state);
            worker.shutdown().await;
            return;
        }

        let mut worker = worker;
        while let Some(tx) = state.waiters.pop_front() {
            match tx.send(worker) {
                Ok(()) => return,
                // Waiter gave up, try the next one
                Err(returned) => worker = returned,
            }
        }
        state.idle.push_back(worker);
    }

    /// Validate a borrowed worker, destroying it on failure
    async fn validate(&self, mut worker: WorkerHandle) -> Option<WorkerHandle> {
        if !self.config.validate_on_borrow {
            return Some(worker);
        }
        if worker.is_alive() && worker.ping().await.is_ok() {
            return Some(worker);
        }
        warn!(worker_id = %worker.id, "idle worker failed validation, destroying");
        worker.kill().await;
        self.state.lock().await.total -= 1;
        None
    }

    async fn evict_idle(state: &Mutex<PoolState>, min: usize, idle_timeout: Duration) {
        let victims = {
            let mut state = state.lock().await;
            let mut victims = Vec::new();
            while state.total > min {
                let expired = state
                    .idle
                    .front()
                    .map(|w| w.idle_for() >= idle_timeout)
                    .unwrap_or(false);
                if !expired {
                    break;
                }
                if let Some(worker) = state.idle.pop_front() {
                    state.total -= 1;
                    victims.push(worker);
                }
            }
            victims
        };

        for mut worker in victims {
            debug!(worker_id = %worker.id, "evicting idle worker");
            worker.kill().await;
        }
    }
}

fn runner_path(config: &RunnerConfig) -> Result<PathBuf, EngineError> {
    if let Some(path) = &config.path {
        return Ok(path.clone());
    }
    let exe = std::env::current_exe()
        .map_err(|e| EngineError::Spawn(format!("cannot locate current executable: {}", e)))?;
    let dir = exe
        .parent()
        .ok_or_else(|| EngineError::Spawn("current executable has no parent dir".to_string()))?;
    Ok(dir.join("hooklet-worker"))
}
