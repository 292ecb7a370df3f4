//! Runner entry point
//!
//! One process per pooled worker. Speaks the hooklet IPC protocol on
//! stdin/stdout (stderr carries logs) and evaluates transformed script
//! source with the Boa engine. The loop is synchronous on purpose: script
//! evaluation blocks mid-run on invoke round-trips, so there is nothing to
//! schedule concurrently inside one worker.

mod script;

use clap::Parser;
use hooklet_ipc::{HostMessage, IpcError, MessageEnvelope, RunnerMessage, SyncStdioTransport};
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "hooklet-worker", about = "hooklet script runner process")]
struct Args {
    /// Hard address-space ceiling for this process, in MiB
    #[arg(long)]
    max_memory_mb: Option<u64>,
}

fn main() {
    // Logs go to stderr; stdout belongs to the protocol
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Some(limit_mb) = args.max_memory_mb {
        apply_memory_limit(limit_mb);
    }

    let worker_id = Uuid::new_v4();
    let mut transport = SyncStdioTransport::new();

    let ready = MessageEnvelope::new(RunnerMessage::Ready {
        worker_id: worker_id.to_string(),
        pid: std::process::id(),
    });
    if let Err(e) = transport.send(&ready) {
        error!("failed to announce readiness: {}", e);
        std::process::exit(1);
    }
    info!(%worker_id, "runner ready");

    loop {
        let envelope: MessageEnvelope<HostMessage> = match transport.receive() {
            Ok(envelope) => envelope,
            Err(IpcError::ConnectionClosed) => {
                debug!("host closed the channel, exiting");
                break;
            }
            Err(e) => {
                let _ = transport.send(&MessageEnvelope::new(RunnerMessage::Fatal {
                    message: format!("cannot read host message: {}", e),
                }));
                std::process::exit(1);
            }
        };

        match envelope.message {
            HostMessage::Execute {
                code,
                context,
                allowed_modules,
                correlation_id,
            } => {
                debug!(%correlation_id, "executing script");
                let reply = script::run(&code, &context, &allowed_modules, correlation_id);
                if let Err(e) = transport.send(&MessageEnvelope::new(reply)) {
                    error!("failed to send result: {}", e);
                    std::process::exit(1);
                }
            }

            HostMessage::Ping { correlation_id } => {
                let pong = MessageEnvelope::new(RunnerMessage::Pong {
                    correlation_id,
                    worker_id: worker_id.to_string(),
                });
                if let Err(e) = transport.send(&pong) {
                    error!("failed to send pong: {}", e);
                    std::process::exit(1);
                }
            }

            HostMessage::Shutdown => {
                info!("shutdown requested");
                break;
            }

            // Invoke replies outside a running script are stale leftovers
            HostMessage::InvokeResult { invocation_id, .. }
            | HostMessage::InvokeError { invocation_id, .. } => {
                debug!(%invocation_id, "dropping stray invoke reply");
            }
        }
    }
}

#[cfg(unix)]
fn apply_memory_limit(limit_mb: u64) {
    use nix::sys::resource::{setrlimit, Resource};

    let bytes = limit_mb.saturating_mul(1024 * 1024);
    match setrlimit(Resource::RLIMIT_AS, bytes, bytes) {
        Ok(()) => debug!(limit_mb, "address-space limit applied"),
        Err(e) => error!(limit_mb, "failed to apply memory limit: {}", e),
    }
}

#[cfg(not(unix))]
fn apply_memory_limit(limit_mb: u64) {
    debug!(limit_mb, "memory limit not supported on this platform");
}
