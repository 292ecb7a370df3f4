//! Inter-process communication for hooklet
//!
//! Defines the wire protocol spoken between the host engine and runner
//! processes, plus newline-delimited JSON transports for both sides of the
//! pipe.

pub mod error;
pub mod protocol;
pub mod transport;

pub use error::IpcError;
pub use protocol::{
    HostMessage, MessageEnvelope, RunnerMessage, ScriptOutcome, IPC_PROTOCOL_VERSION,
};
pub use transport::{ChildProcessTransport, IpcTransport, SyncStdioTransport};
