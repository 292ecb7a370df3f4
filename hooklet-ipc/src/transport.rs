//! IPC transport implementations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::MessageEnvelope;

/// IPC transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError>;

    /// Receive a message from the other end
    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<MessageEnvelope<T>, IpcError> {
    let envelope: MessageEnvelope<T> =
        serde_json::from_str(line).map_err(|e| IpcError::DeserializationError(e.to_string()))?;

    if envelope.protocol_version != crate::protocol::IPC_PROTOCOL_VERSION {
        return Err(IpcError::ProtocolVersionMismatch {
            expected: crate::protocol::IPC_PROTOCOL_VERSION,
            actual: envelope.protocol_version,
        });
    }

    Ok(envelope)
}

/// Transport for the parent side of a runner child process
pub struct ChildProcessTransport {
    stdin: Option<tokio::process::ChildStdin>,
    stdout: Option<BufReader<tokio::process::ChildStdout>>,
}

impl ChildProcessTransport {
    /// Create a new child process transport
    pub fn new(stdin: tokio::process::ChildStdin, stdout: tokio::process::ChildStdout) -> Self {
        Self {
            stdin: Some(stdin),
            stdout: Some(BufReader::new(stdout)),
        }
    }
}

#[async_trait]
impl IpcTransport for ChildProcessTransport {
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        let stdin = self.stdin.as_mut().ok_or(IpcError::NotConnected)?;

        let json = serde_json::to_string(message)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;

        // Newline-delimited framing
        let message_with_newline = format!("{}\n", json);
        stdin
            .write_all(message_with_newline.as_bytes())
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        stdin
            .flush()
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        Ok(())
    }

    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        let stdout = self.stdout.as_mut().ok_or(IpcError::NotConnected)?;

        let mut line = String::new();
        let read = stdout
            .read_line(&mut line)
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        if read == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        decode_line(line.trim_end())
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        // Take ownership and drop to close the pipes
        let _ = self.stdin.take();
        let _ = self.stdout.take();
        Ok(())
    }
}

/// Blocking stdio transport for the runner side of the pipe
///
/// The runner evaluates scripts synchronously and blocks mid-script on
/// invoke round-trips, so it speaks the protocol over plain std I/O.
pub struct SyncStdioTransport {
    stdout: std::io::Stdout,
}

impl SyncStdioTransport {
    pub fn new() -> Self {
        Self {
            stdout: std::io::stdout(),
        }
    }

    /// Send a message on stdout
    pub fn send<T: Serialize>(&mut self, message: &MessageEnvelope<T>) -> Result<(), IpcError> {
        use std::io::Write;

        let json = serde_json::to_string(message)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;

        let mut handle = self.stdout.lock();
        writeln!(handle, "{}", json).map_err(|e| IpcError::IoError(e.to_string()))?;
        handle.flush().map_err(|e| IpcError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Block until a message arrives on stdin
    pub fn receive<T: for<'de> Deserialize<'de>>(&mut self) -> Result<MessageEnvelope<T>, IpcError> {
        use std::io::BufRead;

        let stdin = std::io::stdin();
        let mut line = String::new();
        let read = stdin
            .lock()
            .read_line(&mut line)
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        if read == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        decode_line(line.trim_end())
    }
}

impl Default for SyncStdioTransport {
    fn default() -> Self {
        Self::new()
    }
}
