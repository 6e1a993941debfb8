//! Adapter contract between the orchestrator and an SSH implementation
//!
//! The orchestrator never inspects protocol internals; it opens sessions,
//! runs a command and watches its stream, probes a port, and closes. The
//! fake used by the orchestrator's tests implements these same traits.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use porthop_core::{HostConfig, TunnelError};

/// Events observed on a remotely executed command's stream
#[derive(Debug, Clone)]
pub enum ExecEvent {
    /// Output bytes (stdout or stderr)
    Data(Bytes),
    /// The command exited with the given status
    Exited(u32),
    /// The channel closed without (or after) an exit status
    Closed,
}

/// Receiving side of a remote command's event stream
pub struct ExecHandle {
    events: mpsc::Receiver<ExecEvent>,
}

impl ExecHandle {
    /// Wrap a channel receiver; the sender side is owned by the adapter
    pub fn new(events: mpsc::Receiver<ExecEvent>) -> Self {
        Self { events }
    }

    /// Next event, or `None` once the stream is gone
    pub async fn recv(&mut self) -> Option<ExecEvent> {
        self.events.recv().await
    }
}

/// One authenticated session to a single host
#[async_trait]
pub trait RemoteSession: Send + Sync + std::fmt::Debug {
    /// Run a command on the remote host and stream its output.
    ///
    /// `argv` is an argument vector; the adapter is responsible for any
    /// quoting the remote shell requires.
    async fn exec(&mut self, argv: &[String]) -> Result<ExecHandle, TunnelError>;

    /// Check that a TCP port on the remote host accepts a connection.
    ///
    /// Used as the relay liveness probe: a successful probe means the bound
    /// port actually forwarded a connection end-to-end.
    async fn probe(&self, port: u16, timeout: Duration) -> Result<(), TunnelError>;

    /// Close the session. Must return within a bounded time even against an
    /// unresponsive peer.
    async fn close(&mut self);
}

/// Opens authenticated sessions; the orchestrator's only way in
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open and authenticate a session to the given hop
    async fn open(&self, host: &HostConfig) -> Result<Box<dyn RemoteSession>, TunnelError>;
}
