//! Connection Handles
//!
//! The only outbound surface the session layer sees. Each connection owns
//! a bounded channel drained by its WebSocket writer task; `emit` never
//! waits, so a slow or vanished client cannot stall a match.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::network::protocol::ServerMessage;

/// Default per-connection outbound buffer.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Process-unique connection identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound side of one client connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    /// Wrap an outbound channel.
    pub fn new(id: ConnectionId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self { id, sender }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message without waiting.
    ///
    /// Returns false if the message was dropped (buffer full or the
    /// connection is gone).
    pub fn emit(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection = %self.id, "outbound buffer full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection = %self.id, "connection closed, dropping message");
                false
            }
        }
    }

    /// Whether the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Create a handle and the receiver its writer task drains.
pub fn connection_pair(
    id: ConnectionId,
    capacity: usize,
) -> (ConnectionHandle, mpsc::Receiver<ServerMessage>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ConnectionHandle::new(id, tx), rx)
}
