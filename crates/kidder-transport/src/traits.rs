//! Transport abstraction traits for Kidder.
//!
//! A physical connection is split into two halves: a [`MessageSink`] that the
//! hub writes to from its fan-out task, and a [`MessageSource`] that the
//! owning session reads from. Keeping them apart lets the fan-out write while
//! the session is parked on a read.

use async_trait::async_trait;
use kidder_protocol::{codec, ClientMessage, ProtocolError, ServerMessage};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a connection ID unique within this process.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The peer sent a payload that is not a valid message.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Whether the connection is still usable after this error.
    ///
    /// Only malformed payloads are recoverable; everything else means the
    /// underlying connection is gone.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

/// The write half of a connection.
///
/// Implementations must tolerate concurrent callers and repeated `close`
/// calls.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send pre-encoded JSON text.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Encode and send a message.
    async fn send(&self, message: &ServerMessage) -> Result<(), TransportError> {
        let text = codec::encode(message)?;
        self.send_text(&text).await
    }

    /// Close the connection. Closing an already closed sink is a no-op.
    async fn close(&self);

    /// Resolve once the sink has been closed or has failed, by anyone.
    async fn closed(&self);

    /// Check if the sink is still open.
    fn is_open(&self) -> bool;
}

/// The read half of a connection.
#[async_trait]
pub trait MessageSource: Send {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` if the connection was closed cleanly.
    async fn recv(&mut self) -> Result<Option<ClientMessage>, TransportError>;
}
