//! Connection identity and the transport write seam.
//!
//! The relay core never touches sockets directly. It writes through
//! [`ConnectionSink`], which the server implements for the WebSocket write
//! half and tests implement with an in-memory double.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by a transport sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The transport is already closed.
    #[error("connection closed")]
    Closed,

    /// The write failed at the transport level.
    #[error("send failed: {0}")]
    SendFailed(String),
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next process-unique connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Write half of a duplex transport.
///
/// Implementations must serialize writes from concurrent callers so that
/// two sequential broadcasts reach the peer in the order they were issued.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    /// Send one text message to the peer.
    async fn send_text(&self, text: &str) -> Result<(), SinkError>;

    /// Close the transport. Idempotent.
    async fn close(&self);

    /// Whether the transport is still writable.
    fn is_open(&self) -> bool;
}

/// One live client connection.
///
/// Shared via `Arc` between the registry's global set and the channel it
/// belongs to; the registry is authoritative for its lifetime.
pub struct Connection {
    id: ConnectionId,
    remote_addr: Option<String>,
    sink: Arc<dyn ConnectionSink>,
}

impl Connection {
    /// Create a connection around a transport sink.
    #[must_use]
    pub fn new(sink: Arc<dyn ConnectionSink>, remote_addr: Option<String>) -> Self {
        Self {
            id: ConnectionId::next(),
            remote_addr,
            sink,
        }
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote peer address, for diagnostics only.
    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Get the transport sink.
    #[must_use]
    pub fn sink(&self) -> &dyn ConnectionSink {
        self.sink.as_ref()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("open", &self.sink.is_open())
            .finish()
    }
}
