//! Fan-out delivery of JSON payloads to channel subscribers.
//!
//! Delivery is best-effort per subscriber: a connection that errors or times
//! out on write is evicted from the registry and its transport closed, and
//! the broadcast continues with the remaining subscribers. One bad connection
//! never aborts delivery to the rest.

use crate::connection::ConnectionId;
use crate::registry::Registry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Default bound on a single subscriber write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Broadcasts serialized payloads to every subscriber of a channel.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    write_timeout: Duration,
}

impl Broadcaster {
    /// Create a broadcaster with the default write timeout.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_write_timeout(registry, DEFAULT_WRITE_TIMEOUT)
    }

    /// Create a broadcaster with a specific write timeout.
    ///
    /// The timeout bounds each subscriber write so one slow client cannot
    /// stall delivery to the others; a timed-out write is treated the same
    /// as a write error.
    #[must_use]
    pub fn with_write_timeout(registry: Arc<Registry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    /// Publish `payload` to every current subscriber of `channel`.
    ///
    /// The payload is serialized once as a JSON text message. Publishing to
    /// an unknown or empty channel delivers to nobody and is not an error.
    ///
    /// Returns the number of subscribers the message was delivered to.
    pub async fn publish<T: Serialize>(&self, channel: &str, payload: &T) -> usize {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(channel, error = %e, "payload failed to serialize, dropping broadcast");
                return 0;
            }
        };

        let subscribers = self.registry.subscribers(channel);
        if subscribers.is_empty() {
            trace!(channel, "no subscribers, nothing to deliver");
            return 0;
        }

        let mut delivered = 0;
        for conn in subscribers {
            match timeout(self.write_timeout, conn.sink().send_text(&text)).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(
                        connection = %conn.id(),
                        channel,
                        error = %e,
                        "delivery failed, evicting connection"
                    );
                    self.evict(conn.id()).await;
                }
                Err(_) => {
                    warn!(
                        connection = %conn.id(),
                        channel,
                        timeout_ms = self.write_timeout.as_millis() as u64,
                        "delivery timed out, evicting connection"
                    );
                    self.evict(conn.id()).await;
                }
            }
        }

        debug!(channel, delivered, "broadcast complete");
        delivered
    }

    async fn evict(&self, id: ConnectionId) {
        if let Some(conn) = self.registry.remove_connection(id) {
            // The transport may be wedged; the close gets the same bound as
            // the write so it cannot stall the rest of the broadcast.
            let _ = timeout(self.write_timeout, conn.sink().close()).await;
        }
    }
}
