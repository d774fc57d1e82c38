//! Channel abstraction: a named broadcast group.
//!
//! A channel tracks membership only. It never owns a connection's lifetime;
//! the registry holds the handles and keeps both views consistent.

use crate::connection::ConnectionId;
use std::collections::HashSet;
use tracing::debug;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// A channel identifier. Channel names double as the request path used to
/// join them, e.g. `/room1`.
pub type ChannelName = String;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("channel name cannot be empty");
    }
    if !name.starts_with('/') {
        return Err("channel name must be a request path starting with '/'");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("channel name too long");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("channel name contains invalid characters");
    }
    Ok(())
}

/// A named group of connections that receive the same broadcasts.
#[derive(Debug)]
pub struct Channel {
    /// Channel name.
    name: ChannelName,
    /// Set of subscribed connection IDs.
    subscribers: HashSet<ConnectionId>,
}

impl Channel {
    /// Create a new empty channel.
    #[must_use]
    pub fn new(name: impl Into<ChannelName>) -> Self {
        Self {
            name: name.into(),
            subscribers: HashSet::new(),
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a connection is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, id: ConnectionId) -> bool {
        self.subscribers.contains(&id)
    }

    /// Subscribe a connection to this channel.
    ///
    /// Returns `true` if the connection was not already subscribed.
    pub fn subscribe(&mut self, id: ConnectionId) -> bool {
        let added = self.subscribers.insert(id);
        if added {
            debug!(channel = %self.name, connection = %id, "connection subscribed");
        }
        added
    }

    /// Unsubscribe a connection from this channel.
    ///
    /// Returns `true` if the connection was subscribed. Unsubscribing a
    /// connection that is not a member is a no-op.
    pub fn unsubscribe(&mut self, id: ConnectionId) -> bool {
        let removed = self.subscribers.remove(&id);
        if removed {
            debug!(channel = %self.name, connection = %id, "connection unsubscribed");
        }
        removed
    }

    /// Drop all subscribers. The channel itself persists.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    /// Get all subscriber IDs.
    #[must_use]
    pub fn subscribers(&self) -> Vec<ConnectionId> {
        self.subscribers.iter().copied().collect()
    }

    /// Check if the channel has no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
