//! Authoritative store of live connections and channel membership.
//!
//! Both maps live behind a single lock so that every mutation is atomic with
//! respect to readers: a connection is never visible in a channel's
//! subscriber set without also being in the global set, and vice versa.
//! The lock is never held across an `.await`; broadcast takes a snapshot of
//! the subscriber set and writes without it.

use crate::channel::{validate_channel_name, Channel, ChannelName};
use crate::connection::{Connection, ConnectionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid channel name.
    #[error("invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// Channel not found.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
}

struct RegistryInner {
    /// All live connections, keyed by ID.
    connections: HashMap<ConnectionId, Arc<Connection>>,
    /// Channels indexed by name.
    channels: HashMap<ChannelName, Channel>,
}

/// The authoritative in-process store of all connections and channels.
///
/// Instantiated once at startup and shared by reference. Removal from the
/// registry is the single source of truth for "this connection is gone".
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                connections: HashMap::new(),
                channels: HashMap::new(),
            }),
        }
    }

    /// Register a channel. A no-op if the channel already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid.
    pub fn add_channel(&self, name: &str) -> Result<(), RegistryError> {
        validate_channel_name(name).map_err(RegistryError::InvalidChannel)?;

        let mut inner = self.inner.write();
        if !inner.channels.contains_key(name) {
            inner
                .channels
                .insert(name.to_string(), Channel::new(name));
            debug!(channel = %name, "channel registered");
        }
        Ok(())
    }

    /// Check if a channel exists.
    ///
    /// Used to reject a join request before the transport handshake is
    /// performed.
    #[must_use]
    pub fn channel_exists(&self, name: &str) -> bool {
        self.inner.read().channels.contains_key(name)
    }

    /// Join a connection to a channel.
    ///
    /// The connection enters the global set and the channel's subscriber set
    /// in one atomic step; subsequent broadcasts to the channel reach it.
    ///
    /// # Errors
    ///
    /// Returns `ChannelNotFound` if the channel was not pre-registered. The
    /// connection does not enter the registry in that case.
    pub fn join(&self, connection: Arc<Connection>, channel: &str) -> Result<(), RegistryError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let Some(chan) = inner.channels.get_mut(channel) else {
            return Err(RegistryError::ChannelNotFound(channel.to_string()));
        };

        let id = connection.id();
        chan.subscribe(id);
        inner.connections.insert(id, connection);

        debug!(
            channel = %channel,
            connection = %id,
            subscribers = inner.channels[channel].subscriber_count(),
            "joined"
        );
        Ok(())
    }

    /// Remove a connection from one channel's subscriber set.
    ///
    /// Channel-scoped: the connection stays in the global set and in any
    /// other channel. Idempotent, including for unknown channels.
    pub fn leave(&self, id: ConnectionId, channel: &str) {
        let mut inner = self.inner.write();
        if let Some(chan) = inner.channels.get_mut(channel) {
            chan.unsubscribe(id);
        }
    }

    /// Remove a connection from the global set and every channel.
    ///
    /// Idempotent: removing an unknown or already-removed connection returns
    /// `None`. Returns the handle so the caller can close the transport
    /// outside the lock.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let conn = inner.connections.remove(&id)?;
        for chan in inner.channels.values_mut() {
            chan.unsubscribe(id);
        }

        debug!(connection = %id, remaining = inner.connections.len(), "connection removed");
        Some(conn)
    }

    /// Snapshot the subscribers of a channel.
    ///
    /// An unknown channel yields an empty snapshot. The broadcast loop
    /// iterates this copy so concurrent joins and removals never race with
    /// in-flight writes.
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        match inner.channels.get(channel) {
            Some(chan) => chan
                .subscribers()
                .into_iter()
                .filter_map(|id| inner.connections.get(&id).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Snapshot every live connection.
    #[must_use]
    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.inner.read().connections.values().cloned().collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Number of subscribers on a channel. Zero for unknown channels.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .read()
            .channels
            .get(channel)
            .map(Channel::subscriber_count)
            .unwrap_or(0)
    }

    /// Get all channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.inner.read().channels.keys().cloned().collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        RegistryStats {
            connection_count: inner.connections.len(),
            channel_count: inner.channels.len(),
        }
    }

    /// Close every connection and empty all subscriber sets.
    ///
    /// Channels persist and report zero subscribers afterwards. Safe to call
    /// with no connections, and safe to call more than once.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<Connection>> = {
            let mut guard = self.inner.write();
            let inner = &mut *guard;
            for chan in inner.channels.values_mut() {
                chan.clear();
            }
            inner.connections.drain().map(|(_, conn)| conn).collect()
        };

        for conn in &drained {
            conn.sink().close().await;
        }

        info!(closed = drained.len(), "registry shut down");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of registered channels.
    pub channel_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionSink;
    use crate::test_util::MockSink;

    fn connection() -> Arc<Connection> {
        Arc::new(Connection::new(MockSink::shared(), None))
    }

    #[test]
    fn test_add_channel_idempotent() {
        let registry = Registry::new();

        registry.add_channel("/room1").unwrap();
        registry.add_channel("/room1").unwrap();

        assert!(registry.channel_exists("/room1"));
        assert_eq!(registry.stats().channel_count, 1);
    }

    #[test]
    fn test_add_channel_invalid_name() {
        let registry = Registry::new();

        assert!(matches!(
            registry.add_channel("no-leading-slash"),
            Err(RegistryError::InvalidChannel(_))
        ));
        assert!(registry.add_channel("").is_err());
    }

    #[test]
    fn test_join_unknown_channel_rejected() {
        let registry = Registry::new();
        let conn = connection();

        let err = registry.join(conn, "/nowhere").unwrap_err();
        assert!(matches!(err, RegistryError::ChannelNotFound(_)));

        // The connection never entered the global set
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_join_places_connection_in_both_sets() {
        let registry = Registry::new();
        registry.add_channel("/room1").unwrap();

        let conn = connection();
        let id = conn.id();
        registry.join(conn, "/room1").unwrap();

        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.subscriber_count("/room1"), 1);
        assert_eq!(registry.subscribers("/room1")[0].id(), id);
    }

    #[test]
    fn test_remove_connection_idempotent() {
        let registry = Registry::new();
        registry.add_channel("/room1").unwrap();

        let conn = connection();
        let id = conn.id();
        registry.join(conn, "/room1").unwrap();

        assert!(registry.remove_connection(id).is_some());
        assert!(registry.remove_connection(id).is_none());

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.subscriber_count("/room1"), 0);
    }

    #[test]
    fn test_leave_is_channel_scoped_and_idempotent() {
        let registry = Registry::new();
        registry.add_channel("/room1").unwrap();

        let conn = connection();
        let id = conn.id();
        registry.join(conn, "/room1").unwrap();

        registry.leave(id, "/room1");
        assert_eq!(registry.subscriber_count("/room1"), 0);
        // Still in the global set; leave does not tear down the connection
        assert_eq!(registry.connection_count(), 1);

        // Repeated and unknown-channel leaves are no-ops
        registry.leave(id, "/room1");
        registry.leave(id, "/nowhere");
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_channel_persists_with_zero_subscribers() {
        let registry = Registry::new();
        registry.add_channel("/room1").unwrap();

        let conn = connection();
        let id = conn.id();
        registry.join(conn, "/room1").unwrap();
        registry.remove_connection(id);

        // Future joins still succeed
        assert!(registry.channel_exists("/room1"));
        registry.join(connection(), "/room1").unwrap();
        assert_eq!(registry.subscriber_count("/room1"), 1);
    }

    #[test]
    fn test_all_connections_snapshot() {
        let registry = Registry::new();
        registry.add_channel("/room1").unwrap();
        registry.add_channel("/room2").unwrap();

        let a = connection();
        let b = connection();
        let ids = [a.id(), b.id()];
        registry.join(a, "/room1").unwrap();
        registry.join(b, "/room2").unwrap();

        let all = registry.all_connections();
        assert_eq!(all.len(), 2);
        assert!(ids.iter().all(|id| all.iter().any(|c| c.id() == *id)));

        registry.remove_connection(ids[0]);
        assert_eq!(registry.all_connections().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let registry = Registry::new();
        registry.add_channel("/room1").unwrap();
        registry.add_channel("/room2").unwrap();

        let sink1 = MockSink::shared();
        let sink2 = MockSink::shared();
        registry
            .join(Arc::new(Connection::new(sink1.clone(), None)), "/room1")
            .unwrap();
        registry
            .join(Arc::new(Connection::new(sink2.clone(), None)), "/room2")
            .unwrap();

        registry.shutdown().await;

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.subscriber_count("/room1"), 0);
        assert_eq!(registry.subscriber_count("/room2"), 0);
        assert!(!sink1.is_open());
        assert!(!sink2.is_open());

        // Channels survive shutdown
        assert!(registry.channel_exists("/room1"));
        assert!(registry.channel_exists("/room2"));
    }

    #[tokio::test]
    async fn test_shutdown_with_no_connections() {
        let registry = Registry::new();
        registry.shutdown().await;
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_safe() {
        let registry = Registry::new();
        registry.add_channel("/room1").unwrap();

        let sink = MockSink::shared();
        registry
            .join(Arc::new(Connection::new(sink.clone(), None)), "/room1")
            .unwrap();

        registry.shutdown().await;
        registry.shutdown().await;

        assert!(!sink.is_open());
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.channel_exists("/room1"));
    }
}
