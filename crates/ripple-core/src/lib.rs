//! # ripple-core
//!
//! Connection registry and fan-out broadcast engine for the Ripple relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Connection** - One persistent duplex session with a single client
//! - **Channel** - Named broadcast group tracking subscriber membership
//! - **Registry** - Authoritative store of live connections and channels
//! - **Broadcaster** - Fan-out delivery with per-subscriber failure isolation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Broadcaster │────▶│  Registry   │────▶│  Channel    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │ Connection  │
//!                     └─────────────┘
//! ```
//!
//! The registry is instantiated once at startup and shared by reference;
//! it is the single source of truth for which connections are alive.

pub mod broadcast;
pub mod channel;
pub mod connection;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_util;

pub use broadcast::Broadcaster;
pub use channel::{validate_channel_name, Channel, ChannelName};
pub use connection::{Connection, ConnectionId, ConnectionSink, SinkError};
pub use registry::{Registry, RegistryError, RegistryStats};
