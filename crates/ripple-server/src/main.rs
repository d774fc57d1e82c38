//! # Ripple Server
//!
//! Channel-based WebSocket broadcast relay.
//!
//! Clients join a channel by opening a WebSocket against its path (the path
//! is the channel name); the server fans every published message out to all
//! current subscribers of that channel.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! ripple
//!
//! # Run with environment variables
//! RIPPLE_PORT=8080 RIPPLE_HOST=0.0.0.0 ripple
//! ```
//!
//! Channels are pre-registered via `ripple.toml`:
//!
//! ```toml
//! channels = ["/room1", "/room2"]
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Ripple relay on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server; a failed bind is fatal and exits non-zero
    handlers::run_server(config).await?;

    Ok(())
}
