//! Connection lifecycle handlers for the Ripple server.
//!
//! The request path is the channel name: a WebSocket upgrade against a
//! registered path joins that channel, an unknown path is rejected with 404
//! before any handshake work is done.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use ripple_core::{Broadcaster, Connection, ConnectionSink, Registry, SinkError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The connection/channel registry.
    pub registry: Arc<Registry>,
    /// The fan-out broadcast engine.
    pub broadcaster: Broadcaster,
}

impl AppState {
    /// Create app state with the configured channels pre-registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured channel name is invalid.
    pub fn new(config: &Config) -> Result<Self> {
        let registry = Arc::new(Registry::new());

        for name in &config.channels {
            registry
                .add_channel(name)
                .with_context(|| format!("invalid channel {name:?} in config"))?;
        }

        let broadcaster = Broadcaster::with_write_timeout(
            registry.clone(),
            Duration::from_millis(config.delivery.write_timeout_ms),
        );

        Ok(Self {
            registry,
            broadcaster,
        })
    }
}

/// Run the HTTP/WebSocket server until a shutdown signal arrives, then
/// close every live connection.
///
/// # Errors
///
/// Returns an error if the listener cannot bind.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(&config)?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }
    metrics::set_channels(config.channels.len());

    // Every path other than /health resolves to a channel
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/*channel", get(ws_handler))
        .with_state(state.clone());

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Ripple relay listening on {}", addr);
    info!(channels = config.channels.len(), "Channels pre-registered");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state.clone()))
    .await
    .context("server error")?;

    // Catch any connection that upgraded while the shutdown was in
    // progress; Registry::shutdown is idempotent.
    state.registry.shutdown().await;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");

    // Graceful shutdown waits for in-flight connections, and upgraded
    // WebSockets are long-lived. Closing every transport here ends each
    // read loop so the serve future can actually complete.
    state.registry.shutdown().await;
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
///
/// Resolves the channel before upgrading so an unknown path never costs a
/// handshake.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    // The wildcard capture strips the leading slash; channel names keep it
    let channel = format!("/{channel}");

    if !state.registry.channel_exists(&channel) {
        debug!(channel = %channel, remote = %addr, "Join rejected, unknown channel");
        return StatusCode::NOT_FOUND.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, channel, addr, state))
        .into_response()
}

/// The WebSocket write half behind the core's sink seam.
///
/// The async mutex serializes writes so broadcasts reach the peer in
/// publish order.
struct WsSink {
    sender: Mutex<SplitSink<WebSocket, Message>>,
    open: AtomicBool,
}

impl WsSink {
    fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sender: Mutex::new(sender),
            open: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ConnectionSink for WsSink {
    async fn send_text(&self, text: &str) -> Result<(), SinkError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }

        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| {
                self.open.store(false, Ordering::SeqCst);
                SinkError::SendFailed(e.to_string())
            })
    }

    async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return; // Already closed
        }
        let mut sender = self.sender.lock().await;
        let _ = sender.close().await;
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Handle a joined WebSocket connection until it disconnects.
async fn handle_socket(
    socket: WebSocket,
    channel: String,
    addr: SocketAddr,
    state: Arc<AppState>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (sender, mut receiver) = socket.split();
    let sink = Arc::new(WsSink::new(sender));
    let connection = Arc::new(Connection::new(sink.clone(), Some(addr.to_string())));
    let id = connection.id();

    // The channel was resolved before the upgrade and channels are never
    // removed, so this is not expected to fail.
    if let Err(e) = state.registry.join(connection, &channel) {
        warn!(connection = %id, error = %e, "Join failed after upgrade");
        sink.close().await;
        return;
    }

    debug!(connection = %id, channel = %channel, remote = %addr, "Client joined");

    // Drain inbound frames until the client goes away. Text frames carrying
    // JSON are relayed to the rest of the channel.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(payload) => {
                    let delivered = state.broadcaster.publish(&channel, &payload).await;
                    metrics::record_broadcast(delivered);
                }
                Err(e) => {
                    warn!(connection = %id, error = %e, "Ignoring non-JSON client message");
                }
            },
            Ok(Message::Binary(_)) => {
                debug!(connection = %id, "Ignoring binary frame");
            }
            Ok(Message::Ping(data)) => {
                let mut sender = sink.sender.lock().await;
                if sender.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Pong(_)) => {
                // Ignore pongs
            }
            Ok(Message::Close(_)) => {
                debug!(connection = %id, "Received close frame");
                break;
            }
            Err(e) => {
                debug!(connection = %id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Disconnected is terminal: remove from every set and close the
    // transport. A broadcast may have evicted the connection already, in
    // which case this is a no-op.
    if let Some(conn) = state.registry.remove_connection(id) {
        conn.sink().close().await;
    }

    debug!(connection = %id, channel = %channel, "Client disconnected");
}
