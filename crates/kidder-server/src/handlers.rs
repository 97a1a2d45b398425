//! HTTP and WebSocket handlers for the Kidder server.
//!
//! This module wires the chat hub into axum: the WebSocket endpoint hands
//! each connection to a [`Session`], and the remaining routes cover uploads,
//! static files and health.

use crate::config::{Config, StorageBackend};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::upload;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use kidder_core::{Hub, MemoryStore, MessageStore, Session, SqliteStore};
use kidder_transport::{websocket, ConnectionId};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared server state.
pub struct AppState {
    /// The chat hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
}

/// Open the configured store and start the hub.
///
/// # Errors
///
/// Returns an error if the message database cannot be opened.
pub async fn build_state(config: Config) -> Result<Arc<AppState>> {
    let store: Arc<dyn MessageStore> = match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory message store, history is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::Sqlite => {
            let path = config.storage.database_path();
            let store = SqliteStore::open(&path, config.storage.max_connections)
                .await
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            Arc::new(store)
        }
    };

    let hub = Hub::spawn(store, config.hub_config());
    Ok(Arc::new(AppState { hub, config }))
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let config = &state.config;

    let mut app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler));

    if config.uploads.enabled {
        app = app.route(
            "/upload",
            post(upload::upload_handler)
                .layer(DefaultBodyLimit::max(config.uploads.max_size + MULTIPART_OVERHEAD)),
        );
    }
    app = app.nest_service(upload::URL_PREFIX, ServeDir::new(config.uploads.dir()));

    if let Some(dir) = &config.static_dir {
        let dir = shellexpand::tilde(dir).into_owned();
        app = app
            .route_service("/chat", ServeFile::new(Path::new(&dir).join("index.html")))
            .fallback_service(ServeDir::new(&dir));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = build_state(config.clone()).await?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Kidder server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Kidder server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "participants": state.hub.registry().len(),
    }))
}

/// Query parameters accepted on connect.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Requested display name.
    pub nickname: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, params.nickname))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, nickname: Option<String>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    debug!(connection = %connection_id, "WebSocket connected");

    let (sink, source) = websocket::split(socket);
    let session = Session::new(Arc::clone(&state.hub), connection_id.clone(), Arc::new(sink))
        .with_requested_name(nickname);

    if let Err(e) = session.run(source).await {
        warn!(connection = %connection_id, error = %e, "Session ended with error");
        metrics::record_error("session");
    }

    debug!(connection = %connection_id, "WebSocket disconnected");
}
