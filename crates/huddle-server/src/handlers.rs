//! Connection handlers for Huddle server.
//!
//! This module handles the connection lifecycle: WebSocket upgrade, the
//! per-connection session loop, and the HTTP surface around it.

use crate::config::{Config, CorsConfig};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use huddle_core::{ConnectionId, Dispatch, RouterError, SessionRouter};
use huddle_protocol::{ClientEvent, Encoding, ServerEvent};
use huddle_transport::{Connection, WebSocketConnection};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, error, info, warn};

/// Frames above this multiple of the configured limit are refused by the
/// WebSocket layer itself instead of being buffered and then dropped.
const FRAME_CAP_FACTOR: usize = 4;

/// Shared server state.
pub struct AppState {
    /// The session router.
    pub router: SessionRouter,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            router: SessionRouter::with_config(config.router_config()),
            config,
        }
    }
}

/// Query parameters accepted on the WebSocket upgrade.
#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    /// Outbound encoding (`json` or `msgpack`).
    #[serde(default)]
    format: Encoding,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    anyhow::ensure!(
        config.transport.websocket_path.starts_with('/'),
        "websocket_path must start with '/': {}",
        config.transport.websocket_path
    );

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Serve the application on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = build_app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors);

    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
}

/// Whether a WebSocket upgrade from these headers may proceed.
///
/// Requests without an `Origin` header come from non-browser clients and
/// are always let through.
fn origin_allowed(config: &CorsConfig, headers: &HeaderMap) -> bool {
    if !config.enforce_websocket_origin {
        return true;
    }
    let Some(origin) = headers.get(header::ORIGIN) else {
        return true;
    };
    config
        .allowed_origins
        .iter()
        .any(|allowed| allowed == "*" || allowed.as_bytes() == origin.as_bytes())
}

fn health_report(state: &AppState) -> serde_json::Value {
    let stats = state.router.stats();
    serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "named": stats.named,
    })
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(health_report(&state))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !origin_allowed(&state.config.cors, &headers) {
        warn!(remote = %addr, origin = ?headers.get(header::ORIGIN), "Rejected WebSocket origin");
        metrics::record_error("origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    let max_message_size = state.config.transport.max_message_size;
    let frame_cap = max_message_size.saturating_mul(FRAME_CAP_FACTOR);
    ws.max_message_size(frame_cap)
        .max_frame_size(frame_cap)
        .on_upgrade(move |socket| {
            let conn = WebSocketConnection::new(socket, params.format)
                .with_remote_addr(addr)
                .with_max_message_size(max_message_size);
            run_session(conn, state)
        })
}

/// Drive one connection from registration to removal.
///
/// Inbound events are dispatched in arrival order; events fanned out by
/// the router arrive through this connection's outbox and are written to
/// the transport in the order the router produced them.
pub async fn run_session<C: Connection + 'static>(mut conn: C, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = conn.id().clone();
    let (outbox, mut inbox) = mpsc::unbounded_channel();

    if let Err(e) = state.router.connect(connection_id.clone(), outbox) {
        error!(connection = %connection_id, error = %e, "Failed to register connection");
        metrics::record_error("register");
        if let Err(e) = conn.close().await {
            debug!(connection = %connection_id, error = %e, "Close failed");
        }
        return;
    }

    debug!(
        connection = %connection_id,
        remote = conn.remote_addr().as_deref().unwrap_or("unknown"),
        "Connection opened"
    );

    let interval = state.config.heartbeat.interval();
    let timeout = state.config.heartbeat.timeout();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let greeting = ServerEvent::connected(connection_id.as_str());
    if send_within(&mut conn, &greeting, timeout).await {
        loop {
            tokio::select! {
                biased;

                // Events fanned out by the router
                Some(event) = inbox.recv() => {
                    if !send_within(&mut conn, &event, timeout).await {
                        break;
                    }
                }

                // Liveness
                _ = ticker.tick() => {
                    if conn.last_seen().elapsed() >= timeout {
                        info!(connection = %connection_id, "Heartbeat timeout");
                        metrics::record_error("heartbeat_timeout");
                        break;
                    }
                    match tokio::time::timeout(timeout, conn.ping()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(connection = %connection_id, error = %e, "Ping failed");
                            break;
                        }
                        Err(_) => {
                            warn!(connection = %connection_id, "Ping stalled");
                            metrics::record_error("send_timeout");
                            break;
                        }
                    }
                }

                // Events from the client
                inbound = conn.recv() => match inbound {
                    Ok(Some(event)) => {
                        if let Err(e) = handle_event(event, &connection_id, &state) {
                            error!(connection = %connection_id, error = %e, "Dispatch failed");
                            metrics::record_error("dispatch");
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(connection = %connection_id, "Closed by peer");
                        break;
                    }
                    Err(e) if e.is_fatal() => {
                        warn!(connection = %connection_id, error = %e, "Transport error");
                        metrics::record_error("transport");
                        break;
                    }
                    Err(e) => {
                        debug!(connection = %connection_id, error = %e, "Dropping malformed frame");
                        metrics::record_dropped("malformed");
                    }
                },
            }
        }
    }

    let departure = state.router.disconnect(&connection_id);
    if departure.name.is_some() {
        metrics::record_delivery("user_left", departure.delivery);
    }
    metrics::set_router_stats(state.router.stats());

    match tokio::time::timeout(timeout, conn.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(connection = %connection_id, error = %e, "Close failed"),
        Err(_) => debug!(connection = %connection_id, "Close stalled"),
    }
    debug!(connection = %connection_id, "Connection closed");
}

/// Write one event, giving up if the peer does not take it within `timeout`.
///
/// Returns whether the session should continue.
async fn send_within<C: Connection>(
    conn: &mut C,
    event: &ServerEvent,
    timeout: Duration,
) -> bool {
    match tokio::time::timeout(timeout, conn.send(event)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(connection = %conn.id(), error = %e, "Outbound send failed");
            false
        }
        Err(_) => {
            warn!(connection = %conn.id(), event = event.name(), "Outbound send stalled");
            metrics::record_error("send_timeout");
            false
        }
    }
}

/// Dispatch one inbound event and record its outcome.
fn handle_event(
    event: ClientEvent,
    connection_id: &ConnectionId,
    state: &AppState,
) -> Result<(), RouterError> {
    let start = std::time::Instant::now();
    metrics::record_inbound(event.name());
    let outbound = match event {
        ClientEvent::Join { .. } => "user_joined",
        ClientEvent::SendMessage { .. } => "receive_message",
        ClientEvent::Typing { .. } => "user_typing",
    };

    match state.router.dispatch(connection_id, event)? {
        Dispatch::Joined { delivery, .. } => {
            metrics::record_delivery(outbound, delivery);
            metrics::set_router_stats(state.router.stats());
        }
        Dispatch::Relayed(delivery) => metrics::record_delivery(outbound, delivery),
        Dispatch::Renamed { .. } => {}
        Dispatch::Dropped(reason) => metrics::record_dropped(reason.as_str()),
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
    Ok(())
}
