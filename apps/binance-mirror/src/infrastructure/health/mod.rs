//! Ops Endpoint
//!
//! HTTP endpoint for health checks, producer status reporting, and
//! Prometheus metrics. Used by container orchestrators, load balancers,
//! and monitoring systems. Runs on its own port so the public mirror
//! surface stays free of operational routes.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks producers)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::cache::SharedMarketCache;
use crate::infrastructure::binance::{IngestState, PollerState};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Mirror version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream stream status.
    pub stream: StreamStatus,
    /// REST poller status.
    pub poller: PollerStatus,
    /// Cache occupancy.
    pub cache: CacheStatus,
    /// Connected relay clients.
    pub clients: ClientStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Both producers are delivering data.
    Healthy,
    /// One producer is delivering data.
    Degraded,
    /// Neither producer has delivered data.
    Unhealthy,
}

/// Upstream stream connection status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    /// Connection state name.
    pub state: String,
    /// Whether the receive loop is running.
    pub connected: bool,
    /// Frames received since startup.
    pub frames_received: u64,
    /// Backoff attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// When the stream last connected.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last recorded error, if any.
    pub error: Option<String>,
}

/// REST poller status.
#[derive(Debug, Clone, Serialize)]
pub struct PollerStatus {
    /// Successful fetches since startup.
    pub fetches_ok: u64,
    /// Failed fetches since startup.
    pub fetches_failed: u64,
    /// When the last successful fetch completed.
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Cache occupancy.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStatus {
    /// REST keys with a cached entry.
    pub rest_entries: usize,
    /// Current frame version (0 = nothing published yet).
    pub frame_version: u64,
}

/// Connected client information.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClientStatus {
    /// Active relay sessions.
    pub relay_sessions: i32,
}

// =============================================================================
// Ops Server State
// =============================================================================

/// Shared state for the ops server.
pub struct OpsState {
    version: String,
    started_at: Instant,
    ingest: Arc<IngestState>,
    poller: Arc<PollerState>,
    cache: SharedMarketCache,
    clients: Arc<AtomicI32>,
}

impl OpsState {
    /// Create new ops server state.
    #[must_use]
    pub fn new(
        version: String,
        ingest: Arc<IngestState>,
        poller: Arc<PollerState>,
        cache: SharedMarketCache,
        clients: Arc<AtomicI32>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            ingest,
            poller,
            cache,
            clients,
        }
    }
}

// =============================================================================
// Ops Server
// =============================================================================

/// Health check and metrics HTTP server.
pub struct OpsServer {
    port: u16,
    state: Arc<OpsState>,
    cancel: CancellationToken,
}

impl OpsServer {
    /// Create a new ops server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<OpsState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the ops server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `OpsServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), OpsServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| OpsServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Ops server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| OpsServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Ops server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<OpsState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<OpsState>>) -> impl IntoResponse {
    // Ready once either producer has delivered: a connected stream means
    // frames are flowing, a successful fetch means mirror data exists.
    if is_ready(state.ingest.is_streaming(), state.poller.has_succeeded()) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &OpsState) -> HealthResponse {
    let streaming = state.ingest.is_streaming();
    let polling = state.poller.has_succeeded();
    let cache_stats = state.cache.stats();

    HealthResponse {
        status: determine_health_status(streaming, polling),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream: StreamStatus {
            state: state.ingest.state().as_str().to_string(),
            connected: streaming,
            frames_received: state.ingest.frames_received(),
            reconnect_attempts: state.ingest.reconnect_attempts(),
            last_connected_at: state.ingest.last_connected_at(),
            error: state.ingest.error_message(),
        },
        poller: PollerStatus {
            fetches_ok: state.poller.fetches_ok(),
            fetches_failed: state.poller.fetches_failed(),
            last_success_at: state.poller.last_success_at(),
        },
        cache: CacheStatus {
            rest_entries: cache_stats.rest_entries,
            frame_version: cache_stats.frame_version,
        },
        clients: ClientStatus {
            relay_sessions: state.clients.load(Ordering::Relaxed),
        },
    }
}

const fn determine_health_status(streaming: bool, polling: bool) -> HealthStatus {
    match (streaming, polling) {
        (true, true) => HealthStatus::Healthy,
        (true, false) | (false, true) => HealthStatus::Degraded,
        (false, false) => HealthStatus::Unhealthy,
    }
}

const fn is_ready(streaming: bool, polling: bool) -> bool {
    streaming || polling
}

// =============================================================================
// Errors
// =============================================================================

/// Ops server errors.
#[derive(Debug, thiserror::Error)]
pub enum OpsServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(true, true, HealthStatus::Healthy ; "both producers")]
    #[test_case(true, false, HealthStatus::Degraded ; "stream only")]
    #[test_case(false, true, HealthStatus::Degraded ; "poller only")]
    #[test_case(false, false, HealthStatus::Unhealthy ; "neither producer")]
    fn status_mapping(streaming: bool, polling: bool, expected: HealthStatus) {
        assert_eq!(determine_health_status(streaming, polling), expected);
    }

    #[test]
    fn readiness_requires_one_producer() {
        assert!(is_ready(true, false));
        assert!(is_ready(false, true));
        assert!(is_ready(true, true));
        assert!(!is_ready(false, false));
    }
}
