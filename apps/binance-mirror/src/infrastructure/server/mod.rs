//! Downstream Surface
//!
//! One HTTP server exposes both consumer surfaces:
//!
//! - `GET /api/v3/{key}` - REST mirror (read facade over the cache)
//! - `GET /ws` - WebSocket relay (one session per downstream client)
//!
//! Both surfaces only read the shared cache; they never talk to the
//! upstream, and a failure in one session never affects another.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicI32;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::cache::SharedMarketCache;

pub mod mirror;
pub mod relay;

// =============================================================================
// Shared State
// =============================================================================

/// State shared by the mirror handlers and relay sessions.
#[derive(Clone)]
pub struct MirrorState {
    cache: SharedMarketCache,
    keys: Arc<HashSet<String>>,
    clients: Arc<AtomicI32>,
}

impl MirrorState {
    /// Create server state over the shared cache.
    ///
    /// `keys` is the set of configured mirror keys; requests for any
    /// other key are rejected with 404 rather than consulting the cache.
    #[must_use]
    pub fn new(
        cache: SharedMarketCache,
        keys: HashSet<String>,
        clients: Arc<AtomicI32>,
    ) -> Self {
        Self {
            cache,
            keys: Arc::new(keys),
            clients,
        }
    }

    /// The shared cache.
    #[must_use]
    pub fn cache(&self) -> &SharedMarketCache {
        &self.cache
    }

    /// Configured mirror keys.
    #[must_use]
    pub fn keys(&self) -> &HashSet<String> {
        &self.keys
    }

    /// Connected relay session counter.
    #[must_use]
    pub fn clients(&self) -> &Arc<AtomicI32> {
        &self.clients
    }
}

/// Build the public router: mirror endpoints plus the relay upgrade.
#[must_use]
pub fn router(state: MirrorState) -> Router {
    Router::new()
        .route("/api/v3/{key}", get(mirror::serve_cached))
        .route("/ws", get(relay::ws_handler))
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// The public-facing HTTP server.
pub struct MirrorServer {
    port: u16,
    state: MirrorState,
    cancel: CancellationToken,
}

impl MirrorServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: MirrorState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Mirror server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Mirror server stopped");
        Ok(())
    }
}

/// Mirror server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
