//! Binance Mirror Binary
//!
//! Starts the market data mirror.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin binance-mirror
//! ```
//!
//! # Environment Variables
//!
//! All optional:
//! - `MIRROR_ENDPOINTS`: `key=url` pairs, comma-separated (default: the
//!   built-in Binance endpoint table)
//! - `MIRROR_POLL_INTERVAL_SECS`: REST polling period (default: 7)
//! - `MIRROR_STREAM_URL`: Upstream stream URL (default:
//!   <wss://stream.binance.com:9443/ws>)
//! - `MIRROR_STREAM_SUBSCRIPTIONS`: Channels, comma-separated (default:
//!   `btcusdt@trade,btcusdt@depth@100ms`)
//! - `MIRROR_SERVER_PORT`: Public mirror + relay port (default: 8080)
//! - `MIRROR_OPS_PORT`: Health + metrics port (default: 8082)
//! - `MIRROR_RECONNECT_DELAY_INITIAL_MS`, `MIRROR_RECONNECT_DELAY_MAX_SECS`,
//!   `MIRROR_RECONNECT_DELAY_MULTIPLIER`, `MIRROR_MAX_RECONNECT_ATTEMPTS`:
//!   stream reconnect tuning
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::sync::atomic::AtomicI32;

use binance_mirror::domain::cache::MarketCache;
use binance_mirror::infrastructure::binance::{
    BackoffConfig, IngestState, PollerState, RestPoller, StreamConfig, StreamEvent, StreamIngestor,
};
use binance_mirror::infrastructure::health::{OpsServer, OpsState};
use binance_mirror::infrastructure::server::{MirrorServer, MirrorState};
use binance_mirror::infrastructure::{metrics, telemetry};
use binance_mirror::MirrorConfig;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    telemetry::init();
    tracing::info!("Starting Binance mirror");

    let _metrics_handle = metrics::init_metrics();

    let config = MirrorConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let cache = Arc::new(MarketCache::new());
    let ingest_state = Arc::new(IngestState::new());
    let poller_state = Arc::new(PollerState::new());
    let relay_clients = Arc::new(AtomicI32::new(0));

    // REST poller
    let poller = RestPoller::new(
        config.poller.endpoints.clone(),
        config.poller.interval,
        Arc::clone(&cache),
        Arc::clone(&poller_state),
        shutdown_token.clone(),
    );
    tokio::spawn(poller.run());

    // Stream ingestor and its event handler
    let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(64);
    let stream_config = StreamConfig {
        url: config.stream.url.clone(),
        subscriptions: config.stream.subscriptions.clone(),
        backoff: BackoffConfig::from_stream_settings(&config.stream),
    };
    let ingestor = Arc::new(StreamIngestor::new(
        stream_config,
        Arc::clone(&cache),
        Arc::clone(&ingest_state),
        event_tx,
        shutdown_token.clone(),
    ));

    tokio::spawn(handle_stream_events(event_rx));

    tokio::spawn(async move {
        if let Err(e) = ingestor.run().await {
            tracing::error!(error = %e, "Stream ingestor error");
        }
    });

    // Public mirror + relay server
    let mirror_state = MirrorState::new(
        Arc::clone(&cache),
        config.poller.mirror_keys(),
        Arc::clone(&relay_clients),
    );
    let mirror_server = MirrorServer::new(
        config.server.mirror_port,
        mirror_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = mirror_server.run().await {
            tracing::error!(error = %e, "Mirror server error");
        }
    });

    // Ops server
    let ops_state = Arc::new(OpsState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        ingest_state,
        poller_state,
        cache,
        relay_clients,
    ));
    let ops_server = OpsServer::new(config.server.ops_port, ops_state, shutdown_token.clone());
    tokio::spawn(async move {
        if let Err(e) = ops_server.run().await {
            tracing::error!(error = %e, "Ops server error");
        }
    });

    tracing::info!("Mirror ready");

    await_shutdown(shutdown_token).await;

    tracing::info!("Mirror stopped");
    Ok(())
}

/// Handle lifecycle events from the stream ingestor.
async fn handle_stream_events(mut rx: mpsc::Receiver<StreamEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Connected => {
                tracing::info!("Upstream stream connected");
            }
            StreamEvent::Disconnected => {
                tracing::warn!("Upstream stream disconnected");
            }
            StreamEvent::Reconnecting { attempt } => {
                metrics::record_reconnect();
                tracing::info!(attempt, "Upstream stream reconnecting");
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &MirrorConfig) {
    tracing::info!(
        endpoints = config.poller.endpoints.len(),
        poll_interval_secs = config.poller.interval.as_secs(),
        mirror_port = config.server.mirror_port,
        ops_port = config.server.ops_port,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.stream.url,
        subscriptions = ?config.stream.subscriptions,
        "Upstream stream endpoint"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
