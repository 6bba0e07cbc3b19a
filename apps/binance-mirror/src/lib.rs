#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::default_trait_access
    )
)]

//! Binance Mirror - Market Data Mirror
//!
//! Mirrors Binance's REST and streaming market-data APIs: a fixed set of
//! REST endpoints is polled on a timer and the live trade/depth stream is
//! consumed over a single persistent WebSocket connection. Both land in
//! a shared cache so any number of downstream clients can read current
//! market state without touching the upstream themselves.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: The shared cache and the data model it stores
//!   - `cache`: per-key REST entries plus the versioned frame slot
//!   - `endpoint`: REST mirror target descriptions
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: REST poller and stream ingestor (the producers)
//!   - `server`: REST mirror and WebSocket relay (the consumers)
//!   - `config`: environment-driven settings
//!   - `health`: ops endpoint (health + metrics)
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: tracing setup
//!
//! # Data Flow
//!
//! ```text
//! Binance REST ──► REST Poller ──┐              ┌──► Read Facade  ──► HTTP client
//!                                ├──► Cache ────┤
//! Binance WS ──► Stream Ingestor ┘              └──► Relay Session ──► WS client 1..N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Shared cache and core data types.
pub mod domain;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{CacheEntry, CacheStats, MarketCache, SharedMarketCache, StreamFrame};
pub use domain::endpoint::EndpointSpec;

// Upstream producers
pub use infrastructure::binance::{
    BackoffConfig, BackoffPolicy, ConnectionState, IngestError, IngestState, PollerState,
    RestPoller, StreamConfig, StreamEvent, StreamIngestor,
};

// Downstream surface
pub use infrastructure::server::{MirrorServer, MirrorState, ServerError, router};

// Configuration
pub use infrastructure::config::{
    ConfigError, MirrorConfig, PollerSettings, ServerSettings, StreamSettings,
};

// Ops server
pub use infrastructure::health::{OpsServer, OpsServerError, OpsState};

// Metrics
pub use infrastructure::metrics::{FetchOutcome, init_metrics};
