//! Binance Upstream Adapters
//!
//! The two producers that feed the shared cache:
//!
//! - **poller**: fixed-interval REST fetches into per-key entries
//! - **stream**: the single persistent WebSocket connection into the
//!   versioned frame slot, with backoff-driven reconnect

pub mod backoff;
pub mod poller;
pub mod stream;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use poller::{FetchError, PollerState, RestPoller};
pub use stream::{
    ConnectionState, IngestError, IngestState, StreamConfig, StreamEvent, StreamIngestor,
};
