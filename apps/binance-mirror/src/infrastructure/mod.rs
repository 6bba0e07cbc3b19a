//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the upstream clients, the downstream HTTP/WebSocket
//! surface, and the operational plumbing around them.

/// Binance upstream adapters (REST poller, stream ingestor).
pub mod binance;

/// Downstream HTTP surface (REST mirror, WebSocket relay).
pub mod server;

/// Environment-driven configuration.
pub mod config;

/// Health check and metrics HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber setup.
pub mod telemetry;
