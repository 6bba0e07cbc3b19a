//! Upstream Stream Ingestor
//!
//! Holds the single persistent WebSocket connection to the upstream
//! market data stream. Connection lifecycle:
//!
//! `Disconnected → Connecting → Subscribing → Streaming → (Disconnected
//! on close/error)`
//!
//! After connecting, the configured subscription requests are sent once
//! as text frames; upstream acknowledgements are neither parsed nor
//! awaited; downstream clients receive synthetic acks from their relay
//! session instead, so upstream protocol quirks never leak. While
//! streaming, every complete inbound text message (the transport performs
//! fragment reassembly) is published wholesale into the cache's frame
//! slot. On any transport error or upstream close the ingestor backs off
//! and reconnects; the cache keeps the last published frame during the
//! outage, so consumers see stale-but-valid data rather than an error.
//!
//! The ingestor never terminates the process on transient failure; with
//! the default unlimited attempt budget it runs for process lifetime and
//! stops only on cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffConfig, BackoffPolicy};
use crate::domain::cache::SharedMarketCache;
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Errors that end one upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The upstream closed the connection.
    #[error("upstream closed the connection")]
    ConnectionClosed,

    /// The configured reconnect attempt budget ran out.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle position of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    #[default]
    Disconnected,
    /// Opening the transport connection.
    Connecting,
    /// Connected; sending the subscription requests.
    Subscribing,
    /// Receive loop running; frames flow into the cache.
    Streaming,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase name for logs and the ops surface.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Shared view of the ingestor's state for the ops surface.
#[derive(Debug, Default)]
pub struct IngestState {
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
}

impl IngestState {
    /// Create state in `Disconnected`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a state transition.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Streaming {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
    }

    /// Record a terminal error message.
    pub fn set_error(&self, message: String) {
        *self.error_message.write() = Some(message);
    }

    /// Count one backoff attempt.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one published frame.
    pub fn increment_frames(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current lifecycle position.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the receive loop is currently running.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    /// Total frames published since startup.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Backoff attempts since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// When the stream last reached `Streaming`.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Last recorded error message, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }
}

// =============================================================================
// Events
// =============================================================================

/// Lifecycle notifications emitted by the ingestor.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Subscriptions sent; the receive loop is running.
    Connected,
    /// The connection was lost.
    Disconnected,
    /// Waiting out a backoff delay.
    Reconnecting {
        /// Attempt number since the last successful connection.
        attempt: u32,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream ingestor.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Upstream WebSocket URL.
    pub url: String,
    /// Channels to subscribe to (e.g. `btcusdt@trade`).
    pub subscriptions: Vec<String>,
    /// Reconnect backoff tuning.
    pub backoff: BackoffConfig,
}

impl StreamConfig {
    /// Create a config with default backoff.
    #[must_use]
    pub fn new(url: String, subscriptions: Vec<String>) -> Self {
        Self {
            url,
            subscriptions,
            backoff: BackoffConfig::default(),
        }
    }

    /// The outbound subscription requests, one per channel, in the wire
    /// format the upstream expects.
    #[must_use]
    pub fn subscription_requests(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .enumerate()
            .map(|(index, channel)| {
                format!(
                    r#"{{"method": "SUBSCRIBE", "params": ["{channel}"], "id": {}}}"#,
                    index + 1
                )
            })
            .collect()
    }
}

// =============================================================================
// Ingestor
// =============================================================================

/// The single upstream stream connection.
pub struct StreamIngestor {
    config: StreamConfig,
    cache: SharedMarketCache,
    state: Arc<IngestState>,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamIngestor {
    /// Create a new ingestor.
    #[must_use]
    pub const fn new(
        config: StreamConfig,
        cache: SharedMarketCache,
        state: Arc<IngestState>,
        event_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            cache,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the connect/stream/reconnect loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `MaxReconnectAttemptsExceeded` only when a finite attempt
    /// budget is configured and runs out; transient failures are retried.
    pub async fn run(self: Arc<Self>) -> Result<(), IngestError> {
        let mut backoff = BackoffPolicy::new(self.config.backoff.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Stream ingestor cancelled");
                return Ok(());
            }

            match self.connect_and_stream(&mut backoff).await {
                Ok(()) => {
                    tracing::info!("Stream ingestor stopped");
                    return Ok(());
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Upstream stream connection lost");
                    self.state.set_state(ConnectionState::Disconnected);
                    let _ = self.event_tx.send(StreamEvent::Disconnected).await;

                    let Some(delay) = backoff.next_delay() else {
                        self.state.set_error(error.to_string());
                        return Err(IngestError::MaxReconnectAttemptsExceeded);
                    };

                    let attempt = backoff.attempt();
                    self.state.set_state(ConnectionState::Reconnecting);
                    self.state.increment_reconnect_attempts();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to upstream stream"
                    );
                    let _ = self
                        .event_tx
                        .send(StreamEvent::Reconnecting { attempt })
                        .await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Stream ingestor cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One connection: connect, subscribe, then pump frames into the
    /// cache until cancellation (Ok) or a transport failure (Err).
    async fn connect_and_stream(&self, backoff: &mut BackoffPolicy) -> Result<(), IngestError> {
        self.state.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "Connecting to upstream stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        self.state.set_state(ConnectionState::Subscribing);
        for request in self.config.subscription_requests() {
            tracing::debug!(request = %request, "Sending subscription request");
            write.send(Message::Text(request.into())).await?;
        }

        // Acks are not awaited: whatever the upstream replies flows
        // through the frame slot like any other message.
        self.state.set_state(ConnectionState::Streaming);
        backoff.reset();
        let _ = self.event_tx.send(StreamEvent::Connected).await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Ok(());
                }
                inbound = read.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            self.state.increment_frames();
                            metrics::record_frame_received();
                            let version = self.cache.publish_frame(text.as_str());
                            tracing::trace!(version, bytes = text.len(), "Published stream frame");
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Upstream sent close frame");
                            return Err(IngestError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            tracing::trace!("Ignoring non-text frame");
                        }
                        Some(Err(error)) => {
                            return Err(error.into());
                        }
                        None => {
                            tracing::info!("Upstream stream ended");
                            return Err(IngestError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_requests_match_upstream_wire_format() {
        let config = StreamConfig::new(
            "wss://stream.binance.com:9443/ws".to_string(),
            vec!["btcusdt@trade".to_string(), "btcusdt@depth@100ms".to_string()],
        );

        assert_eq!(
            config.subscription_requests(),
            vec![
                r#"{"method": "SUBSCRIBE", "params": ["btcusdt@trade"], "id": 1}"#.to_string(),
                r#"{"method": "SUBSCRIBE", "params": ["btcusdt@depth@100ms"], "id": 2}"#
                    .to_string(),
            ]
        );
    }

    #[test]
    fn connection_state_names() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
        assert_eq!(ConnectionState::Subscribing.as_str(), "subscribing");
        assert_eq!(ConnectionState::Streaming.as_str(), "streaming");
        assert_eq!(ConnectionState::Reconnecting.as_str(), "reconnecting");
    }

    #[test]
    fn ingest_state_starts_disconnected() {
        let state = IngestState::new();
        assert_eq!(state.state(), ConnectionState::Disconnected);
        assert!(!state.is_streaming());
        assert_eq!(state.frames_received(), 0);
        assert!(state.last_connected_at().is_none());
    }

    #[test]
    fn entering_streaming_clears_failure_bookkeeping() {
        let state = IngestState::new();
        state.set_error("connection refused".to_string());
        state.increment_reconnect_attempts();
        state.increment_reconnect_attempts();
        assert_eq!(state.reconnect_attempts(), 2);

        state.set_state(ConnectionState::Streaming);

        assert!(state.is_streaming());
        assert_eq!(state.reconnect_attempts(), 0);
        assert!(state.error_message().is_none());
        assert!(state.last_connected_at().is_some());
    }

    #[test]
    fn frame_counter_accumulates() {
        let state = IngestState::new();
        state.increment_frames();
        state.increment_frames();
        state.increment_frames();
        assert_eq!(state.frames_received(), 3);
    }
}
