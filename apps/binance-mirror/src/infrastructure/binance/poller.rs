//! REST Mirror Poller
//!
//! Keeps every configured endpoint's cache entry as fresh as the polling
//! interval allows. Each tick issues one GET per [`EndpointSpec`]; the
//! fetches run concurrently and are fully independent: a failure on one
//! endpoint never affects another, and never stops future ticks. Failed
//! fetches keep the previously cached value (stale data beats no data).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::cache::SharedMarketCache;
use crate::domain::endpoint::EndpointSpec;
use crate::infrastructure::metrics::{self, FetchOutcome};

/// Fallback content type when the upstream response does not carry one.
/// The mirrored Binance endpoints all serve JSON.
const DEFAULT_CONTENT_TYPE: &str = "application/json";

// =============================================================================
// Errors
// =============================================================================

/// Why a single fetch did not produce a cache write.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request failed at the transport level.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The upstream answered with a non-success status.
    #[error("upstream returned status {0}")]
    Status(reqwest::StatusCode),
}

// =============================================================================
// Poller State
// =============================================================================

/// Process-lifetime fetch counters, read by the ops surface.
#[derive(Debug, Default)]
pub struct PollerState {
    fetches_ok: AtomicU64,
    fetches_failed: AtomicU64,
    last_success_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
}

impl PollerState {
    /// Create zeroed state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful fetch.
    pub fn record_success(&self) {
        self.fetches_ok.fetch_add(1, Ordering::Relaxed);
        *self.last_success_at.write() = Some(Utc::now());
    }

    /// Record one failed fetch.
    pub fn record_failure(&self) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Total successful fetches.
    #[must_use]
    pub fn fetches_ok(&self) -> u64 {
        self.fetches_ok.load(Ordering::Relaxed)
    }

    /// Total failed fetches.
    #[must_use]
    pub fn fetches_failed(&self) -> u64 {
        self.fetches_failed.load(Ordering::Relaxed)
    }

    /// When the most recent successful fetch completed.
    #[must_use]
    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        *self.last_success_at.read()
    }

    /// Whether any fetch has ever succeeded.
    #[must_use]
    pub fn has_succeeded(&self) -> bool {
        self.last_success_at.read().is_some()
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Polls the configured REST endpoints into the shared cache.
pub struct RestPoller {
    endpoints: Vec<EndpointSpec>,
    interval: Duration,
    client: reqwest::Client,
    cache: SharedMarketCache,
    state: Arc<PollerState>,
    cancel: CancellationToken,
}

impl RestPoller {
    /// Create a poller over the given endpoint set.
    #[must_use]
    pub fn new(
        endpoints: Vec<EndpointSpec>,
        interval: Duration,
        cache: SharedMarketCache,
        state: Arc<PollerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            endpoints,
            interval,
            client: reqwest::Client::new(),
            cache,
            state,
            cancel,
        }
    }

    /// Run the polling loop until cancelled.
    ///
    /// Ticks are evenly spaced; a missed tick is skipped rather than
    /// replayed, so a slow round never causes a catch-up burst.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("REST poller stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            self.poll_once().await;
        }
    }

    /// Fetch every endpoint once, concurrently.
    async fn poll_once(&self) {
        tracing::debug!(endpoints = self.endpoints.len(), "Refreshing mirrored endpoints");
        join_all(
            self.endpoints
                .iter()
                .map(|endpoint| self.refresh_endpoint(endpoint)),
        )
        .await;
    }

    async fn refresh_endpoint(&self, endpoint: &EndpointSpec) {
        match self.fetch(endpoint).await {
            Ok((body, content_type)) => {
                self.cache.put(&endpoint.key, body, content_type);
                self.state.record_success();
                metrics::record_fetch(&endpoint.key, FetchOutcome::Success);
            }
            Err(error) => {
                self.state.record_failure();
                metrics::record_fetch(&endpoint.key, FetchOutcome::Failure);
                tracing::warn!(
                    key = %endpoint.key,
                    url = %endpoint.url,
                    error = %error,
                    "Endpoint fetch failed, keeping cached value"
                );
            }
        }
    }

    async fn fetch(&self, endpoint: &EndpointSpec) -> Result<(Vec<u8>, String), FetchError> {
        let response = self.client.get(&endpoint.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let body = response.bytes().await?.to_vec();

        Ok((body, content_type))
    }
}

// =============================================================================
// Tests
// =============================================================================
