//! Mirror Configuration Settings
//!
//! Configuration types for the mirror, loaded from environment variables
//! with typed defaults. The default endpoint table and stream channels
//! reproduce the upstream surface the mirror was built for.

use std::collections::HashSet;
use std::time::Duration;

use crate::domain::endpoint::EndpointSpec;

/// Default REST endpoints to mirror: (cache key, upstream URL).
const DEFAULT_ENDPOINTS: [(&str, &str); 10] = [
    ("usTicker", "https://api.binance.us/api/v3/ticker/24hr"),
    ("usExchangeInfo", "https://api.binance.us/api/v3/exchangeInfo"),
    ("usPing", "https://api.binance.us/api/v3/ping"),
    ("usDepthBtcUsdt", "https://api.binance.us/api/v3/depth?symbol=BTCUSDT"),
    ("usTime", "https://api.binance.us/api/v3/time"),
    ("comTicker", "https://api.binance.com/api/v3/ticker/24hr"),
    ("comExchangeInfo", "https://api.binance.com/api/v3/exchangeInfo"),
    ("comPing", "https://api.binance.com/api/v3/ping"),
    ("comDepthBtcUsdt", "https://api.binance.com/api/v3/depth?symbol=BTCUSDT"),
    ("comTime", "https://api.binance.com/api/v3/time"),
];

/// Default upstream stream endpoint.
const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";

/// Default channels subscribed at connect time.
const DEFAULT_SUBSCRIPTIONS: [&str; 2] = ["btcusdt@trade", "btcusdt@depth@100ms"];

// =============================================================================
// Settings Sections
// =============================================================================

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Public mirror + relay port.
    pub mirror_port: u16,
    /// Ops (health + metrics) port.
    pub ops_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            mirror_port: 8080,
            ops_port: 8082,
        }
    }
}

/// REST polling settings.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Endpoints to mirror.
    pub endpoints: Vec<EndpointSpec>,
    /// Fixed polling period.
    pub interval: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            interval: Duration::from_secs(7),
        }
    }
}

impl PollerSettings {
    /// The set of cache keys the mirror surface serves.
    #[must_use]
    pub fn mirror_keys(&self) -> HashSet<String> {
        self.endpoints
            .iter()
            .map(|endpoint| endpoint.key.clone())
            .collect()
    }
}

/// Upstream stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Upstream WebSocket URL.
    pub url: String,
    /// Channels subscribed at connect time.
    pub subscriptions: Vec<String>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            subscriptions: DEFAULT_SUBSCRIPTIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

/// Complete mirror configuration.
#[derive(Debug, Clone, Default)]
pub struct MirrorConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// REST polling settings.
    pub poller: PollerSettings,
    /// Upstream stream settings.
    pub stream: StreamSettings,
}

impl MirrorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `MIRROR_ENDPOINTS` or
    /// `MIRROR_STREAM_SUBSCRIPTIONS` is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoints = match std::env::var("MIRROR_ENDPOINTS") {
            Ok(raw) => parse_endpoint_list(&raw)?,
            Err(_) => default_endpoints(),
        };

        let subscriptions = match std::env::var("MIRROR_STREAM_SUBSCRIPTIONS") {
            Ok(raw) => parse_subscription_list(&raw)?,
            Err(_) => DEFAULT_SUBSCRIPTIONS.iter().map(ToString::to_string).collect(),
        };

        let server = ServerSettings {
            mirror_port: parse_env_u16("MIRROR_SERVER_PORT", ServerSettings::default().mirror_port),
            ops_port: parse_env_u16("MIRROR_OPS_PORT", ServerSettings::default().ops_port),
        };

        let poller = PollerSettings {
            endpoints,
            interval: parse_env_duration_secs(
                "MIRROR_POLL_INTERVAL_SECS",
                PollerSettings::default().interval,
            ),
        };

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            url: std::env::var("MIRROR_STREAM_URL").unwrap_or(stream_defaults.url),
            subscriptions,
            reconnect_delay_initial: parse_env_duration_millis(
                "MIRROR_RECONNECT_DELAY_INITIAL_MS",
                stream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "MIRROR_RECONNECT_DELAY_MAX_SECS",
                stream_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "MIRROR_RECONNECT_DELAY_MULTIPLIER",
                stream_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "MIRROR_MAX_RECONNECT_ATTEMPTS",
                stream_defaults.max_reconnect_attempts,
            ),
        };

        Ok(Self {
            server,
            poller,
            stream,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An endpoint entry was not of the form `key=url`.
    #[error("invalid endpoint entry (expected key=url): {0:?}")]
    InvalidEndpoint(String),

    /// A subscription entry was empty.
    #[error("empty stream subscription entry")]
    EmptySubscription,
}

// =============================================================================
// Parsing Helpers
// =============================================================================

fn default_endpoints() -> Vec<EndpointSpec> {
    DEFAULT_ENDPOINTS
        .iter()
        .map(|(key, url)| EndpointSpec::new(*key, *url))
        .collect()
}

/// Parse a `key=url,key=url` list into endpoint specs.
fn parse_endpoint_list(raw: &str) -> Result<Vec<EndpointSpec>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (key, url) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidEndpoint(entry.to_string()))?;
            if key.trim().is_empty() || url.trim().is_empty() {
                return Err(ConfigError::InvalidEndpoint(entry.to_string()));
            }
            Ok(EndpointSpec::new(key.trim(), url.trim()))
        })
        .collect()
}

/// Parse a comma-separated channel list.
fn parse_subscription_list(raw: &str) -> Result<Vec<String>, ConfigError> {
    let channels: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ToString::to_string)
        .collect();

    if channels.is_empty() {
        return Err(ConfigError::EmptySubscription);
    }
    Ok(channels)
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

// =============================================================================
// Tests
// =============================================================================
