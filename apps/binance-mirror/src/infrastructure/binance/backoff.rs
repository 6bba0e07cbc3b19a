//! Reconnect Backoff
//!
//! Exponential backoff with jitter for upstream stream reconnection.
//! The delay grows per attempt up to a cap; a successful connection
//! resets the sequence.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnect backoff behavior.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10% randomization).
    pub jitter: f64,
    /// Maximum number of attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            max_attempts: 0,
        }
    }
}

impl BackoffConfig {
    /// Build a config from the stream settings' reconnect knobs.
    #[must_use]
    pub const fn from_stream_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter: 0.1,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Per-connection backoff state.
///
/// # Example
///
/// ```rust
/// use binance_mirror::infrastructure::binance::backoff::{BackoffConfig, BackoffPolicy};
///
/// let mut policy = BackoffPolicy::new(BackoffConfig::default());
/// assert!(policy.next_delay().is_some());
/// policy.reset();
/// assert_eq!(policy.attempt(), 0);
/// ```
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffPolicy {
    /// Create a fresh policy.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay to wait before the next attempt, or `None` when the attempt
    /// budget is exhausted.
    ///
    /// The delay is `initial_delay * multiplier^n` for the n-th attempt,
    /// capped at `max_delay`, with jitter applied last.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt >= self.config.max_attempts {
            return None;
        }

        // Clamp the exponent so the growth term cannot overflow to inf
        // before the cap is applied.
        let exponent = self.attempt.min(64) as i32;
        self.attempt += 1;

        let base = self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(exponent);
        let capped = if base.is_finite() {
            base.min(self.config.max_delay.as_millis() as f64)
        } else {
            self.config.max_delay.as_millis() as f64
        };

        Some(self.jittered(capped))
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt < self.config.max_attempts
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn jittered(&self, millis: f64) -> Duration {
        if self.config.jitter <= 0.0 {
            return Duration::from_millis(millis as u64);
        }

        let spread = millis * self.config.jitter;
        let mut rng = rand::rng();
        let adjusted = (millis + rng.random_range(-spread..=spread)).max(1.0);
        Duration::from_millis(adjusted as u64)
    }
}
