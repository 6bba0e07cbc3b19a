//! Tracing Initialization
//!
//! Configures the tracing subscriber with an environment-driven filter
//! and a compact fmt layer.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Log level directives (default: `binance_mirror=info`)
//!
//! # Usage
//!
//! ```ignore
//! binance_mirror::infrastructure::telemetry::init();
//! tracing::info!("ready");
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG`; the defaults keep this crate at `info` and quiet
/// the HTTP internals.
#[allow(clippy::expect_used)]
pub fn init() {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(
            "binance_mirror=info"
                .parse()
                .expect("static directive 'binance_mirror=info' is valid"),
        )
        .add_directive(
            "h2=warn"
                .parse()
                .expect("static directive 'h2=warn' is valid"),
        )
        .add_directive(
            "hyper=warn"
                .parse()
                .expect("static directive 'hyper=warn' is valid"),
        );

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
