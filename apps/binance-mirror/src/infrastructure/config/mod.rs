//! Configuration Module
//!
//! Environment-driven configuration for the mirror service.

mod settings;

pub use settings::{ConfigError, MirrorConfig, PollerSettings, ServerSettings, StreamSettings};
