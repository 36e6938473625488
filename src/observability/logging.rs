//! Structured logging.
//!
//! Installs the process-wide `tracing` subscriber. Components never reach
//! for a global logger: engines receive a span at construction and emit
//! events inside it.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Filter directive for the given verbosity.
///
/// `debug` raises this crate to `debug`; otherwise the configured level
/// applies to everything.
pub fn default_directive(config: &ObservabilityConfig, debug: bool) -> String {
    if debug {
        format!("{}=debug,warn", env!("CARGO_CRATE_NAME"))
    } else {
        config.log_level.to_ascii_lowercase()
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the defaults.
pub fn init_logging(
    config: &ObservabilityConfig,
    debug: bool,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive(config, debug).into());

    let format = config.log_format;
    tracing_subscriber::registry()
        .with(filter)
        .with((format == LogFormat::Pretty).then(|| tracing_subscriber::fmt::layer()))
        .with((format == LogFormat::Compact).then(|| tracing_subscriber::fmt::layer().compact()))
        .with((format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json()))
        .try_init()
}
