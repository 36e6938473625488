//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and returns every
//! problem found, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::EngineConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in an [`EngineConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("session.buffer_size must be greater than 0")]
    ZeroBufferSize,

    #[error("socket.backlog {0} exceeds 65535")]
    BacklogTooLarge(u32),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("observability.log_level {0:?} is not one of trace, debug, info, warn, error")]
    UnknownLogLevel(String),

    #[error("server.accept_backoff_base_ms ({base}) exceeds accept_backoff_max_ms ({max})")]
    BackoffRange { base: u64, max: u64 },
}

/// Check an [`EngineConfig`] for semantic errors.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.session.buffer_size == 0 {
        errors.push(ValidationError::ZeroBufferSize);
    }

    if config.socket.backlog > u32::from(u16::MAX) {
        errors.push(ValidationError::BacklogTooLarge(config.socket.backlog));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel(observability.log_level.clone()));
    }

    let server = &config.server;
    if server.accept_backoff_base_ms > server.accept_backoff_max_ms {
        errors.push(ValidationError::BackoffRange {
            base: server.accept_backoff_base_ms,
            max: server.accept_backoff_max_ms,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
