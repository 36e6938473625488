//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the connection engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Options applied to every socket the engine creates.
    pub socket: SocketConfig,

    /// Per-connection session settings.
    pub session: SessionConfig,

    /// Server-only settings (drain, daemon, accept backoff).
    pub server: ServerConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Socket options. Never mutated once a socket has been created from it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Set SO_REUSEADDR before binding so TIME_WAIT does not block restarts.
    pub reuse_address: bool,

    /// Reads return immediately when no data is pending.
    /// Ignored when `read_timeout_ms` is non-zero.
    pub non_blocking: bool,

    /// Read (and accept) timeout in milliseconds. 0 disables it.
    pub read_timeout_ms: u64,

    /// Listen backlog. 0 selects the platform default.
    pub backlog: u32,

    /// Outbound connect timeout in milliseconds. 0 waits indefinitely.
    pub connect_timeout_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reuse_address: true,
            non_blocking: false,
            read_timeout_ms: 10,
            backlog: 5,
            connect_timeout_ms: 5_000,
        }
    }
}

impl SocketConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }
}

/// Settings for one read→process→write loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum bytes read per iteration.
    pub buffer_size: usize,

    /// Pause after each iteration, in milliseconds.
    pub throttle_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            throttle_ms: 0,
        }
    }
}

impl SessionConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

/// Server lifecycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How long shutdown waits for in-flight sessions before aborting them.
    pub drain_timeout_secs: u64,

    /// Detach sessions on shutdown instead of draining them.
    pub daemon: bool,

    /// Maximum concurrent sessions (backpressure on accept). 0 = unlimited.
    pub max_sessions: usize,

    /// Base delay after a transient accept failure, in milliseconds.
    pub accept_backoff_base_ms: u64,

    /// Upper bound for the accept backoff, in milliseconds.
    pub accept_backoff_max_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 5,
            daemon: false,
            max_sessions: 0,
            accept_backoff_base_ms: 10,
            accept_backoff_max_ms: 1_000,
        }
    }
}

impl ServerConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "error".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9100".to_string(),
        }
    }
}
