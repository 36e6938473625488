//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tcp_engine_connections_accepted_total` (counter)
//! - `tcp_engine_accept_errors_total` (counter): by `kind` (transient, fatal)
//! - `tcp_engine_active_sessions` (gauge)
//! - `tcp_engine_bytes_total` (counter): by `direction` (in, out)
//! - `tcp_engine_sessions_closed_total` (counter): by `reason`
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_accepted() {
    metrics::counter!("tcp_engine_connections_accepted_total").increment(1);
}

pub fn record_accept_error(transient: bool) {
    let kind = if transient { "transient" } else { "fatal" };
    metrics::counter!("tcp_engine_accept_errors_total", "kind" => kind).increment(1);
}

pub fn set_active_sessions(count: usize) {
    metrics::gauge!("tcp_engine_active_sessions").set(count as f64);
}

pub fn record_bytes_in(count: usize) {
    metrics::counter!("tcp_engine_bytes_total", "direction" => "in").increment(count as u64);
}

pub fn record_bytes_out(count: usize) {
    metrics::counter!("tcp_engine_bytes_total", "direction" => "out").increment(count as u64);
}

pub fn record_session_closed(reason: &'static str) {
    metrics::counter!("tcp_engine_sessions_closed_total", "reason" => reason).increment(1);
}
