//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Engines and sessions produce:
//!     → logging.rs (structured events inside per-engine/per-session spans)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stderr (pretty, compact or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```

pub mod logging;
pub mod metrics;
