//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Accept failure:
//!     → listener.rs classifies it (transient / fatal)
//!     → transient: backoff.rs computes a pause, accept loop resumes
//!     → fatal: server stops
//! ```
//!
//! Connect attempts are never retried.

pub mod backoff;
