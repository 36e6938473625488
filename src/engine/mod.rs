//! Client and server engines.
//!
//! # Data Flow
//! ```text
//! ServerEngine: bind → accept loop → spawn session per connection
//!               → shutdown → close listener → drain sessions
//! ClientEngine: resolve → single connect → run one session
//! ```

pub mod client;
pub mod server;

pub use client::ClientEngine;
pub use server::{serve, ServeSummary, ServerEngine};
