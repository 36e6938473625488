//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → accept loop stops → listener closed
//!               → sessions observe token at read/write boundaries
//!               → server drains (bounded) → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     second signal  → forced exit
//! ```
//!
//! # Design Decisions
//! - Cancellation is cooperative, never preempting in-flight writes
//! - The signal is monotonic: once set it stays set

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownToken};
