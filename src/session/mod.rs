//! Connection session subsystem.
//!
//! # Data Flow
//! ```text
//! connection handle (owned)
//!     → session.rs   read up to buffer_size bytes
//!     → processor.rs bytes → optional reply
//!     → session.rs   write full reply, throttle, check shutdown
//!     → repeat until EOF, error or shutdown
//!     → close handle exactly once
//! ```
//!
//! State transitions are described in state.rs.

pub mod processor;
#[allow(clippy::module_inception)]
pub mod session;
pub mod state;

pub use processor::{Discard, Echo, FixedReply, Processor, ProcessorError, ProcessorResult};
pub use session::{ConnectionSession, SessionEnd, SessionSettings, SessionStats};
pub use state::SessionState;
