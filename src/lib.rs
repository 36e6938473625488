//! Generic TCP connection engine.
//!
//! A socket factory with configurable options, a server accept loop that
//! spawns one session per connection, and a client that drives a single
//! session. Payload interpretation is delegated to a [`Processor`].

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod session;

pub use config::EngineConfig;
pub use engine::{ClientEngine, ServeSummary, ServerEngine};
pub use error::EngineError;
pub use lifecycle::{Shutdown, ShutdownToken};
pub use net::Endpoint;
pub use session::{Processor, ProcessorError, SessionEnd};
