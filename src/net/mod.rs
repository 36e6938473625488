//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoint (endpoint.rs)
//!     → socket.rs (create socket, apply reuse/read policy)
//!     → listener.rs (bind, listen, accept loop primitives)
//!     → connection.rs (session IDs, registry for drain)
//!     → Hand off to session layer
//! ```
//!
//! # Design Decisions
//! - Options are applied before any bind or read
//! - Each session tracked for graceful shutdown
//! - Accept errors are classified, transient ones never stop the server

pub mod connection;
pub mod endpoint;
pub mod listener;
pub mod socket;

pub use endpoint::Endpoint;
pub use socket::{ReadPolicy, SocketFactory};
