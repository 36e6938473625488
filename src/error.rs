//! Error taxonomy for the connection engine.
//!
//! Socket creation, bind and connect failures are fatal to whoever
//! attempted them. Communication and processor failures only end the
//! session they happened in.

use std::io;

use thiserror::Error;

use crate::net::endpoint::Endpoint;
use crate::session::processor::ProcessorError;

/// Errors surfaced by the engines and sessions.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The platform refused to create or configure a socket.
    #[error("failed to create socket: {0}")]
    SocketCreation(#[source] io::Error),

    /// Binding or listening on the local endpoint failed.
    #[error("failed to bind on tcp://{endpoint}: {source}")]
    Bind {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    /// Resolving or connecting to the remote endpoint failed.
    #[error("failed to connect to tcp://{endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    /// A read or write on an established connection failed.
    #[error("communication error with tcp://{peer}: {source}")]
    Communication {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// The injected processor failed while handling a payload.
    #[error("processor failed for tcp://{peer}: {source}")]
    Processor {
        peer: String,
        #[source]
        source: ProcessorError,
    },

    /// The listening socket is no longer usable.
    #[error("accept failed on tcp://{endpoint}: {source}")]
    Accept {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    /// Host/port pair could not be turned into an endpoint.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl EngineError {
    /// Whether this error should abort process startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::SocketCreation(_)
                | EngineError::Bind { .. }
                | EngineError::Connect { .. }
                | EngineError::Accept { .. }
                | EngineError::InvalidEndpoint(_)
        )
    }
}
