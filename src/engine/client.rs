//! Outbound connection engine.
//!
//! Resolves the endpoint, makes a single connect attempt, then drives one
//! [`ConnectionSession`] over the new connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{Instrument, Span};

use crate::config::{EngineConfig, SessionConfig, SocketConfig};
use crate::error::EngineError;
use crate::lifecycle::ShutdownToken;
use crate::net::connection::ConnectionId;
use crate::net::endpoint::Endpoint;
use crate::net::socket::{ReadPolicy, SocketFactory};
use crate::session::{ConnectionSession, Processor, SessionEnd, SessionSettings};

/// Connects to one remote endpoint and runs a session against it.
pub struct ClientEngine {
    factory: SocketFactory,
    session: SessionConfig,
    greeting: Option<Vec<u8>>,
    span: Span,
}

impl ClientEngine {
    pub fn new(socket: SocketConfig, session: SessionConfig) -> Self {
        Self {
            factory: SocketFactory::new(socket),
            session,
            greeting: None,
            span: tracing::info_span!("client"),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.socket.clone(), config.session.clone())
    }

    /// Emit this engine's events inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Bytes to send right after connecting, before the first read.
    pub fn with_greeting(mut self, greeting: impl Into<Vec<u8>>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    /// Connect to `endpoint` and run the session loop until it ends.
    ///
    /// Connect failures are returned as [`EngineError::Connect`] and never
    /// retried. Otherwise the session's own result is returned.
    pub async fn connect(
        &self,
        endpoint: &Endpoint,
        processor: Arc<dyn Processor>,
        shutdown: ShutdownToken,
    ) -> Result<SessionEnd, EngineError> {
        let span = self.span.clone();
        async move {
            let result = self.connect_and_run(endpoint, processor, shutdown).await;
            if let Err(e) = &result {
                if e.is_fatal() {
                    tracing::error!(endpoint = %endpoint, error = %e, "Client failed to start");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn connect_and_run(
        &self,
        endpoint: &Endpoint,
        processor: Arc<dyn Processor>,
        shutdown: ShutdownToken,
    ) -> Result<SessionEnd, EngineError> {
        let connect_error = |source| EngineError::Connect {
            endpoint: endpoint.clone(),
            source,
        };

        if endpoint.port() == 0 {
            return Err(connect_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "port 0 is not connectable",
            )));
        }

        tracing::debug!(endpoint = %endpoint, "Connecting to tcp://{}", endpoint);
        let addrs = endpoint.resolve().await.map_err(connect_error)?;

        let (stream, addr, read_policy) = tokio::select! {
            result = self.connect_first(&addrs) => result?.map_err(connect_error)?,
            _ = shutdown.cancelled() => return Ok(SessionEnd::Cancelled),
        };

        tracing::info!(
            endpoint = %endpoint,
            remote_addr = %addr,
            local_addr = ?stream.local_addr().ok(),
            "Connected"
        );

        let settings = SessionSettings::new(&self.session, read_policy);
        let mut session = ConnectionSession::new(
            ConnectionId::new(),
            endpoint.to_string(),
            stream,
            settings,
            processor,
            shutdown,
        )
        .with_greeting(self.greeting.clone());

        session.run().await
    }

    /// Try each resolved address in order and keep the first connection.
    ///
    /// The outer error is a socket that could not be created at all, the
    /// inner one is the last connect failure.
    async fn connect_first(
        &self,
        addrs: &[SocketAddr],
    ) -> Result<io::Result<(TcpStream, SocketAddr, ReadPolicy)>, EngineError> {
        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses to connect to");

        for &addr in addrs {
            let socket = self.factory.create(&addr)?;
            let read_policy = socket.read_policy();
            match socket.connect(addr).await {
                Ok(stream) => return Ok(Ok((stream, addr, read_policy))),
                Err(e) => {
                    tracing::debug!(remote_addr = %addr, error = %e, "Connect attempt failed");
                    last_error = e;
                }
            }
        }
        Ok(Err(last_error))
    }
}
