//! Inbound connection engine.
//!
//! # Responsibilities
//! - Bind and listen through the socket factory
//! - Accept until shutdown, one independent session task per connection
//! - Survive transient accept failures, stop on fatal ones
//! - On exit: close the listener, then drain (or detach) sessions

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{Instrument, Span};

use crate::config::{EngineConfig, ServerConfig};
use crate::error::EngineError;
use crate::lifecycle::ShutdownToken;
use crate::net::connection::SessionRegistry;
use crate::net::endpoint::Endpoint;
use crate::net::listener::{AcceptSource, Accepted, Listener};
use crate::net::socket::SocketFactory;
use crate::observability::metrics;
use crate::resilience::backoff::AcceptBackoff;
use crate::session::{ConnectionSession, Processor, SessionSettings};

/// What happened during one `serve` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeSummary {
    /// Connections accepted.
    pub accepted: u64,
    /// Every session had exited when `serve` returned.
    pub drained: bool,
    /// Sessions aborted after the drain deadline.
    pub aborted: usize,
}

/// A bound server, ready to accept.
pub struct ServerEngine {
    listener: Listener,
    settings: SessionSettings,
    server: ServerConfig,
    processor: Arc<dyn Processor>,
    registry: SessionRegistry,
    span: Span,
}

impl ServerEngine {
    /// Bind `endpoint` and prepare to serve. Bind failures are fatal.
    pub async fn bind(
        endpoint: &Endpoint,
        config: &EngineConfig,
        processor: Arc<dyn Processor>,
    ) -> Result<Self, EngineError> {
        tracing::debug!(endpoint = %endpoint, "Binding on tcp://{}", endpoint);

        let factory = SocketFactory::new(config.socket.clone());
        let listener = match Listener::bind(&factory, endpoint).await {
            Ok(listener) => listener.with_connection_limit(config.server.max_sessions),
            Err(e) => {
                tracing::error!(endpoint = %endpoint, error = %e, "Server failed to start");
                return Err(e);
            }
        };

        let settings = SessionSettings::new(&config.session, listener.read_policy());
        let span = tracing::info_span!("server", address = %listener.local_addr());

        Ok(Self {
            listener,
            settings,
            server: config.server.clone(),
            processor,
            registry: SessionRegistry::new(),
            span,
        })
    }

    /// Emit this engine's events inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires or the listener fails.
    pub async fn serve(self, shutdown: ShutdownToken) -> Result<ServeSummary, EngineError> {
        let span = self.span.clone();
        AcceptLoop::from(self).run(shutdown).instrument(span).await
    }
}

/// The accept loop and everything it hands to new sessions.
struct AcceptLoop<A> {
    listener: A,
    settings: SessionSettings,
    server: ServerConfig,
    processor: Arc<dyn Processor>,
    registry: SessionRegistry,
}

impl From<ServerEngine> for AcceptLoop<Listener> {
    fn from(engine: ServerEngine) -> Self {
        Self {
            listener: engine.listener,
            settings: engine.settings,
            server: engine.server,
            processor: engine.processor,
            registry: engine.registry,
        }
    }
}

impl<A: AcceptSource> AcceptLoop<A> {
    async fn run(self, shutdown: ShutdownToken) -> Result<ServeSummary, EngineError> {
        let AcceptLoop {
            listener,
            settings,
            server,
            processor,
            registry,
        } = self;

        tracing::info!(address = %listener.local_addr(), "Accepting connections");

        let mut backoff = AcceptBackoff::new(server.accept_backoff_base_ms, server.accept_backoff_max_ms);
        let mut accepted = 0u64;
        let mut fatal = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = listener.accept() => next,
            };

            match next {
                Ok(Some(connection)) => {
                    backoff.reset();
                    accepted += 1;
                    metrics::record_connection_accepted();
                    spawn_session(&registry, connection, &settings, &processor, &shutdown);
                }
                // Accept timeout expired; loop to re-check shutdown.
                Ok(None) => continue,
                Err(e) if e.is_transient() => {
                    metrics::record_accept_error(true);
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        consecutive_failures = backoff.failures(),
                        retry_in = ?delay,
                        "Transient accept failure"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
                Err(e) => {
                    metrics::record_accept_error(false);
                    let err = EngineError::Accept {
                        endpoint: listener.endpoint().clone(),
                        source: e.into_source(),
                    };
                    tracing::error!(error = %err, "Listener unusable, stopping");
                    fatal = Some(err);
                    break;
                }
            }
        }

        let address = listener.local_addr();
        drop(listener);
        tracing::info!(
            address = %address,
            accepted,
            active_sessions = registry.active_count(),
            "Listener closed"
        );

        let (drained, aborted) = if server.daemon {
            tracing::info!(
                active_sessions = registry.active_count(),
                "Daemon mode, leaving sessions to finish on their own"
            );
            (registry.active_count() == 0, 0)
        } else if registry.wait_for_drain(server.drain_timeout()).await {
            (true, 0)
        } else {
            let stragglers = registry.peers();
            let aborted = registry.abort_all();
            tracing::warn!(
                aborted,
                peers = ?stragglers,
                drain_timeout_secs = server.drain_timeout_secs,
                "Sessions still running after drain timeout, aborted"
            );
            (false, aborted)
        };

        match fatal {
            Some(err) => Err(err),
            None => Ok(ServeSummary {
                accepted,
                drained,
                aborted,
            }),
        }
    }
}

/// Bind `endpoint` and serve until `shutdown` fires.
pub async fn serve(
    endpoint: &Endpoint,
    config: &EngineConfig,
    processor: Arc<dyn Processor>,
    shutdown: ShutdownToken,
) -> Result<ServeSummary, EngineError> {
    ServerEngine::bind(endpoint, config, processor)
        .await?
        .serve(shutdown)
        .await
}

fn spawn_session(
    registry: &SessionRegistry,
    connection: Accepted,
    settings: &SessionSettings,
    processor: &Arc<dyn Processor>,
    shutdown: &ShutdownToken,
) {
    let Accepted {
        stream,
        peer,
        permit,
    } = connection;

    let guard = registry.register(peer);
    let id = guard.id();
    let mut session = ConnectionSession::new(
        id,
        peer.to_string(),
        stream,
        settings.clone(),
        Arc::clone(processor),
        shutdown.clone(),
    );

    let span = tracing::info_span!("session", connection_id = %id, peer = %peer);
    let task = tokio::spawn(
        async move {
            let _guard = guard;
            let _permit = permit;
            // The session logs its own outcome.
            let _ = session.run().await;
        }
        .instrument(span),
    );
    registry.attach(id, task.abort_handle());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::net::listener::AcceptError;
    use crate::session::Echo;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// Real listener whose next accepts fail with queued errors.
    struct FaultyListener {
        inner: Listener,
        faults: Mutex<VecDeque<io::Error>>,
    }

    impl AcceptSource for FaultyListener {
        async fn accept(&self) -> Result<Option<Accepted>, AcceptError> {
            let fault = self.faults.lock().unwrap().pop_front();
            match fault {
                Some(e) => Err(e.into()),
                None => self.inner.accept().await,
            }
        }

        fn endpoint(&self) -> &Endpoint {
            self.inner.endpoint()
        }

        fn local_addr(&self) -> SocketAddr {
            self.inner.local_addr()
        }
    }

    async fn faulty_loop(config: EngineConfig, faults: Vec<io::Error>) -> AcceptLoop<FaultyListener> {
        let engine = ServerEngine::bind(&Endpoint::any_port("127.0.0.1"), &config, Arc::new(Echo))
            .await
            .unwrap();
        let AcceptLoop {
            listener,
            settings,
            server,
            processor,
            registry,
        } = AcceptLoop::from(engine);

        AcceptLoop {
            listener: FaultyListener {
                inner: listener,
                faults: Mutex::new(faults.into()),
            },
            settings,
            server,
            processor,
            registry,
        }
    }

    #[tokio::test]
    async fn fatal_accept_error_stops_serving() {
        let faults = vec![io::Error::from(io::ErrorKind::InvalidInput)];
        let accept_loop = faulty_loop(EngineConfig::default(), faults).await;
        let addr = accept_loop.listener.local_addr();

        let result = tokio::time::timeout(Duration::from_secs(2), accept_loop.run(ShutdownToken::never()))
            .await
            .expect("accept loop kept running after a fatal error");

        match result {
            Err(EngineError::Accept { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidInput)
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(TcpStream::connect(addr).await.is_err(), "listener still open");
    }

    #[tokio::test]
    async fn transient_accept_errors_back_off_then_resume() {
        let mut config = EngineConfig::default();
        config.server.accept_backoff_base_ms = 1;
        config.server.accept_backoff_max_ms = 5;
        let faults = vec![
            io::Error::from(io::ErrorKind::ConnectionAborted),
            io::Error::from(io::ErrorKind::ConnectionReset),
        ];
        let accept_loop = faulty_loop(config, faults).await;
        let addr = accept_loop.listener.local_addr();

        let shutdown = Shutdown::new();
        let task = tokio::spawn(accept_loop.run(shutdown.token()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"resumed").await.unwrap();
        let mut reply = [0u8; 7];
        tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut reply))
            .await
            .expect("no reply after transient failures")
            .unwrap();
        assert_eq!(&reply, b"resumed");

        drop(stream);
        shutdown.trigger();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.accepted, 1);
        assert!(summary.drained);
    }
}
