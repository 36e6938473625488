//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured endpoint through the socket factory
//! - Accept incoming TCP connections, bounded by the accept timeout
//! - Enforce the optional session limit via semaphore
//! - Classify accept errors as transient or fatal

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::EngineError;
use crate::net::endpoint::Endpoint;
use crate::net::socket::{ReadPolicy, SocketFactory};

/// A failed accept call.
#[derive(Debug)]
pub struct AcceptError {
    source: io::Error,
}

impl AcceptError {
    /// Transient errors leave the listening socket usable.
    pub fn is_transient(&self) -> bool {
        use io::ErrorKind::*;

        matches!(
            self.source.kind(),
            ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock
                | TimedOut | OutOfMemory
        ) || is_resource_exhaustion(&self.source)
    }

    pub fn into_source(self) -> io::Error {
        self.source
    }
}

impl std::fmt::Display for AcceptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to accept: {}", self.source)
    }
}

impl std::error::Error for AcceptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<io::Error> for AcceptError {
    fn from(source: io::Error) -> Self {
        Self { source }
    }
}

#[cfg(unix)]
fn is_resource_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_err: &io::Error) -> bool {
    false
}

/// A connection handed out by [`Listener::accept`].
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub permit: Option<ConnectionPermit>,
}

/// A bound listening socket. Owned solely by the server engine.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Endpoint actually bound (OS-assigned port filled in).
    endpoint: Endpoint,
    local_addr: SocketAddr,
    read_policy: ReadPolicy,
    /// Semaphore to limit concurrent sessions, if configured.
    connection_limit: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Resolve `endpoint`, create a socket through `factory`, bind and listen.
    pub async fn bind(factory: &SocketFactory, endpoint: &Endpoint) -> Result<Self, EngineError> {
        let bind_error = |source| EngineError::Bind {
            endpoint: endpoint.clone(),
            source,
        };

        let addrs = endpoint.resolve().await.map_err(bind_error)?;

        // First resolved address that binds wins.
        let mut bound = None;
        let mut last_error = None;
        for &addr in &addrs {
            let socket = factory.create(&addr)?;
            let read_policy = socket.read_policy();
            match socket.listen(addr) {
                Ok(inner) => {
                    bound = Some((inner, read_policy));
                    break;
                }
                Err(e) => {
                    tracing::debug!(address = %addr, error = %e, "Bind attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let (inner, read_policy) = match (bound, last_error) {
            (Some(bound), _) => bound,
            (None, Some(e)) => return Err(bind_error(e)),
            (None, None) => return Err(bind_error(io::ErrorKind::AddrNotAvailable.into())),
        };
        let local_addr = inner.local_addr().map_err(bind_error)?;

        tracing::info!(
            address = %local_addr,
            backlog = factory.config().backlog,
            "Listener bound"
        );

        Ok(Self {
            inner,
            endpoint: Endpoint::from(local_addr),
            local_addr,
            read_policy,
            connection_limit: None,
        })
    }

    /// Cap concurrent sessions at `max`. 0 leaves accepts unbounded.
    pub fn with_connection_limit(mut self, max: usize) -> Self {
        self.connection_limit = (max > 0).then(|| Arc::new(Semaphore::new(max)));
        self
    }

    /// Accept a new connection, respecting the session limit.
    ///
    /// Returns `Ok(None)` when the accept timeout expires without a
    /// connection, so the caller can re-check for shutdown.
    pub async fn accept(&self) -> Result<Option<Accepted>, AcceptError> {
        // Acquire permit first (backpressure)
        let permit = match &self.connection_limit {
            Some(limit) => {
                let permit = limit.clone().acquire_owned().await.map_err(|_| {
                    io::Error::new(io::ErrorKind::Other, "session limit closed")
                })?;
                Some(ConnectionPermit { _permit: permit })
            }
            None => None,
        };

        let accepted = match self.read_policy.accept_wait() {
            Some(limit) => match tokio::time::timeout(limit, self.inner.accept()).await {
                Ok(result) => result?,
                Err(_) => return Ok(None),
            },
            None => self.inner.accept().await?,
        };
        let (stream, peer) = accepted;

        tracing::debug!(
            peer_addr = %peer,
            available_permits = ?self.available_permits(),
            "Connection accepted"
        );

        Ok(Some(Accepted {
            stream,
            peer,
            permit,
        }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Policy applied to every accepted connection.
    pub fn read_policy(&self) -> ReadPolicy {
        self.read_policy
    }

    /// Remaining session slots, `None` when unlimited.
    pub fn available_permits(&self) -> Option<usize> {
        self.connection_limit
            .as_ref()
            .map(|limit| limit.available_permits())
    }
}

/// Anything the server accept loop can pull connections from.
pub(crate) trait AcceptSource {
    async fn accept(&self) -> Result<Option<Accepted>, AcceptError>;

    fn endpoint(&self) -> &Endpoint;

    fn local_addr(&self) -> SocketAddr;
}

impl AcceptSource for Listener {
    async fn accept(&self) -> Result<Option<Accepted>, AcceptError> {
        Listener::accept(self).await
    }

    fn endpoint(&self) -> &Endpoint {
        Listener::endpoint(self)
    }

    fn local_addr(&self) -> SocketAddr {
        Listener::local_addr(self)
    }
}

/// A permit representing a session slot.
///
/// When dropped, the slot is released back to the listener.
/// This holds even if the session task panics or is aborted.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
