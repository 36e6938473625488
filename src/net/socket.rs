//! Socket construction with configurable options.
//!
//! # Responsibilities
//! - Create IPv4/IPv6 stream sockets
//! - Apply SO_REUSEADDR before any bind
//! - Derive the read policy (blocking, non-blocking, timed) from config
//!
//! The read policy travels with the socket it was derived for, so nothing
//! can read from a connection before its policy is known.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::config::SocketConfig;
use crate::error::EngineError;

/// Backlog used when the configured backlog is 0.
pub const DEFAULT_BACKLOG: u32 = 1024;

/// How long a single read may wait for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Wait until data, EOF or an error arrives.
    Blocking,
    /// Readiness-driven: the read parks until the socket is readable and
    /// never reports a timeout. Shutdown still interrupts it.
    NonBlocking,
    /// Wait at most the given duration.
    Timed(Duration),
}

impl ReadPolicy {
    /// A non-zero timeout takes precedence over non-blocking mode.
    pub fn from_config(config: &SocketConfig) -> Self {
        let timeout = config.read_timeout();
        if !timeout.is_zero() {
            ReadPolicy::Timed(timeout)
        } else if config.non_blocking {
            ReadPolicy::NonBlocking
        } else {
            ReadPolicy::Blocking
        }
    }

    /// Upper bound for one read, `None` when unbounded.
    ///
    /// Tokio sockets are always non-blocking underneath, so a non-blocking
    /// read is a wait for readiness, the same as a blocking one.
    pub fn read_wait(&self) -> Option<Duration> {
        match self {
            ReadPolicy::Blocking | ReadPolicy::NonBlocking => None,
            ReadPolicy::Timed(timeout) => Some(*timeout),
        }
    }

    /// Upper bound for one accept. Only a real timeout bounds accepts.
    pub fn accept_wait(&self) -> Option<Duration> {
        match self {
            ReadPolicy::Timed(timeout) => Some(*timeout),
            _ => None,
        }
    }
}

/// Builds sockets from a fixed [`SocketConfig`].
#[derive(Debug, Clone)]
pub struct SocketFactory {
    config: SocketConfig,
}

impl SocketFactory {
    pub fn new(config: SocketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn read_policy(&self) -> ReadPolicy {
        ReadPolicy::from_config(&self.config)
    }

    /// Create a socket whose address family matches `addr`.
    pub fn create(&self, addr: &SocketAddr) -> Result<ConfiguredSocket, EngineError> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(EngineError::SocketCreation)?;

        if self.config.reuse_address {
            socket
                .set_reuseaddr(true)
                .map_err(EngineError::SocketCreation)?;
        }

        tracing::trace!(
            family = if addr.is_ipv4() { "ipv4" } else { "ipv6" },
            reuse_address = self.config.reuse_address,
            read_policy = ?self.read_policy(),
            "Socket created"
        );

        Ok(ConfiguredSocket {
            socket,
            read_policy: self.read_policy(),
            backlog: self.config.backlog,
            connect_timeout: self.config.connect_timeout(),
        })
    }
}

/// A socket with its options applied, not yet bound or connected.
#[derive(Debug)]
pub struct ConfiguredSocket {
    socket: TcpSocket,
    read_policy: ReadPolicy,
    backlog: u32,
    connect_timeout: Option<Duration>,
}

impl ConfiguredSocket {
    pub fn read_policy(&self) -> ReadPolicy {
        self.read_policy
    }

    /// Whether SO_REUSEADDR is set on the underlying socket.
    pub fn reuse_address(&self) -> io::Result<bool> {
        self.socket.reuseaddr()
    }

    /// Bind to `addr` and start listening.
    pub fn listen(self, addr: SocketAddr) -> io::Result<TcpListener> {
        self.socket.bind(addr)?;
        let backlog = if self.backlog == 0 {
            DEFAULT_BACKLOG
        } else {
            self.backlog
        };
        self.socket.listen(backlog)
    }

    /// Connect to `addr` with a single attempt.
    pub async fn connect(self, addr: SocketAddr) -> io::Result<TcpStream> {
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, self.socket.connect(addr))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", limit),
                    )
                })?,
            None => self.socket.connect(addr).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn read_policy_precedence() {
        let mut config = SocketConfig::default();
        assert_eq!(
            ReadPolicy::from_config(&config),
            ReadPolicy::Timed(Duration::from_millis(10))
        );

        config.non_blocking = true;
        assert_eq!(
            ReadPolicy::from_config(&config),
            ReadPolicy::Timed(Duration::from_millis(10))
        );

        config.read_timeout_ms = 0;
        assert_eq!(ReadPolicy::from_config(&config), ReadPolicy::NonBlocking);
        assert_eq!(ReadPolicy::NonBlocking.read_wait(), None);
        assert_eq!(ReadPolicy::NonBlocking.accept_wait(), None);

        config.non_blocking = false;
        assert_eq!(ReadPolicy::from_config(&config), ReadPolicy::Blocking);
        assert_eq!(ReadPolicy::Blocking.read_wait(), None);
    }

    #[tokio::test]
    async fn reuse_address_applied() {
        let factory = SocketFactory::new(SocketConfig::default());
        assert!(factory.create(&loopback()).unwrap().reuse_address().unwrap());

        let factory = SocketFactory::new(SocketConfig {
            reuse_address: false,
            ..SocketConfig::default()
        });
        assert!(!factory.create(&loopback()).unwrap().reuse_address().unwrap());
    }

    #[tokio::test]
    async fn rebind_after_time_wait() {
        let factory = SocketFactory::new(SocketConfig::default());
        let listener = factory.create(&loopback()).unwrap().listen(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (mut accepted, _) = listener.accept().await.unwrap();

        // Closing the accepted side first leaves it in TIME_WAIT.
        accepted.shutdown().await.unwrap();
        drop(accepted);
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
        drop(client);
        drop(listener);

        let again = factory.create(&addr).unwrap().listen(addr);
        assert!(again.is_ok(), "rebind failed: {:?}", again.err());
    }

    #[tokio::test]
    async fn backlog_zero_uses_default() {
        let factory = SocketFactory::new(SocketConfig {
            backlog: 0,
            ..SocketConfig::default()
        });
        let listener = factory.create(&loopback()).unwrap().listen(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();

        let connect = factory.create(&addr).unwrap().connect(addr);
        let (stream, accepted) = tokio::join!(connect, listener.accept());
        assert!(stream.is_ok());
        assert!(accepted.is_ok());
    }
}
