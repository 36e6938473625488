//! Host/port pairs and their resolution.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::EngineError;

/// A TCP endpoint. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Build an endpoint with a port in `1..=65535`.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, EngineError> {
        let host = host.into();
        if host.is_empty() {
            return Err(EngineError::InvalidEndpoint("empty host".into()));
        }
        if port == 0 {
            return Err(EngineError::InvalidEndpoint(format!("{host}:0 has no port")));
        }
        Ok(Self { host, port })
    }

    /// A bind-only endpoint that lets the OS choose the port.
    pub fn any_port(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 0,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to socket addresses, in resolver order.
    pub async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .collect();

        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} resolved to no addresses", self.host),
            ));
        }
        Ok(addrs)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Endpoint::new(addr.ip().to_string(), addr.port());
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EngineError::InvalidEndpoint(format!("{s:?} is missing a port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| EngineError::InvalidEndpoint(format!("{s:?}: {e}")))?;
        Endpoint::new(host, port)
    }
}
