//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tcp_engine::config::EngineConfig;
use tcp_engine::engine::{ServeSummary, ServerEngine};
use tcp_engine::lifecycle::Shutdown;
use tcp_engine::net::Endpoint;
use tcp_engine::session::Processor;
use tcp_engine::EngineError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Upper bound for any single wait in the tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Engine config tuned for tests: short read timeout, short drain.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.socket.read_timeout_ms = 20;
    config.server.drain_timeout_secs = 2;
    config
}

/// A server running in the background.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<ServeSummary, EngineError>>,
}

impl TestServer {
    /// Trigger shutdown and wait for `serve` to return.
    pub async fn stop(self) -> Result<ServeSummary, EngineError> {
        self.shutdown.trigger();
        tokio::time::timeout(WAIT, self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

/// Bind an engine on an ephemeral loopback port and serve in the background.
pub async fn start_server(config: EngineConfig, processor: Arc<dyn Processor>) -> TestServer {
    let endpoint = Endpoint::any_port("127.0.0.1");
    let server = ServerEngine::bind(&endpoint, &config, processor)
        .await
        .expect("bind failed");
    let addr = server.local_addr();

    let shutdown = Shutdown::new();
    let token = shutdown.token();
    let handle = tokio::spawn(async move { server.serve(token).await });

    TestServer {
        addr,
        shutdown,
        handle,
    }
}

/// Read exactly `len` bytes or fail after [`WAIT`].
pub async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for data")
        .expect("read failed");
    buf
}

/// Send `payload` and read back the same number of bytes.
pub async fn round_trip(stream: &mut TcpStream, payload: &[u8]) -> Vec<u8> {
    stream.write_all(payload).await.unwrap();
    read_exactly(stream, payload.len()).await
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A plain peer that waits `delay`, sends `push`, reads one reply and
/// hands it back through the join handle, then closes.
pub async fn start_push_backend(push: &'static [u8], delay: Duration) -> (SocketAddr, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(delay).await;
        socket.write_all(push).await.unwrap();

        let mut buf = vec![0u8; 1024];
        let n = socket.read(&mut buf).await.unwrap();
        buf.truncate(n);
        let _ = socket.shutdown().await;
        buf
    });

    (addr, handle)
}

/// A plain peer that accepts one connection and holds it open until dropped.
pub async fn start_silent_backend() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        while let Ok(n) = socket.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    });

    (addr, handle)
}
