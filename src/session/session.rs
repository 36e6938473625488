//! A single connection's read → process → write loop.
//!
//! # Responsibilities
//! - Own the connection handle and close it exactly once
//! - Treat read timeouts as a chance to re-check shutdown, never as errors
//! - Write replies in full before the next read
//! - Apply the per-session throttle without blocking other sessions
//!
//! Cancellation is observed before each read, while a read is waiting for
//! bytes, and during the throttle pause. An in-flight write always
//! completes first.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::SessionConfig;
use crate::error::EngineError;
use crate::lifecycle::ShutdownToken;
use crate::net::connection::ConnectionId;
use crate::net::socket::ReadPolicy;
use crate::observability::metrics;
use crate::session::processor::{self, Processor};
use crate::session::state::SessionState;

/// Parameters of a session loop. Fixed for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub buffer_size: usize,
    pub throttle: Duration,
    pub read_policy: ReadPolicy,
}

impl SessionSettings {
    pub fn new(config: &SessionConfig, read_policy: ReadPolicy) -> Self {
        Self {
            buffer_size: config.buffer_size.max(1),
            throttle: config.throttle(),
            read_policy,
        }
    }
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed its side (zero-length read).
    PeerClosed,
    /// Shutdown was observed.
    Cancelled,
    /// `run` was called on a session that had already been closed.
    AlreadyClosed,
}

impl SessionEnd {
    fn reason(self) -> &'static str {
        match self {
            SessionEnd::PeerClosed => "peer_closed",
            SessionEnd::Cancelled => "cancelled",
            SessionEnd::AlreadyClosed => "already_closed",
        }
    }
}

/// Byte and message counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub messages: u64,
}

/// Result of one read attempt.
#[derive(Debug)]
enum ReadOutcome {
    Data(usize),
    Eof,
    TimedOut,
    Cancelled,
    Failed(io::Error),
}

/// One live connection and the loop that serves it.
pub struct ConnectionSession<S> {
    id: ConnectionId,
    peer: String,
    stream: Option<S>,
    state: SessionState,
    settings: SessionSettings,
    processor: Arc<dyn Processor>,
    shutdown: ShutdownToken,
    greeting: Option<Vec<u8>>,
    stats: SessionStats,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        id: ConnectionId,
        peer: impl Into<String>,
        stream: S,
        settings: SessionSettings,
        processor: Arc<dyn Processor>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            id,
            peer: peer.into(),
            stream: Some(stream),
            state: SessionState::Created,
            settings,
            processor,
            shutdown,
            greeting: None,
            stats: SessionStats::default(),
        }
    }

    /// Bytes written once before the first read.
    pub fn with_greeting(mut self, greeting: Option<Vec<u8>>) -> Self {
        self.greeting = greeting.filter(|g| !g.is_empty());
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Drive the loop to completion, then close the connection.
    pub async fn run(&mut self) -> Result<SessionEnd, EngineError> {
        tracing::debug!(connection_id = %self.id, peer = %self.peer, "Session started");

        let result = self.exchange().await;
        self.close().await;

        let stats = self.stats;
        match &result {
            Ok(end) => {
                metrics::record_session_closed(end.reason());
                tracing::debug!(
                    connection_id = %self.id,
                    peer = %self.peer,
                    end = ?end,
                    bytes_in = stats.bytes_in,
                    bytes_out = stats.bytes_out,
                    messages = stats.messages,
                    "Session closed"
                );
            }
            Err(e) => {
                metrics::record_session_closed(match e {
                    EngineError::Processor { .. } => "processor_error",
                    _ => "communication_error",
                });
                tracing::error!(
                    connection_id = %self.id,
                    peer = %self.peer,
                    error = %e,
                    bytes_in = stats.bytes_in,
                    bytes_out = stats.bytes_out,
                    "Session failed"
                );
            }
        }
        result
    }

    /// Close the connection. Returns `false` if it was already closed.
    pub async fn close(&mut self) -> bool {
        self.state = SessionState::Closed;
        match self.stream.take() {
            Some(mut stream) => {
                if let Err(e) = stream.shutdown().await {
                    tracing::trace!(connection_id = %self.id, error = %e, "Shutdown on close failed");
                }
                true
            }
            None => false,
        }
    }

    async fn exchange(&mut self) -> Result<SessionEnd, EngineError> {
        if self.state.is_closed() {
            return Ok(SessionEnd::AlreadyClosed);
        }

        if let Some(greeting) = self.greeting.take() {
            self.transition(SessionState::Writing);
            self.write_reply(&greeting).await?;
        }

        let mut buf = vec![0u8; self.settings.buffer_size];
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(SessionEnd::Cancelled);
            }

            self.transition(SessionState::Reading);
            let n = match self.read_chunk(&mut buf).await {
                ReadOutcome::Data(n) => n,
                ReadOutcome::Eof => return Ok(SessionEnd::PeerClosed),
                ReadOutcome::Cancelled => return Ok(SessionEnd::Cancelled),
                ReadOutcome::TimedOut => continue,
                ReadOutcome::Failed(source) => {
                    return Err(EngineError::Communication {
                        peer: self.peer.clone(),
                        source,
                    })
                }
            };
            self.stats.bytes_in += n as u64;
            self.stats.messages += 1;
            metrics::record_bytes_in(n);
            tracing::trace!(connection_id = %self.id, bytes = n, "Received data");

            self.transition(SessionState::Processing);
            let reply = processor::invoke(self.processor.as_ref(), &buf[..n]).map_err(|source| {
                EngineError::Processor {
                    peer: self.peer.clone(),
                    source,
                }
            })?;

            if let Some(reply) = reply.filter(|r| !r.is_empty()) {
                self.transition(SessionState::Writing);
                self.write_reply(&reply).await?;
            }

            if !self.settings.throttle.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.throttle) => {}
                    _ = self.shutdown.cancelled() => return Ok(SessionEnd::Cancelled),
                }
            }
        }
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> ReadOutcome {
        let Some(stream) = self.stream.as_mut() else {
            return ReadOutcome::Eof;
        };
        let shutdown = &self.shutdown;
        let wait = self.settings.read_policy.read_wait();

        let read = async {
            match wait {
                Some(limit) => match tokio::time::timeout(limit, stream.read(buf)).await {
                    Ok(result) => result,
                    Err(_) => Err(io::ErrorKind::TimedOut.into()),
                },
                None => stream.read(buf).await,
            }
        };

        let result = tokio::select! {
            result = read => result,
            _ = shutdown.cancelled() => return ReadOutcome::Cancelled,
        };

        match result {
            Ok(0) => ReadOutcome::Eof,
            Ok(n) => ReadOutcome::Data(n),
            Err(e) if is_timeout(&e) => ReadOutcome::TimedOut,
            Err(e) => ReadOutcome::Failed(e),
        }
    }

    async fn write_reply(&mut self, reply: &[u8]) -> Result<(), EngineError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(EngineError::Communication {
                peer: self.peer.clone(),
                source: io::ErrorKind::NotConnected.into(),
            });
        };

        // write_all retries short writes until the whole reply is out.
        let written = match stream.write_all(reply).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|source| EngineError::Communication {
            peer: self.peer.clone(),
            source,
        })?;

        self.stats.bytes_out += reply.len() as u64;
        metrics::record_bytes_out(reply.len());
        tracing::trace!(connection_id = %self.id, bytes = reply.len(), "Sent reply");
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
