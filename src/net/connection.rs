//! Session identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track active sessions so shutdown can wait for them to drain
//! - Abort stragglers once the drain deadline has passed
//!
//! The registry does not own sessions: each session holds a
//! [`SessionGuard`] and removes its own entry when it exits.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registry entry for one running session.
#[derive(Debug)]
pub struct SessionHandle {
    pub peer: SocketAddr,
    pub started_at: Instant,
    abort: Option<AbortHandle>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: DashMap<ConnectionId, SessionHandle>,
    drained: Notify,
}

/// Tracks active sessions for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new session. The entry lives as long as the returned guard.
    pub fn register(&self, peer: SocketAddr) -> SessionGuard {
        let id = ConnectionId::new();
        self.inner.sessions.insert(
            id,
            SessionHandle {
                peer,
                started_at: Instant::now(),
                abort: None,
            },
        );
        crate::observability::metrics::set_active_sessions(self.inner.sessions.len());
        SessionGuard {
            registry: self.clone(),
            id,
        }
    }

    /// Attach the task's abort handle. A session that already exited stays gone.
    pub fn attach(&self, id: ConnectionId, abort: AbortHandle) {
        if let Some(mut handle) = self.inner.sessions.get_mut(&id) {
            handle.abort = Some(abort);
        }
    }

    /// Get current active session count.
    pub fn active_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Peers of all active sessions.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.inner.sessions.iter().map(|entry| entry.peer).collect()
    }

    /// Wait until every session has exited, for at most `limit`.
    ///
    /// Returns `false` if sessions were still running at the deadline.
    pub async fn wait_for_drain(&self, limit: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.inner.drained.notified();
                if self.inner.sessions.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, drained).await.is_ok()
    }

    /// Abort every session still registered. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let mut aborted = 0;
        for entry in self.inner.sessions.iter() {
            if let Some(abort) = &entry.abort {
                tracing::debug!(
                    connection_id = %entry.key(),
                    peer = %entry.peer,
                    age = ?entry.started_at.elapsed(),
                    "Aborting session"
                );
                abort.abort();
                aborted += 1;
            }
        }
        aborted
    }

    fn remove(&self, id: ConnectionId) {
        self.inner.sessions.remove(&id);
        let remaining = self.inner.sessions.len();
        crate::observability::metrics::set_active_sessions(remaining);
        if remaining == 0 {
            self.inner.drained.notify_waiters();
        }
    }
}

/// Guard that tracks a session's lifetime.
/// Removes the registry entry when dropped.
#[derive(Debug)]
pub struct SessionGuard {
    registry: SessionRegistry,
    id: ConnectionId,
}

impl SessionGuard {
    /// Get this session's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        tracing::trace!(connection_id = %self.id, "Session unregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn registry_counts() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.active_count(), 0);

        let guard1 = registry.register(peer());
        assert_eq!(registry.active_count(), 1);

        let guard2 = registry.register(peer());
        assert_eq!(registry.active_count(), 2);
        assert_eq!(registry.peers(), vec![peer(), peer()]);

        drop(guard1);
        assert_eq!(registry.active_count(), 1);

        drop(guard2);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn drain_completes_when_last_guard_drops() {
        let registry = SessionRegistry::new();
        let guard = registry.register(peer());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        assert!(registry.wait_for_drain(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn drain_times_out_and_aborts() {
        let registry = SessionRegistry::new();
        let guard = registry.register(peer());
        let id = guard.id();

        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        registry.attach(id, task.abort_handle());

        assert!(!registry.wait_for_drain(Duration::from_millis(20)).await);
        assert_eq!(registry.abort_all(), 1);

        let joined = task.await;
        assert!(joined.unwrap_err().is_cancelled());
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn attach_after_exit_is_ignored() {
        let registry = SessionRegistry::new();
        let guard = registry.register(peer());
        let id = guard.id();
        drop(guard);

        let task = tokio::spawn(async {});
        registry.attach(id, task.abort_handle());
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.abort_all(), 0);
    }
}
