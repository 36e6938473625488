//! Shutdown coordination for the engine.
//!
//! A single set-once flag shared by the accept loop and every session.
//! Reads are lock-free; waiters are woken through a [`Notify`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Signal {
    triggered: AtomicBool,
    notify: Notify,
}

/// Coordinator for graceful shutdown.
///
/// Hands out [`ShutdownToken`]s to long-running tasks. Once triggered it
/// never resets.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    signal: Arc<Signal>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a read-only token observing this coordinator.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal: Arc::clone(&self.signal),
        }
    }

    /// Trigger the shutdown signal. Calling it again has no effect.
    pub fn trigger(&self) {
        if !self.signal.triggered.swap(true, Ordering::SeqCst) {
            tracing::info!("Shutdown triggered");
        }
        self.signal.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.signal.triggered.load(Ordering::SeqCst)
    }
}

/// Read-only view of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    signal: Arc<Signal>,
}

impl ShutdownToken {
    /// A token that is never triggered.
    pub fn never() -> Self {
        Shutdown::new().token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.triggered.load(Ordering::SeqCst)
    }

    /// Completes once shutdown has been triggered.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.signal.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn trigger_is_monotonic() {
        let shutdown = Shutdown::new();
        let token = shutdown.token();
        assert!(!token.is_cancelled());

        shutdown.trigger();
        shutdown.trigger();
        assert!(token.is_cancelled());
        assert!(shutdown.is_triggered());
        assert!(shutdown.token().is_cancelled());
    }

    #[tokio::test]
    async fn waiters_wake_on_trigger() {
        let shutdown = Shutdown::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let token = shutdown.token();
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter not woken")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn late_waiter_sees_prior_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(100), shutdown.token().cancelled())
            .await
            .expect("already-triggered token must complete immediately");
    }
}
