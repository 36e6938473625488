//! OS signal handling.
//!
//! SIGINT and SIGTERM trigger graceful shutdown. A second signal while
//! shutdown is in progress exits the process immediately.

use crate::lifecycle::shutdown::Shutdown;

/// Exit code used when a second signal forces termination.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Spawn a task that turns OS signals into shutdown.
pub fn spawn_signal_handler(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            tracing::error!(error = %e, "Failed to install signal handler");
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown.trigger();

        if wait_for_signal().await.is_ok() {
            tracing::warn!("Second signal received, forcing exit");
            std::process::exit(FORCED_EXIT_CODE);
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
