//! Ctrl+C / SIGTERM handling for a run

use crate::testing::CancelHandle;

/// Wait for an interrupt and turn it into a cancellation
///
/// The child installer and the proxy are torn down by the runner; log files
/// stay on disk.
pub(super) async fn cancel_on_signal(handle: CancelHandle) {
    wait_for_signal().await;
    eprintln!("\nInterrupt received, stopping the current scenario...");
    tracing::warn!("Run cancelled by signal");
    handle.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                Ok(()) = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::debug!("SIGTERM handler unavailable: {}", e);
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

/// Ctrl+C, or never when the handler cannot be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::debug!("Ctrl+C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}
