//! Cooperative shutdown signal shared by every long-running task.
//!
//! The supervisor owns a `watch::Sender<bool>`; tasks hold receivers and race
//! their sleeps and I/O against [`wait_for_shutdown`] inside `tokio::select!`.

use std::time::Duration;
use tokio::sync::watch;

/// Resolve once shutdown has been requested (or the sender was dropped).
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `duration` unless shutdown arrives first.
///
/// Returns `false` when the sleep was interrupted by shutdown.
pub async fn sleep_or_shutdown(duration: Duration, rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = wait_for_shutdown(rx) => false,
    }
}
