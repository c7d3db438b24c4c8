//! Process signal handling.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Waits for SIGINT (or SIGTERM on Unix) and cancels `cancel`.
///
/// Returns early without logging if `cancel` is triggered elsewhere.
pub async fn wait_for_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        name = interrupt() => info!(signal = name, "shutdown requested"),
    }
    cancel.cancel();
}

#[cfg(unix)]
async fn interrupt() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            None
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "cannot listen for SIGINT");
                std::future::pending::<()>().await;
            }
            "SIGINT"
        }
        Some(_) = async {
            match term.as_mut() {
                Some(t) => t.recv().await,
                None => std::future::pending().await,
            }
        } => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn interrupt() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    "Ctrl-C"
}
