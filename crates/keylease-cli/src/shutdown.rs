// Shutdown signal handling for `keylease hold`

use tracing::{info, warn};

/// Resolves on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed that signal is ignored and only the other
/// one can end the wait.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, releasing lease...");
        }
        _ = terminate => {
            info!("Received SIGTERM, releasing lease...");
        }
    }
}
