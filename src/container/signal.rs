//! Interrupt handling for [`Container::run`](super::Container::run).

use tracing::{error, warn};

/// Resolves on the first SIGINT/SIGTERM. A further signal while shutdown is
/// in progress terminates the process immediately.
pub async fn shutdown_signal() {
    wait_for_signal().await;

    tokio::spawn(async {
        wait_for_signal().await;
        warn!("second interrupt received, terminating immediately");
        std::process::exit(1);
    });
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
