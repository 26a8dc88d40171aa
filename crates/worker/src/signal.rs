use tracing::{info, warn};

/// Resolve on the first SIGINT (Ctrl-C) or SIGTERM.
///
/// A handler that cannot be installed is logged and ignored; the other one
/// still works.
pub async fn shutdown_requested() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(signal = "SIGINT", "shutdown requested"),
            Err(e) => {
                warn!(error = %e, "could not listen for Ctrl-C");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!(signal = "SIGTERM", "shutdown requested");
            }
            Err(e) => {
                warn!(error = %e, "could not listen for SIGTERM");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
