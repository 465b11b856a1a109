use tokio::signal;
use tracing::{info, warn};

/// Resolves on the first SIGINT or SIGTERM (Ctrl+C elsewhere).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to create SIGTERM handler: {}", e);
                if signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
                info!("Received Ctrl+C, stopping capture");
                return;
            }
        };
        let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to create SIGINT handler: {}", e);
                sigterm.recv().await;
                info!("Received SIGTERM, stopping capture");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, stopping capture"),
            _ = sigint.recv() => info!("Received SIGINT, stopping capture"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, stopping capture");
    }
}
