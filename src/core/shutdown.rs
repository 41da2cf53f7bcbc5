use tokio::signal;
use tokio_util::sync::CancellationToken;

async fn interrupt() -> &'static str {
    match signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(err) => {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn terminate() -> &'static str {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
            "SIGTERM"
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to install SIGTERM handler");
            std::future::pending().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() -> &'static str {
    std::future::pending().await
}

/// Cancels `root` once SIGINT/SIGTERM arrives. Every status-message token and
/// every background loop hangs off `root`.
pub(crate) async fn cancel_on_signal(root: CancellationToken) {
    let received = tokio::select! {
        name = interrupt() => name,
        name = terminate() => name,
        _ = root.cancelled() => return,
    };

    tracing::info!(signal = received, "Shutdown signal received, cancelling background work");
    root.cancel();
}
