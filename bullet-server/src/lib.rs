//! bullet-server: serves the annotated camera stream over HTTP

pub mod http;

pub use http::{create_router, StreamState};

use bullet_eye::{DetectionState, FrameSource, ObjectDetector};
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<D, S>(
    addr: &str,
    state: StreamState<D, S>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()>
where
    D: ObjectDetector + 'static,
    S: FrameSource + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    info!("Stream server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Stream server stopped");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM, then clear `active` so running streams end.
///
/// A second Ctrl-C during the drain exits the process.
pub async fn shutdown_signal(detection: Arc<DetectionState>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
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

    info!(snapshot = ?detection.snapshot(), "Shutdown signal received");
    detection.stop();

    tokio::spawn(async {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted again, exiting without draining streams");
            std::process::exit(130);
        }
    });
}
