//! spotspof-server: HTTP surface for search, delivery, and the playlist queue.
//!
//! - Axum router with Basic auth, request ids, and request tracing
//! - Delivery Strategy Selector choosing redirect, pipe relay, or
//!   download-then-relay per request
//! - Stream Relay for temp files and live process pipes
//! - Graceful shutdown via signal handling

pub mod context;
pub mod delivery;
pub mod error;
pub mod middleware;
pub mod queue;
pub mod relay;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use spotspof_core::config::Config;
use spotspof_extract::{Extractor, ToolRegistry, YtDlpExtractor};

use crate::context::AppContext;

/// Artifacts older than this at startup were left by a previous process.
const STALE_ARTIFACT_AGE: Duration = Duration::from_secs(60 * 60);

/// Start the spotspof server with the yt-dlp extractor.
///
/// Discovers external tools, prepares the temp directory, and serves until a
/// shutdown signal is received.
pub async fn start(config: Config) -> spotspof_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let tools = ToolRegistry::discover(&config.tools);
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let extractor: Arc<dyn Extractor> =
        Arc::new(YtDlpExtractor::from_config(&tools, &config.extraction));

    serve(config, extractor, tools).await
}

/// Serve with an arbitrary extractor.
pub async fn serve(
    config: Config,
    extractor: Arc<dyn Extractor>,
    tools: ToolRegistry,
) -> spotspof_core::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| spotspof_core::Error::Config(format!("Invalid server address: {e}")))?;

    let ctx = AppContext::new(config, extractor, tools)?;

    let artifacts = ctx.delivery.artifacts();
    tracing::info!("Temp artifacts in {}", artifacts.dir().display());
    artifacts.sweep_stale(STALE_ARTIFACT_AGE);

    let app = router::build_router(ctx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| spotspof_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    tracing::info!("Starting server on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| spotspof_core::Error::Internal(format!("Server error: {e}")))?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
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
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
