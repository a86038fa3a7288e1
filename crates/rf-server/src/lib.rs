//! rf-server: HTTP API server and background transcode worker.
//!
//! This crate ties together all other rf-* crates into a running server
//! application. It provides:
//!
//! - Axum-based HTTP API with session authentication and tenant authorization
//! - Streaming multipart ingestion and byte-range delivery
//! - Per-video SSE progress feeds backed by the progress hub
//! - The transcode worker, startup recovery and graceful shutdown

pub mod authz;
pub mod classifier;
pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod transcode_worker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rf_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// How long aborted workers get to record their failure.
const ABORT_WAIT: Duration = Duration::from_secs(5);

/// Start the reelforged server.
///
/// Opens and migrates the database (fatal on failure), constructs the
/// [`AppContext`], recovers interrupted work, and serves HTTP until a
/// shutdown signal arrives. Running transcodes then get
/// `transcode.shutdown_grace_secs` to finish before they are aborted.
pub async fn start(config: Config) -> rf_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let db_path = &config.server.db_path;
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created database directory {}", parent.display());
        }
    }
    let db_str = db_path.to_string_lossy();
    let db = rf_db::pool::init_pool(&db_str)?;
    if existed {
        tracing::info!("Database opened (existing) at {db_str}");
    } else {
        tracing::info!("Database created (new) at {db_str}");
    }

    for dir in [&config.storage.upload_dir, &config.storage.processed_dir] {
        std::fs::create_dir_all(dir)?;
    }

    let tools = Arc::new(rf_av::ToolRegistry::discover(&config.tools));
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}; transcodes will fail until it is installed", info.name);
        }
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| rf_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let ctx = AppContext::new(db, config, tools);

    match transcode_worker::recover_interrupted(&ctx) {
        Ok((0, 0)) => {}
        Ok((failed, dispatched)) => tracing::info!(
            "Recovered interrupted work: {failed} orphaned transcodes failed, {dispatched} pending uploads dispatched"
        ),
        Err(e) => tracing::warn!("Failed to recover interrupted transcodes: {e}"),
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| rf_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    tracing::info!("Starting server on {addr}");
    serve(listener, ctx).await
}

/// Serve `ctx` on an already-bound listener until `ctx.shutdown` is
/// cancelled or a signal arrives, then drain background work.
pub async fn serve(listener: tokio::net::TcpListener, ctx: AppContext) -> rf_core::Result<()> {
    let app = router::build_router(ctx.clone());

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(ctx.shutdown.clone()))
        .await
        .map_err(|e| rf_core::Error::Internal(format!("Server error: {e}")));

    drain(&ctx).await;

    tracing::info!("Server shutdown complete");
    result
}

/// Wait for running transcodes, abort the stragglers, and close the hub.
pub async fn drain(ctx: &AppContext) {
    ctx.shutdown.cancel();
    ctx.tasks.close();

    let grace = Duration::from_secs(ctx.config.transcode.shutdown_grace_secs);
    if !ctx.tasks.is_empty() {
        tracing::info!(
            "Waiting up to {}s for {} running transcode(s)",
            grace.as_secs(),
            ctx.tasks.len()
        );
    }

    if tokio::time::timeout(grace, ctx.tasks.wait()).await.is_err() {
        tracing::warn!("Shutdown grace period elapsed; aborting {} transcode(s)", ctx.tasks.len());
        ctx.abort_transcodes.cancel();
        if tokio::time::timeout(ABORT_WAIT, ctx.tasks.wait()).await.is_err() {
            tracing::error!("Transcode tasks did not stop after abort");
        }
    }

    ctx.hub.close();
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or cancellation, then
/// cancel `cancel` so long-lived streams end.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
