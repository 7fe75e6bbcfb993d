//! HTTP surface over the job engine.
//!
//! Routes map one-to-one onto engine operations; see [`router::build_router`].

pub mod context;
pub mod error;
pub mod router;
pub mod routes;

pub use context::AppContext;
pub use error::AppError;
pub use router::build_router;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;

use encoded_av::{FfmpegTranscoder, ToolRegistry};
use encoded_core::config::Config;
use encoded_engine::Engine;

/// Start the engine and serve HTTP until Ctrl+C or SIGTERM.
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    if tools.require("ffmpeg").is_err() {
        tracing::warn!("ffmpeg not found; jobs will fail with tool_unavailable until it is installed");
    }

    let transcoder = Arc::new(FfmpegTranscoder::new(Arc::clone(&tools)));
    let engine = Arc::new(Engine::start(&config, transcoder).context("Failed to start engine")?);

    let ctx = AppContext::new(Arc::clone(&engine), config, tools);
    let app = build_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    engine.shutdown().await;
    served?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}
