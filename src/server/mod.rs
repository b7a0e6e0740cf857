//! HTTP surface

pub mod device;
pub mod error;
pub mod range;
pub mod routes;

use crate::queue::JobManager;
use anyhow::{Context, Result};
use axum::http::Method;
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use device::DeviceProfile;
pub use error::ApiError;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobManager,
    pub ytdlp_available: bool,
}

impl AppState {
    pub fn new(jobs: JobManager, ytdlp_available: bool) -> Self {
        Self {
            jobs,
            ytdlp_available,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::index))
        .route("/test", get(routes::test))
        .route("/health", get(routes::health))
        .route("/video-info", post(routes::video_info))
        .route("/download", post(routes::start_download))
        .route("/download/{id}", delete(routes::cancel_download))
        .route("/progress/{id}", get(routes::progress))
        .route("/download-file/{id}", get(routes::download_file))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until Ctrl+C
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("vidgrab listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", err);
    }
    info!("Shutting down");
}
