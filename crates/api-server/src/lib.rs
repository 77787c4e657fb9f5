//! REST API server for stereo fruit sizing
//!
//! Endpoints:
//! - `GET /health`
//! - `GET /process/{path}`: stereo sizing of a stored side-by-side frame
//! - `GET /process-2d/{path}`: pixel-only sizing of a stored single image

mod handlers;
mod types;

use axum::{routing::get, Router};
use std::sync::Arc;
use stereo_sizing_pipeline::SizingPipeline;
use stereo_sizing_storage::{ArtifactSink, ImageSource};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use handlers::*;
pub use types::*;

/// API server state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: SizingPipeline,
    /// Where request paths are fetched from
    pub source: Arc<dyn ImageSource>,
    /// Where disparity visualizations are written
    pub sink: Arc<dyn ArtifactSink>,
}

impl ApiState {
    #[must_use]
    pub fn new(
        pipeline: SizingPipeline,
        source: Arc<dyn ImageSource>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            pipeline,
            source,
            sink,
        }
    }
}

/// Build the API router with all endpoints
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/process/{*path}", get(process_stereo))
        .route("/process-2d/{*path}", get(process_2d))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the API server
pub async fn start_server(addr: &str, state: ApiState) -> Result<(), std::io::Error> {
    tracing::info!("Starting API server on {}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await
}
