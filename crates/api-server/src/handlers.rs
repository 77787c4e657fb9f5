//! HTTP request handlers

use crate::types::{ErrorResponse, HealthResponse};
use crate::ApiState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use stereo_sizing_common::ProcessingError;
use tracing::{error, info, warn};

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Size the fruit in a stored side-by-side stereo frame
///
/// GET /process/{path}
pub async fn process_stereo(
    State(state): State<ApiState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = path.trim_start_matches('/');
    info!("Stereo request for {}", path);
    let report = state
        .pipeline
        .process(state.source.as_ref(), state.sink.as_ref(), path)
        .await
        .map_err(|e| error_response(path, e))?;
    Ok(Json(report))
}

/// Pixel-only sizing of a single stored image
///
/// GET /process-2d/{path}
pub async fn process_2d(
    State(state): State<ApiState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = path.trim_start_matches('/');
    info!("2D request for {}", path);
    let report = state
        .pipeline
        .process_2d(state.source.as_ref(), path)
        .await
        .map_err(|e| error_response(path, e))?;
    Ok(Json(report))
}

/// Map a pipeline failure to its HTTP status and `{"detail": ...}` body
pub fn error_response(path: &str, err: ProcessingError) -> ApiError {
    let status = match &err {
        ProcessingError::InvalidImageGeometry { .. } | ProcessingError::UndecodableImage(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ProcessingError::InvalidSourcePath(_) => StatusCode::BAD_REQUEST,
        ProcessingError::SourceNotFound(_) => StatusCode::NOT_FOUND,
        ProcessingError::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Processing {} failed: {}", path, err);
    } else {
        warn!("Rejected {}: {}", path, err);
    }
    (
        status,
        Json(ErrorResponse {
            detail: err.to_string(),
        }),
    )
}
