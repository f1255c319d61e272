//! Source-set pipeline surface: begin document → script generation and
//! poll its in-process status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::json;

use crate::app::AppState;
use crate::auth::check_auth;
use crate::error::ApiError;

/// POST /internal/ai/source-sets/{id}/start
pub async fn start_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    let pipeline_state = Arc::clone(&state.source_sets).start(&id);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "pipeline": pipeline_state })),
    ))
}

/// GET /internal/ai/source-sets/{id}/status
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    match state.source_sets.status(&id) {
        Some(pipeline_state) => Ok(Json(json!({ "pipeline": pipeline_state }))),
        None => Err(ApiError::not_found(format!("source set {id} has no pipeline"))),
    }
}
