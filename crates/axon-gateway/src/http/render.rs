//! Render-job HTTP surface: internal creation, start/retry, and the V2
//! list/detail/cancel/published-assets API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::auth::check_auth;
use crate::error::ApiError;
use crate::extract::ApiJson;

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub video_id: String,
    pub script_id: String,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// POST /internal/ai/render-jobs — idempotent per video.
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreateJobRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    let outcome = state
        .runner
        .create_job(&req.video_id, &req.script_id, req.created_by.as_deref())
        .await?;
    let status = if outcome.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(json!({ "created": outcome.created, "job": outcome.job })),
    ))
}

/// POST /ai/video/job/{job_id}/start — fetch spec, snapshot, run.
pub async fn start_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    let job = Arc::clone(&state.runner).start_job(&job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job": job }))))
}

/// POST /ai/video/job/{job_id}/retry — only from FAILED, snapshot reuse.
pub async fn retry_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    let job = Arc::clone(&state.runner).retry_job(&job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job": job }))))
}

/// GET /api/v2/videos/{video_id}/render-jobs
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(video_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    let jobs = state.runner.list_jobs(&video_id)?;
    Ok(Json(json!({ "jobs": jobs })))
}

/// GET /api/v2/videos/{video_id}/render-jobs/{job_id}
pub async fn detail_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((video_id, job_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    let job = state.runner.get_job(&job_id)?;
    if job.video_id != video_id {
        return Err(ApiError::not_found(format!(
            "job {job_id} does not belong to video {video_id}"
        )));
    }
    Ok(Json(json!({ "job": job })))
}

/// POST /api/v2/videos/{video_id}/render-jobs/{job_id}/cancel
pub async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((video_id, job_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    let existing = state.runner.get_job(&job_id)?;
    if existing.video_id != video_id {
        return Err(ApiError::not_found(format!(
            "job {job_id} does not belong to video {video_id}"
        )));
    }
    let job = state.runner.cancel_job(&job_id)?;
    Ok(Json(json!({ "job": job })))
}

/// GET /api/v2/videos/{video_id}/assets/published — latest COMPLETED.
pub async fn published_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(video_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    match state.runner.published_assets(&video_id)? {
        Some((job_id, assets)) => Ok(Json(json!({ "job_id": job_id, "assets": assets }))),
        None => Err(ApiError::not_found(format!(
            "no published assets for video {video_id}"
        ))),
    }
}
