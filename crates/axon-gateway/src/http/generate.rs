//! Structured generation endpoints: FAQ (single + batch), quiz, and
//! policy/education gap suggestions.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use axon_chat::generate::gap::TurnSummary;
use axon_chat::generate::quiz::DifficultyDistribution;
use axon_core::types::Domain;

use crate::app::AppState;
use crate::auth::check_auth;
use crate::error::ApiError;
use crate::extract::ApiJson;

fn default_faq_count() -> usize {
    5
}

#[derive(Deserialize)]
pub struct FaqRequest {
    pub topic: String,
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default = "default_faq_count")]
    pub count: usize,
}

pub async fn faq_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<FaqRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    let set = state
        .faq
        .generate(&req.topic, req.domain.unwrap_or(Domain::Policy), req.count)
        .await?;
    Ok(Json(json!({ "topic": set.topic, "items": set.items })))
}

#[derive(Deserialize)]
pub struct FaqBatchRequest {
    pub topics: Vec<String>,
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default = "default_faq_count")]
    pub count: usize,
}

pub async fn faq_batch_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<FaqBatchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    if req.topics.is_empty() {
        return Err(ApiError::new(
            axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "topics must not be empty",
        ));
    }
    let entries = state
        .faq
        .generate_batch(&req.topics, req.domain.unwrap_or(Domain::Policy), req.count)
        .await;
    Ok(Json(json!({ "results": entries })))
}

#[derive(Deserialize)]
pub struct QuizRequest {
    pub blocks: Vec<String>,
    pub distribution: DifficultyDistribution,
}

pub async fn quiz_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<QuizRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    let set = state.quiz.generate(&req.blocks, req.distribution).await?;
    Ok(Json(json!({ "items": set.items })))
}

#[derive(Deserialize)]
pub struct GapRequest {
    pub turns: Vec<TurnSummary>,
}

pub async fn gap_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<GapRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }
    let suggestions = state.gap.suggest(&req.turns).await?;
    Ok(Json(json!({ "suggestions": suggestions })))
}
