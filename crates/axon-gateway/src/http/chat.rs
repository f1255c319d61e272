//! POST /ai/chat/messages — synchronous chat, JSON in, JSON out.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;
use tracing::warn;

use axon_chat::orchestrator::LLM_FALLBACK_MESSAGE;
use axon_core::types::{AnswerMeta, ChatAnswer, Route, TurnRequest};
use axon_telemetry::{EventType, TurnContext};

use crate::app::AppState;
use crate::auth::check_auth;
use crate::error::ApiError;
use crate::extract::ApiJson;

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<TurnRequest>,
) -> Result<Json<ChatAnswer>, ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }

    let ctx = TurnContext::new(&req.session_id, &req.user_id, req.department.as_deref());
    let deadline = Duration::from_secs(state.config.chat.timeout_secs);

    let result = tokio::time::timeout(deadline, state.pipeline.handle_turn(&req, &ctx)).await;

    let response = match result {
        Ok(Ok(answer)) => Ok(Json(answer)),
        Ok(Err(e)) => Err(ApiError::from(e)),
        // The turn's own budget ran out mid-pipeline. Deliver the
        // apology shape rather than a 5xx.
        Err(_) => {
            warn!(session_id = %req.session_id, "chat turn exceeded its deadline");
            ctx.record(
                EventType::ChatTurn,
                json!({
                    "route": Route::Error,
                    "latency_ms": deadline.as_millis() as u64,
                    "error_code": "LLM_TIMEOUT",
                }),
            );
            Ok(Json(ChatAnswer {
                answer: LLM_FALLBACK_MESSAGE.to_string(),
                sources: Vec::new(),
                meta: AnswerMeta {
                    route: Some(Route::Error),
                    latency_ms: deadline.as_millis() as u64,
                    error_type: Some("LLM_TIMEOUT".to_string()),
                    ..Default::default()
                },
            }))
        }
    };

    // Telemetry goes out whether the turn succeeded or not; the context
    // guarantees at-most-once per event type.
    state.emitter.flush(&ctx);
    response
}
