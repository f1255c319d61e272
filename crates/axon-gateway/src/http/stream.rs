//! POST /ai/chat/stream — newline-delimited JSON chat.
//!
//! The producer task (spawned by `stream_turn`) owns the LLM call and
//! the telemetry finalisation, so cleanup runs when the body is done —
//! or abandoned — never on response-header return.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::Response;
use tokio_util::sync::CancellationToken;

use axon_chat::stream::stream_turn;
use axon_core::types::TurnRequest;
use axon_telemetry::TurnContext;

use crate::app::AppState;
use crate::auth::check_auth;
use crate::error::ApiError;
use crate::extract::ApiJson;

pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<TurnRequest>,
) -> Result<Response, ApiError> {
    if !check_auth(&state, &headers) {
        return Err(ApiError::unauthorized());
    }

    let ctx = Arc::new(TurnContext::new(
        &req.session_id,
        &req.user_id,
        req.department.as_deref(),
    ));

    let mut rx = stream_turn(
        Arc::clone(&state.pipeline),
        Arc::clone(&state.inflight),
        Arc::clone(&state.emitter),
        req,
        ctx,
        CancellationToken::new(),
    );

    // One JSON object per line; the channel closing ends the body.
    let ndjson = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let mut line = serde_json::to_string(&event).unwrap_or_default();
            line.push('\n');
            yield Ok::<_, Infallible>(Bytes::from(line));
        }
    };

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ndjson))
        .map_err(|e| {
            ApiError::new(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                e.to_string(),
            )
        })?;
    Ok(response)
}
