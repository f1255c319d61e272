//! WS /ws/videos/{video_id}/render-progress — per-job progress stream.
//!
//! The handshake resolves a job id (the `job_id` query param, or the
//! latest PROCESSING job for the video) and answers with a `connected`
//! event before any progress events flow. Event order within the
//! subscription follows publish order; no history is replayed.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::app::AppState;

#[derive(Deserialize)]
pub struct ProgressQuery {
    #[serde(default)]
    pub job_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<String>,
    Query(query): Query<ProgressQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, video_id, query.job_id))
}

async fn handle_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    video_id: String,
    requested_job: Option<String>,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, video_id = %video_id, "render-progress WS connected");

    let (mut tx, mut rx) = socket.split();

    // Resolve the job this subscription follows: explicit id (must
    // belong to the video) beats the latest PROCESSING job.
    let job_id = match requested_job {
        Some(id) => state
            .runner
            .get_job(&id)
            .ok()
            .filter(|j| j.video_id == video_id)
            .map(|j| j.job_id),
        None => state
            .runner
            .active_job(&video_id)
            .ok()
            .flatten()
            .map(|j| j.job_id),
    };

    let connected = json!({
        "type": "connected",
        "video_id": video_id,
        "job_id": job_id,
    });
    if tx
        .send(Message::Text(connected.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let mut events = match &job_id {
        Some(id) => Some(state.runner.bus().subscribe(id)),
        None => None,
    };

    loop {
        tokio::select! {
            event = recv_event(&mut events) => {
                match event {
                    Some(event) => {
                        let payload = serde_json::to_string(&event).unwrap_or_default();
                        if tx.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                        if event.status.is_terminal() {
                            debug!(conn_id, "terminal event delivered, closing");
                            let _ = tx.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    // bus closed the job (terminal) or no subscription
                    None => break,
                }
            }
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    info!(conn_id, "render-progress WS closed");
}

/// Next bus event, or pend forever when there is no subscription so the
/// select stays on client messages.
async fn recv_event(
    events: &mut Option<tokio::sync::mpsc::Receiver<axon_render::ProgressEvent>>,
) -> Option<axon_render::ProgressEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
