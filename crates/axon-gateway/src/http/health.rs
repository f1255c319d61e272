use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use axon_core::config::RetrieverChoice;

use crate::app::AppState;

/// GET /health — liveness only.
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /health/ready — reachability of the LLM, the retrieval backend,
/// and the application backend, probed concurrently with a 2 s cap.
pub async fn ready_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let cap = Duration::from_secs(2);
    // Probe whichever retrieval backend chat actually uses.
    let retrieval_probe = async {
        match state.config.chat.retriever {
            RetrieverChoice::Milvus => state.milvus_probe.ping().await,
            RetrieverChoice::Ragflow => state.ragflow_probe.ping().await,
        }
    };
    let (llm, retrieval, backend) = tokio::join!(
        probe(cap, state.llm.ping()),
        probe(cap, retrieval_probe),
        probe(cap, state.backend.ping()),
    );

    let ready = llm && retrieval && backend;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "degraded" },
            "checks": {
                "llm": llm,
                "retrieval": retrieval,
                "backend": backend,
            },
        })),
    )
}

async fn probe(cap: Duration, check: impl std::future::Future<Output = bool>) -> bool {
    tokio::time::timeout(cap, check).await.unwrap_or(false)
}
