use std::sync::Arc;

use axum::{
    routing::{any, get, post},
    Router,
};

use axon_chat::generate::faq::FaqGenerator;
use axon_chat::generate::gap::GapAnalyzer;
use axon_chat::generate::quiz::QuizGenerator;
use axon_chat::generate::script::SourceSetPipeline;
use axon_chat::stream::InflightRegistry;
use axon_chat::ChatPipeline;
use axon_clients::backend::BackendClient;
use axon_clients::llm::LlmClient;
use axon_core::config::AxonConfig;
use axon_render::JobRunner;
use axon_retrieval::milvus::MilvusBackend;
use axon_retrieval::ragflow::RagflowBackend;
use axon_telemetry::TelemetryEmitter;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: AxonConfig,
    pub pipeline: Arc<ChatPipeline>,
    pub inflight: Arc<InflightRegistry>,
    pub emitter: Arc<TelemetryEmitter>,
    pub runner: Arc<JobRunner>,
    pub faq: FaqGenerator,
    pub quiz: QuizGenerator,
    pub gap: GapAnalyzer,
    pub source_sets: Arc<SourceSetPipeline>,
    pub backend: Arc<BackendClient>,
    pub llm: Arc<LlmClient>,
    /// Kept for readiness probes only; searches go through the pipeline.
    pub milvus_probe: Arc<MilvusBackend>,
    pub ragflow_probe: Arc<RagflowBackend>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // health
        .route("/health", get(crate::http::health::health_handler))
        .route("/health/ready", get(crate::http::health::ready_handler))
        // chat
        .route("/ai/chat/messages", post(crate::http::chat::chat_handler))
        .route("/ai/chat/stream", post(crate::http::stream::stream_handler))
        // generation
        .route("/ai/faq/generate", post(crate::http::generate::faq_handler))
        .route(
            "/ai/faq/generate/batch",
            post(crate::http::generate::faq_batch_handler),
        )
        .route("/ai/quiz/generate", post(crate::http::generate::quiz_handler))
        .route(
            "/ai/gap/policy-edu/suggestions",
            post(crate::http::generate::gap_handler),
        )
        // source-set pipeline
        .route(
            "/internal/ai/source-sets/{id}/start",
            post(crate::http::source_sets::start_handler),
        )
        .route(
            "/internal/ai/source-sets/{id}/status",
            get(crate::http::source_sets::status_handler),
        )
        // render jobs
        .route(
            "/internal/ai/render-jobs",
            post(crate::http::render::create_handler),
        )
        .route(
            "/ai/video/job/{job_id}/start",
            post(crate::http::render::start_handler),
        )
        .route(
            "/ai/video/job/{job_id}/retry",
            post(crate::http::render::retry_handler),
        )
        .route(
            "/api/v2/videos/{video_id}/render-jobs",
            get(crate::http::render::list_handler),
        )
        .route(
            "/api/v2/videos/{video_id}/render-jobs/{job_id}",
            get(crate::http::render::detail_handler),
        )
        .route(
            "/api/v2/videos/{video_id}/render-jobs/{job_id}/cancel",
            post(crate::http::render::cancel_handler),
        )
        .route(
            "/api/v2/videos/{video_id}/assets/published",
            get(crate::http::render::published_handler),
        )
        // progress stream
        .route(
            "/ws/videos/{video_id}/render-progress",
            get(crate::ws::progress::ws_handler),
        )
        // removed surfaces answer 410 with a pointer
        .route("/search", any(crate::http::removed::removed_handler))
        .route("/ingest", any(crate::http::removed::removed_handler))
        .route("/ai/rag/process", any(crate::http::removed::removed_handler))
        .route(
            "/internal/rag/{*rest}",
            any(crate::http::removed::removed_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
