use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

mod app;
mod auth;
mod error;
mod extract;
mod http;
mod ws;

use axon_chat::generate::faq::FaqGenerator;
use axon_chat::generate::gap::GapAnalyzer;
use axon_chat::generate::quiz::QuizGenerator;
use axon_chat::generate::script::{ScriptGenerator, SourceSetPipeline};
use axon_chat::mask::PiiMasker;
use axon_chat::stream::InflightRegistry;
use axon_chat::ChatPipeline;
use axon_clients::backend::BackendClient;
use axon_clients::embeddings::EmbeddingsClient;
use axon_clients::llm::LlmClient;
use axon_clients::pii::PiiClient;
use axon_clients::storage::StorageClient;
use axon_clients::tts::TtsClient;
use axon_render::{JobRunner, JobStore, ProgressBus};
use axon_retrieval::contract::verify_embedding_contract;
use axon_retrieval::milvus::MilvusBackend;
use axon_retrieval::ragflow::RagflowBackend;
use axon_retrieval::Retriever;
use axon_telemetry::TelemetryEmitter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axon=info,tower_http=info".into()),
        )
        .init();

    let config = axon_core::config::AxonConfig::load(None)?;

    // ── Transport adapters ──────────────────────────────────────────
    let llm = Arc::new(LlmClient::new(&config.llm));
    let embeddings = EmbeddingsClient::new(&config.embedding);
    let backend = Arc::new(BackendClient::new(&config.backend));
    let pii = PiiClient::new(&config.pii);
    let tts = Arc::new(TtsClient::new(&config.tts));
    let storage = Arc::new(StorageClient::new(&config.storage));

    // ── Retrieval, with the startup embedding-contract check ────────
    let milvus = Arc::new(MilvusBackend::new(
        &config.milvus,
        EmbeddingsClient::new(&config.embedding),
    ));
    let ragflow = Arc::new(RagflowBackend::new(&config.ragflow));

    if let Err(e) = milvus.load_collection().await {
        warn!(err = %e, "collection load failed (continuing; search will surface errors)");
    }
    verify_embedding_contract(&milvus, &embeddings, config.embedding.contract_strict).await?;

    let retriever = Arc::new(Retriever::new(
        milvus.clone(),
        ragflow.clone(),
        config.chat.clone(),
    ));

    // ── Chat pipeline + generators ──────────────────────────────────
    let pipeline = Arc::new(ChatPipeline::new(
        PiiMasker::new(pii),
        Arc::clone(&retriever),
        Arc::clone(&llm),
        Arc::clone(&backend),
        config.chat.clone(),
    ));
    let emitter = Arc::new(TelemetryEmitter::new(
        &config.telemetry,
        &config.backend.base_url,
    ));
    let faq = FaqGenerator::new(Arc::clone(&retriever), Arc::clone(&llm), config.chat.top_k);
    let quiz = QuizGenerator::new(Arc::clone(&llm));
    let gap = GapAnalyzer::new(Arc::clone(&llm));
    let source_sets = Arc::new(SourceSetPipeline::new(
        Arc::clone(&backend),
        Arc::new(ScriptGenerator::new(Arc::clone(&llm), Arc::clone(&retriever))),
    ));

    // ── Render-job runner ───────────────────────────────────────────
    let store = JobStore::open(&config.render.db_path)?;
    let runner = Arc::new(JobRunner::new(
        store,
        Arc::new(ProgressBus::new()),
        Arc::clone(&backend),
        tts,
        storage,
        config.render.clone(),
    ));
    let recovered = runner.recover_orphans()?;
    if recovered > 0 {
        info!(count = recovered, "orphaned render jobs failed for retry");
    }

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState {
        config,
        pipeline,
        inflight: Arc::new(InflightRegistry::new()),
        emitter,
        runner: Arc::clone(&runner),
        faq,
        quiz,
        gap,
        source_sets,
        backend,
        llm,
        milvus_probe: milvus,
        ragflow_probe: ragflow,
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("axon gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(runner))
        .await?;

    Ok(())
}

/// Resolve on SIGTERM or ctrl-c; stop in-flight render steps so the
/// next startup's orphan sweep can hand them back to callers as FAILED.
async fn shutdown_signal(runner: Arc<JobRunner>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    runner.shutdown();
}
