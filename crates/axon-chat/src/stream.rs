//! The streaming chat orchestrator: a producer task feeding newline-
//! delimited JSON events through a bounded channel.
//!
//! Event order per response: one `meta`, zero or more `token`s, then
//! exactly one `done` or one `error` — never both. The channel is the
//! backpressure: the next LLM token is not consumed until the previous
//! event was accepted by the writer. A dropped receiver means the
//! client went away; the LLM call is cancelled and the turn's telemetry
//! is still emitted exactly once, with `CLIENT_DISCONNECTED`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use axon_clients::llm::{CompletionOptions, LlmStreamEvent};
use axon_core::types::{AnswerMeta, PiiStage, Route, TurnRequest};
use axon_telemetry::{TelemetryEmitter, TurnContext};

use crate::error::ChatError;
use crate::guard::SOFT_GUARDRAIL_PREFIX;
use crate::orchestrator::{ChatPipeline, PII_FALLBACK_MESSAGE};

/// How long an in-flight request id blocks duplicates.
const INFLIGHT_WINDOW: Duration = Duration::from_secs(600);
/// Completed ids are kept this long for retry deduplication.
const COMPLETED_RETENTION: Duration = Duration::from_secs(1800);

const EVENT_BUFFER: usize = 64;

/// One line of the NDJSON response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamWireEvent {
    Meta {
        request_id: String,
        model: String,
        timestamp: String,
    },
    Token {
        text: String,
    },
    Done {
        finish_reason: String,
        total_tokens: u32,
        elapsed_ms: u64,
        ttfb_ms: u64,
    },
    Error {
        code: String,
        message: String,
        request_id: String,
    },
}

enum InflightState {
    Active(Instant),
    Completed(Instant),
}

/// Duplicate-suppression registry for streaming request ids.
#[derive(Default)]
pub struct InflightRegistry {
    map: DashMap<String, InflightState>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `request_id`. An active claim younger than the look-up
    /// window is a duplicate; a completed or stale claim may be retried.
    pub fn begin(&self, request_id: &str) -> Result<(), ChatError> {
        self.prune();
        let now = Instant::now();
        let active_at = self.map.get(request_id).and_then(|s| match &*s {
            InflightState::Active(at) => Some(*at),
            InflightState::Completed(_) => None,
        });
        if let Some(at) = active_at {
            if now.duration_since(at) < INFLIGHT_WINDOW {
                return Err(ChatError::DuplicateInflight {
                    request_id: request_id.to_string(),
                });
            }
        }
        self.map
            .insert(request_id.to_string(), InflightState::Active(now));
        Ok(())
    }

    pub fn complete(&self, request_id: &str) {
        self.map
            .insert(request_id.to_string(), InflightState::Completed(Instant::now()));
    }

    fn prune(&self) {
        let now = Instant::now();
        self.map.retain(|_, state| match state {
            InflightState::Active(at) => now.duration_since(*at) < INFLIGHT_WINDOW,
            InflightState::Completed(at) => now.duration_since(*at) < COMPLETED_RETENTION,
        });
    }

    #[cfg(test)]
    fn mark_active_at(&self, request_id: &str, at: Instant) {
        self.map
            .insert(request_id.to_string(), InflightState::Active(at));
    }
}

/// Spawn the producer for one streaming turn and return the event
/// receiver. The caller turns events into NDJSON lines and flushes the
/// telemetry context after the last one.
pub fn stream_turn(
    pipeline: Arc<ChatPipeline>,
    registry: Arc<InflightRegistry>,
    emitter: Arc<TelemetryEmitter>,
    req: TurnRequest,
    ctx: Arc<TurnContext>,
    cancel: CancellationToken,
) -> mpsc::Receiver<StreamWireEvent> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        let request_id = req.request_id.clone().unwrap_or_default();
        run(pipeline, registry, req, &ctx, cancel, &tx, &request_id).await;
        // Emission here covers the disconnect path; the gateway's
        // post-stream flush is a no-op after this drain.
        emitter.flush(&ctx);
    });
    rx
}

async fn run(
    pipeline: Arc<ChatPipeline>,
    registry: Arc<InflightRegistry>,
    req: TurnRequest,
    ctx: &Arc<TurnContext>,
    cancel: CancellationToken,
    tx: &mpsc::Sender<StreamWireEvent>,
    request_id: &str,
) {
    let started = Instant::now();

    let send_error = |code: &str, message: String| {
        let event = StreamWireEvent::Error {
            code: code.to_string(),
            message,
            request_id: request_id.to_string(),
        };
        let tx = tx.clone();
        async move {
            let _ = tx.send(event).await;
        }
    };

    if request_id.is_empty() {
        send_error("INVALID_REQUEST", "request_id is required for streaming".into()).await;
        return;
    }

    if let Err(e) = registry.begin(request_id) {
        warn!(request_id, "duplicate streaming request rejected");
        send_error(e.code(), "이미 처리 중인 요청입니다. 잠시만 기다려 주세요.".into()).await;
        return;
    }

    // From here on every exit must release the request id.
    let outcome = drive(&pipeline, &req, ctx, &cancel, tx, request_id, started).await;
    registry.complete(request_id);

    if let Err((code, message)) = outcome {
        send_error(&code, message).await;
    }
}

/// The streaming pipeline proper. Returns Err((code, message)) when a
/// terminal `error` event must be emitted.
async fn drive(
    pipeline: &ChatPipeline,
    req: &TurnRequest,
    ctx: &Arc<TurnContext>,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<StreamWireEvent>,
    request_id: &str,
    started: Instant,
) -> Result<(), (String, String)> {
    let Some(query) = req.current_query().map(str::to_string) else {
        return Err((
            "INVALID_REQUEST".into(),
            "messages must end with a non-empty user message".into(),
        ));
    };

    // `meta` goes out first so the client's silence timeout is
    // disarmed before any slow work starts.
    if tx
        .send(StreamWireEvent::Meta {
            request_id: request_id.to_string(),
            model: pipeline.llm.model.clone(),
            timestamp: Utc::now().to_rfc3339(),
        })
        .await
        .is_err()
    {
        record_disconnect(pipeline, ctx, started);
        return Ok(());
    }

    // ── PII mask (INPUT), fail-closed ───────────────────────────────
    let masked_input = match pipeline.masker.mask(&query, PiiStage::Input).await {
        Ok(m) => m,
        Err(e) => {
            ctx.record(
                axon_telemetry::EventType::Security,
                json!({ "block_type": "PII_BLOCK", "stage": PiiStage::Input, "reason": e.to_string() }),
            );
            let meta = AnswerMeta {
                route: Some(Route::Error),
                latency_ms: started.elapsed().as_millis() as u64,
                has_pii_input: true,
                masked: true,
                error_type: Some("PII_DETECTOR_UNAVAILABLE".into()),
                ..Default::default()
            };
            pipeline.record_chat_turn(ctx, &meta, crate::mask::REDACTED, Some("PII_DETECTOR_UNAVAILABLE"));
            return Err(("PII_DETECTOR_UNAVAILABLE".into(), PII_FALLBACK_MESSAGE.into()));
        }
    };

    // ── Intent + route ──────────────────────────────────────────────
    let intent = pipeline.classifier.classify(
        &masked_input.masked,
        req.user_role,
        req.domain,
        req.department.as_deref(),
    );
    info!(request_id, route = %intent.route, intent = %intent.intent, "stream turn classified");

    // Single-shot routes reply with one token and a done event.
    if intent.needs_clarify {
        let text = intent
            .clarify_prompt
            .clone()
            .unwrap_or_else(|| "질문을 조금 더 구체적으로 말씀해 주세요.".to_string());
        let meta = AnswerMeta {
            route: Some(Route::Clarify),
            intent: Some(intent.intent),
            domain: Some(intent.domain),
            latency_ms: started.elapsed().as_millis() as u64,
            has_pii_input: masked_input.has_pii,
            masked: masked_input.has_pii,
            ..Default::default()
        };
        pipeline.record_chat_turn(ctx, &meta, &masked_input.masked, None);
        return send_single_shot(tx, pipeline, ctx, text, started).await;
    }

    if intent.route == Route::BackendApi {
        let out = pipeline
            .run_backend(req, &intent, &masked_input.masked)
            .await
            .map_err(|e| (e.code().to_string(), e.to_string()))?;
        let meta = AnswerMeta {
            route: Some(intent.route),
            intent: Some(intent.intent),
            domain: Some(intent.domain),
            used_model: out.used_model.clone(),
            latency_ms: started.elapsed().as_millis() as u64,
            llm_latency_ms: out.llm_latency_ms,
            has_pii_input: masked_input.has_pii,
            masked: masked_input.has_pii,
            personalization_q: out.personalization_q.clone(),
            error_type: out.error_type.clone(),
            ..Default::default()
        };
        pipeline.record_chat_turn(ctx, &meta, &masked_input.masked, out.error_type.as_deref());
        return send_single_shot(tx, pipeline, ctx, out.answer, started).await;
    }

    // ── Retrieval for grounded routes ───────────────────────────────
    let (sources, retriever_used, rag_latency_ms) = match intent.route {
        Route::RagInternal | Route::MixedBackendRag => {
            match pipeline.search(&masked_input.masked, intent.domain, req).await {
                Ok(r) => r,
                Err(e) => {
                    let meta = AnswerMeta {
                        route: Some(intent.route),
                        intent: Some(intent.intent),
                        domain: Some(intent.domain),
                        latency_ms: started.elapsed().as_millis() as u64,
                        has_pii_input: masked_input.has_pii,
                        masked: masked_input.has_pii,
                        error_type: Some(e.code().to_string()),
                        ..Default::default()
                    };
                    pipeline.record_chat_turn(ctx, &meta, &masked_input.masked, Some(e.code()));
                    return Err((e.code().to_string(), e.to_string()));
                }
            }
        }
        _ => (Vec::new(), axon_core::types::RetrieverUsed::None, None),
    };
    let rag_used = !sources.is_empty();

    let messages = pipeline.prompt.build(
        intent.route,
        intent.intent,
        intent.domain,
        req.user_role,
        &masked_input.masked,
        &sources,
        None,
    );

    // Soft guardrail leads the stream so the warning is visible before
    // any generated prose.
    let gap = intent.route == Route::RagInternal
        && sources.is_empty()
        && matches!(
            intent.intent,
            axon_core::types::Intent::PolicyQa | axon_core::types::Intent::EducationQa
        );
    if gap
        && tx
            .send(StreamWireEvent::Token {
                text: SOFT_GUARDRAIL_PREFIX.to_string(),
            })
            .await
            .is_err()
    {
        record_disconnect(pipeline, ctx, started);
        return Ok(());
    }

    // ── LLM producer task ───────────────────────────────────────────
    let (llm_tx, mut llm_rx) = mpsc::channel::<LlmStreamEvent>(EVENT_BUFFER);
    let llm = Arc::clone(&pipeline.llm);
    let llm_cancel = cancel.child_token();
    let producer_cancel = llm_cancel.clone();
    let producer = tokio::spawn(async move {
        llm.stream(&messages, &CompletionOptions::default(), llm_tx, producer_cancel)
            .await
    });

    let mut ttfb_ms: Option<u64> = None;
    let llm_started = Instant::now();
    let mut finish = None;

    while let Some(event) = llm_rx.recv().await {
        match event {
            LlmStreamEvent::TextDelta { text } => {
                ttfb_ms.get_or_insert_with(|| llm_started.elapsed().as_millis() as u64);
                if tx.send(StreamWireEvent::Token { text }).await.is_err() {
                    // Client went away mid-stream: cancel upstream, no
                    // further events, telemetry with CLIENT_DISCONNECTED.
                    llm_cancel.cancel();
                    let meta = AnswerMeta {
                        route: Some(intent.route),
                        intent: Some(intent.intent),
                        domain: Some(intent.domain),
                        rag_used,
                        rag_source_count: sources.len(),
                        latency_ms: started.elapsed().as_millis() as u64,
                        rag_latency_ms,
                        retriever_used: Some(retriever_used),
                        has_pii_input: masked_input.has_pii,
                        masked: masked_input.has_pii,
                        error_type: Some("CLIENT_DISCONNECTED".into()),
                        ..Default::default()
                    };
                    pipeline.record_chat_turn(ctx, &meta, &masked_input.masked, Some("CLIENT_DISCONNECTED"));
                    return Ok(());
                }
            }
            LlmStreamEvent::Done {
                model,
                prompt_tokens,
                completion_tokens,
                finish_reason,
            } => {
                finish = Some((model, prompt_tokens + completion_tokens, finish_reason));
            }
            LlmStreamEvent::Error { message } => {
                warn!(request_id, %message, "stream LLM error");
            }
        }
    }

    let produced = producer.await;
    let (used_model, total_tokens, finish_reason) = match (produced, finish) {
        (Ok(Ok(())), Some(done)) => done,
        (Ok(Err(e)), _) => {
            let code = match &e {
                axon_clients::ClientError::Timeout { .. } => "LLM_TIMEOUT",
                axon_clients::ClientError::Cancelled => "CLIENT_DISCONNECTED",
                _ => "LLM_ERROR",
            };
            let meta = AnswerMeta {
                route: Some(intent.route),
                intent: Some(intent.intent),
                domain: Some(intent.domain),
                rag_used,
                rag_source_count: sources.len(),
                latency_ms: started.elapsed().as_millis() as u64,
                rag_latency_ms,
                retriever_used: Some(retriever_used),
                has_pii_input: masked_input.has_pii,
                masked: masked_input.has_pii,
                error_type: Some(code.into()),
                ..Default::default()
            };
            pipeline.record_chat_turn(ctx, &meta, &masked_input.masked, Some(code));
            if code == "CLIENT_DISCONNECTED" {
                return Ok(());
            }
            return Err((code.into(), e.to_string()));
        }
        (Err(join_err), _) => {
            return Err(("LLM_ERROR".into(), join_err.to_string()));
        }
        (Ok(Ok(())), None) => (pipeline.llm.model.clone(), 0, "stop".to_string()),
    };

    // ── Done: metrics + telemetry, exactly once ─────────────────────
    let meta = AnswerMeta {
        route: Some(intent.route),
        intent: Some(intent.intent),
        domain: Some(intent.domain),
        used_model: Some(used_model),
        rag_used,
        rag_source_count: sources.len(),
        latency_ms: started.elapsed().as_millis() as u64,
        rag_latency_ms,
        llm_latency_ms: Some(llm_started.elapsed().as_millis() as u64),
        has_pii_input: masked_input.has_pii,
        masked: masked_input.has_pii,
        rag_gap_candidate: gap,
        retriever_used: Some(retriever_used),
        ..Default::default()
    };
    pipeline.record_chat_turn(ctx, &meta, &masked_input.masked, None);

    let _ = tx
        .send(StreamWireEvent::Done {
            finish_reason,
            total_tokens,
            elapsed_ms: started.elapsed().as_millis() as u64,
            ttfb_ms: ttfb_ms.unwrap_or_else(|| started.elapsed().as_millis() as u64),
        })
        .await;
    Ok(())
}

async fn send_single_shot(
    tx: &mpsc::Sender<StreamWireEvent>,
    pipeline: &ChatPipeline,
    ctx: &Arc<TurnContext>,
    text: String,
    started: Instant,
) -> Result<(), (String, String)> {
    if tx.send(StreamWireEvent::Token { text }).await.is_err() {
        record_disconnect(pipeline, ctx, started);
        return Ok(());
    }
    let _ = tx
        .send(StreamWireEvent::Done {
            finish_reason: "stop".into(),
            total_tokens: 0,
            elapsed_ms: started.elapsed().as_millis() as u64,
            ttfb_ms: started.elapsed().as_millis() as u64,
        })
        .await;
    Ok(())
}

fn record_disconnect(pipeline: &ChatPipeline, ctx: &Arc<TurnContext>, started: Instant) {
    let meta = AnswerMeta {
        route: Some(Route::Error),
        latency_ms: started.elapsed().as_millis() as u64,
        error_type: Some("CLIENT_DISCONNECTED".into()),
        ..Default::default()
    };
    pipeline.record_chat_turn(ctx, &meta, "", Some("CLIENT_DISCONNECTED"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_active_id_is_rejected() {
        let reg = InflightRegistry::new();
        reg.begin("R1").unwrap();
        let err = reg.begin("R1").unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_INFLIGHT");
    }

    #[test]
    fn completed_id_may_retry() {
        let reg = InflightRegistry::new();
        reg.begin("R1").unwrap();
        reg.complete("R1");
        assert!(reg.begin("R1").is_ok());
    }

    #[test]
    fn stale_active_id_may_retry() {
        let Some(stale) = Instant::now().checked_sub(INFLIGHT_WINDOW + Duration::from_secs(1))
        else {
            return; // clock too young to backdate (fresh container)
        };
        let reg = InflightRegistry::new();
        reg.mark_active_at("R1", stale);
        assert!(reg.begin("R1").is_ok());
    }

    #[test]
    fn distinct_ids_are_independent() {
        let reg = InflightRegistry::new();
        reg.begin("R1").unwrap();
        assert!(reg.begin("R2").is_ok());
    }

    #[test]
    fn wire_events_serialise_with_type_tag() {
        let meta = StreamWireEvent::Meta {
            request_id: "R1".into(),
            model: "m".into(),
            timestamp: "t".into(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], "meta");
        assert_eq!(json["request_id"], "R1");

        let token = StreamWireEvent::Token { text: "안".into() };
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["text"], "안");

        let done = StreamWireEvent::Done {
            finish_reason: "stop".into(),
            total_tokens: 10,
            elapsed_ms: 120,
            ttfb_ms: 15,
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["total_tokens"], 10);

        let err = StreamWireEvent::Error {
            code: "DUPLICATE_INFLIGHT".into(),
            message: "wait".into(),
            request_id: "R1".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "DUPLICATE_INFLIGHT");
    }
}
