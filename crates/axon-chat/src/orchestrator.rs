//! The non-streaming chat orchestrator: a linear staged pipeline.
//!
//! Stages: validate → mask(INPUT) → classify → branch(retrieval /
//! backend facts / none) → prompt → LLM → mask(OUTPUT) → guard →
//! assemble + telemetry. Failures that must still produce an answer
//! (PII detector down, LLM down) return a safe fallback body with the
//! error recorded in `meta.error_type`; retrieval exhaustion for policy
//! questions is the one failure that surfaces as an error to the caller.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{info, warn};

use axon_clients::backend::BackendClient;
use axon_clients::llm::{CompletionOptions, LlmClient};
use axon_core::config::ChatConfig;
use axon_core::types::{
    AnswerMeta, ChatAnswer, Domain, IntentResult, PiiStage, Route, Source, TurnRequest,
};
use axon_retrieval::{Retriever, Service};
use axon_telemetry::{EventType, TurnContext};

use crate::error::{ChatError, Result};
use crate::guard::{self, LanguageCheck};
use crate::intent::Classifier;
use crate::mask::{PiiMasker, REDACTED};
use crate::personalize::{self, Personalizer};
use crate::prompt::PromptBuilder;

/// Delivered when the PII detector is down: the turn is refused without
/// ever echoing the user's text.
pub const PII_FALLBACK_MESSAGE: &str =
    "보안 점검 기능에 일시적인 문제가 있어 질문을 처리하지 못했습니다. 잠시 후 다시 시도해 주세요.";

/// Delivered when the LLM fails after its retry.
pub const LLM_FALLBACK_MESSAGE: &str =
    "죄송합니다. 지금은 답변을 생성할 수 없습니다. 잠시 후 다시 시도해 주세요.";

pub struct ChatPipeline {
    pub masker: PiiMasker,
    pub classifier: Classifier,
    pub retriever: Arc<Retriever>,
    pub llm: Arc<LlmClient>,
    pub backend: Arc<BackendClient>,
    pub prompt: PromptBuilder,
    pub cfg: ChatConfig,
}

/// What the route branch produced before guarding.
pub(crate) struct RouteOutput {
    pub(crate) answer: String,
    pub(crate) sources: Vec<Source>,
    pub(crate) retriever_used: Option<axon_core::types::RetrieverUsed>,
    pub(crate) rag_used: bool,
    pub(crate) rag_latency_ms: Option<u64>,
    pub(crate) llm_latency_ms: Option<u64>,
    pub(crate) used_model: Option<String>,
    pub(crate) personalization_q: Option<String>,
    pub(crate) error_type: Option<String>,
    /// Answers not produced by the LLM skip the language retry.
    pub(crate) llm_generated: bool,
}

impl ChatPipeline {
    pub fn new(
        masker: PiiMasker,
        retriever: Arc<Retriever>,
        llm: Arc<LlmClient>,
        backend: Arc<BackendClient>,
        cfg: ChatConfig,
    ) -> Self {
        Self {
            masker,
            classifier: Classifier::new(cfg.clarify_threshold),
            retriever,
            llm,
            backend,
            prompt: PromptBuilder::new(&cfg),
            cfg,
        }
    }

    /// Run one full turn. Exactly one CHAT_TURN event is recorded on
    /// the context for every execution that passes validation.
    pub async fn handle_turn(&self, req: &TurnRequest, ctx: &TurnContext) -> Result<ChatAnswer> {
        let started = Instant::now();

        let query = req
            .current_query()
            .ok_or_else(|| ChatError::InvalidRequest("messages must end with a non-empty user message".into()))?
            .to_string();

        // ── Stage: PII mask (INPUT), fail-closed ────────────────────
        let masked_input = match self.masker.mask(&query, PiiStage::Input).await {
            Ok(m) => m,
            Err(e) => return Ok(self.pii_blocked(ctx, PiiStage::Input, &e, started)),
        };

        // ── Stage: intent + route ───────────────────────────────────
        let intent = self.classifier.classify(
            &masked_input.masked,
            req.user_role,
            req.domain,
            req.department.as_deref(),
        );
        info!(
            route = %intent.route,
            intent = %intent.intent,
            confidence = intent.confidence,
            "turn classified"
        );

        if intent.needs_clarify {
            let answer = intent
                .clarify_prompt
                .clone()
                .unwrap_or_else(|| "질문을 조금 더 구체적으로 말씀해 주세요.".to_string());
            let meta = AnswerMeta {
                route: Some(Route::Clarify),
                intent: Some(intent.intent),
                domain: Some(intent.domain),
                rag_used: false,
                latency_ms: started.elapsed().as_millis() as u64,
                has_pii_input: masked_input.has_pii,
                masked: masked_input.has_pii,
                ..Default::default()
            };
            self.record_chat_turn(ctx, &meta, &masked_input.masked, None);
            return Ok(ChatAnswer {
                answer,
                sources: Vec::new(),
                meta,
            });
        }

        // ── Stage: branch on route ──────────────────────────────────
        let route_output = match self
            .run_route(req, ctx, &intent, &masked_input.masked)
            .await
        {
            Ok(out) => out,
            Err(e @ ChatError::Retrieval(_)) => {
                // Truthful 503: no silent LLM-only degradation for
                // grounded questions.
                let meta = AnswerMeta {
                    route: Some(intent.route),
                    intent: Some(intent.intent),
                    domain: Some(intent.domain),
                    rag_used: false,
                    latency_ms: started.elapsed().as_millis() as u64,
                    has_pii_input: masked_input.has_pii,
                    masked: masked_input.has_pii,
                    error_type: Some(e.code().to_string()),
                    ..Default::default()
                };
                self.record_chat_turn(ctx, &meta, &masked_input.masked, Some(e.code()));
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        // ── Stage: PII mask (OUTPUT), fail-closed ───────────────────
        let masked_output = match self.masker.mask(&route_output.answer, PiiStage::Output).await {
            Ok(m) => m,
            Err(e) => return Ok(self.pii_blocked(ctx, PiiStage::Output, &e, started)),
        };

        // ── Stage: answer guard ─────────────────────────────────────
        let (final_text, language_error) = self
            .enforce_language(
                masked_output.masked,
                route_output.llm_generated,
                &masked_input.masked,
                req,
                &intent,
                &route_output.sources,
            )
            .await;
        let guarded = guard::apply_source_guard(
            intent.route,
            intent.intent,
            route_output.sources.len(),
            final_text,
        );

        let error_type = route_output
            .error_type
            .or(language_error.then(|| "LANGUAGE_ERROR".to_string()));

        let meta = AnswerMeta {
            route: Some(intent.route),
            intent: Some(intent.intent),
            domain: Some(intent.domain),
            used_model: route_output.used_model,
            rag_used: route_output.rag_used && !route_output.sources.is_empty(),
            rag_source_count: route_output.sources.len(),
            latency_ms: started.elapsed().as_millis() as u64,
            rag_latency_ms: route_output.rag_latency_ms,
            llm_latency_ms: route_output.llm_latency_ms,
            has_pii_input: masked_input.has_pii,
            has_pii_output: masked_output.has_pii,
            masked: masked_input.has_pii || masked_output.has_pii,
            rag_gap_candidate: guarded.rag_gap_candidate,
            retriever_used: route_output.retriever_used,
            error_type: error_type.clone(),
            personalization_q: route_output.personalization_q,
        };

        self.record_chat_turn(ctx, &meta, &masked_input.masked, error_type.as_deref());

        Ok(ChatAnswer {
            answer: guarded.answer,
            sources: route_output.sources,
            meta,
        })
    }

    async fn run_route(
        &self,
        req: &TurnRequest,
        _ctx: &TurnContext,
        intent: &IntentResult,
        masked_query: &str,
    ) -> Result<RouteOutput> {
        match intent.route {
            Route::RagInternal => self.run_rag(req, intent, masked_query, None).await,
            Route::MixedBackendRag => {
                let q = intent
                    .sub_intent_id
                    .clone()
                    .or_else(|| personalize::map_sub_intent(masked_query));
                let (facts, rag) = tokio::join!(
                    self.fetch_facts_soft(req, q.as_deref()),
                    self.search(masked_query, intent.domain, req)
                );
                let (sources, retriever_used, rag_latency_ms) = rag?;
                self.complete_with_prompt(
                    req,
                    intent,
                    masked_query,
                    sources,
                    Some(retriever_used),
                    rag_latency_ms,
                    facts,
                )
                .await
            }
            Route::BackendApi => self.run_backend(req, intent, masked_query).await,
            // Clarify is handled before branching; Error never reaches here.
            _ => {
                self.complete_with_prompt(req, intent, masked_query, Vec::new(), None, None, None)
                    .await
            }
        }
    }

    async fn run_rag(
        &self,
        req: &TurnRequest,
        intent: &IntentResult,
        masked_query: &str,
        facts: Option<String>,
    ) -> Result<RouteOutput> {
        let (sources, retriever_used, rag_latency_ms) =
            self.search(masked_query, intent.domain, req).await?;
        self.complete_with_prompt(
            req,
            intent,
            masked_query,
            sources,
            Some(retriever_used),
            rag_latency_ms,
            facts,
        )
        .await
    }

    pub(crate) async fn search(
        &self,
        masked_query: &str,
        domain: Domain,
        req: &TurnRequest,
    ) -> Result<(Vec<Source>, axon_core::types::RetrieverUsed, Option<u64>)> {
        let rag_started = Instant::now();
        let outcome = self
            .retriever
            .search(
                masked_query,
                domain,
                self.cfg.top_k,
                Service::Chat,
                &req.session_id,
            )
            .await?;
        Ok((
            outcome.sources,
            outcome.retriever_used,
            Some(rag_started.elapsed().as_millis() as u64),
        ))
    }

    /// Backend facts for the mixed route. A facts failure degrades to
    /// retrieval-only instead of failing the turn.
    async fn fetch_facts_soft(&self, req: &TurnRequest, q: Option<&str>) -> Option<String> {
        let q = q?;
        match self
            .backend
            .resolve_personalization(&req.user_id, q, None, req.department.as_deref())
            .await
        {
            Ok(facts) => Some(facts.to_string()),
            Err(e) => {
                warn!(q, err = %e, "backend facts unavailable, continuing with retrieval only");
                None
            }
        }
    }

    pub(crate) async fn run_backend(
        &self,
        req: &TurnRequest,
        intent: &IntentResult,
        masked_query: &str,
    ) -> Result<RouteOutput> {
        let Some(q) = intent
            .sub_intent_id
            .clone()
            .or_else(|| personalize::map_sub_intent(masked_query))
        else {
            // Router said "personal lookup" but no Q resolved — answer
            // with a pointer instead of guessing at someone's records.
            return Ok(RouteOutput {
                answer: "어떤 항목을 조회해 드릴까요? 연차, 근태, 초과근무, 복지포인트, 교육 이수 현황을 확인할 수 있습니다."
                    .to_string(),
                sources: Vec::new(),
                retriever_used: None,
                rag_used: false,
                rag_latency_ms: None,
                llm_latency_ms: None,
                used_model: None,
                personalization_q: None,
                error_type: None,
                llm_generated: false,
            });
        };

        let llm_started = Instant::now();
        match Personalizer::answer(&self.backend, &self.llm, &q, &req.user_id, None, None).await {
            Ok(personal) => Ok(RouteOutput {
                answer: personal.answer,
                sources: Vec::new(),
                retriever_used: None,
                rag_used: false,
                rag_latency_ms: None,
                llm_latency_ms: Some(llm_started.elapsed().as_millis() as u64),
                used_model: Some(self.llm.model.clone()),
                personalization_q: Some(personal.q),
                error_type: None,
                llm_generated: true,
            }),
            Err(e) => {
                warn!(q, err = %e, "personalisation resolve failed");
                Ok(RouteOutput {
                    answer: "요청하신 정보를 지금 확인할 수 없습니다. 잠시 후 다시 시도해 주세요.".to_string(),
                    sources: Vec::new(),
                    retriever_used: None,
                    rag_used: false,
                    rag_latency_ms: None,
                    llm_latency_ms: None,
                    used_model: None,
                    personalization_q: Some(q),
                    error_type: Some("BACKEND_ERROR".to_string()),
                    llm_generated: false,
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete_with_prompt(
        &self,
        req: &TurnRequest,
        intent: &IntentResult,
        masked_query: &str,
        sources: Vec<Source>,
        retriever_used: Option<axon_core::types::RetrieverUsed>,
        rag_latency_ms: Option<u64>,
        facts: Option<String>,
    ) -> Result<RouteOutput> {
        let messages = self.prompt.build(
            intent.route,
            intent.intent,
            intent.domain,
            req.user_role,
            masked_query,
            &sources,
            facts.as_deref(),
        );

        let llm_started = Instant::now();
        match self.llm.complete(&messages, &CompletionOptions::default()).await {
            Ok(completion) => Ok(RouteOutput {
                answer: completion.text,
                sources,
                retriever_used,
                rag_used: retriever_used.is_some(),
                rag_latency_ms,
                llm_latency_ms: Some(llm_started.elapsed().as_millis() as u64),
                used_model: Some(completion.model),
                personalization_q: None,
                error_type: None,
                llm_generated: true,
            }),
            Err(e) => {
                let code = match &e {
                    axon_clients::ClientError::Timeout { .. } => "LLM_TIMEOUT",
                    _ => "LLM_ERROR",
                };
                warn!(err = %e, code, "LLM invocation failed, returning fallback");
                Ok(RouteOutput {
                    answer: LLM_FALLBACK_MESSAGE.to_string(),
                    sources,
                    retriever_used,
                    rag_used: retriever_used.is_some(),
                    rag_latency_ms,
                    llm_latency_ms: Some(llm_started.elapsed().as_millis() as u64),
                    used_model: None,
                    personalization_q: None,
                    error_type: Some(code.to_string()),
                    llm_generated: false,
                })
            }
        }
    }

    /// One low-temperature retry when the answer drifted out of Korean.
    /// Returns the final text and whether the language error stands.
    async fn enforce_language(
        &self,
        answer: String,
        llm_generated: bool,
        masked_query: &str,
        req: &TurnRequest,
        intent: &IntentResult,
        sources: &[Source],
    ) -> (String, bool) {
        if !llm_generated || guard::check_language(&answer) == LanguageCheck::Ok {
            return (answer, false);
        }

        warn!("answer failed language check, retrying at low temperature");
        let messages = self.prompt.build(
            intent.route,
            intent.intent,
            intent.domain,
            req.user_role,
            // The retry re-asks the same masked question.
            &format!("{masked_query} (한국어로만 답해 주세요)"),
            sources,
            None,
        );
        let retried = self
            .llm
            .complete(
                &messages,
                &CompletionOptions {
                    temperature: Some(0.1),
                    ..Default::default()
                },
            )
            .await;

        match retried {
            Ok(completion) if guard::check_language(&completion.text) == LanguageCheck::Ok => {
                (completion.text, false)
            }
            Ok(completion) => (completion.text, true),
            Err(_) => (answer, true),
        }
    }

    /// Safe response for a fail-closed PII stop: SECURITY + CHAT_TURN
    /// events, and a body that never contains user text.
    fn pii_blocked(
        &self,
        ctx: &TurnContext,
        stage: PiiStage,
        err: &ChatError,
        started: Instant,
    ) -> ChatAnswer {
        warn!(%stage, err = %err, "PII detector unavailable, failing closed");
        ctx.record(
            EventType::Security,
            json!({
                "block_type": "PII_BLOCK",
                "stage": stage,
                "reason": err.to_string(),
            }),
        );
        let meta = AnswerMeta {
            route: Some(Route::Error),
            rag_used: false,
            latency_ms: started.elapsed().as_millis() as u64,
            // Unverifiable is treated as present.
            has_pii_input: stage == PiiStage::Input,
            has_pii_output: stage == PiiStage::Output,
            masked: true,
            error_type: Some("PII_DETECTOR_UNAVAILABLE".to_string()),
            ..Default::default()
        };
        self.record_chat_turn(ctx, &meta, REDACTED, Some("PII_DETECTOR_UNAVAILABLE"));
        ChatAnswer {
            answer: PII_FALLBACK_MESSAGE.to_string(),
            sources: Vec::new(),
            meta,
        }
    }

    /// Queue the turn's CHAT_TURN event. The context guarantees
    /// at-most-once per turn; duplicate calls are no-ops.
    pub(crate) fn record_chat_turn(
        &self,
        ctx: &TurnContext,
        meta: &AnswerMeta,
        masked_query: &str,
        error_code: Option<&str>,
    ) {
        ctx.record(
            EventType::ChatTurn,
            json!({
                "masked_query": masked_query,
                "route": meta.route,
                "intent": meta.intent,
                "domain": meta.domain,
                "rag_used": meta.rag_used,
                "rag_source_count": meta.rag_source_count,
                "rag_gap_candidate": meta.rag_gap_candidate,
                "retriever_used": meta.retriever_used,
                "latency_ms": meta.latency_ms,
                "rag_latency_ms": meta.rag_latency_ms,
                "llm_latency_ms": meta.llm_latency_ms,
                "has_pii_input": meta.has_pii_input,
                "has_pii_output": meta.has_pii_output,
                "used_model": meta.used_model,
                "error_code": error_code,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axon_clients::pii::PiiClient;
    use axon_core::config::{LlmConfig, PiiConfig};
    use axon_core::types::{Channel, MsgRole, TurnMessage, UserRole};
    use axon_retrieval::backend::SearchBackend;
    use axon_retrieval::RetrievalError;

    struct EmptyBackend;

    #[async_trait]
    impl SearchBackend for EmptyBackend {
        fn name(&self) -> &'static str {
            "empty"
        }
        async fn search(
            &self,
            _q: &str,
            _d: Domain,
            _k: usize,
        ) -> axon_retrieval::Result<Vec<Source>> {
            Ok(Vec::new())
        }
    }

    struct DownBackend;

    #[async_trait]
    impl SearchBackend for DownBackend {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn search(
            &self,
            _q: &str,
            _d: Domain,
            _k: usize,
        ) -> axon_retrieval::Result<Vec<Source>> {
            Err(RetrievalError::Backend {
                backend: "down",
                detail: "unreachable".into(),
            })
        }
    }

    fn unreachable_llm() -> Arc<LlmClient> {
        Arc::new(LlmClient::new(&LlmConfig {
            base_url: "http://127.0.0.1:1".into(),
            api_key: None,
            model: "test-model".into(),
            temperature: 0.2,
            max_tokens: 64,
            timeout_secs: 2,
            stream_timeout_secs: 2,
        }))
    }

    fn backend_client() -> Arc<BackendClient> {
        Arc::new(BackendClient::new(&axon_core::config::BackendConfig {
            base_url: "http://127.0.0.1:1".into(),
            internal_token: "t".into(),
            timeout_secs: 1,
        }))
    }

    fn pipeline(pii_enabled: bool, retrieval_down: bool) -> ChatPipeline {
        let masker = PiiMasker::new(PiiClient::new(&PiiConfig {
            base_url: "http://127.0.0.1:1".into(),
            enabled: pii_enabled,
            timeout_secs: 1,
        }));
        let cfg = ChatConfig::default();
        let retriever: Arc<Retriever> = if retrieval_down {
            Arc::new(Retriever::new(
                Arc::new(DownBackend),
                Arc::new(DownBackend),
                cfg.clone(),
            ))
        } else {
            Arc::new(Retriever::new(
                Arc::new(EmptyBackend),
                Arc::new(EmptyBackend),
                cfg.clone(),
            ))
        };
        ChatPipeline::new(masker, retriever, unreachable_llm(), backend_client(), cfg)
    }

    fn turn(text: &str) -> TurnRequest {
        TurnRequest {
            session_id: "s1".into(),
            user_id: "u1".into(),
            user_role: UserRole::Employee,
            department: None,
            domain: Some(Domain::Policy),
            channel: Channel::Web,
            messages: vec![TurnMessage {
                role: MsgRole::User,
                content: text.into(),
            }],
            request_id: None,
        }
    }

    #[tokio::test]
    async fn empty_message_is_invalid() {
        let p = pipeline(false, false);
        let ctx = TurnContext::new("s1", "u1", None);
        let mut req = turn("x");
        req.messages[0].content = "   ".into();
        let err = p.handle_turn(&req, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        // validation failures are rejected before any work, telemetry included
        assert!(ctx.take_events().is_empty());
    }

    #[tokio::test]
    async fn pii_failure_blocks_and_emits_security_event() {
        let p = pipeline(true, false);
        let ctx = TurnContext::new("s1", "u1", None);
        let answer = p.handle_turn(&turn("주민번호 950101-1234567"), &ctx).await.unwrap();

        assert_eq!(answer.answer, PII_FALLBACK_MESSAGE);
        assert_eq!(answer.meta.error_type.as_deref(), Some("PII_DETECTOR_UNAVAILABLE"));

        let events = ctx.take_events();
        assert_eq!(events.len(), 2);
        let security = events
            .iter()
            .find(|e| e.event_type == axon_telemetry::EventType::Security)
            .unwrap();
        assert_eq!(security.payload["block_type"], "PII_BLOCK");
        let chat_turn = events
            .iter()
            .find(|e| e.event_type == axon_telemetry::EventType::ChatTurn)
            .unwrap();
        // the original text must never reach telemetry
        assert_eq!(chat_turn.payload["masked_query"], REDACTED);
        assert!(!chat_turn.payload.to_string().contains("950101"));
    }

    #[tokio::test]
    async fn clarify_short_circuits_without_retrieval() {
        let p = pipeline(false, true); // retrieval down would fail if touched
        let ctx = TurnContext::new("s1", "u1", None);
        let mut req = turn("그거 어떻게 돼?");
        req.domain = None;
        let answer = p.handle_turn(&req, &ctx).await.unwrap();
        assert_eq!(answer.meta.route, Some(Route::Clarify));
        assert!(!answer.meta.rag_used);
        assert!(!answer.answer.is_empty());
        assert_eq!(ctx.take_events().len(), 1);
    }

    #[tokio::test]
    async fn retrieval_exhaustion_surfaces_as_unavailable() {
        let p = pipeline(false, true);
        let ctx = TurnContext::new("s1", "u1", None);
        let err = p.handle_turn(&turn("연차휴가 규정 알려줘"), &ctx).await.unwrap_err();
        assert_eq!(err.code(), "RAG_SEARCH_UNAVAILABLE");
        // the failed turn still emits its CHAT_TURN event
        let events = ctx.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["error_code"], "RAG_SEARCH_UNAVAILABLE");
    }

    #[tokio::test]
    async fn llm_failure_returns_fallback_with_guardrail() {
        // retrieval yields zero sources; the LLM is unreachable; the
        // caller still gets a 200-shaped answer with the soft guardrail.
        let p = pipeline(false, false);
        let ctx = TurnContext::new("s1", "u1", None);
        let answer = p.handle_turn(&turn("연차휴가 규정 알려줘"), &ctx).await.unwrap();
        assert!(answer.answer.contains(LLM_FALLBACK_MESSAGE));
        assert!(answer.answer.starts_with("⚠️"));
        assert!(answer.meta.rag_gap_candidate);
        assert!(!answer.meta.rag_used);
        assert_eq!(answer.meta.error_type.as_deref(), Some("LLM_ERROR"));
        assert_eq!(ctx.take_events().len(), 1);
    }

    #[tokio::test]
    async fn chat_turn_event_is_exactly_once_per_turn() {
        let p = pipeline(false, false);
        let ctx = TurnContext::new("s1", "u1", None);
        let _ = p.handle_turn(&turn("연차휴가 규정"), &ctx).await.unwrap();
        // a second record attempt on the same context is a no-op
        assert!(!ctx.record(EventType::ChatTurn, json!({})));
        assert_eq!(ctx.take_events().len(), 1);
    }
}
