//! Dual-backend search with deterministic fallback and a per-process
//! result cache.
//!
//! Backend choice is per service (chat / faq / script) from
//! configuration. If the chosen backend errors — or, for chat only,
//! returns zero results — the other backend is attempted once. Chat
//! exhaustion surfaces `RAG_SEARCH_UNAVAILABLE`; there is no silent
//! LLM-only degradation for policy questions.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use axon_core::config::{ChatConfig, RetrieverChoice};
use axon_core::types::{Domain, RetrieverUsed, Source};

use crate::backend::SearchBackend;
use crate::cache::SearchCache;
use crate::error::{RetrievalError, Result};

/// Which caller is searching; decides the primary backend and whether
/// zero results trigger fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Chat,
    Faq,
    Script,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub sources: Vec<Source>,
    pub retriever_used: RetrieverUsed,
}

pub struct Retriever {
    milvus: Arc<dyn SearchBackend>,
    ragflow: Arc<dyn SearchBackend>,
    cache: SearchCache,
    timeout: Duration,
    cfg: ChatConfig,
}

impl Retriever {
    pub fn new(milvus: Arc<dyn SearchBackend>, ragflow: Arc<dyn SearchBackend>, cfg: ChatConfig) -> Self {
        Self {
            milvus,
            ragflow,
            cache: SearchCache::new(cfg.cache_ttl_secs, cfg.cache_capacity),
            timeout: Duration::from_secs(cfg.retrieval_timeout_secs),
            cfg,
        }
    }

    /// One backend call under the per-call retrieval deadline. A
    /// timeout counts as a backend failure so the fallback rule applies.
    async fn timed_search(
        &self,
        backend: &Arc<dyn SearchBackend>,
        query: &str,
        domain: Domain,
        top_k: usize,
    ) -> Result<Vec<Source>> {
        match tokio::time::timeout(self.timeout, backend.search(query, domain, top_k)).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Backend {
                backend: backend.name(),
                detail: format!("search timed out after {:?}", self.timeout),
            }),
        }
    }

    fn choice(&self, service: Service) -> RetrieverChoice {
        match service {
            Service::Chat => self.cfg.retriever,
            Service::Faq => self.cfg.faq_retriever,
            Service::Script => self.cfg.script_retriever,
        }
    }

    fn pair(&self, choice: RetrieverChoice) -> (&Arc<dyn SearchBackend>, &Arc<dyn SearchBackend>) {
        match choice {
            RetrieverChoice::Milvus => (&self.milvus, &self.ragflow),
            RetrieverChoice::Ragflow => (&self.ragflow, &self.milvus),
        }
    }

    fn used(choice: RetrieverChoice, fell_back: bool) -> RetrieverUsed {
        match (choice, fell_back) {
            (RetrieverChoice::Milvus, false) => RetrieverUsed::Milvus,
            (RetrieverChoice::Milvus, true) => RetrieverUsed::RagflowFallback,
            (RetrieverChoice::Ragflow, false) => RetrieverUsed::Ragflow,
            (RetrieverChoice::Ragflow, true) => RetrieverUsed::MilvusFallback,
        }
    }

    /// Search with caching and fallback. `request_id` stamps the
    /// similarity log line for correlation.
    pub async fn search(
        &self,
        query: &str,
        domain: Domain,
        top_k: usize,
        service: Service,
        request_id: &str,
    ) -> Result<SearchOutcome> {
        let key = SearchCache::key(query, domain, top_k);
        if let Some(sources) = self.cache.get(&key) {
            info!(request_id, %domain, hits = sources.len(), "retrieval cache hit");
            return Ok(SearchOutcome {
                sources,
                retriever_used: Self::used(self.choice(service), false),
            });
        }

        let choice = self.choice(service);
        let (primary, secondary) = self.pair(choice);

        let (sources, fell_back) = match self.timed_search(primary, query, domain, top_k).await {
            Ok(sources) if sources.is_empty() && service == Service::Chat => {
                warn!(request_id, backend = primary.name(), "zero results, trying fallback backend");
                match self.timed_search(secondary, query, domain, top_k).await {
                    Ok(fallback_sources) => (fallback_sources, true),
                    // The primary answered (with nothing); an erroring
                    // fallback does not make the turn unavailable.
                    Err(e) => {
                        warn!(request_id, err = %e, "fallback backend failed, keeping empty result");
                        (sources, false)
                    }
                }
            }
            Ok(sources) => (sources, false),
            Err(primary_err) => {
                warn!(request_id, backend = primary.name(), err = %primary_err, "primary backend failed");
                match self.timed_search(secondary, query, domain, top_k).await {
                    Ok(sources) => (sources, true),
                    Err(secondary_err) => {
                        if service == Service::Chat {
                            return Err(RetrievalError::Unavailable {
                                detail: format!("{primary_err}; {secondary_err}"),
                            });
                        }
                        // Non-chat callers tolerate an empty context.
                        warn!(request_id, err = %secondary_err, "both backends failed, returning empty");
                        (Vec::new(), true)
                    }
                }
            }
        };

        log_similarity(request_id, domain, &sources);
        self.cache.put(key, sources.clone());

        Ok(SearchOutcome {
            sources,
            retriever_used: Self::used(choice, fell_back),
        })
    }
}

/// Per-search similarity distribution: min/max/mean/count plus bucket
/// counts, one line per search.
fn log_similarity(request_id: &str, domain: Domain, sources: &[Source]) {
    if sources.is_empty() {
        info!(request_id, %domain, count = 0, "similarity distribution: no hits");
        return;
    }
    let scores: Vec<f32> = sources.iter().map(|s| s.score).collect();
    let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mean = scores.iter().sum::<f32>() / scores.len() as f32;
    let high = scores.iter().filter(|s| **s >= 0.9).count();
    let good = scores.iter().filter(|s| **s >= 0.7 && **s < 0.9).count();
    let weak = scores.iter().filter(|s| **s >= 0.5 && **s < 0.7).count();
    let poor = scores.iter().filter(|s| **s < 0.5).count();
    info!(
        request_id,
        %domain,
        count = scores.len(),
        min = format!("{min:.3}"),
        max = format!("{max:.3}"),
        mean = format!("{mean:.3}"),
        high,
        good,
        weak,
        poor,
        "similarity distribution"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::make_source;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBackend {
        name: &'static str,
        sources: Vec<Source>,
        calls: AtomicUsize,
    }

    impl FixedBackend {
        fn new(name: &'static str, sources: Vec<Source>) -> Arc<Self> {
            Arc::new(Self {
                name,
                sources,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SearchBackend for FixedBackend {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn search(&self, _q: &str, _d: Domain, top_k: usize) -> Result<Vec<Source>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(crate::backend::finalise(self.sources.clone(), top_k))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl SearchBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn search(&self, _q: &str, _d: Domain, _k: usize) -> Result<Vec<Source>> {
            Err(RetrievalError::Backend {
                backend: "failing",
                detail: "down".into(),
            })
        }
    }

    fn cfg() -> ChatConfig {
        ChatConfig::default()
    }

    #[tokio::test]
    async fn primary_success_uses_no_fallback() {
        let primary = FixedBackend::new("milvus", vec![make_source("d1", 0.9)]);
        let secondary = FixedBackend::new("ragflow", vec![make_source("d2", 0.8)]);
        let r = Retriever::new(primary.clone(), secondary.clone(), cfg());
        let out = r
            .search("q", Domain::Policy, 5, Service::Chat, "req-1")
            .await
            .unwrap();
        assert_eq!(out.retriever_used, RetrieverUsed::Milvus);
        assert_eq!(out.sources[0].doc_id, "d1");
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chat_zero_results_fall_back_once() {
        let primary = FixedBackend::new("milvus", vec![]);
        let secondary = FixedBackend::new("ragflow", vec![make_source("d2", 0.7)]);
        let r = Retriever::new(primary, secondary.clone(), cfg());
        let out = r
            .search("q", Domain::Policy, 5, Service::Chat, "req-2")
            .await
            .unwrap();
        assert_eq!(out.retriever_used, RetrieverUsed::RagflowFallback);
        assert_eq!(out.sources.len(), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn faq_zero_results_do_not_fall_back() {
        let primary = FixedBackend::new("milvus", vec![]);
        let secondary = FixedBackend::new("ragflow", vec![make_source("d2", 0.7)]);
        let r = Retriever::new(primary, secondary.clone(), cfg());
        let out = r
            .search("q", Domain::Policy, 5, Service::Faq, "req-3")
            .await
            .unwrap();
        assert!(out.sources.is_empty());
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chat_exhaustion_is_unavailable() {
        let r = Retriever::new(Arc::new(FailingBackend), Arc::new(FailingBackend), cfg());
        let err = r
            .search("q", Domain::Policy, 5, Service::Chat, "req-4")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RAG_SEARCH_UNAVAILABLE");
    }

    #[tokio::test]
    async fn non_chat_exhaustion_returns_empty() {
        let r = Retriever::new(Arc::new(FailingBackend), Arc::new(FailingBackend), cfg());
        let out = r
            .search("q", Domain::Policy, 5, Service::Script, "req-5")
            .await
            .unwrap();
        assert!(out.sources.is_empty());
    }

    struct SlowBackend;

    #[async_trait]
    impl SearchBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow"
        }
        async fn search(&self, _q: &str, _d: Domain, _k: usize) -> Result<Vec<Source>> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok(vec![make_source("late", 0.9)])
        }
    }

    #[tokio::test]
    async fn slow_primary_times_out_into_fallback() {
        let mut config = cfg();
        config.retrieval_timeout_secs = 0;
        let secondary = FixedBackend::new("ragflow", vec![make_source("d2", 0.6)]);
        let r = Retriever::new(Arc::new(SlowBackend), secondary.clone(), config);
        let out = r
            .search("q", Domain::Policy, 5, Service::Chat, "req-8")
            .await
            .unwrap();
        assert_eq!(out.retriever_used, RetrieverUsed::RagflowFallback);
        assert_eq!(out.sources[0].doc_id, "d2");
    }

    #[tokio::test]
    async fn second_search_hits_cache() {
        let primary = FixedBackend::new("milvus", vec![make_source("d1", 0.9)]);
        let secondary = FixedBackend::new("ragflow", vec![]);
        let r = Retriever::new(primary.clone(), secondary, cfg());
        r.search("q", Domain::Policy, 5, Service::Chat, "req-6").await.unwrap();
        r.search("Q", Domain::Policy, 5, Service::Chat, "req-7").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }
}
