//! External retrieval-engine backend — `POST /v1/retrieval`.
//!
//! The engine's result fields vary across versions (`doc_id` vs
//! `chunk_id`, `content` vs `text` vs `snippet`…); serde aliases absorb
//! the drift so callers see one shape.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use axon_core::config::RagflowConfig;
use axon_core::types::{Domain, Source};

use crate::backend::{finalise, SearchBackend};
use crate::error::{RetrievalError, Result};

pub struct RagflowBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    cfg: RagflowConfig,
}

impl RagflowBackend {
    pub fn new(cfg: &RagflowConfig) -> Self {
        Self {
            client: axon_clients::http::build_client(cfg.timeout_secs),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            cfg: cfg.clone(),
        }
    }

    fn dataset_ids(&self, domain: Domain) -> Vec<String> {
        let ids = &self.cfg.dataset_ids;
        let one = |v: &Option<String>| v.iter().cloned().collect::<Vec<_>>();
        match domain {
            Domain::Policy => one(&ids.policy),
            Domain::Incident => one(&ids.incident),
            Domain::Education => one(&ids.education),
            Domain::General => [&ids.policy, &ids.incident, &ids.education]
                .into_iter()
                .flatten()
                .cloned()
                .collect(),
        }
    }

    pub async fn ping(&self) -> bool {
        self.client
            .get(format!("{}/v1/retrieval", self.base_url))
            .send()
            .await
            .is_ok()
    }
}

#[async_trait]
impl SearchBackend for RagflowBackend {
    fn name(&self) -> &'static str {
        "ragflow"
    }

    async fn search(&self, query: &str, domain: Domain, top_k: usize) -> Result<Vec<Source>> {
        let body = serde_json::json!({
            "query": query,
            "dataset_ids": self.dataset_ids(domain),
            "top_k": top_k,
        });

        let mut req = self
            .client
            .post(format!("{}/v1/retrieval", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| RetrievalError::Backend {
            backend: "ragflow",
            detail: e.to_string(),
        })?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let detail = resp.text().await.unwrap_or_default();
            warn!(status, "retrieval engine error");
            return Err(RetrievalError::Backend {
                backend: "ragflow",
                detail,
            });
        }

        let parsed: RetrievalResponse = resp.json().await.map_err(|e| RetrievalError::Backend {
            backend: "ragflow",
            detail: format!("retrieval parse: {e}"),
        })?;

        let sources = parsed
            .results
            .into_iter()
            .map(|r| Source {
                doc_id: r.doc_id.unwrap_or_default(),
                title: r.title,
                page: r.page,
                score: r.score.unwrap_or(0.0).clamp(0.0, 1.0),
                snippet: r.content.unwrap_or_default(),
                article_label: r.article_label,
                article_path: r.article_path,
                source_type: r.source_type,
            })
            .collect();

        Ok(finalise(sources, top_k))
    }
}

#[derive(Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    results: Vec<RetrievalHit>,
}

#[derive(Deserialize)]
struct RetrievalHit {
    #[serde(alias = "chunk_id")]
    doc_id: Option<String>,
    #[serde(alias = "doc_name")]
    title: Option<String>,
    #[serde(alias = "page_num")]
    page: Option<u32>,
    #[serde(alias = "text", alias = "snippet")]
    content: Option<String>,
    #[serde(alias = "similarity")]
    score: Option<f32>,
    article_label: Option<String>,
    article_path: Option<String>,
    source_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_absorb_engine_variants() {
        let resp: RetrievalResponse = serde_json::from_str(
            r#"{"results":[
                {"chunk_id":"c1","doc_name":"Doc A","page_num":2,"text":"alpha","similarity":0.91},
                {"doc_id":"d2","title":"Doc B","content":"beta","score":0.42}
            ]}"#,
        )
        .unwrap();
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.results[0].doc_id.as_deref(), Some("c1"));
        assert_eq!(resp.results[0].content.as_deref(), Some("alpha"));
        assert_eq!(resp.results[1].title.as_deref(), Some("Doc B"));
    }

    #[test]
    fn scores_clamp_into_unit_interval() {
        let resp: RetrievalResponse =
            serde_json::from_str(r#"{"results":[{"doc_id":"d","content":"x","score":1.7}]}"#).unwrap();
        let s = resp.results[0].score.unwrap().clamp(0.0, 1.0);
        assert_eq!(s, 1.0);
    }
}
