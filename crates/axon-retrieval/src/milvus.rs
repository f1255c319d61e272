//! Vector-store backend — Milvus HTTP v2 API, cosine metric.
//!
//! The query is embedded via the external embeddings service first;
//! vectors are L2-normalised so cosine similarity comes back in [0, 1]
//! for well-behaved corpora.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use axon_clients::embeddings::EmbeddingsClient;
use axon_core::config::MilvusConfig;
use axon_core::types::{Domain, Source};

use crate::backend::{finalise, SearchBackend};
use crate::error::{RetrievalError, Result};

pub const METRIC: &str = "COSINE";

pub struct MilvusBackend {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    embeddings: EmbeddingsClient,
}

impl MilvusBackend {
    pub fn new(cfg: &MilvusConfig, embeddings: EmbeddingsClient) -> Self {
        Self {
            client: axon_clients::http::build_client(cfg.timeout_secs),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            collection: cfg.collection.clone(),
            embeddings,
        }
    }

    /// Dataset filter derived from the domain; `General` searches the
    /// whole collection.
    fn filter(domain: Domain) -> Option<String> {
        match domain {
            Domain::General => None,
            d => Some(format!("dataset_id == \"{}\"", d.to_string().to_lowercase())),
        }
    }

    /// Declared vector dimension of the collection, for the startup
    /// contract check.
    pub async fn collection_dimension(&self) -> Result<usize> {
        let body = serde_json::json!({ "collectionName": self.collection });
        let resp = self
            .client
            .post(format!("{}/v2/vectordb/collections/describe", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Backend {
                backend: "milvus",
                detail: e.to_string(),
            })?;

        let describe: DescribeResponse = resp.json().await.map_err(|e| RetrievalError::Backend {
            backend: "milvus",
            detail: format!("describe parse: {e}"),
        })?;

        describe
            .data
            .fields
            .iter()
            .find_map(|f| f.params.as_ref().and_then(|p| p.dim))
            .ok_or_else(|| RetrievalError::Contract("collection has no vector field".into()))
    }

    /// Load the collection into memory. Required before first search.
    pub async fn load_collection(&self) -> Result<()> {
        let body = serde_json::json!({ "collectionName": self.collection });
        self.client
            .post(format!("{}/v2/vectordb/collections/load", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Backend {
                backend: "milvus",
                detail: format!("load: {e}"),
            })?;
        debug!(collection = %self.collection, "collection load requested");
        Ok(())
    }

    pub async fn ping(&self) -> bool {
        self.client
            .post(format!("{}/v2/vectordb/collections/list", self.base_url))
            .json(&serde_json::json!({}))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}

#[async_trait]
impl SearchBackend for MilvusBackend {
    fn name(&self) -> &'static str {
        "milvus"
    }

    async fn search(&self, query: &str, domain: Domain, top_k: usize) -> Result<Vec<Source>> {
        let vector = self.embeddings.embed(query).await?;

        let mut body = serde_json::json!({
            "collectionName": self.collection,
            "data": [vector],
            "limit": top_k,
            "outputFields": ["doc_id", "title", "page", "text", "article_label", "article_path", "source_type"],
            "searchParams": { "metricType": METRIC },
        });
        if let Some(filter) = Self::filter(domain) {
            body["filter"] = serde_json::Value::String(filter);
        }

        let resp = self
            .client
            .post(format!("{}/v2/vectordb/entities/search", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Backend {
                backend: "milvus",
                detail: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let detail = resp.text().await.unwrap_or_default();
            warn!(status, "milvus search error");
            return Err(RetrievalError::Backend {
                backend: "milvus",
                detail,
            });
        }

        let search: SearchResponse = resp.json().await.map_err(|e| RetrievalError::Backend {
            backend: "milvus",
            detail: format!("search parse: {e}"),
        })?;

        if search.code != 0 {
            return Err(RetrievalError::Backend {
                backend: "milvus",
                detail: format!("milvus code {}", search.code),
            });
        }

        let sources = search
            .data
            .into_iter()
            .map(|hit| Source {
                doc_id: hit.doc_id.unwrap_or_default(),
                title: hit.title,
                page: hit.page,
                score: hit.distance.clamp(0.0, 1.0),
                snippet: hit.text.unwrap_or_default(),
                article_label: hit.article_label,
                article_path: hit.article_path,
                source_type: hit.source_type,
            })
            .collect();

        Ok(finalise(sources, top_k))
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    data: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    doc_id: Option<String>,
    title: Option<String>,
    page: Option<u32>,
    text: Option<String>,
    article_label: Option<String>,
    article_path: Option<String>,
    source_type: Option<String>,
    /// Cosine similarity when metricType = COSINE.
    #[serde(default)]
    distance: f32,
}

#[derive(Deserialize)]
struct DescribeResponse {
    data: DescribeData,
}

#[derive(Deserialize)]
struct DescribeData {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Deserialize)]
struct FieldSchema {
    #[allow(dead_code)]
    name: String,
    params: Option<FieldParams>,
}

#[derive(Deserialize)]
struct FieldParams {
    dim: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_filter_targets_dataset() {
        assert_eq!(
            MilvusBackend::filter(Domain::Policy).as_deref(),
            Some("dataset_id == \"policy\"")
        );
        assert!(MilvusBackend::filter(Domain::General).is_none());
    }

    #[test]
    fn search_response_parses_hits() {
        let resp: SearchResponse = serde_json::from_str(
            r#"{"code":0,"data":[{"doc_id":"d1","title":"T","page":3,"text":"body","distance":0.83}]}"#,
        )
        .unwrap();
        assert_eq!(resp.data.len(), 1);
        assert!((resp.data[0].distance - 0.83).abs() < 1e-6);
    }

    #[test]
    fn describe_response_finds_dim() {
        let resp: DescribeResponse = serde_json::from_str(
            r#"{"data":{"fields":[{"name":"pk"},{"name":"vector","params":{"dim":768}}]}}"#,
        )
        .unwrap();
        let dim = resp
            .data
            .fields
            .iter()
            .find_map(|f| f.params.as_ref().and_then(|p| p.dim));
        assert_eq!(dim, Some(768));
    }
}
