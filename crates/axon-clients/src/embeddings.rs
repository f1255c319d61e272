//! Embeddings service client. Returns L2-normalised vectors so cosine
//! search can run as a plain dot product downstream.

use serde::Deserialize;
use tracing::{debug, warn};

use axon_core::config::EmbeddingConfig;

use crate::error::{ClientError, Result};

pub struct EmbeddingsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    pub model: String,
    /// Dimension the collection contract expects.
    pub expected_dimension: usize,
}

impl EmbeddingsClient {
    pub fn new(cfg: &EmbeddingConfig) -> Self {
        Self {
            client: crate::http::build_client(cfg.timeout_secs),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            expected_dimension: cfg.dimension,
        }
    }

    /// Embed a single input string.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "input": input,
            "model": self.model,
        });

        let mut req = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "embeddings API error");
            return Err(ClientError::Api {
                status,
                message: text,
            });
        }

        let api: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;

        let vector = api
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ClientError::Parse("empty embeddings response".to_string()))?;

        debug!(dims = vector.len(), "embedding fetched");
        Ok(l2_normalise(vector))
    }

    /// Probe the model's actual output dimension with a trivial input.
    /// Used by the startup contract check.
    pub async fn probe_dimension(&self) -> Result<usize> {
        let v = self.embed("dimension probe").await?;
        Ok(v.len())
    }
}

/// Scale to unit length. Zero vectors pass through untouched.
pub fn l2_normalise(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalised_vector_has_unit_length() {
        let v = l2_normalise(vec![3.0, 4.0]);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_survives_normalisation() {
        let v = l2_normalise(vec![0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
