//! Remote PII detector client — `POST /mask` with `{text, stage}`.
//!
//! This is only the transport. The fail-closed policy (what happens when
//! the detector is down) lives with the chat pipeline, which knows which
//! stage it is protecting.

use serde::Deserialize;
use tracing::warn;

use axon_core::config::PiiConfig;
use axon_core::types::{PiiMaskResult, PiiStage, PiiTag};

use crate::error::{ClientError, Result};

pub struct PiiClient {
    client: reqwest::Client,
    base_url: String,
    pub enabled: bool,
}

impl PiiClient {
    pub fn new(cfg: &PiiConfig) -> Self {
        Self {
            client: crate::http::build_client(cfg.timeout_secs),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            enabled: cfg.enabled,
        }
    }

    pub async fn mask(&self, text: &str, stage: PiiStage) -> Result<PiiMaskResult> {
        let body = serde_json::json!({
            "text": text,
            "stage": stage,
        });

        let resp = self
            .client
            .post(format!("{}/mask", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let detail = resp.text().await.unwrap_or_default();
            warn!(status, %stage, "PII detector returned error");
            return Err(ClientError::Api {
                status,
                message: detail,
            });
        }

        let api: MaskResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;

        Ok(PiiMaskResult {
            original: api.original_text,
            masked: api.masked_text,
            has_pii: api.has_pii,
            tags: api.tags,
        })
    }
}

#[derive(Deserialize)]
struct MaskResponse {
    original_text: String,
    masked_text: String,
    has_pii: bool,
    #[serde(default)]
    tags: Vec<PiiTag>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_response_parses_detector_shape() {
        let api: MaskResponse = serde_json::from_str(
            r#"{
                "original_text": "call 010-1234-5678",
                "masked_text": "call [PHONE]",
                "has_pii": true,
                "tags": [{"entity": "010-1234-5678", "label": "PHONE", "start": 5, "end": 18}]
            }"#,
        )
        .unwrap();
        assert!(api.has_pii);
        assert_eq!(api.tags.len(), 1);
        assert_eq!(api.tags[0].label, "PHONE");
    }
}
