//! Client for the web-application backend: script/render-spec lookups,
//! personalisation facts, source-set documents, and completion callbacks.
//!
//! All internal calls carry the shared `X-Internal-Token` header.

use serde::{Deserialize, Serialize};
use tracing::warn;

use axon_core::config::BackendConfig;

use crate::error::{ClientError, Result};

const INTERNAL_TOKEN_HEADER: &str = "X-Internal-Token";
const USER_ID_HEADER: &str = "X-User-Id";

/// Approval state of a lecture script on the backend side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptStatus {
    Draft,
    Approved,
    Rejected,
}

/// The minimum input to a render run. Snapshotted into the job row at
/// start so retries never depend on the backend's current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSpec {
    pub script_id: String,
    pub video_id: String,
    pub title: String,
    pub total_duration_sec: f64,
    pub scenes: Vec<SceneSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSpec {
    pub scene_id: String,
    pub scene_order: u32,
    pub chapter_title: String,
    pub purpose: String,
    pub narration: String,
    pub caption: String,
    pub duration_sec: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_spec: Option<serde_json::Value>,
}

/// Completion callback body for a finished render job.
#[derive(Debug, Clone, Serialize)]
pub struct RenderJobCallback {
    pub job_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
}

/// Completion callback body for a source-set pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSetCallback {
    pub source_set_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<serde_json::Value>,
}

/// A source set's parsed document text, ready for script generation.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSetDoc {
    pub source_set_id: String,
    pub title: String,
    pub text: String,
}

pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    internal_token: String,
}

impl BackendClient {
    pub fn new(cfg: &BackendConfig) -> Self {
        Self {
            client: crate::http::build_client(cfg.timeout_secs),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            internal_token: cfg.internal_token.clone(),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header(INTERNAL_TOKEN_HEADER, &self.internal_token)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header(INTERNAL_TOKEN_HEADER, &self.internal_token)
    }

    async fn check<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, message });
        }
        resp.json().await.map_err(|e| ClientError::Parse(e.to_string()))
    }

    pub async fn fetch_script_status(&self, script_id: &str) -> Result<ScriptStatus> {
        #[derive(Deserialize)]
        struct Body {
            status: ScriptStatus,
        }
        let resp = self
            .get(&format!("/internal/scripts/{script_id}"))
            .send()
            .await?;
        Ok(Self::check::<Body>(resp).await?.status)
    }

    pub async fn fetch_render_spec(&self, script_id: &str) -> Result<RenderSpec> {
        let resp = self
            .get(&format!("/internal/scripts/{script_id}/render-spec"))
            .send()
            .await?;
        Self::check(resp).await
    }

    pub async fn fetch_source_set(&self, source_set_id: &str) -> Result<SourceSetDoc> {
        let resp = self
            .get(&format!("/internal/source-sets/{source_set_id}"))
            .send()
            .await?;
        Self::check(resp).await
    }

    /// `POST /api/personalization/resolve` — facts for a catalogued Q.
    pub async fn resolve_personalization(
        &self,
        user_id: &str,
        sub_intent_id: &str,
        period: Option<&str>,
        target_dept_id: Option<&str>,
    ) -> Result<serde_json::Value> {
        let body = serde_json::json!({
            "sub_intent_id": sub_intent_id,
            "period": period,
            "target_dept_id": target_dept_id,
        });
        let resp = self
            .post("/api/personalization/resolve")
            .header(USER_ID_HEADER, user_id)
            .json(&body)
            .send()
            .await?;
        Self::check(resp).await
    }

    /// Completion callback for a render job. Failures are the caller's
    /// to log; they must not flip job state.
    pub async fn render_job_complete(&self, job_id: &str, body: &RenderJobCallback) -> Result<()> {
        let resp = self
            .post(&format!("/internal/callbacks/render-jobs/{job_id}/complete"))
            .json(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(job_id, status, "render-job callback rejected");
            return Err(ClientError::Api { status, message });
        }
        Ok(())
    }

    pub async fn source_set_complete(&self, id: &str, body: &SourceSetCallback) -> Result<()> {
        let resp = self
            .post(&format!("/internal/callbacks/source-sets/{id}/complete"))
            .json(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(source_set_id = id, status, "source-set callback rejected");
            return Err(ClientError::Api { status, message });
        }
        Ok(())
    }

    /// Cheap reachability probe for the readiness endpoint.
    pub async fn ping(&self) -> bool {
        self.get("/health").send().await.is_ok_and(|r| r.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_spec_round_trips() {
        let spec = RenderSpec {
            script_id: "S1".into(),
            video_id: "V1".into(),
            title: "Security basics".into(),
            total_duration_sec: 90.0,
            scenes: vec![SceneSpec {
                scene_id: "sc1".into(),
                scene_order: 1,
                chapter_title: "Intro".into(),
                purpose: "hook".into(),
                narration: "Welcome.".into(),
                caption: "Welcome".into(),
                duration_sec: 10.0,
                visual_spec: None,
            }],
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: RenderSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.scenes.len(), 1);
        assert_eq!(back.scenes[0].scene_order, 1);
    }

    #[test]
    fn callback_omits_absent_assets() {
        let cb = RenderJobCallback {
            job_id: "J1".into(),
            status: "FAILED".into(),
            error_code: Some("RENDER_ERROR".into()),
            video_url: None,
            subtitle_url: None,
            thumbnail_url: None,
            duration_sec: None,
        };
        let json = serde_json::to_string(&cb).unwrap();
        assert!(!json.contains("video_url"));
        assert!(json.contains("RENDER_ERROR"));
    }

    #[test]
    fn script_status_parses_wire_value() {
        let s: ScriptStatus = serde_json::from_str("\"APPROVED\"").unwrap();
        assert_eq!(s, ScriptStatus::Approved);
    }
}
