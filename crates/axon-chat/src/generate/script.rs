//! Lecture-script generation and the source-set pipeline that drives
//! it: fetch the parsed document, chunk it, generate a scene-structured
//! script draft, then notify the backend via callback.
//!
//! Pipeline status is held in-process; the callback recipient owns
//! durability. A process restart loses only in-flight pipelines.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use axon_clients::backend::{BackendClient, RenderSpec, SceneSpec, SourceSetCallback};
use axon_clients::llm::{CompletionOptions, LlmClient, PromptMessage};
use axon_core::types::Domain;
use axon_retrieval::{Retriever, Service};

use crate::error::{ChatError, Result};
use crate::generate::extract_json;

/// Character budget per chunk of source material handed to the LLM.
const CHUNK_CHARS: usize = 6_000;
/// Ceiling on scenes in one generated script.
const MAX_SCENES: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    pub source_set_id: String,
    pub status: PipelineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

pub struct ScriptGenerator {
    llm: Arc<LlmClient>,
    retriever: Arc<Retriever>,
}

impl ScriptGenerator {
    pub fn new(llm: Arc<LlmClient>, retriever: Arc<Retriever>) -> Self {
        Self { llm, retriever }
    }

    /// Generate a scene-structured script draft from document text,
    /// enriched with related indexed material for the topic.
    pub async fn generate(&self, title: &str, text: &str) -> Result<RenderSpec> {
        if text.trim().is_empty() {
            return Err(ChatError::InvalidRequest("source text is empty".into()));
        }

        let chunks = chunk_text(text, CHUNK_CHARS);
        let mut material = chunks
            .iter()
            .take(4)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n\n");

        // Related chunks from the education corpus deepen the draft;
        // a retrieval failure just means a thinner script.
        if let Ok(related) = self
            .retriever
            .search(title, Domain::Education, 4, Service::Script, title)
            .await
        {
            if !related.sources.is_empty() {
                material.push_str("\n\n관련 자료:\n");
                for source in &related.sources {
                    material.push_str("- ");
                    material.push_str(source.snippet.trim());
                    material.push('\n');
                }
            }
        }

        let system = "교육 영상 대본 작가입니다. 제공된 문서 내용만으로 장면 단위 대본을 만드세요. \
             JSON으로만 답하세요: {\"title\": \"...\", \"scenes\": [{\"chapter_title\": \"...\", \
             \"purpose\": \"...\", \"narration\": \"...\", \"caption\": \"...\", \"duration_sec\": 15}]}. \
             narration은 구어체 한국어, caption은 한 줄 요약으로 작성하세요.";
        let user = format!("제목: {title}\n\n문서 내용:\n{material}");

        let completion = self
            .llm
            .complete(
                &[PromptMessage::system(system), PromptMessage::user(user)],
                &CompletionOptions {
                    temperature: Some(0.5),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ChatError::Llm(e.to_string()))?;

        let value = extract_json(&completion.text)?;
        let draft_title = value["title"].as_str().unwrap_or(title).to_string();
        let raw_scenes = value["scenes"]
            .as_array()
            .cloned()
            .ok_or_else(|| ChatError::Generation("script draft has no scenes".into()))?;

        let mut scenes = Vec::new();
        for (i, raw) in raw_scenes.into_iter().take(MAX_SCENES).enumerate() {
            let narration = raw["narration"].as_str().unwrap_or_default().trim().to_string();
            if narration.is_empty() {
                continue;
            }
            scenes.push(SceneSpec {
                scene_id: format!("scene-{:02}", i + 1),
                scene_order: (i + 1) as u32,
                chapter_title: raw["chapter_title"].as_str().unwrap_or_default().to_string(),
                purpose: raw["purpose"].as_str().unwrap_or_default().to_string(),
                narration,
                caption: raw["caption"].as_str().unwrap_or_default().to_string(),
                duration_sec: raw["duration_sec"].as_f64().unwrap_or(15.0).max(1.0),
                visual_spec: None,
            });
        }

        if scenes.is_empty() {
            return Err(ChatError::Generation("script draft has no usable scenes".into()));
        }

        let total = scenes.iter().map(|s| s.duration_sec).sum();
        Ok(RenderSpec {
            script_id: String::new(),
            video_id: String::new(),
            title: draft_title,
            total_duration_sec: total,
            scenes,
        })
    }
}

/// Document → script pipeline keyed by source-set id.
pub struct SourceSetPipeline {
    backend: Arc<BackendClient>,
    generator: Arc<ScriptGenerator>,
    states: DashMap<String, PipelineState>,
}

impl SourceSetPipeline {
    pub fn new(backend: Arc<BackendClient>, generator: Arc<ScriptGenerator>) -> Self {
        Self {
            backend,
            generator,
            states: DashMap::new(),
        }
    }

    pub fn status(&self, source_set_id: &str) -> Option<PipelineState> {
        self.states.get(source_set_id).map(|s| s.clone())
    }

    /// Begin the pipeline for `source_set_id`. Returns the initial
    /// state; a pipeline already running is returned as-is.
    pub fn start(self: Arc<Self>, source_set_id: &str) -> PipelineState {
        if let Some(existing) = self.status(source_set_id) {
            if matches!(existing.status, PipelineStatus::Pending | PipelineStatus::Running) {
                return existing;
            }
        }

        let state = PipelineState {
            source_set_id: source_set_id.to_string(),
            status: PipelineStatus::Pending,
            error_code: None,
        };
        self.states.insert(source_set_id.to_string(), state.clone());

        let id = source_set_id.to_string();
        tokio::spawn(async move {
            self.run(&id).await;
        });
        state
    }

    async fn run(&self, id: &str) {
        self.set_status(id, PipelineStatus::Running, None);

        let result = self.produce_script(id).await;
        match result {
            Ok(script) => {
                info!(source_set_id = id, scenes = script["scenes"].as_array().map(|s| s.len()).unwrap_or(0), "source-set script generated");
                self.set_status(id, PipelineStatus::Completed, None);
                let callback = SourceSetCallback {
                    source_set_id: id.to_string(),
                    status: "COMPLETED".into(),
                    error_code: None,
                    script: Some(script),
                };
                if let Err(e) = self.backend.source_set_complete(id, &callback).await {
                    warn!(source_set_id = id, err = %e, "source-set completion callback failed");
                }
            }
            Err(e) => {
                warn!(source_set_id = id, err = %e, "source-set pipeline failed");
                self.set_status(id, PipelineStatus::Failed, Some(e.code()));
                let callback = SourceSetCallback {
                    source_set_id: id.to_string(),
                    status: "FAILED".into(),
                    error_code: Some(e.code().to_string()),
                    script: None,
                };
                if let Err(cb_err) = self.backend.source_set_complete(id, &callback).await {
                    warn!(source_set_id = id, err = %cb_err, "source-set failure callback failed");
                }
            }
        }
    }

    async fn produce_script(&self, id: &str) -> Result<serde_json::Value> {
        let doc = self.backend.fetch_source_set(id).await?;
        let spec = self.generator.generate(&doc.title, &doc.text).await?;
        Ok(json!({
            "title": spec.title,
            "total_duration_sec": spec.total_duration_sec,
            "scenes": spec.scenes,
        }))
    }

    fn set_status(&self, id: &str, status: PipelineStatus, error_code: Option<&str>) {
        self.states.insert(
            id.to_string(),
            PipelineState {
                source_set_id: id.to_string(),
                status,
                error_code: error_code.map(str::to_string),
            },
        );
    }
}

/// Split on paragraph boundaries into chunks of at most `max_chars`.
fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for para in text.split("\n\n") {
        if !current.is_empty() && current.chars().count() + para.chars().count() > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_respects_budget() {
        let text = (0..10).map(|i| format!("문단 {i} {}", "가".repeat(50))).collect::<Vec<_>>().join("\n\n");
        let chunks = chunk_text(&text, 120);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 200);
        }
    }

    #[test]
    fn single_paragraph_is_one_chunk() {
        let chunks = chunk_text("짧은 문서", 1000);
        assert_eq!(chunks.len(), 1);
    }
}
