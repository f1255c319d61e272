//! FAQ generation: grounded retrieval per topic, then a JSON-
//! constrained LLM pass. Batch mode isolates failures per topic.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use axon_clients::llm::{CompletionOptions, LlmClient, PromptMessage};
use axon_core::types::{Domain, Source};
use axon_retrieval::{Retriever, Service};

use crate::error::{ChatError, Result};
use crate::generate::extract_json;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqItem {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaqSet {
    pub topic: String,
    pub items: Vec<FaqItem>,
}

/// One entry of a batch result; failed topics carry their error code
/// instead of items.
#[derive(Debug, Clone, Serialize)]
pub struct FaqBatchEntry {
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<FaqItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

pub struct FaqGenerator {
    retriever: Arc<Retriever>,
    llm: Arc<LlmClient>,
    top_k: usize,
}

impl FaqGenerator {
    pub fn new(retriever: Arc<Retriever>, llm: Arc<LlmClient>, top_k: usize) -> Self {
        Self {
            retriever,
            llm,
            top_k,
        }
    }

    pub async fn generate(&self, topic: &str, domain: Domain, count: usize) -> Result<FaqSet> {
        let count = count.clamp(1, 20);
        let outcome = self
            .retriever
            .search(topic, domain, self.top_k, Service::Faq, topic)
            .await?;

        let context = outcome
            .sources
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[{}] {}", i + 1, s.snippet.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        let system = "사내 문서 발췌만 근거로 FAQ를 만드세요. \
             JSON 배열로만 답하세요: [{\"question\": \"...\", \"answer\": \"...\"}]. \
             발췌에 없는 내용은 포함하지 마세요.";
        let user = format!("주제: {topic}\n항목 수: {count}\n\n문서 발췌:\n{context}");

        let completion = self
            .llm
            .complete(
                &[PromptMessage::system(system), PromptMessage::user(user)],
                &CompletionOptions {
                    temperature: Some(0.3),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ChatError::Llm(e.to_string()))?;

        let value = extract_json(&completion.text)?;
        let mut items: Vec<FaqItem> = serde_json::from_value(value)
            .map_err(|e| ChatError::Generation(format!("FAQ shape: {e}")))?;
        items.truncate(count);
        for item in &mut items {
            item.sources = outcome.sources.clone();
        }

        if items.is_empty() {
            return Err(ChatError::Generation("FAQ generation produced no items".into()));
        }

        Ok(FaqSet {
            topic: topic.to_string(),
            items,
        })
    }

    /// One failed topic never fails the batch.
    pub async fn generate_batch(
        &self,
        topics: &[String],
        domain: Domain,
        count: usize,
    ) -> Vec<FaqBatchEntry> {
        let mut entries = Vec::with_capacity(topics.len());
        for topic in topics {
            match self.generate(topic, domain, count).await {
                Ok(set) => entries.push(FaqBatchEntry {
                    topic: topic.clone(),
                    items: Some(set.items),
                    error_code: None,
                }),
                Err(e) => {
                    warn!(topic, err = %e, "FAQ batch entry failed");
                    entries.push(FaqBatchEntry {
                        topic: topic.clone(),
                        items: None,
                        error_code: Some(e.code().to_string()),
                    });
                }
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faq_items_parse_from_model_json() {
        let value = extract_json(
            "```json\n[{\"question\": \"연차는 며칠인가요?\", \"answer\": \"15일입니다.\"}]\n```",
        )
        .unwrap();
        let items: Vec<FaqItem> = serde_json::from_value(value).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].answer.contains("15일"));
    }
}
