//! MCQ quiz generation from candidate text blocks under a difficulty
//! distribution. The output contract is strict: exactly the requested
//! number of items, four options each, one correct index.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use axon_clients::llm::{CompletionOptions, LlmClient, PromptMessage};

use crate::error::{ChatError, Result};
use crate::generate::extract_json;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct DifficultyDistribution {
    #[serde(default)]
    pub easy: usize,
    #[serde(default)]
    pub medium: usize,
    #[serde(default)]
    pub hard: usize,
}

impl DifficultyDistribution {
    pub fn total(&self) -> usize {
        self.easy + self.medium + self.hard
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizItem {
    pub question: String,
    pub options: Vec<String>,
    pub answer_index: usize,
    pub difficulty: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizSet {
    pub items: Vec<QuizItem>,
}

pub struct QuizGenerator {
    llm: Arc<LlmClient>,
}

impl QuizGenerator {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn generate(
        &self,
        blocks: &[String],
        distribution: DifficultyDistribution,
    ) -> Result<QuizSet> {
        let total = distribution.total();
        if total == 0 {
            return Err(ChatError::InvalidRequest(
                "difficulty distribution must request at least one question".into(),
            ));
        }
        if blocks.iter().all(|b| b.trim().is_empty()) {
            return Err(ChatError::InvalidRequest("candidate text blocks are empty".into()));
        }

        let material = blocks
            .iter()
            .filter(|b| !b.trim().is_empty())
            .enumerate()
            .map(|(i, b)| format!("<자료 {}>\n{}", i + 1, b.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");

        let system = "제공된 자료만 근거로 4지선다 퀴즈를 만드세요. JSON 배열로만 답하세요: \
             [{\"question\": \"...\", \"options\": [\"...\",\"...\",\"...\",\"...\"], \
             \"answer_index\": 0, \"difficulty\": \"easy|medium|hard\", \"explanation\": \"...\"}]. \
             자료에 없는 사실을 묻지 마세요.";
        let user = format!(
            "난이도 구성: easy {} / medium {} / hard {} (총 {}문항)\n\n{}",
            distribution.easy, distribution.medium, distribution.hard, total, material
        );

        let completion = self
            .llm
            .complete(
                &[PromptMessage::system(system), PromptMessage::user(user)],
                &CompletionOptions {
                    temperature: Some(0.4),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ChatError::Llm(e.to_string()))?;

        let value = extract_json(&completion.text)?;
        let items: Vec<QuizItem> = serde_json::from_value(value)
            .map_err(|e| ChatError::Generation(format!("quiz shape: {e}")))?;

        validate_items(&items, total)?;
        Ok(QuizSet { items })
    }
}

fn validate_items(items: &[QuizItem], expected: usize) -> Result<()> {
    if items.len() != expected {
        return Err(ChatError::Generation(format!(
            "expected {expected} questions, model produced {}",
            items.len()
        )));
    }
    for (i, item) in items.iter().enumerate() {
        if item.options.len() != 4 {
            return Err(ChatError::Generation(format!(
                "question {} has {} options",
                i + 1,
                item.options.len()
            )));
        }
        if item.answer_index >= item.options.len() {
            return Err(ChatError::Generation(format!(
                "question {} answer index out of range",
                i + 1
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(answer_index: usize, options: usize) -> QuizItem {
        QuizItem {
            question: "q".into(),
            options: (0..options).map(|i| format!("o{i}")).collect(),
            answer_index,
            difficulty: "easy".into(),
            explanation: None,
        }
    }

    #[test]
    fn valid_set_passes() {
        assert!(validate_items(&[item(0, 4), item(3, 4)], 2).is_ok());
    }

    #[test]
    fn wrong_count_rejected() {
        let err = validate_items(&[item(0, 4)], 2).unwrap_err();
        assert_eq!(err.code(), "GENERATION_ERROR");
    }

    #[test]
    fn wrong_option_count_rejected() {
        assert!(validate_items(&[item(0, 3)], 1).is_err());
    }

    #[test]
    fn out_of_range_answer_rejected() {
        assert!(validate_items(&[item(4, 4)], 1).is_err());
    }

    #[test]
    fn zero_distribution_is_invalid() {
        let d = DifficultyDistribution::default();
        assert_eq!(d.total(), 0);
    }
}
