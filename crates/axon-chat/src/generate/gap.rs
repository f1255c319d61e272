//! Policy/education gap analysis: aggregate questions that retrieved
//! nothing (or nearly nothing) and propose document improvements.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use axon_clients::llm::{CompletionOptions, LlmClient, PromptMessage};

use crate::error::{ChatError, Result};
use crate::generate::extract_json;

/// One turn summary as reported by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnSummary {
    pub question: String,
    #[serde(default)]
    pub rag_source_count: usize,
    #[serde(default)]
    pub rag_gap_candidate: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GapSuggestion {
    pub topic: String,
    pub evidence_count: usize,
    pub proposal: String,
}

pub struct GapAnalyzer {
    llm: Arc<LlmClient>,
}

impl GapAnalyzer {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Aggregate weak turns by normalised question and ask the LLM for
    /// improvement proposals. Falls back to aggregation-only output when
    /// the LLM is unavailable.
    pub async fn suggest(&self, turns: &[TurnSummary]) -> Result<Vec<GapSuggestion>> {
        let groups = aggregate(turns);
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let listing = groups
            .iter()
            .map(|(q, n)| format!("- ({n}회) {q}"))
            .collect::<Vec<_>>()
            .join("\n");

        let system = "사내 문서 관리자를 돕는 분석가입니다. 아래는 내부 문서에서 근거를 찾지 못한 질문들입니다. \
             각 주제에 대해 어떤 문서를 보완해야 하는지 제안하세요. JSON 배열로만 답하세요: \
             [{\"topic\": \"...\", \"proposal\": \"...\"}]";

        match self
            .llm
            .complete(
                &[PromptMessage::system(system), PromptMessage::user(listing)],
                &CompletionOptions {
                    temperature: Some(0.3),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(completion) => {
                let value = extract_json(&completion.text)?;
                let proposals: Vec<RawProposal> = serde_json::from_value(value)
                    .map_err(|e| ChatError::Generation(format!("gap shape: {e}")))?;
                Ok(merge(groups, proposals))
            }
            Err(e) => {
                warn!(err = %e, "gap proposal generation failed, returning aggregation only");
                Ok(groups
                    .into_iter()
                    .map(|(topic, evidence_count)| GapSuggestion {
                        topic,
                        evidence_count,
                        proposal: "관련 문서 보완 검토가 필요합니다.".to_string(),
                    })
                    .collect())
            }
        }
    }
}

#[derive(Deserialize)]
struct RawProposal {
    topic: String,
    proposal: String,
}

/// Weak turns grouped by normalised question, most frequent first.
fn aggregate(turns: &[TurnSummary]) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for turn in turns {
        if !(turn.rag_gap_candidate || turn.rag_source_count == 0) {
            continue;
        }
        let normalised = normalise(&turn.question);
        if normalised.is_empty() {
            continue;
        }
        *counts.entry(normalised).or_default() += 1;
    }
    let mut groups: Vec<(String, usize)> = counts.into_iter().collect();
    groups.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    groups
}

fn normalise(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['?', '.', '!'])
        .to_lowercase()
}

fn merge(groups: Vec<(String, usize)>, proposals: Vec<RawProposal>) -> Vec<GapSuggestion> {
    groups
        .into_iter()
        .map(|(topic, evidence_count)| {
            let proposal = proposals
                .iter()
                .find(|p| p.topic.to_lowercase().contains(&topic) || topic.contains(&p.topic.to_lowercase()))
                .map(|p| p.proposal.clone())
                .unwrap_or_else(|| "관련 문서 보완 검토가 필요합니다.".to_string());
            GapSuggestion {
                topic,
                evidence_count,
                proposal,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(question: &str, count: usize, gap: bool) -> TurnSummary {
        TurnSummary {
            question: question.into(),
            rag_source_count: count,
            rag_gap_candidate: gap,
        }
    }

    #[test]
    fn aggregates_weak_turns_only() {
        let turns = vec![
            turn("재택근무 기준?", 0, true),
            turn("재택근무  기준", 0, true),
            turn("연차 규정", 5, false),
        ];
        let groups = aggregate(&turns);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0], ("재택근무 기준".to_string(), 2));
    }

    #[test]
    fn most_frequent_first() {
        let turns = vec![
            turn("a 질문", 0, true),
            turn("b 질문", 0, true),
            turn("b 질문", 0, true),
        ];
        let groups = aggregate(&turns);
        assert_eq!(groups[0].0, "b 질문");
    }

    #[test]
    fn empty_input_produces_no_groups() {
        assert!(aggregate(&[]).is_empty());
    }
}
