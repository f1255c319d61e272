//! Prompt assembly: per-route base instruction, role/domain guardrail
//! prefix, language enforcement, optional soft guardrail, then the
//! masked query with a fenced, budgeted context block.

use axon_clients::llm::PromptMessage;
use axon_core::config::ChatConfig;
use axon_core::types::{Domain, Intent, Route, Source, UserRole};

const LANGUAGE_RULE: &str =
    "답변은 반드시 한국어로만 작성하세요. 외래어 용어는 괄호 안에 병기할 수 있습니다.";

/// Injected only when grounded retrieval came back empty for a policy
/// or education question: hedge, no article numbers, point at the
/// responsible team.
const SOFT_GUARDRAIL_RULE: &str = "일치하는 내부 문서를 찾지 못했습니다. \
     \"일반적으로\", \"통상적으로\" 같은 표현으로 불확실성을 드러내고, \
     조항 번호나 문서명을 인용하지 말고, 답변 끝에 반드시 담당 부서 확인을 권고하세요.";

pub struct PromptBuilder {
    max_chars: usize,
    max_sources: usize,
}

impl PromptBuilder {
    pub fn new(cfg: &ChatConfig) -> Self {
        Self {
            max_chars: cfg.context_max_chars,
            max_sources: cfg.context_max_sources,
        }
    }

    /// Assemble the ordered message list for one turn.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        route: Route,
        intent: Intent,
        domain: Domain,
        user_role: UserRole,
        masked_query: &str,
        sources: &[Source],
        backend_facts: Option<&str>,
    ) -> Vec<PromptMessage> {
        let mut system = String::new();
        system.push_str(base_instruction(route));
        system.push_str("\n\n");
        if let Some(guardrail) = role_guardrail(user_role, domain) {
            system.push_str(guardrail);
            system.push_str("\n\n");
        }
        system.push_str(LANGUAGE_RULE);
        if route == Route::RagInternal
            && sources.is_empty()
            && matches!(intent, Intent::PolicyQa | Intent::EducationQa)
        {
            system.push_str("\n\n");
            system.push_str(SOFT_GUARDRAIL_RULE);
        }

        let mut user = String::new();
        user.push_str(masked_query);
        if let Some(facts) = backend_facts {
            user.push_str("\n\n```facts\n");
            user.push_str(facts);
            user.push_str("\n```");
        }
        if !sources.is_empty() {
            user.push_str("\n\n```context\n");
            user.push_str(&self.format_context(sources));
            user.push_str("```");
        }

        vec![PromptMessage::system(system), PromptMessage::user(user)]
    }

    /// "[n] title — snippet (article_path)" lines, highest score first,
    /// truncated to the character budget.
    fn format_context(&self, sources: &[Source]) -> String {
        let mut out = String::new();
        for (i, source) in sources.iter().take(self.max_sources).enumerate() {
            let title = source.title.as_deref().unwrap_or(&source.doc_id);
            let mut line = format!("[{}] {} - {}", i + 1, title, source.snippet.trim());
            if let Some(path) = &source.article_path {
                line.push_str(&format!(" ({path})"));
            }
            line.push('\n');
            if out.chars().count() + line.chars().count() > self.max_chars {
                // Keep whole entries only; a cut-off snippet reads as
                // source text the model will happily hallucinate around.
                break;
            }
            out.push_str(&line);
        }
        out
    }
}

fn base_instruction(route: Route) -> &'static str {
    match route {
        Route::RagInternal => {
            "당신은 사내 규정·교육 어시스턴트입니다. 제공된 context 블록의 내부 문서 발췌만 근거로 답하세요. \
             근거가 있는 내용에는 [n] 표기로 출처를 표시하고, context에 없는 내용은 추측하지 마세요."
        }
        Route::MixedBackendRag => {
            "당신은 사내 어시스턴트입니다. context 블록의 문서 발췌와 facts 블록의 시스템 데이터를 함께 근거로 답하세요. \
             두 출처가 충돌하면 facts의 수치를 우선하세요."
        }
        Route::BackendApi => {
            "당신은 사내 어시스턴트입니다. facts 블록의 데이터만 사용하여 답하고, 없는 값은 만들어내지 마세요."
        }
        Route::SystemHelp => {
            "당신은 이 사내 AI 어시스턴트의 사용법을 안내합니다. 규정 질문, 보안 사고 신고, 교육 현황 조회, \
             콘텐츠 생성 기능을 간단한 예시와 함께 설명하세요."
        }
        _ => "당신은 정중하고 간결한 사내 어시스턴트입니다.",
    }
}

/// Role/domain guardrails prepended to the base instruction.
fn role_guardrail(role: UserRole, domain: Domain) -> Option<&'static str> {
    match (role, domain) {
        // Never echo a reporter's identity back into an incident thread.
        (_, Domain::Incident) if role == UserRole::Employee || role == UserRole::Manager => Some(
            "보안 사고 신고 대화입니다. 신고자의 신원(이름, 사번, 연락처)을 답변에 절대 반복하지 마세요.",
        ),
        // Admin-facing incident summaries anonymise people.
        (UserRole::Admin | UserRole::IncidentManager, Domain::Incident) => Some(
            "사고 요약에서 개인 이름은 익명 처리하세요(예: \"직원 A\").",
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChatConfig {
        ChatConfig::default()
    }

    fn source(doc_id: &str, score: f32, snippet: &str) -> Source {
        Source {
            doc_id: doc_id.into(),
            title: Some(format!("{doc_id} 제목")),
            page: None,
            score,
            snippet: snippet.into(),
            article_label: None,
            article_path: Some(format!("규정/{doc_id}")),
            source_type: None,
        }
    }

    #[test]
    fn rag_prompt_carries_context_block() {
        let b = PromptBuilder::new(&cfg());
        let msgs = b.build(
            Route::RagInternal,
            Intent::PolicyQa,
            Domain::Policy,
            UserRole::Employee,
            "연차휴가 규정",
            &[source("d1", 0.9, "연차는 15일")],
            None,
        );
        assert_eq!(msgs.len(), 2);
        assert!(msgs[1].content.contains("```context"));
        assert!(msgs[1].content.contains("[1] d1 제목"));
        assert!(msgs[1].content.contains("(규정/d1)"));
    }

    #[test]
    fn soft_guardrail_only_when_sources_absent() {
        let b = PromptBuilder::new(&cfg());
        let empty = b.build(
            Route::RagInternal,
            Intent::PolicyQa,
            Domain::Policy,
            UserRole::Employee,
            "q",
            &[],
            None,
        );
        assert!(empty[0].content.contains("일반적으로"));

        let grounded = b.build(
            Route::RagInternal,
            Intent::PolicyQa,
            Domain::Policy,
            UserRole::Employee,
            "q",
            &[source("d1", 0.9, "x")],
            None,
        );
        assert!(!grounded[0].content.contains("일반적으로"));
    }

    #[test]
    fn context_respects_source_cap() {
        let mut cfg = cfg();
        cfg.context_max_sources = 2;
        let b = PromptBuilder::new(&cfg);
        let sources: Vec<Source> = (0..5)
            .map(|i| source(&format!("d{i}"), 0.9 - i as f32 * 0.1, "snippet"))
            .collect();
        let msgs = b.build(
            Route::RagInternal,
            Intent::PolicyQa,
            Domain::Policy,
            UserRole::Employee,
            "q",
            &sources,
            None,
        );
        assert!(msgs[1].content.contains("[1]"));
        assert!(msgs[1].content.contains("[2]"));
        assert!(!msgs[1].content.contains("[3]"));
    }

    #[test]
    fn context_respects_char_budget() {
        let mut cfg = cfg();
        cfg.context_max_chars = 80;
        let b = PromptBuilder::new(&cfg);
        let long = "아주 긴 본문입니다. ".repeat(20);
        let sources = vec![source("d1", 0.9, &long), source("d2", 0.8, &long)];
        let msgs = b.build(
            Route::RagInternal,
            Intent::PolicyQa,
            Domain::Policy,
            UserRole::Employee,
            "q",
            &sources,
            None,
        );
        // Budget admits neither full entry beyond the first cut.
        assert!(!msgs[1].content.contains("[2]"));
    }

    #[test]
    fn incident_reporter_guardrail_present() {
        let b = PromptBuilder::new(&cfg());
        let msgs = b.build(
            Route::RagInternal,
            Intent::IncidentReport,
            Domain::Incident,
            UserRole::Employee,
            "유출 신고",
            &[],
            None,
        );
        assert!(msgs[0].content.contains("신고자의 신원"));
    }

    #[test]
    fn mixed_route_carries_facts_block() {
        let b = PromptBuilder::new(&cfg());
        let msgs = b.build(
            Route::MixedBackendRag,
            Intent::IncidentReport,
            Domain::Incident,
            UserRole::IncidentManager,
            "현황",
            &[source("d1", 0.9, "절차")],
            Some("{\"open_incidents\": 2}"),
        );
        assert!(msgs[1].content.contains("```facts"));
        assert!(msgs[1].content.contains("```context"));
    }
}
