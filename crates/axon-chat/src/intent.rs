//! Rule-based intent classification and routing.
//!
//! Priority-ordered keyword rules produce a tentative (intent, domain);
//! a routing table keyed by (role, domain, intent) yields the route.
//! Keyword sets deliberately avoid standalone Korean function-word
//! syllables — a single common syllable in a rule set shunts ordinary
//! policy questions into the wrong path.

use axon_core::types::{Domain, Intent, IntentResult, Route, UserRole};

use crate::personalize;

/// Confidence assigned per rule tier.
const CONF_STRONG: f32 = 0.9;
const CONF_DISAMBIGUATED: f32 = 0.75;
const CONF_HINTED: f32 = 0.6;
const CONF_UNKNOWN: f32 = 0.2;

const INCIDENT_KEYWORDS: &[&str] = &[
    "유출",
    "침해",
    "해킹",
    "보안사고",
    "보안 사고",
    "사고 신고",
    "랜섬웨어",
    "피싱",
    "breach",
    "incident",
];

const EDUCATION_KEYWORDS: &[&str] = &[
    "교육",
    "퀴즈",
    "수료",
    "이수",
    "강의",
    "학습",
    "quiz",
    "training",
];

/// Possessive/self markers — distinguish "my completion status" from a
/// general question about the training programme.
const SELF_MARKERS: &[&str] = &["내 ", "제 ", "나의", "저의", "내가", "제가", "my "];

/// Personal HR status keywords. These fire only together with a self or
/// quantity marker; "연차휴가 규정" alone is a policy question.
const HR_KEYWORDS: &[&str] = &[
    "연차",
    "휴가",
    "복지포인트",
    "복지 포인트",
    "근태",
    "초과근무",
    "야근",
    "급여",
];

const QUANTITY_MARKERS: &[&str] = &["며칠", "몇 일", "얼마나", "남았", "몇 개", "잔여", "현황"];

/// Policy-signal words override the HR rule: a question about rules is
/// grounded retrieval, not a personal lookup.
const POLICY_SIGNALS: &[&str] = &["규정", "정책", "기준", "지침", "절차", "원칙", "policy"];

const SYSTEM_HELP_KEYWORDS: &[&str] = &["사용법", "도움말", "어떻게 사용", "무엇을 할 수", "help me use"];

const SMALL_TALK_KEYWORDS: &[&str] = &["안녕", "고마워", "감사합니다", "hello", "hi there", "thanks"];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

pub struct Classifier {
    clarify_threshold: f32,
}

impl Classifier {
    pub fn new(clarify_threshold: f32) -> Self {
        Self { clarify_threshold }
    }

    pub fn classify(
        &self,
        message: &str,
        user_role: UserRole,
        domain_hint: Option<Domain>,
        _department: Option<&str>,
    ) -> IntentResult {
        let text = message.to_lowercase();

        let (intent, domain, confidence, sub_intent_id) = self.match_rules(&text, domain_hint);
        let needs_clarify = confidence < self.clarify_threshold || intent == Intent::Unknown;
        let route = if needs_clarify {
            Route::Clarify
        } else {
            route_for(user_role, domain, intent)
        };

        IntentResult {
            intent,
            sub_intent_id,
            domain,
            route,
            confidence,
            needs_clarify,
            clarify_prompt: needs_clarify.then(|| clarify_prompt(domain_hint)),
        }
    }

    /// Highest-priority rule wins; ties cannot happen because rules are
    /// checked in order.
    fn match_rules(
        &self,
        text: &str,
        domain_hint: Option<Domain>,
    ) -> (Intent, Domain, f32, Option<String>) {
        if contains_any(text, INCIDENT_KEYWORDS) {
            return (Intent::IncidentReport, Domain::Incident, CONF_STRONG, None);
        }

        if contains_any(text, EDUCATION_KEYWORDS) {
            // Possessive markers indicate the user asks about their own
            // completion status rather than course content.
            if contains_any(text, SELF_MARKERS) || contains_any(text, QUANTITY_MARKERS) {
                return (
                    Intent::EduStatus,
                    Domain::Education,
                    CONF_DISAMBIGUATED,
                    personalize::map_sub_intent(text),
                );
            }
            return (Intent::EducationQa, Domain::Education, CONF_STRONG, None);
        }

        if contains_any(text, HR_KEYWORDS) && !contains_any(text, POLICY_SIGNALS) {
            if contains_any(text, SELF_MARKERS) || contains_any(text, QUANTITY_MARKERS) {
                return (
                    Intent::BackendStatus,
                    domain_hint.unwrap_or(Domain::General),
                    CONF_DISAMBIGUATED,
                    personalize::map_sub_intent(text),
                );
            }
        }

        if contains_any(text, SYSTEM_HELP_KEYWORDS) {
            return (Intent::SystemHelp, Domain::General, CONF_STRONG, None);
        }

        if contains_any(text, SMALL_TALK_KEYWORDS) && text.chars().count() < 30 {
            return (Intent::GeneralChat, Domain::General, CONF_DISAMBIGUATED, None);
        }

        match domain_hint {
            Some(Domain::Policy) => (Intent::PolicyQa, Domain::Policy, CONF_HINTED, None),
            Some(Domain::Education) => (Intent::EducationQa, Domain::Education, CONF_HINTED, None),
            Some(Domain::Incident) => (Intent::IncidentReport, Domain::Incident, CONF_HINTED, None),
            // Policy-signal vocabulary without a hint is still a policy
            // question.
            _ if contains_any(text, POLICY_SIGNALS) => {
                (Intent::PolicyQa, Domain::Policy, CONF_HINTED, None)
            }
            _ => (Intent::Unknown, Domain::General, CONF_UNKNOWN, None),
        }
    }
}

/// Routing table. Order matters only for readability — the match is
/// exhaustive and unambiguous.
fn route_for(role: UserRole, domain: Domain, intent: Intent) -> Route {
    match (intent, domain) {
        // Personal status lookups always go to the backend, whether or
        // not a Q code was resolved — the resolver falls back later.
        (Intent::BackendStatus, _) | (Intent::EduStatus, _) => Route::BackendApi,
        // Incident managers see live incident data next to procedure.
        (Intent::IncidentReport, _) => match role {
            UserRole::IncidentManager | UserRole::Admin => Route::MixedBackendRag,
            _ => Route::RagInternal,
        },
        (Intent::PolicyQa, _) | (Intent::EducationQa, _) => Route::RagInternal,
        (Intent::SystemHelp, _) => Route::SystemHelp,
        (Intent::GeneralChat, _) => Route::LlmOnly,
        (Intent::Unknown, _) => Route::Unknown,
    }
}

fn clarify_prompt(domain_hint: Option<Domain>) -> String {
    match domain_hint {
        Some(Domain::Policy) => {
            "어떤 규정에 대해 알고 싶으신가요? 예: \"연차휴가 이월 기준\"처럼 구체적으로 질문해 주세요.".to_string()
        }
        Some(Domain::Education) => {
            "교육 과정 내용이 궁금하신가요, 아니면 본인의 이수 현황이 궁금하신가요?".to_string()
        }
        _ => "질문을 조금 더 구체적으로 말씀해 주시겠어요? 규정, 보안 사고, 교육 중 어떤 영역인지 알려주시면 정확히 도와드릴 수 있습니다."
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(0.35)
    }

    #[test]
    fn policy_question_routes_to_rag() {
        let r = classifier().classify(
            "연차휴가 규정 알려줘",
            UserRole::Employee,
            Some(Domain::Policy),
            None,
        );
        assert_eq!(r.intent, Intent::PolicyQa);
        assert_eq!(r.route, Route::RagInternal);
        assert!(!r.needs_clarify);
    }

    #[test]
    fn personal_leave_balance_goes_to_backend() {
        let r = classifier().classify(
            "내 연차 며칠 남았어?",
            UserRole::Employee,
            None,
            None,
        );
        assert_eq!(r.intent, Intent::BackendStatus);
        assert_eq!(r.route, Route::BackendApi);
        assert!(r.sub_intent_id.is_some());
    }

    #[test]
    fn incident_keywords_win_over_everything() {
        let r = classifier().classify(
            "고객 정보 유출이 의심됩니다",
            UserRole::Employee,
            Some(Domain::Policy),
            None,
        );
        assert_eq!(r.intent, Intent::IncidentReport);
        assert_eq!(r.domain, Domain::Incident);
        assert_eq!(r.route, Route::RagInternal);
    }

    #[test]
    fn incident_manager_gets_mixed_route() {
        let r = classifier().classify(
            "침해 사고 처리 현황",
            UserRole::IncidentManager,
            None,
            None,
        );
        assert_eq!(r.route, Route::MixedBackendRag);
    }

    #[test]
    fn own_training_status_is_edu_status() {
        let r = classifier().classify(
            "내 보안 교육 이수 현황 알려줘",
            UserRole::Employee,
            None,
            None,
        );
        assert_eq!(r.intent, Intent::EduStatus);
        assert_eq!(r.route, Route::BackendApi);
    }

    #[test]
    fn course_content_question_is_education_qa() {
        let r = classifier().classify(
            "정보보호 교육은 어떤 내용을 다루나요",
            UserRole::Employee,
            None,
            None,
        );
        assert_eq!(r.intent, Intent::EducationQa);
        assert_eq!(r.route, Route::RagInternal);
    }

    #[test]
    fn vague_message_asks_for_clarification() {
        let r = classifier().classify("그거 어떻게 돼?", UserRole::Employee, None, None);
        assert!(r.needs_clarify);
        assert_eq!(r.route, Route::Clarify);
        assert!(r.clarify_prompt.is_some());
    }

    #[test]
    fn small_talk_goes_llm_only() {
        let r = classifier().classify("안녕!", UserRole::Employee, None, None);
        assert_eq!(r.intent, Intent::GeneralChat);
        assert_eq!(r.route, Route::LlmOnly);
    }

    #[test]
    fn leave_policy_without_hint_is_still_policy() {
        // "규정" is a policy signal even when the HR keyword "연차" is
        // present and no domain hint was sent.
        let r = classifier().classify("연차 이월 규정이 궁금합니다", UserRole::Employee, None, None);
        assert_eq!(r.intent, Intent::PolicyQa);
        assert_eq!(r.route, Route::RagInternal);
    }
}
