//! Personalisation facts: the Q1…Q20 sub-intent catalogue, the keyword
//! mapper that narrows a coarse router output to a Q code, the backend
//! resolver, and the natural-language answer generator with
//! deterministic per-Q fallback templates.

use serde_json::Value;
use tracing::warn;

use axon_clients::backend::BackendClient;
use axon_clients::llm::{CompletionOptions, LlmClient, PromptMessage};

use crate::error::Result;

/// One catalogued sub-intent.
pub struct QSpec {
    pub id: &'static str,
    /// What the backend returns for this Q, for the LLM's benefit.
    pub shape: &'static str,
    /// Deterministic fallback template; `{metrics}` is replaced with a
    /// plain rendering of the facts.
    pub fallback: &'static str,
}

/// The catalogue is fixed; the backend owns the actual data shapes.
pub const CATALOG: &[QSpec] = &[
    QSpec { id: "Q1", shape: "profile summary: {profile: {department, position, hire_date}}", fallback: "인사 기본 정보입니다: {metrics}" },
    QSpec { id: "Q2", shape: "work hours: {metrics: {worked_hours, standard_hours, period}}", fallback: "근무 시간 현황입니다: {metrics}" },
    QSpec { id: "Q3", shape: "remaining mandatory courses: {courses: [{title, due_date}]}", fallback: "남은 의무 교육 과정입니다: {metrics}" },
    QSpec { id: "Q4", shape: "course deadlines: {courses: [{title, due_date}]}", fallback: "교육 마감일 안내입니다: {metrics}" },
    QSpec { id: "Q5", shape: "education completion: {courses: [{title, status, completed_at}]}", fallback: "교육 이수 현황입니다: {metrics}" },
    QSpec { id: "Q6", shape: "quiz scores: {scores: [{title, score, taken_at}]}", fallback: "퀴즈 응시 결과입니다: {metrics}" },
    QSpec { id: "Q7", shape: "department education rate: {metrics: {completion_rate, headcount, period}}", fallback: "부서 교육 이수율입니다: {metrics}" },
    QSpec { id: "Q8", shape: "my incident reports: {reports: [{report_id, status, filed_at}]}", fallback: "보안 사고 신고 이력입니다: {metrics}" },
    QSpec { id: "Q9", shape: "department incomplete count: {metrics: {incomplete_count, period}}", fallback: "부서 미이수 인원 현황입니다: {metrics}" },
    QSpec { id: "Q10", shape: "overtime allowance: {metrics: {limit_hours, used_hours, remaining_hours}}", fallback: "연장근로 한도 현황입니다: {metrics}" },
    QSpec { id: "Q11", shape: "annual leave: {metrics: {total_days, used_days, remaining_days}}", fallback: "연차 현황입니다: {metrics}" },
    QSpec { id: "Q12", shape: "attendance summary: {metrics: {late_count, absent_count, period}}", fallback: "근태 현황입니다: {metrics}" },
    QSpec { id: "Q13", shape: "overtime: {metrics: {overtime_hours, period}}", fallback: "초과근무 현황입니다: {metrics}" },
    QSpec { id: "Q14", shape: "welfare points: {metrics: {granted, used, remaining}}", fallback: "복지포인트 현황입니다: {metrics}" },
    QSpec { id: "Q15", shape: "leave usage history: {entries: [{date, leave_type}]}", fallback: "휴가 사용 내역입니다: {metrics}" },
    QSpec { id: "Q16", shape: "payroll summary: {metrics: {base, allowance, period}}", fallback: "급여 요약입니다: {metrics}" },
    QSpec { id: "Q17", shape: "business trips: {entries: [{destination, start_date, end_date}]}", fallback: "출장 내역입니다: {metrics}" },
    QSpec { id: "Q18", shape: "remote work usage: {metrics: {used_days, limit_days, period}}", fallback: "재택근무 사용 현황입니다: {metrics}" },
    QSpec { id: "Q19", shape: "family event support: {requests: [{event_type, status, requested_at}]}", fallback: "경조사 지원 신청 현황입니다: {metrics}" },
    QSpec { id: "Q20", shape: "department attendance: {metrics: {late_count, absent_count, headcount, period}}", fallback: "부서 근태 요약입니다: {metrics}" },
];

pub fn spec_for(q: &str) -> Option<&'static QSpec> {
    CATALOG.iter().find(|s| s.id == q)
}

/// Keyword heuristics narrowing a personal-status message to a Q code.
/// Rules fire in order; only confidently mappable phrasings get a code,
/// everything else falls through to the router's item-picker reply.
pub fn map_sub_intent(text: &str) -> Option<String> {
    let rules: &[(&[&str], &str)] = &[
        (&["복지포인트", "복지 포인트"], "Q14"),
        (&["경조사"], "Q19"),
        (&["재택근무", "재택 근무"], "Q18"),
        (&["출장"], "Q17"),
        (&["급여", "월급"], "Q16"),
        (&["휴가 사용 내역", "휴가 내역"], "Q15"),
        (&["연장근로 한도"], "Q10"),
        (&["초과근무", "야근"], "Q13"),
        (&["근태", "지각", "결근"], "Q12"),
        (&["연차", "휴가"], "Q11"),
        (&["신고 이력", "신고 내역"], "Q8"),
        (&["퀴즈 점수", "시험 점수"], "Q6"),
        (&["마감"], "Q4"),
        (&["남은 교육", "미이수"], "Q3"),
        (&["교육", "이수", "수료"], "Q5"),
        (&["근무 시간"], "Q2"),
    ];
    for (keywords, q) in rules {
        if keywords.iter().any(|k| text.contains(k)) {
            return Some((*q).to_string());
        }
    }
    None
}

/// Resolved facts plus the answer rendered from them.
pub struct PersonalAnswer {
    pub q: String,
    pub answer: String,
}

pub struct Personalizer;

impl Personalizer {
    /// Fetch facts for `q` and render them to natural language. The LLM
    /// is constrained to the facts; if it fails, the per-Q fallback
    /// template is used instead so the route never dead-ends.
    pub async fn answer(
        backend: &BackendClient,
        llm: &LlmClient,
        q: &str,
        user_id: &str,
        period: Option<&str>,
        target_dept_id: Option<&str>,
    ) -> Result<PersonalAnswer> {
        let facts = backend
            .resolve_personalization(user_id, q, period, target_dept_id)
            .await?;

        let answer = match Self::render_llm(llm, q, &facts, period).await {
            Ok(text) => text,
            Err(e) => {
                warn!(q, err = %e, "personalised answer generation failed, using template");
                Self::render_fallback(q, &facts)
            }
        };

        Ok(PersonalAnswer {
            q: q.to_string(),
            answer,
        })
    }

    async fn render_llm(
        llm: &LlmClient,
        q: &str,
        facts: &Value,
        period: Option<&str>,
    ) -> Result<String> {
        let shape = spec_for(q).map(|s| s.shape).unwrap_or("unknown");
        let system = format!(
            "당신은 사내 어시스턴트입니다. 아래 JSON 데이터만 사용하여 한국어로 간결하게 답하세요. \
             데이터에 없는 값은 절대 만들어내지 마세요. 조회 기간이 주어지면 반드시 언급하세요. \
             데이터 형식: {shape}"
        );
        let user = format!(
            "조회 기간: {}\n데이터: {}",
            period.unwrap_or("전체"),
            serde_json::to_string(facts).unwrap_or_default()
        );
        let completion = llm
            .complete(
                &[PromptMessage::system(system), PromptMessage::user(user)],
                &CompletionOptions {
                    temperature: Some(0.1),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| crate::error::ChatError::Llm(e.to_string()))?;
        Ok(completion.text)
    }

    /// Deterministic rendering used when the LLM is unavailable.
    pub fn render_fallback(q: &str, facts: &Value) -> String {
        let template = spec_for(q).map(|s| s.fallback).unwrap_or("{metrics}");
        template.replace("{metrics}", &flatten_metrics(facts))
    }
}

/// Render `{"metrics": {...}}` (or any object) as "key value, key value".
fn flatten_metrics(facts: &Value) -> String {
    let obj = facts.get("metrics").unwrap_or(facts);
    match obj {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k} {v}"))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welfare_points_map_to_q14() {
        assert_eq!(map_sub_intent("내 복지포인트 얼마나 남았어").as_deref(), Some("Q14"));
    }

    #[test]
    fn leave_maps_to_q11() {
        assert_eq!(map_sub_intent("내 연차 며칠 남았지").as_deref(), Some("Q11"));
    }

    #[test]
    fn unmatched_text_maps_to_none() {
        assert_eq!(map_sub_intent("오늘 날씨 어때"), None);
    }

    #[test]
    fn catalogue_covers_q1_through_q20() {
        assert_eq!(CATALOG.len(), 20);
        for n in 1..=20 {
            assert!(spec_for(&format!("Q{n}")).is_some(), "Q{n} missing");
        }
    }

    #[test]
    fn specific_phrases_win_over_generic_keywords() {
        // "휴가 사용 내역" must not collapse into the leave-balance Q
        assert_eq!(map_sub_intent("내 휴가 사용 내역 보여줘").as_deref(), Some("Q15"));
        assert_eq!(map_sub_intent("재택근무 며칠 썼지").as_deref(), Some("Q18"));
    }

    #[test]
    fn fallback_renders_metrics() {
        let facts = serde_json::json!({"metrics": {"total_days": 15, "used_days": 4, "remaining_days": 11}});
        let text = Personalizer::render_fallback("Q11", &facts);
        assert!(text.contains("연차"));
        assert!(text.contains("remaining_days 11"));
    }

    #[test]
    fn fallback_survives_unknown_q() {
        let facts = serde_json::json!({"x": 1});
        let text = Personalizer::render_fallback("Q99", &facts);
        assert!(text.contains("x 1"));
    }
}
