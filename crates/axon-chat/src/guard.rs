//! Post-generation answer guard.
//!
//! No hard block: an answer is always delivered. When grounding was
//! requested but absent, a visible warning prefix makes the uncertainty
//! explicit; when the answer drifts out of the target language, the
//! caller gets one shot at a low-temperature retry before the turn is
//! flagged `LANGUAGE_ERROR` in telemetry.

use axon_core::types::{Intent, Route};

/// Prefix attached when a grounded route answered without sources.
pub const SOFT_GUARDRAIL_PREFIX: &str = "⚠️ 일치하는 승인된 내부 문서를 찾지 못했습니다. \
     아래 내용은 일반적인 안내이며, 정확한 기준은 담당 부서에 확인해 주세요.\n\n";

/// Minimum share of Hangul among letters for an answer to count as
/// Korean.
const HANGUL_RATIO_THRESHOLD: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageCheck {
    Ok,
    /// Substantially non-Korean; retry once, then record the error.
    NeedsRetry,
}

pub struct GuardOutcome {
    pub answer: String,
    pub rag_gap_candidate: bool,
}

/// Apply the source-absence guard. `rag_gap_candidate` is set when a
/// policy/education intent got zero sources — the gap analyser feeds on
/// these turns.
pub fn apply_source_guard(
    route: Route,
    intent: Intent,
    source_count: usize,
    answer: String,
) -> GuardOutcome {
    let gap = source_count == 0
        && route == Route::RagInternal
        && matches!(intent, Intent::PolicyQa | Intent::EducationQa);
    let answer = if gap && !answer.starts_with(SOFT_GUARDRAIL_PREFIX) {
        format!("{SOFT_GUARDRAIL_PREFIX}{answer}")
    } else {
        answer
    };
    GuardOutcome {
        answer,
        rag_gap_candidate: gap,
    }
}

/// Language check over the letters of the answer. Digits, punctuation
/// and whitespace are neutral; an empty answer passes.
pub fn check_language(answer: &str) -> LanguageCheck {
    let mut letters = 0usize;
    let mut hangul = 0usize;
    for c in answer.chars() {
        if is_hangul(c) {
            letters += 1;
            hangul += 1;
        } else if c.is_alphabetic() {
            letters += 1;
        }
    }
    if letters == 0 {
        return LanguageCheck::Ok;
    }
    if (hangul as f32 / letters as f32) < HANGUL_RATIO_THRESHOLD {
        LanguageCheck::NeedsRetry
    } else {
        LanguageCheck::Ok
    }
}

fn is_hangul(c: char) -> bool {
    matches!(c,
        '\u{AC00}'..='\u{D7A3}' // syllables
        | '\u{1100}'..='\u{11FF}' // jamo
        | '\u{3130}'..='\u{318F}' // compatibility jamo
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_source_policy_answer_gets_prefix() {
        let out = apply_source_guard(Route::RagInternal, Intent::PolicyQa, 0, "일반 안내.".into());
        assert!(out.answer.starts_with("⚠️"));
        assert!(out.rag_gap_candidate);
    }

    #[test]
    fn grounded_answer_is_untouched() {
        let out = apply_source_guard(Route::RagInternal, Intent::PolicyQa, 3, "근거 있는 답.".into());
        assert!(!out.answer.starts_with("⚠️"));
        assert!(!out.rag_gap_candidate);
    }

    #[test]
    fn llm_only_route_never_gets_prefix() {
        let out = apply_source_guard(Route::LlmOnly, Intent::GeneralChat, 0, "안녕하세요!".into());
        assert!(!out.answer.starts_with("⚠️"));
        assert!(!out.rag_gap_candidate);
    }

    #[test]
    fn korean_answer_passes_language_check() {
        assert_eq!(check_language("연차는 근속 1년 이상부터 15일입니다."), LanguageCheck::Ok);
    }

    #[test]
    fn english_answer_needs_retry() {
        assert_eq!(
            check_language("Annual leave is fifteen days per year."),
            LanguageCheck::NeedsRetry
        );
    }

    #[test]
    fn parenthesised_terms_are_tolerated() {
        assert_eq!(
            check_language("단일 사인온(Single Sign-On)은 한 번의 로그인으로 여러 시스템에 접근하는 방식입니다."),
            LanguageCheck::Ok
        );
    }

    #[test]
    fn numeric_answer_passes() {
        assert_eq!(check_language("15"), LanguageCheck::Ok);
    }
}
