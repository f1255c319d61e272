//! Structured-artefact composers over retrieval + LLM: FAQ sets, MCQ
//! quizzes, lecture scripts, and policy/education gap suggestions.

pub mod faq;
pub mod gap;
pub mod quiz;
pub mod script;

use serde_json::Value;

use crate::error::{ChatError, Result};

/// Pull the first JSON value out of an LLM reply, tolerating markdown
/// code fences and leading prose.
pub(crate) fn extract_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();

    // Fenced block first — the common case with JSON-instructed models.
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(v) = serde_json::from_str(after[..end].trim()) {
                return Ok(v);
            }
        }
    }

    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }

    // Last resort: widest brace/bracket span.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str(&trimmed[start..=end]) {
                    return Ok(v);
                }
            }
        }
    }

    Err(ChatError::Generation("reply contained no parseable JSON".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let v = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parses_fenced_json() {
        let v = extract_json("물론입니다.\n```json\n{\"a\": 2}\n```\n끝.").unwrap();
        assert_eq!(v["a"], 2);
    }

    #[test]
    fn parses_json_with_leading_prose() {
        let v = extract_json("결과는 다음과 같습니다: [1, 2, 3]").unwrap();
        assert_eq!(v[2], 3);
    }

    #[test]
    fn rejects_proseless_garbage() {
        assert!(extract_json("죄송합니다, 생성할 수 없습니다.").is_err());
    }
}
