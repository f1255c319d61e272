use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller role as asserted by the backend at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Employee,
    Manager,
    Admin,
    IncidentManager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Web,
    Mobile,
}

/// Subject area a turn belongs to. `General` covers small talk and
/// anything the classifier cannot place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Domain {
    Policy,
    Incident,
    Education,
    General,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Domain::Policy => "POLICY",
            Domain::Incident => "INCIDENT",
            Domain::Education => "EDUCATION",
            Domain::General => "GENERAL",
        };
        write!(f, "{s}")
    }
}

/// Where the pipeline sends a classified turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Route {
    RagInternal,
    BackendApi,
    MixedBackendRag,
    LlmOnly,
    Clarify,
    SystemHelp,
    Unknown,
    Error,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Route::RagInternal => "RAG_INTERNAL",
            Route::BackendApi => "BACKEND_API",
            Route::MixedBackendRag => "MIXED_BACKEND_RAG",
            Route::LlmOnly => "LLM_ONLY",
            Route::Clarify => "CLARIFY",
            Route::SystemHelp => "SYSTEM_HELP",
            Route::Unknown => "UNKNOWN",
            Route::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// What the user wants, before routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    PolicyQa,
    IncidentReport,
    EducationQa,
    EduStatus,
    BackendStatus,
    SystemHelp,
    GeneralChat,
    Unknown,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::PolicyQa => "POLICY_QA",
            Intent::IncidentReport => "INCIDENT_REPORT",
            Intent::EducationQa => "EDUCATION_QA",
            Intent::EduStatus => "EDU_STATUS",
            Intent::BackendStatus => "BACKEND_STATUS",
            Intent::SystemHelp => "SYSTEM_HELP",
            Intent::GeneralChat => "GENERAL_CHAT",
            Intent::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// A single message in the turn's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: MsgRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgRole {
    User,
    Assistant,
}

/// One chat turn as received over HTTP. The gateway is stateless per
/// turn — the caller supplies the full message history it wants seen.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub user_id: String,
    pub user_role: UserRole,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub domain: Option<Domain>,
    pub channel: Channel,
    pub messages: Vec<TurnMessage>,
    /// Streaming only — idempotency key for duplicate suppression.
    #[serde(default)]
    pub request_id: Option<String>,
}

impl TurnRequest {
    /// The current query is the last user message.
    pub fn current_query(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MsgRole::User)
            .map(|m| m.content.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// One retrieved chunk attributed to a document. Ordered by descending
/// `score` wherever a list of sources appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub doc_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub score: f32,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
}

/// Which retrieval backend actually produced the sources for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetrieverUsed {
    Milvus,
    Ragflow,
    RagflowFallback,
    MilvusFallback,
    None,
}

impl fmt::Display for RetrieverUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetrieverUsed::Milvus => "MILVUS",
            RetrieverUsed::Ragflow => "RAGFLOW",
            RetrieverUsed::RagflowFallback => "RAGFLOW_FALLBACK",
            RetrieverUsed::MilvusFallback => "MILVUS_FALLBACK",
            RetrieverUsed::None => "NONE",
        };
        write!(f, "{s}")
    }
}

/// Classifier output for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct IntentResult {
    pub intent: Intent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_intent_id: Option<String>,
    pub domain: Domain,
    pub route: Route,
    pub confidence: f32,
    pub needs_clarify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarify_prompt: Option<String>,
}

/// Span tag for one detected entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiTag {
    pub entity: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct PiiMaskResult {
    pub original: String,
    pub masked: String,
    pub has_pii: bool,
    pub tags: Vec<PiiTag>,
}

/// Pipeline stage a mask call protects. LOG is the only stage allowed
/// to degrade to a redaction placeholder instead of failing closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiStage {
    Input,
    Output,
    Log,
}

impl fmt::Display for PiiStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PiiStage::Input => "INPUT",
            PiiStage::Output => "OUTPUT",
            PiiStage::Log => "LOG",
        };
        write!(f, "{s}")
    }
}

/// Per-turn metadata attached to every answer, success or failure.
#[derive(Debug, Clone, Serialize, Default)]
pub struct AnswerMeta {
    pub route: Option<Route>,
    pub intent: Option<Intent>,
    pub domain: Option<Domain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_model: Option<String>,
    pub rag_used: bool,
    pub rag_source_count: usize,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_latency_ms: Option<u64>,
    pub has_pii_input: bool,
    pub has_pii_output: bool,
    pub masked: bool,
    pub rag_gap_candidate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retriever_used: Option<RetrieverUsed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personalization_q: Option<String>,
}

/// The gateway's answer for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub meta: AnswerMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_query_is_last_user_message() {
        let req = TurnRequest {
            session_id: "s1".into(),
            user_id: "u1".into(),
            user_role: UserRole::Employee,
            department: None,
            domain: None,
            channel: Channel::Web,
            messages: vec![
                TurnMessage {
                    role: MsgRole::User,
                    content: "first".into(),
                },
                TurnMessage {
                    role: MsgRole::Assistant,
                    content: "reply".into(),
                },
                TurnMessage {
                    role: MsgRole::User,
                    content: "second".into(),
                },
            ],
            request_id: None,
        };
        assert_eq!(req.current_query(), Some("second"));
    }

    #[test]
    fn blank_query_is_rejected() {
        let req = TurnRequest {
            session_id: "s1".into(),
            user_id: "u1".into(),
            user_role: UserRole::Employee,
            department: None,
            domain: None,
            channel: Channel::Web,
            messages: vec![TurnMessage {
                role: MsgRole::User,
                content: "   ".into(),
            }],
            request_id: None,
        };
        assert_eq!(req.current_query(), None);
    }

    #[test]
    fn role_serialises_screaming_snake() {
        let json = serde_json::to_string(&UserRole::IncidentManager).unwrap();
        assert_eq!(json, "\"INCIDENT_MANAGER\"");
    }

    #[test]
    fn route_round_trips() {
        let json = serde_json::to_string(&Route::MixedBackendRag).unwrap();
        assert_eq!(json, "\"MIXED_BACKEND_RAG\"");
        let back: Route = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Route::MixedBackendRag);
    }
}
