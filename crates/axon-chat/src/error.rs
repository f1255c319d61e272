use thiserror::Error;

use axon_core::types::PiiStage;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("PII detector unavailable at {stage} stage: {reason}")]
    PiiUnavailable { stage: PiiStage, reason: String },

    #[error(transparent)]
    Retrieval(#[from] axon_retrieval::RetrievalError),

    #[error("LLM failed: {0}")]
    Llm(String),

    #[error("LLM timed out")]
    LlmTimeout,

    #[error("request {request_id} is already in flight")]
    DuplicateInflight { request_id: String },

    #[error("backend call failed: {0}")]
    Backend(#[from] axon_clients::ClientError),

    #[error("generation produced an unusable artefact: {0}")]
    Generation(String),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::InvalidRequest(_) => "INVALID_REQUEST",
            ChatError::PiiUnavailable { .. } => "PII_DETECTOR_UNAVAILABLE",
            ChatError::Retrieval(e) => e.code(),
            ChatError::Llm(_) => "LLM_ERROR",
            ChatError::LlmTimeout => "LLM_TIMEOUT",
            ChatError::DuplicateInflight { .. } => "DUPLICATE_INFLIGHT",
            ChatError::Backend(_) => "BACKEND_ERROR",
            ChatError::Generation(_) => "GENERATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
