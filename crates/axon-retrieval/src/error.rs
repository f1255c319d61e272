use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval backend {backend} failed: {detail}")]
    Backend { backend: &'static str, detail: String },

    #[error("all retrieval backends failed: {detail}")]
    Unavailable { detail: String },

    #[error("embedding failed: {0}")]
    Embedding(#[from] axon_clients::ClientError),

    #[error("embedding contract violation: {0}")]
    Contract(String),
}

impl RetrievalError {
    pub fn code(&self) -> &'static str {
        match self {
            RetrievalError::Backend { .. } => "RAG_BACKEND_ERROR",
            RetrievalError::Unavailable { .. } => "RAG_SEARCH_UNAVAILABLE",
            RetrievalError::Embedding(_) => "EMBEDDING_ERROR",
            RetrievalError::Contract(_) => "EMBEDDING_CONTRACT_MISMATCH",
        }
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
