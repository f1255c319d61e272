use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// True for failures worth a single retry: transport errors and 5xx.
    pub fn is_retriable(&self) -> bool {
        match self {
            ClientError::Http(e) => !e.is_status() || e.status().is_some_and(|s| s.is_server_error()),
            ClientError::Api { status, .. } => *status >= 500,
            ClientError::Timeout { .. } => false,
            ClientError::Parse(_) | ClientError::Cancelled => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
