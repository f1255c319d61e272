use thiserror::Error;

/// Cross-cutting errors owned by no single subsystem.
///
/// Subsystem crates (clients, retrieval, chat, render) carry their own
/// error enums; this one covers startup and plumbing.
#[derive(Debug, Error)]
pub enum AxonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AxonError {
    /// Short error code string surfaced in `{"detail", "error_code"}` bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AxonError::Config(_) => "CONFIG_ERROR",
            AxonError::Serialization(_) => "SERIALIZATION_ERROR",
            AxonError::Io(_) => "IO_ERROR",
            AxonError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AxonError>;
