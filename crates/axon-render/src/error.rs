use thiserror::Error;

use crate::types::JobStatus;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("script {script_id} is not approved")]
    ScriptNotApproved { script_id: String },

    #[error("render job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("job {job_id} has no render spec snapshot to retry from")]
    NoSnapshotForRetry { job_id: String },

    #[error("render spec for script {script_id} has no scenes")]
    EmptySpec { script_id: String },

    #[error("job {job_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("step {step} failed: {detail}")]
    StepFailed { step: &'static str, detail: String },

    #[error("job was cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("backend call failed: {0}")]
    Client(#[from] axon_clients::ClientError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RenderError {
    pub fn code(&self) -> &'static str {
        match self {
            RenderError::ScriptNotApproved { .. } => "SCRIPT_NOT_APPROVED",
            RenderError::JobNotFound { .. } => "JOB_NOT_FOUND",
            RenderError::NoSnapshotForRetry { .. } => "NO_RENDER_SPEC_FOR_RETRY",
            RenderError::EmptySpec { .. } => "EMPTY_RENDER_SPEC",
            RenderError::InvalidTransition { .. } => "INVALID_JOB_TRANSITION",
            RenderError::StepFailed { .. } => "RENDER_ERROR",
            RenderError::Cancelled => "JOB_CANCELLED",
            RenderError::Database(_) => "DATABASE_ERROR",
            RenderError::Client(_) => "BACKEND_ERROR",
            RenderError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
