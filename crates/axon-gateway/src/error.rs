//! Mapping from subsystem errors to the wire shape
//! `{"detail": "...", "error_code": "..."}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use axon_chat::ChatError;
use axon_render::RenderError;

pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            code,
            detail: detail.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid token",
        )
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "detail": self.detail,
            "error_code": self.code,
        }));
        (self.status, body).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        let status = match &e {
            ChatError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::Retrieval(r) if r.code() == "RAG_SEARCH_UNAVAILABLE" => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ChatError::Retrieval(_) => StatusCode::BAD_GATEWAY,
            ChatError::PiiUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Llm(_) | ChatError::LlmTimeout | ChatError::Backend(_) => {
                StatusCode::BAD_GATEWAY
            }
            ChatError::DuplicateInflight { .. } => StatusCode::CONFLICT,
            ChatError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            code: e.code(),
            detail: e.to_string(),
        }
    }
}

impl From<RenderError> for ApiError {
    fn from(e: RenderError) -> Self {
        let status = match &e {
            RenderError::ScriptNotApproved { .. }
            | RenderError::NoSnapshotForRetry { .. }
            | RenderError::InvalidTransition { .. } => StatusCode::CONFLICT,
            RenderError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            RenderError::EmptySpec { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RenderError::Client(_) => StatusCode::BAD_GATEWAY,
            RenderError::Cancelled
            | RenderError::StepFailed { .. }
            | RenderError::Database(_)
            | RenderError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            code: e.code(),
            detail: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_not_approved_is_conflict() {
        let api: ApiError = RenderError::ScriptNotApproved {
            script_id: "S1".into(),
        }
        .into();
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.code, "SCRIPT_NOT_APPROVED");
    }

    #[test]
    fn rag_unavailable_is_503() {
        let api: ApiError = ChatError::Retrieval(axon_retrieval::RetrievalError::Unavailable {
            detail: "both down".into(),
        })
        .into();
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api.code, "RAG_SEARCH_UNAVAILABLE");
    }

    #[test]
    fn invalid_request_is_422() {
        let api: ApiError = ChatError::InvalidRequest("empty".into()).into();
        assert_eq!(api.status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
