use axum::http::{StatusCode, Uri};
use axum::Json;
use serde_json::json;

/// Legacy direct-indexing surfaces. The retrieval engine owns indexing
/// now; the V2 render API owns media. Gone means gone.
pub async fn removed_handler(uri: Uri) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::GONE,
        Json(json!({
            "detail": format!(
                "{} has been removed; use /ai/chat/messages for search-backed answers \
                 and the /api/v2/videos render APIs for media",
                uri.path()
            ),
            "error_code": "ENDPOINT_REMOVED",
        })),
    )
}
