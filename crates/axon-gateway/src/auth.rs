use axum::http::HeaderMap;

use crate::app::AppState;

/// Shared-token check: `Authorization: Bearer <token>` or the internal
/// `X-Internal-Token` header. No configured token disables the check
/// (local development).
pub fn check_auth(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.config.gateway.auth_token.as_deref() else {
        return true;
    };
    if extract_bearer(headers) == Some(expected) {
        return true;
    }
    headers
        .get("x-internal-token")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|t| t == expected)
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_bearer(&headers), Some("abc"));
    }

    #[test]
    fn non_bearer_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);
    }
}
