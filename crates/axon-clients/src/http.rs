use std::time::Duration;

/// Build a reqwest client with the per-service timeout.
///
/// Connect timeout is kept short so an unreachable host fails fast
/// instead of eating the whole request budget.
pub fn build_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(3))
        .build()
        .unwrap_or_default()
}

/// Build a client without a total-request timeout, for streaming bodies
/// where the deadline is enforced by the caller.
pub fn build_streaming_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .build()
        .unwrap_or_default()
}
