use tracing::{debug, warn};

use axon_core::config::TelemetryConfig;

use crate::context::TurnContext;
use crate::events::TelemetryEvent;

/// Batch forwarder for telemetry events.
///
/// POSTs to `/internal/telemetry/events`; failures are logged and the
/// batch is dropped. No retry loop, no queue persistence.
#[derive(Clone)]
pub struct TelemetryEmitter {
    client: reqwest::Client,
    endpoint: Option<String>,
    enabled: bool,
}

impl TelemetryEmitter {
    /// `fallback_base_url` is the backend base URL, used when the
    /// telemetry section does not name its own sink.
    pub fn new(cfg: &TelemetryConfig, fallback_base_url: &str) -> Self {
        let base = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| fallback_base_url.to_string());
        let endpoint = if base.is_empty() {
            None
        } else {
            Some(format!(
                "{}/internal/telemetry/events",
                base.trim_end_matches('/')
            ))
        };
        Self {
            client: axon_clients::http::build_client(cfg.timeout_secs),
            endpoint,
            enabled: cfg.enabled,
        }
    }

    /// Forward a batch. Never returns an error to the caller.
    pub async fn emit_batch(&self, events: Vec<TelemetryEvent>) {
        if !self.enabled || events.is_empty() {
            return;
        }
        let Some(endpoint) = &self.endpoint else {
            return;
        };
        let count = events.len();
        match self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "events": events }))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                debug!(count, "telemetry batch forwarded");
            }
            Ok(resp) => {
                warn!(count, status = resp.status().as_u16(), "telemetry batch rejected, dropping");
            }
            Err(e) => {
                warn!(count, err = %e, "telemetry batch failed, dropping");
            }
        }
    }

    /// Drain the context and forward in the background so the user path
    /// never waits on the telemetry sink.
    pub fn flush(&self, ctx: &TurnContext) {
        let events = ctx.take_events();
        if events.is_empty() {
            return;
        }
        let emitter = self.clone();
        tokio::spawn(async move {
            emitter.emit_batch(events).await;
        });
    }
}
