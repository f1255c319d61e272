//! PII masking policy on top of the remote detector.
//!
//! Fail-closed: a detector failure at INPUT or OUTPUT stage is an error
//! the turn must not survive with the original text intact. The LOG
//! stage degrades to a redaction placeholder instead, so telemetry can
//! still be emitted without ever carrying user text.

use tracing::warn;

use axon_clients::pii::PiiClient;
use axon_core::types::{PiiMaskResult, PiiStage};

use crate::error::{ChatError, Result};

pub const REDACTED: &str = "[REDACTED]";

pub struct PiiMasker {
    client: PiiClient,
}

impl PiiMasker {
    pub fn new(client: PiiClient) -> Self {
        Self { client }
    }

    pub async fn mask(&self, text: &str, stage: PiiStage) -> Result<PiiMaskResult> {
        if !self.client.enabled {
            return match stage {
                // Disabled by configuration — INPUT/OUTPUT pass through.
                PiiStage::Input | PiiStage::Output => Ok(passthrough(text)),
                // With no detector there is no way to know what a log
                // line would leak; redact wholesale.
                PiiStage::Log => Ok(redacted(text)),
            };
        }

        match self.client.mask(text, stage).await {
            Ok(result) => Ok(result),
            Err(e) => match stage {
                PiiStage::Input | PiiStage::Output => Err(ChatError::PiiUnavailable {
                    stage,
                    reason: e.to_string(),
                }),
                PiiStage::Log => {
                    warn!(err = %e, "PII detector failed at LOG stage, redacting");
                    Ok(redacted(text))
                }
            },
        }
    }
}

fn passthrough(text: &str) -> PiiMaskResult {
    PiiMaskResult {
        original: text.to_string(),
        masked: text.to_string(),
        has_pii: false,
        tags: Vec::new(),
    }
}

fn redacted(text: &str) -> PiiMaskResult {
    PiiMaskResult {
        original: text.to_string(),
        masked: REDACTED.to_string(),
        // Unknown is treated as present.
        has_pii: true,
        tags: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::config::PiiConfig;

    fn disabled_masker() -> PiiMasker {
        PiiMasker::new(PiiClient::new(&PiiConfig {
            base_url: "http://pii.invalid".into(),
            enabled: false,
            timeout_secs: 1,
        }))
    }

    /// Detector enabled but unreachable — every call fails at transport.
    fn unreachable_masker() -> PiiMasker {
        PiiMasker::new(PiiClient::new(&PiiConfig {
            base_url: "http://127.0.0.1:1".into(),
            enabled: true,
            timeout_secs: 1,
        }))
    }

    #[tokio::test]
    async fn disabled_detector_passes_input_through() {
        let r = disabled_masker().mask("hello", PiiStage::Input).await.unwrap();
        assert_eq!(r.masked, "hello");
        assert!(!r.has_pii);
    }

    #[tokio::test]
    async fn disabled_detector_still_redacts_log_stage() {
        let r = disabled_masker().mask("secret", PiiStage::Log).await.unwrap();
        assert_eq!(r.masked, REDACTED);
    }

    #[tokio::test]
    async fn input_failure_is_fail_closed() {
        let err = unreachable_masker()
            .mask("text", PiiStage::Input)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PII_DETECTOR_UNAVAILABLE");
    }

    #[tokio::test]
    async fn log_failure_redacts_instead_of_failing() {
        let r = unreachable_masker().mask("text", PiiStage::Log).await.unwrap();
        assert_eq!(r.masked, REDACTED);
        assert!(r.has_pii);
        assert!(!r.masked.contains("text"));
    }
}
