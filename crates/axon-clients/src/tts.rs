//! Text-to-speech client. Returns WAV bytes; duration is read from the
//! WAV header by the render pipeline so scene timings can be reconciled
//! against the real narration length.

use tracing::{debug, warn};

use axon_core::config::TtsConfig;

use crate::error::{ClientError, Result};

pub struct TtsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    voice: String,
}

impl TtsClient {
    pub fn new(cfg: &TtsConfig) -> Self {
        Self {
            client: crate::http::build_client(cfg.timeout_secs),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            voice: cfg.voice.clone(),
        }
    }

    /// Synthesise `text` to a WAV payload.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "input": text,
            "voice": self.voice,
            "response_format": "wav",
        });

        let mut req = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, "TTS API error");
            return Err(ClientError::Api { status, message });
        }

        let bytes = resp.bytes().await?.to_vec();
        debug!(size = bytes.len(), "TTS audio received");
        if bytes.len() < 44 {
            return Err(ClientError::Parse("TTS payload shorter than a WAV header".into()));
        }
        Ok(bytes)
    }
}

/// Duration in seconds of a PCM WAV payload, from its header.
///
/// Layout: "RIFF"…"WAVE", fmt chunk carries byte rate at offset 28 of
/// the canonical 44-byte header; data length comes from the data chunk.
pub fn wav_duration_secs(bytes: &[u8]) -> Option<f64> {
    if bytes.len() < 44 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }
    let byte_rate = u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]);
    if byte_rate == 0 {
        return None;
    }

    // Walk chunks to find "data" — it is not always at offset 36.
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]]) as usize;
        if id == b"data" {
            return Some(size as f64 / byte_rate as f64);
        }
        pos += 8 + size + (size % 2);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal valid WAV: 1 s of silence at 8 kHz mono 8-bit.
    fn tiny_wav(data_len: u32, byte_rate: u32) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(b"RIFF");
        v.extend_from_slice(&(36 + data_len).to_le_bytes());
        v.extend_from_slice(b"WAVE");
        v.extend_from_slice(b"fmt ");
        v.extend_from_slice(&16u32.to_le_bytes());
        v.extend_from_slice(&1u16.to_le_bytes()); // PCM
        v.extend_from_slice(&1u16.to_le_bytes()); // mono
        v.extend_from_slice(&8000u32.to_le_bytes());
        v.extend_from_slice(&byte_rate.to_le_bytes());
        v.extend_from_slice(&1u16.to_le_bytes());
        v.extend_from_slice(&8u16.to_le_bytes());
        v.extend_from_slice(b"data");
        v.extend_from_slice(&data_len.to_le_bytes());
        v.extend(std::iter::repeat(0u8).take(data_len as usize));
        v
    }

    #[test]
    fn wav_duration_from_header() {
        let wav = tiny_wav(16000, 8000);
        let d = wav_duration_secs(&wav).unwrap();
        assert!((d - 2.0).abs() < 1e-9);
    }

    #[test]
    fn garbage_is_not_a_wav() {
        assert!(wav_duration_secs(b"not a wav at all, sorry").is_none());
    }
}
