//! OpenAI-compatible chat-completions client — sync and streaming.
//!
//! Retry policy: one extra attempt after 500 ms on transport errors and
//! 5xx. Streaming honours a caller deadline and a cancellation token;
//! cancelling drops the in-flight response which aborts the request.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use axon_core::config::LlmConfig;

use crate::error::{ClientError, Result};
use crate::sse::{parse_sse_line, LineBuffer, SseParsed};

const RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One `{role, content}` pair as sent to the completions API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call overrides; `None` falls back to the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub finish_reason: String,
}

/// Events emitted while streaming a completion.
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    TextDelta {
        text: String,
    },
    Done {
        model: String,
        prompt_tokens: u32,
        completion_tokens: u32,
        finish_reason: String,
    },
    Error {
        message: String,
    },
}

pub struct LlmClient {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    pub model: String,
    temperature: f32,
    max_tokens: u32,
    stream_timeout: Duration,
}

impl LlmClient {
    pub fn new(cfg: &LlmConfig) -> Self {
        Self {
            client: crate::http::build_client(cfg.timeout_secs),
            stream_client: crate::http::build_streaming_client(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            stream_timeout: Duration::from_secs(cfg.stream_timeout_secs),
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Cheap reachability probe for the readiness endpoint.
    pub async fn ping(&self) -> bool {
        let mut req = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    fn body(&self, messages: &[PromptMessage], opts: &CompletionOptions, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": opts.temperature.unwrap_or(self.temperature),
            "max_tokens": opts.max_tokens.unwrap_or(self.max_tokens),
            "stream": stream,
        })
    }

    /// Non-streaming completion. One retry after 500 ms on transport
    /// errors and 5xx; everything else surfaces immediately.
    pub async fn complete(
        &self,
        messages: &[PromptMessage],
        opts: &CompletionOptions,
    ) -> Result<Completion> {
        let mut last_err = None;
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
            }
            match self.complete_once(messages, opts).await {
                Ok(c) => {
                    if attempt > 0 {
                        debug!(model = %self.model, "completion succeeded after retry");
                    }
                    return Ok(c);
                }
                Err(e) if e.is_retriable() && attempt == 0 => {
                    warn!(err = %e, "LLM request failed, retrying once");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(ClientError::Timeout { ms: 0 }))
    }

    async fn complete_once(
        &self,
        messages: &[PromptMessage],
        opts: &CompletionOptions,
    ) -> Result<Completion> {
        let body = self.body(messages, opts, false);
        debug!(model = %self.model, "sending completion request");

        let mut req = self.client.post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(t) = opts.timeout {
            req = req.timeout(t);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout { ms: 0 }
            } else {
                ClientError::Http(e)
            }
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "LLM API error");
            return Err(ClientError::Api {
                status,
                message: text,
            });
        }

        let api: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok(parse_response(api))
    }

    /// Streaming completion. Token deltas go through `tx`; a final
    /// `Done` or `Error` event is always emitted unless the receiver is
    /// dropped or `cancel` fires first.
    ///
    /// Backpressure is the channel itself: the next chunk is not read
    /// until the previous event has been accepted by the receiver.
    pub async fn stream(
        &self,
        messages: &[PromptMessage],
        opts: &CompletionOptions,
        tx: mpsc::Sender<LlmStreamEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let body = self.body(messages, opts, true);
        debug!(model = %self.model, "sending streaming completion request");

        let deadline = tokio::time::Instant::now() + opts.timeout.unwrap_or(self.stream_timeout);

        let mut req = self.stream_client.post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = tokio::select! {
            r = req.send() => r.map_err(ClientError::Http)?,
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(ClientError::Timeout { ms: self.stream_timeout.as_millis() as u64 });
            }
        };

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "LLM streaming API error");
            return Err(ClientError::Api {
                status,
                message: text,
            });
        }

        self.pump_stream(resp, tx, cancel, deadline).await
    }

    async fn pump_stream(
        &self,
        resp: reqwest::Response,
        tx: mpsc::Sender<LlmStreamEvent>,
        cancel: CancellationToken,
        deadline: tokio::time::Instant,
    ) -> Result<()> {
        use futures_util::StreamExt;

        let mut prompt_tokens: u32 = 0;
        let mut completion_tokens: u32 = 0;
        let mut finish_reason = String::new();
        let mut model = self.model.clone();
        let mut lines = LineBuffer::default();
        let mut byte_stream = resp.bytes_stream();

        'outer: loop {
            let chunk = tokio::select! {
                c = byte_stream.next() => c,
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ClientError::Timeout { ms: 0 });
                }
            };

            let chunk = match chunk {
                Some(Ok(c)) => c,
                Some(Err(e)) => {
                    let _ = tx
                        .send(LlmStreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return Err(ClientError::Http(e));
                }
                None => break,
            };

            let Ok(text) = std::str::from_utf8(&chunk) else {
                continue;
            };

            for line in lines.push(text) {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
                    continue;
                };
                if data.trim() == "[DONE]" {
                    break 'outer;
                }
                let Ok(chunk_resp) = serde_json::from_str::<StreamChunk>(&data) else {
                    continue;
                };
                if let Some(m) = chunk_resp.model {
                    model = m;
                }
                if let Some(usage) = &chunk_resp.usage {
                    prompt_tokens = usage.prompt_tokens;
                    completion_tokens = usage.completion_tokens;
                }
                for choice in &chunk_resp.choices {
                    if let Some(reason) = &choice.finish_reason {
                        if !reason.is_empty() {
                            finish_reason = reason.clone();
                        }
                    }
                    if let Some(content) = &choice.delta.content {
                        if !content.is_empty()
                            && tx
                                .send(LlmStreamEvent::TextDelta {
                                    text: content.clone(),
                                })
                                .await
                                .is_err()
                        {
                            // receiver dropped — the consumer went away
                            return Err(ClientError::Cancelled);
                        }
                    }
                }
            }
        }

        let _ = tx
            .send(LlmStreamEvent::Done {
                model,
                prompt_tokens,
                completion_tokens,
                finish_reason: if finish_reason.is_empty() {
                    "stop".to_string()
                } else {
                    finish_reason
                },
            })
            .await;
        Ok(())
    }
}

fn parse_response(resp: ApiResponse) -> Completion {
    let choice = resp.choices.into_iter().next();
    let text = choice
        .as_ref()
        .and_then(|c| c.message.content.as_deref())
        .unwrap_or("")
        .to_string();
    let finish_reason = choice
        .and_then(|c| c.finish_reason)
        .unwrap_or_else(|| "stop".to_string());

    Completion {
        text,
        model: resp.model,
        prompt_tokens: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
        completion_tokens: resp
            .usage
            .as_ref()
            .map(|u| u.completion_tokens)
            .unwrap_or(0),
        finish_reason,
    }
}

// Wire types — OpenAI response shapes.

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    model: Option<String>,
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_response_extracts_first_choice() {
        let api: ApiResponse = serde_json::from_str(
            r#"{
                "model": "test-model",
                "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            }"#,
        )
        .unwrap();
        let c = parse_response(api);
        assert_eq!(c.text, "hello");
        assert_eq!(c.prompt_tokens, 12);
        assert_eq!(c.finish_reason, "stop");
    }

    #[test]
    fn stream_chunk_parses_delta() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"model":"m","choices":[{"delta":{"content":"ab"},"finish_reason":null}],"usage":null}"#,
        )
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("ab"));
    }

    #[test]
    fn prompt_message_serialises_lowercase_role() {
        let m = PromptMessage::system("s");
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"role\":\"system\""));
    }
}
