//! HTTP streaming provider client

use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;

use chatrelay_models::{ErrorCode, StreamEvent, TokenUsage};

use crate::client::{EventStream, UpstreamClient, UpstreamInput};
use crate::error::AiError;
use crate::http_client::{DEFAULT_TIMEOUT, build_http_client};
use crate::retry::{UpstreamRetryConfig, response_to_error};

/// Streaming client for the provider's completion endpoint.
pub struct HttpUpstreamClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    retry_config: UpstreamRetryConfig,
}

impl HttpUpstreamClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(DEFAULT_TIMEOUT),
            api_key: api_key.into(),
            model: "relay-large".to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry_config: UpstreamRetryConfig::default(),
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_retry_config(mut self, config: UpstreamRetryConfig) -> Self {
        self.retry_config = config;
        self
    }
}

// Wire frame types decoded from the provider's SSE stream.

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum WireFrame {
    #[serde(rename = "response.output_text.delta")]
    TextDelta { delta: String },
    #[serde(rename = "response.completed")]
    Completed { response: CompletedPayload },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug)]
struct CompletedPayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize, Debug)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl UpstreamClient for HttpUpstreamClient {
    fn stream_completion(&self, input: UpstreamInput) -> EventStream {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();
        let model = self.model.clone();
        let retry_config = self.retry_config.clone();

        Box::pin(async_stream::stream! {
            let body = match &input {
                UpstreamInput::History(messages) => serde_json::json!({
                    "model": model,
                    "stream": true,
                    "input": messages,
                }),
                UpstreamInput::Resume { message, resume_id } => serde_json::json!({
                    "model": model,
                    "stream": true,
                    "input": message,
                    "previous_response_id": resume_id,
                }),
            };

            // Whole-request retry on rate limiting and network failures.
            // Other non-2xx responses surface immediately.
            let mut attempt = 0u32;
            let response = loop {
                let result = client
                    .post(format!("{}/responses", base_url))
                    .header("Authorization", format!("Bearer {}", api_key))
                    .header("Content-Type", "application/json")
                    .json(&body)
                    .send()
                    .await;

                let error = match result {
                    Ok(resp) if resp.status().is_success() => break resp,
                    Ok(resp) if resp.status().as_u16() == 429 => response_to_error(resp).await,
                    Ok(resp) => {
                        yield error_event(response_to_error(resp).await);
                        return;
                    }
                    Err(e) => AiError::Http(e),
                };

                if !error.is_retryable() || attempt >= retry_config.max_retries {
                    tracing::warn!(%error, attempt, "Upstream request exhausted retries");
                    yield StreamEvent::error(ErrorCode::AiError, "The model is currently unavailable, please try again later");
                    return;
                }

                attempt += 1;
                let delay = retry_config.delay_for(attempt, error.retry_after());
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    %error,
                    "Retrying upstream request"
                );
                yield StreamEvent::status("Model is busy, retrying", 10);
                tokio::time::sleep(delay).await;
            };

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut content = String::new();
            let mut usage: Option<TokenUsage> = None;
            let mut model_name = model.clone();
            let mut response_id: Option<String> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(error = %e, "Upstream stream interrupted");
                        yield StreamEvent::error(ErrorCode::AiError, "The model connection was interrupted");
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Process complete SSE events from the buffer.
                while let Some(pos) = buffer.find("\n\n") {
                    let event_str = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();

                    for frame in decode_frames(&event_str) {
                        match frame {
                            WireFrame::TextDelta { delta } => {
                                if !delta.is_empty() {
                                    content.push_str(&delta);
                                    yield StreamEvent::text_delta(delta);
                                }
                            }
                            WireFrame::Completed { response } => {
                                response_id = response.id;
                                if let Some(m) = response.model {
                                    model_name = m;
                                }
                                usage = response.usage.map(|u| {
                                    TokenUsage::new(u.input_tokens, u.output_tokens)
                                });
                            }
                            WireFrame::Error { code, message } => {
                                tracing::warn!(?code, %message, "Upstream emitted error frame");
                                yield StreamEvent::error(ErrorCode::AiError, message);
                                return;
                            }
                            WireFrame::Unknown => {}
                        }
                    }
                }
            }

            // Flush a final frame that lacked the trailing blank line,
            // e.g. when the connection closed right after it.
            for frame in decode_frames(buffer.trim()) {
                match frame {
                    WireFrame::TextDelta { delta } => {
                        if !delta.is_empty() {
                            content.push_str(&delta);
                            yield StreamEvent::text_delta(delta);
                        }
                    }
                    WireFrame::Completed { response } => {
                        response_id = response.id;
                        if let Some(m) = response.model {
                            model_name = m;
                        }
                        usage = response.usage.map(|u| TokenUsage::new(u.input_tokens, u.output_tokens));
                    }
                    WireFrame::Error { code, message } => {
                        tracing::warn!(?code, %message, "Upstream emitted error frame");
                        yield StreamEvent::error(ErrorCode::AiError, message);
                        return;
                    }
                    WireFrame::Unknown => {}
                }
            }

            yield StreamEvent::Done {
                content,
                usage,
                model: model_name,
                response_id,
            };
        })
    }
}

/// Decode the `data:` lines of one SSE event. Unparseable payloads are
/// skipped so a single bad frame cannot abort the stream.
fn decode_frames(event_str: &str) -> Vec<WireFrame> {
    let mut frames = Vec::new();
    for line in event_str.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            let data = data.trim();
            if data == "[DONE]" || data.is_empty() {
                continue;
            }
            match serde_json::from_str::<WireFrame>(data) {
                Ok(frame) => frames.push(frame),
                Err(_) => continue,
            }
        }
    }
    frames
}

fn error_event(error: AiError) -> StreamEvent {
    StreamEvent::error(ErrorCode::AiError, error.to_string())
}
