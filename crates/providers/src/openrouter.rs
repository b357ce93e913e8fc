//! OpenRouter provider implementation.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint, with the
//! OpenRouter extensions Pulse relies on:
//! - `HTTP-Referer` / `X-Title` app identification headers
//! - `reasoning: {enabled: true}` requests and `reasoning_details` replies
//! - error bodies shaped `{"error": {"message": ..., "code": ...}}`, also
//!   when delivered inside a 200 response or an SSE frame
//!
//! HTTP status codes are mapped onto [`ProviderError`] variants here; the
//! cascade decides what each variant means for model fallback.

use async_trait::async_trait;
use futures::StreamExt;
use pulse_config::AppConfig;
use pulse_core::error::ProviderError;
use pulse_core::provider::*;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// An OpenRouter (OpenAI-compatible) chat completion provider.
pub struct OpenRouterProvider {
    name: String,
    base_url: String,
    api_key: String,
    app_name: String,
    app_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenRouterProvider {
    /// Create a new provider for `base_url` with the given API key.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "openrouter".into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            app_name: "Pulse AI Ecosystem".into(),
            app_url: "https://pulse-ai.local".into(),
            timeout,
            client,
        })
    }

    /// Build from application config. Fails if no API key is configured.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("OPENROUTER_API_KEY is not set".into()))?;

        Ok(Self::new(
            &config.base_url,
            api_key,
            Duration::from_secs(config.inference.request_timeout_secs),
        )?
        .with_app_identity(&config.app_name, &config.app_url))
    }

    /// Override the `X-Title` / `HTTP-Referer` pair.
    pub fn with_app_identity(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.app_name = name.into();
        self.app_url = url.into();
        self
    }

    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
        });

        if request.reasoning {
            body["reasoning"] = serde_json::json!({ "enabled": true });
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", &self.app_url)
            .header("X-Title", &self.app_name)
            .json(body)
    }
}

/// Map a non-success HTTP status and its error text onto a provider error.
pub fn classify_status(status: u16, message: String, retry_after: Option<u64>) -> ProviderError {
    let lower = message.to_lowercase();
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(0),
        },
        401 | 403 => ProviderError::AuthenticationFailed(message),
        404 => ProviderError::ModelNotFound(message),
        413 => ProviderError::ContextLengthExceeded(message),
        _ if mentions_context_length(&lower) => ProviderError::ContextLengthExceeded(message),
        400 if mentions_invalid_model(&lower) => ProviderError::ModelNotFound(message),
        _ => ProviderError::ApiError {
            status_code: status,
            message,
        },
    }
}

fn mentions_context_length(lower: &str) -> bool {
    ["context length", "context_length", "maximum context", "too many tokens", "prompt is too long"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn mentions_invalid_model(lower: &str) -> bool {
    ["not a valid model", "model not found", "invalid model", "no endpoints found", "does not exist"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorEnvelope>(body)
        .ok()
        .and_then(|env| env.error)
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string())
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Turn a non-200 response into the matching provider error.
async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body);
    warn!(status, error = %message, "Provider returned error");
    classify_status(status, message, retry_after)
}

/// Error embedded in an otherwise successful payload.
fn embedded_error(error: ApiErrorBody) -> ProviderError {
    let status = error
        .code
        .as_ref()
        .and_then(|c| c.as_u64().or_else(|| c.as_str()?.parse().ok()))
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(502);
    classify_status(status, error.message, None)
}

/// One decoded server-sent-events line.
#[derive(Debug)]
pub enum SseEvent {
    /// Blank line, comment, non-data field, empty delta, or undecodable frame
    Skip,
    /// The `[DONE]` sentinel
    Done,
    Chunk(StreamChunk),
    /// An error frame sent after the stream opened, mapped by its `code`
    Error(ProviderError),
}

/// Decode one SSE line. Malformed frames are skipped, never fatal.
pub fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }

    match serde_json::from_str::<StreamResponse>(data) {
        Ok(frame) => {
            // Classified like a status code so a throttled candidate can
            // still hand off before it has produced output
            if let Some(error) = frame.error {
                return SseEvent::Error(embedded_error(error));
            }
            let content = frame
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|c| !c.is_empty());
            if content.is_none() && frame.usage.is_none() {
                return SseEvent::Skip;
            }
            SseEvent::Chunk(StreamChunk {
                content,
                done: false,
                usage: frame.usage,
            })
        }
        Err(e) => {
            trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
            SseEvent::Skip
        }
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request, false);
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .post(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().as_u16() != 200 {
            return Err(error_from_response(response).await);
        }

        let text = response.text().await.map_err(transport_error)?;
        let api_response: ApiResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        if let Some(error) = api_response.error {
            return Err(embedded_error(error));
        }

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("no choices found".into()))?;

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            model: api_response.model.unwrap_or(request.model),
            usage: api_response.usage,
            reasoning_details: choice.message.reasoning_details.filter(|v| !v.is_null()),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::build_body(&request, true);
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        // The body may legitimately take longer than the timeout; only
        // waiting for the response head is bounded here.
        let send = self.post(&body).header("Accept", "text/event-stream").send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "no response from {} within {}s",
                    request.model,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(transport_error)?;

        if response.status().as_u16() != 200 {
            return Err(error_from_response(response).await);
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let model = request.model;

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                // Process complete lines; a multi-byte char split across
                // network chunks stays in the buffer until its line ends.
                while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                    let line_bytes: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&line_bytes[..line_end]);

                    match parse_sse_line(&line) {
                        SseEvent::Skip => {}
                        SseEvent::Done => {
                            let _ = tx
                                .send(Ok(StreamChunk {
                                    done: true,
                                    ..StreamChunk::default()
                                }))
                                .await;
                            return;
                        }
                        SseEvent::Chunk(chunk) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                debug!(model = %model, "Stream receiver dropped, closing connection");
                                return;
                            }
                        }
                        SseEvent::Error(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx
                .send(Ok(StreamChunk {
                    done: true,
                    ..StreamChunk::default()
                }))
                .await;
        });

        Ok(rx)
    }
}

// --- OpenAI-compatible API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
