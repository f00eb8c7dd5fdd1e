//! OpenAI-compatible completion client.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing
//! `/chat/completions` in the OpenAI wire format.
//!
//! Two timeout policies apply:
//! - single-shot calls are bounded by the overall request timeout;
//! - streaming calls bound only the wait for response headers, since the
//!   stream itself lasts as long as generation does.
//!
//! Streaming is driven in the caller's task. Chunks are handed to the
//! [`ChunkSink`] in arrival order, and dropping the future closes the
//! upstream connection.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use promptgate_config::AppConfig;
use promptgate_core::error::ProviderError;
use promptgate_core::message::Turn;
use promptgate_core::provider::*;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::sse::{SseDecoder, SseLine};

/// Timeouts and limits for one client.
#[derive(Debug, Clone, Copy)]
pub struct ClientLimits {
    pub request_timeout: Duration,
    pub first_byte_timeout: Duration,
    pub max_error_body_bytes: usize,
}

impl Default for ClientLimits {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            first_byte_timeout: Duration::from_secs(30),
            max_error_body_bytes: 64 * 1024,
        }
    }
}

/// A CompletionClient for OpenAI-compatible backends.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: String,
    limits: ClientLimits,
    /// Bounded by the overall request timeout.
    client: reqwest::Client,
    /// No overall timeout; headers are bounded by `first_byte_timeout`.
    stream_client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a new OpenAI-compatible client.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        limits: ClientLimits,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(limits.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        let stream_client = reqwest::Client::builder()
            .connect_timeout(limits.first_byte_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            limits,
            client,
            stream_client,
        }
    }

    /// Build the client described by the application config.
    pub fn from_config(config: &AppConfig) -> Self {
        let limits = ClientLimits {
            request_timeout: Duration::from_secs(config.completion.request_timeout_secs),
            first_byte_timeout: Duration::from_secs(config.completion.first_byte_timeout_secs),
            max_error_body_bytes: config.completion.max_error_body_bytes,
        };
        Self::new(
            "openai",
            &config.api_base,
            config.api_key.clone().unwrap_or_default(),
            limits,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": request.params.model,
            "messages": Self::to_api_messages(&request.turns),
            "temperature": request.params.temperature,
            "max_tokens": request.params.max_tokens,
            "stream": stream,
        })
    }

    fn to_api_messages(turns: &[Turn]) -> Vec<serde_json::Value> {
        turns
            .iter()
            .map(|t| serde_json::json!({ "role": t.role.as_str(), "content": t.content }))
            .collect()
    }

    fn post(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut builder = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }
        builder
    }

    /// Turn a non-2xx response into an `Api` error with a bounded body snippet.
    async fn api_error(&self, response: reqwest::Response) -> ProviderError {
        let status_code = response.status().as_u16();
        let body = read_bounded(response, self.limits.max_error_body_bytes).await;
        warn!(provider = %self.name, status = status_code, body = %body, "Backend returned error");
        ProviderError::Api { status_code, body }
    }
}

/// Read at most `limit` bytes of a response body.
async fn read_bounded(response: reqwest::Response, limit: usize) -> String {
    let mut collected: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(Ok(bytes)) = stream.next().await {
        let room = limit.saturating_sub(collected.len());
        collected.extend_from_slice(&bytes[..bytes.len().min(room)]);
        if collected.len() >= limit {
            break;
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.params.model, "Sending completion request");

        let response = self
            .post(&self.client)
            .json(&Self::body(request, false))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Decode(e.to_string())
            }
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)?;

        Ok(CompletionResponse {
            id: api_response.id,
            content: choice.message.content.unwrap_or_default(),
            model: api_response.model,
            usage: api_response.usage.map(Usage::from),
            finish_reason: choice.finish_reason,
        })
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        sink: &mut dyn ChunkSink,
    ) -> std::result::Result<(), ProviderError> {
        debug!(provider = %self.name, model = %request.params.model, "Sending streaming request");

        let send = self
            .post(&self.stream_client)
            .header("Accept", "text/event-stream")
            .json(&Self::body(request, true))
            .send();

        let response = tokio::time::timeout(self.limits.first_byte_timeout, send)
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "no response headers within {:?}",
                    self.limits.first_byte_timeout
                ))
            })?
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let mut byte_stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let bytes =
                chunk_result.map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?;

            for line in decoder.push(&bytes)? {
                match line {
                    SseLine::Done => return Ok(()),
                    SseLine::Data(data) => self.forward(&data, sink).await?,
                }
            }
        }

        match decoder.finish() {
            Some(SseLine::Data(data)) => self.forward(&data, sink).await?,
            Some(SseLine::Done) | None => {}
        }

        // Stream ended without [DONE]
        trace!(provider = %self.name, "Stream closed without sentinel");
        Ok(())
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let mut builder = self.client.get(format!("{}/models", self.base_url));
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let response = builder.send().await.map_err(transport_error)?;
        Ok(response.status().is_success())
    }
}

impl OpenAiCompatClient {
    /// Parse one data payload and hand it to the sink. Malformed payloads and
    /// chunks without choices are skipped.
    async fn forward(
        &self,
        data: &str,
        sink: &mut dyn ChunkSink,
    ) -> std::result::Result<(), ProviderError> {
        let parsed = match serde_json::from_str::<StreamResponse>(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(provider = %self.name, data = %data, error = %e, "Skipping unparseable stream chunk");
                return Ok(());
            }
        };

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Ok(());
        };

        sink.on_chunk(StreamChunk {
            id: parsed.id,
            delta: choice.delta.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            model: parsed.model.filter(|m| !m.is_empty()),
        })
        .await
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptgate_core::message::Turn;

    fn request() -> CompletionRequest {
        CompletionRequest {
            turns: vec![Turn::system("be brief"), Turn::user("2+2?")],
            params: CompletionParams {
                model: "gpt-4o-mini".into(),
                temperature: 0.25,
                max_tokens: 100,
            },
        }
    }

    #[test]
    fn from_config_uses_api_base() {
        let mut config = AppConfig::default();
        config.api_base = "http://localhost:11434/v1/".into();
        let client = OpenAiCompatClient::from_config(&config);
        assert_eq!(client.name(), "openai");
        assert_eq!(client.base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn request_body_shape() {
        let body = OpenAiCompatClient::body(&request(), true);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "2+2?");
    }

    #[test]
    fn parse_completion_response() {
        let data = r#"{"id":"cmpl-1","model":"gpt-4o-mini","choices":[{"message":{"role":"assistant","content":"4"},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("4"));
        assert_eq!(Usage::from(parsed.usage.unwrap()).total_tokens, 4);
    }

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"id":"c1","model":"m","choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
        assert!(parsed.choices[0].finish_reason.is_none());
    }

    #[test]
    fn parse_stream_usage_only_chunk() {
        let data = r#"{"id":"c1","choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert!(parsed.choices.is_empty());
    }

    #[tokio::test]
    async fn forward_skips_malformed_and_choiceless_chunks() {
        let client = OpenAiCompatClient::new("t", "http://unused", "", ClientLimits::default());
        let mut sink: Vec<StreamChunk> = Vec::new();

        client.forward("{not json", &mut sink).await.unwrap();
        client.forward(r#"{"id":"c1","choices":[]}"#, &mut sink).await.unwrap();
        client
            .forward(
                r#"{"id":"c1","model":"","choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                &mut sink,
            )
            .await
            .unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].delta, "");
        assert_eq!(sink[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(sink[0].model, None);
    }
}
