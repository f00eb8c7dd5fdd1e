//! CompletionClient trait: the abstraction over the remote completion backend.
//!
//! A client knows how to send an ordered turn sequence to the backend and get
//! a response back, either as a complete message or as a stream of chunks
//! pushed into a [`ChunkSink`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Turn;

/// Generation parameters resolved for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// Temperature (0.0 = deterministic)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,
}

/// A request to the completion backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub turns: Vec<Turn>,
    pub params: CompletionParams,
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Backend-assigned response id
    pub id: String,

    /// Content of the first choice
    pub content: String,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Token usage statistics
    #[serde(default)]
    pub usage: Option<Usage>,

    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl CompletionResponse {
    pub fn total_tokens(&self) -> u32 {
        self.usage.as_ref().map_or(0, |u| u.total_tokens)
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk of a streaming response that carried at least one choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,

    /// Content delta of the first choice (may be empty)
    #[serde(default)]
    pub delta: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Receives stream chunks in arrival order.
///
/// Called from the task driving the stream, once per chunk. Returning an
/// error aborts the stream and becomes the call's error.
#[async_trait]
pub trait ChunkSink: Send {
    async fn on_chunk(&mut self, chunk: StreamChunk) -> std::result::Result<(), ProviderError>;
}

/// The core CompletionClient trait.
///
/// The orchestrator calls `complete()` or `complete_streaming()` without
/// knowing which backend is in use.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// A human-readable name for this backend (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Send a request and push every chunk into `sink` until the stream ends.
    ///
    /// Dropping the returned future aborts the upstream exchange.
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        sink: &mut dyn ChunkSink,
    ) -> std::result::Result<(), ProviderError>;

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[async_trait]
impl ChunkSink for Vec<StreamChunk> {
    async fn on_chunk(&mut self, chunk: StreamChunk) -> std::result::Result<(), ProviderError> {
        self.push(chunk);
        Ok(())
    }
}
