//! The orchestrator: one pipeline run per request.
//!
//! ```text
//! resolve conversation → history → [cache lookup] → inject context
//!     → completion (single-shot or streamed) → [cache write] → persist
//! ```
//!
//! The cache is consulted only on the single-shot path. Ownership failures
//! short-circuit before any backend call. Cache and persistence failures
//! are logged and never fail the response.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use promptgate_cache::{FingerprintCache, RequestFingerprint};
use promptgate_config::AppConfig;
use promptgate_core::{
    ChunkSink, CompletionClient, CompletionParams, CompletionRequest, ContextInjector, Conversation,
    ConversationId, ConversationStore, Message, PipelineError, PrincipalId, ProviderError, Result,
    StreamChunk,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::{ContextAssembler, SystemPromptInjector};
use crate::stream::{FrameSink, StreamFrame};
use crate::validate::validate_prompt;

/// Conversations returned by a listing.
const LIST_LIMIT: usize = 50;

/// One inference request as received from a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,

    #[serde(default)]
    pub stream: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl PipelineRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn in_conversation(mut self, id: ConversationId) -> Self {
        self.conversation_id = Some(id);
        self
    }
}

/// Result of a single-shot run. Also the cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub content: String,
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,

    pub latency_ms: f64,
    pub cached: bool,
}

pub struct Orchestrator {
    client: Arc<dyn CompletionClient>,
    store: Arc<dyn ConversationStore>,
    cache: FingerprintCache,
    assembler: ContextAssembler,
    defaults: CompletionParams,
    max_prompt_chars: usize,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        store: Arc<dyn ConversationStore>,
        cache: FingerprintCache,
        injector: Arc<dyn ContextInjector>,
        defaults: CompletionParams,
    ) -> Self {
        let assembler = ContextAssembler::new(store.clone(), injector);
        Self {
            client,
            store,
            cache,
            assembler,
            defaults,
            max_prompt_chars: 32_000,
        }
    }

    /// Wire an orchestrator from configuration with the system-prompt injector.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<dyn CompletionClient>,
        store: Arc<dyn ConversationStore>,
        cache: FingerprintCache,
    ) -> Self {
        let injector = Arc::new(SystemPromptInjector::new(&config.pipeline.system_prompt));
        let defaults = CompletionParams {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: config.default_max_tokens,
        };
        Self::new(client, store, cache, injector, defaults)
            .with_history_limit(config.pipeline.history_limit)
            .with_max_prompt_chars(config.pipeline.max_prompt_chars)
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.assembler = self.assembler.with_history_limit(limit);
        self
    }

    pub fn with_max_prompt_chars(mut self, max: usize) -> Self {
        self.max_prompt_chars = max;
        self
    }

    pub fn client(&self) -> &Arc<dyn CompletionClient> {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub fn defaults(&self) -> &CompletionParams {
        &self.defaults
    }

    /// Check the prompt against the configured length cap. `complete` and
    /// `stream` run this themselves; callers only need it to reject a request
    /// before committing to a response format.
    pub fn validate(&self, request: &PipelineRequest) -> Result<()> {
        validate_prompt(&request.prompt, self.max_prompt_chars)
    }

    /// Run the single-shot pipeline. Invalid prompts fail before any
    /// collaborator is touched.
    pub async fn complete(
        &self,
        principal: &PrincipalId,
        request: &PipelineRequest,
    ) -> Result<InferenceResponse> {
        let start = Instant::now();
        self.validate(request)?;

        let conversation_id = self
            .resolve_conversation(principal, request.conversation_id)
            .await?;
        let turns = self
            .assembler
            .history(conversation_id, &request.prompt)
            .await?;

        let params = self.resolve_params(request);
        let fingerprint = RequestFingerprint::compute(
            principal.as_str(),
            &params.model,
            &request.prompt,
            params.temperature,
            params.max_tokens,
        );

        if let Some(mut hit) = self.cache.lookup::<InferenceResponse>(&fingerprint).await {
            info!(conversation_id = %conversation_id, "Serving cached response");
            hit.cached = true;
            hit.conversation_id = conversation_id;
            hit.latency_ms = elapsed_ms(start);
            return Ok(hit);
        }

        let turns = self.assembler.inject(turns).await;
        let completion = self
            .client
            .complete(&CompletionRequest { turns, params })
            .await
            .inspect_err(|e| {
                warn!(conversation_id = %conversation_id, error = %e, "Completion failed");
            })?;

        let token_count = completion.total_tokens();
        let response = InferenceResponse {
            id: Uuid::new_v4(),
            conversation_id,
            content: completion.content,
            model: completion.model,
            token_count: Some(token_count),
            latency_ms: elapsed_ms(start),
            cached: false,
        };
        info!(
            conversation_id = %conversation_id,
            model = %response.model,
            tokens = token_count,
            latency_ms = response.latency_ms,
            "Completion finished"
        );

        self.cache.store(&fingerprint, &response).await;
        self.persist_exchange(
            conversation_id,
            &request.prompt,
            &response.content,
            &response.model,
            token_count,
            response.latency_ms,
        )
        .await;

        Ok(response)
    }

    /// Run the streaming pipeline, pushing one frame per upstream chunk.
    ///
    /// Messages are persisted only when the stream ends normally. Dropping
    /// the returned future aborts the upstream exchange and persists nothing.
    pub async fn stream(
        &self,
        principal: &PrincipalId,
        request: &PipelineRequest,
        sink: &mut dyn FrameSink,
    ) -> Result<ConversationId> {
        self.validate(request)?;

        let conversation_id = self
            .resolve_conversation(principal, request.conversation_id)
            .await?;
        let turns = self
            .assembler
            .build(conversation_id, &request.prompt)
            .await?;
        let params = self.resolve_params(request);

        let mut relay = Relay {
            sink,
            conversation_id,
            content: String::new(),
        };
        match self
            .client
            .complete_streaming(&CompletionRequest { turns, params }, &mut relay)
            .await
        {
            Ok(()) => {}
            Err(ProviderError::Aborted(reason)) => {
                info!(conversation_id = %conversation_id, reason = %reason, "Stream abandoned by client");
                return Err(PipelineError::Cancelled);
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Streaming completion failed");
                return Err(e.into());
            }
        }

        // Usage is not accumulated across chunks.
        let model = self.defaults.model.clone();
        self.persist_exchange(conversation_id, &request.prompt, &relay.content, &model, 0, 0.0)
            .await;
        Ok(conversation_id)
    }

    /// The principal's most recently updated conversations.
    pub async fn list_conversations(&self, principal: &PrincipalId) -> Result<Vec<Conversation>> {
        Ok(self.store.list_conversations(principal, LIST_LIMIT).await?)
    }

    /// Messages of a conversation the principal owns, oldest first.
    pub async fn list_messages(
        &self,
        principal: &PrincipalId,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| PipelineError::ConversationNotFound(conversation_id.to_string()))?;
        if !conversation.is_owned_by(principal) {
            return Err(PipelineError::ConversationForbidden(conversation_id.to_string()));
        }
        Ok(self.store.list_messages(conversation_id).await?)
    }

    fn resolve_params(&self, request: &PipelineRequest) -> CompletionParams {
        CompletionParams {
            model: request
                .model
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| self.defaults.model.clone()),
            temperature: request.temperature.unwrap_or(self.defaults.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.defaults.max_tokens),
        }
    }

    /// An owned existing conversation, or a new one. A supplied id that is
    /// not in the store starts a new conversation under a fresh id.
    async fn resolve_conversation(
        &self,
        principal: &PrincipalId,
        requested: Option<ConversationId>,
    ) -> Result<ConversationId> {
        if let Some(id) = requested {
            match self.store.get_conversation(id).await? {
                Some(conversation) if conversation.is_owned_by(principal) => {
                    return Ok(conversation.id);
                }
                Some(_) => {
                    warn!(conversation_id = %id, principal = %principal, "Conversation belongs to another principal");
                    return Err(PipelineError::ConversationForbidden(id.to_string()));
                }
                None => debug!(conversation_id = %id, "Requested conversation absent, starting a new one"),
            }
        }

        let conversation = Conversation::new(principal.clone());
        self.store.create_conversation(&conversation).await?;
        info!(conversation_id = %conversation.id, principal = %principal, "New conversation");
        Ok(conversation.id)
    }

    async fn persist_exchange(
        &self,
        conversation_id: ConversationId,
        prompt: &str,
        content: &str,
        model: &str,
        token_count: u32,
        latency_ms: f64,
    ) {
        let user = Message::user(conversation_id, prompt);
        if let Err(e) = self.store.append_message(&user).await {
            error!(conversation_id = %conversation_id, error = %e, "Failed to persist user message");
        }

        let assistant =
            Message::assistant(conversation_id, content, model, token_count, latency_ms);
        if let Err(e) = self.store.append_message(&assistant).await {
            error!(conversation_id = %conversation_id, error = %e, "Failed to persist assistant message");
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Turns upstream chunks into frames and keeps the full text.
struct Relay<'a> {
    sink: &'a mut dyn FrameSink,
    conversation_id: ConversationId,
    content: String,
}

#[async_trait]
impl ChunkSink for Relay<'_> {
    async fn on_chunk(&mut self, chunk: StreamChunk) -> std::result::Result<(), ProviderError> {
        self.content.push_str(&chunk.delta);
        self.sink
            .send_frame(StreamFrame {
                id: chunk.id,
                conversation_id: self.conversation_id,
                delta: chunk.delta,
                finish_reason: chunk.finish_reason,
                model: chunk.model,
            })
            .await
    }
}
