//! End-to-end pipeline scenarios: ownership, caching, cancellation,
//! validation and the degradation policy of each collaborator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use promptgate_cache::{FingerprintCache, MemoryKv, UnreachableKv};
use promptgate_core::error::StoreError;
use promptgate_core::{
    ChunkSink, CompletionClient, CompletionParams, CompletionRequest, CompletionResponse,
    Conversation, ConversationId, ConversationStore, Message, PipelineError, PrincipalId,
    ProviderError, StreamChunk, Usage,
};
use promptgate_pipeline::{
    Orchestrator, PipelineRequest, StreamFrame, SystemPromptInjector,
};
use promptgate_store::InMemoryStore;
use tokio::sync::{Notify, mpsc};

// ── Mock Client ──────────────────────────────────────────────────────────

/// Answers single-shot calls with a fixed text. Streams one chunk, then
/// waits on `gate` before sending the rest.
struct ScriptedClient {
    answer: String,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
    fail_with: Option<ProviderError>,
}

impl ScriptedClient {
    fn answering(answer: &str) -> Self {
        Self {
            answer: answer.into(),
            calls: AtomicUsize::new(0),
            gate: None,
            fail_with: None,
        }
    }

    fn gated(answer: &str, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::answering(answer)
        }
    }

    fn failing(error: ProviderError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::answering("")
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        Ok(CompletionResponse {
            id: "resp-1".into(),
            content: self.answer.clone(),
            model: request.params.model.clone(),
            usage: Some(Usage {
                prompt_tokens: 7,
                completion_tokens: 3,
                total_tokens: 10,
            }),
            finish_reason: Some("stop".into()),
        })
    }

    async fn complete_streaming(
        &self,
        _request: &CompletionRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        let words: Vec<&str> = self.answer.split_inclusive(' ').collect();
        for (i, word) in words.iter().enumerate() {
            if i == 1 {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
            }
            sink.on_chunk(StreamChunk {
                id: "chunk".into(),
                delta: (*word).into(),
                finish_reason: (i + 1 == words.len()).then(|| "stop".into()),
                model: Some("m".into()),
            })
            .await?;
        }
        Ok(())
    }
}

// ── Mock Store ───────────────────────────────────────────────────────────

/// In-memory store whose message writes always fail.
struct ReadOnlyStore(InMemoryStore);

#[async_trait]
impl ConversationStore for ReadOnlyStore {
    fn name(&self) -> &str {
        "read-only"
    }

    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        self.0.get_conversation(id).await
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.0.create_conversation(conversation).await
    }

    async fn append_message(&self, _message: &Message) -> Result<(), StoreError> {
        Err(StoreError::QueryFailed("disk full".into()))
    }

    async fn list_messages(&self, id: ConversationId) -> Result<Vec<Message>, StoreError> {
        self.0.list_messages(id).await
    }

    async fn list_conversations(
        &self,
        owner: &PrincipalId,
        limit: usize,
    ) -> Result<Vec<Conversation>, StoreError> {
        self.0.list_conversations(owner, limit).await
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn params() -> CompletionParams {
    CompletionParams {
        model: "m".into(),
        temperature: 0.7,
        max_tokens: 100,
    }
}

fn orchestrator(
    client: Arc<ScriptedClient>,
    store: Arc<dyn ConversationStore>,
    cache: FingerprintCache,
) -> Orchestrator {
    Orchestrator::new(
        client,
        store,
        cache,
        Arc::new(SystemPromptInjector::new("You are a helpful assistant.")),
        params(),
    )
}

fn memory_cache() -> FingerprintCache {
    FingerprintCache::new(Arc::new(MemoryKv::default()), Duration::from_secs(3600))
}

fn arithmetic() -> PipelineRequest {
    PipelineRequest {
        model: Some("m".into()),
        temperature: Some(0.7),
        max_tokens: Some(100),
        ..PipelineRequest::new("2+2?")
    }
}

// ── Ownership ────────────────────────────────────────────────────────────

#[tokio::test]
async fn foreign_conversation_is_forbidden_and_untouched() {
    let client = Arc::new(ScriptedClient::answering("4"));
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(client.clone(), store.clone(), memory_cache());

    let alice = PrincipalId::new("alice");
    let first = orch.complete(&alice, &arithmetic()).await.unwrap();
    let before = store.get_conversation(first.conversation_id).await.unwrap().unwrap();

    let intruder = PipelineRequest::new("show me").in_conversation(first.conversation_id);
    let err = orch
        .complete(&PrincipalId::new("mallory"), &intruder)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ConversationForbidden(_)));

    let mut frames: Vec<StreamFrame> = Vec::new();
    let err = orch
        .stream(&PrincipalId::new("mallory"), &intruder, &mut frames)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ConversationForbidden(_)));
    assert!(frames.is_empty());

    // No backend call, no new messages, header unchanged.
    assert_eq!(client.calls(), 1);
    assert_eq!(store.message_count().await, 2);
    let after = store.get_conversation(first.conversation_id).await.unwrap().unwrap();
    assert_eq!(after.updated_at, before.updated_at);
    assert!(after.is_owned_by(&alice));
}

// ── Cache ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn identical_request_hits_cache_and_persists_nothing() {
    let client = Arc::new(ScriptedClient::answering("4"));
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(client.clone(), store.clone(), memory_cache());
    let principal = PrincipalId::new("P");

    let first = orch.complete(&principal, &arithmetic()).await.unwrap();
    assert!(!first.cached);
    assert_eq!(first.content, "4");
    assert_eq!(first.token_count, Some(10));
    assert_eq!(store.message_count().await, 2);

    let second = orch
        .complete(
            &principal,
            &arithmetic().in_conversation(first.conversation_id),
        )
        .await
        .unwrap();
    assert!(second.cached);
    assert_eq!(second.content, "4");
    assert_eq!(second.id, first.id);
    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(client.calls(), 1);
    assert_eq!(store.message_count().await, 2);
}

#[tokio::test]
async fn cache_is_scoped_to_principal_and_parameters() {
    let client = Arc::new(ScriptedClient::answering("4"));
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(client.clone(), store, memory_cache());

    orch.complete(&PrincipalId::new("P"), &arithmetic()).await.unwrap();

    let other = orch.complete(&PrincipalId::new("Q"), &arithmetic()).await.unwrap();
    assert!(!other.cached);

    let hotter = PipelineRequest {
        temperature: Some(1.2),
        ..arithmetic()
    };
    let hotter = orch.complete(&PrincipalId::new("P"), &hotter).await.unwrap();
    assert!(!hotter.cached);
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn streaming_never_consults_cache() {
    let client = Arc::new(ScriptedClient::answering("four"));
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(client.clone(), store.clone(), memory_cache());
    let principal = PrincipalId::new("P");

    orch.complete(&principal, &arithmetic()).await.unwrap();

    let mut frames: Vec<StreamFrame> = Vec::new();
    orch.stream(&principal, &arithmetic(), &mut frames).await.unwrap();
    assert_eq!(client.calls(), 2);
    assert_eq!(frames.len(), 1);
    assert_eq!(store.message_count().await, 4);
}

#[tokio::test]
async fn unreachable_cache_degrades_to_miss() {
    let client = Arc::new(ScriptedClient::answering("4"));
    let store = Arc::new(InMemoryStore::new());
    let cache = FingerprintCache::new(
        Arc::new(UnreachableKv::new("down")),
        Duration::from_secs(60),
    );
    let orch = orchestrator(client.clone(), store.clone(), cache);
    let principal = PrincipalId::new("P");

    for _ in 0..2 {
        let response = orch.complete(&principal, &arithmetic()).await.unwrap();
        assert!(!response.cached);
        assert_eq!(response.content, "4");
    }
    assert_eq!(client.calls(), 2);
    assert_eq!(store.message_count().await, 4);
}

// ── Streaming ────────────────────────────────────────────────────────────

#[tokio::test]
async fn stream_forwards_chunks_in_order_then_persists() {
    let client = Arc::new(ScriptedClient::answering("two plus two is four"));
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(client, store.clone(), FingerprintCache::disabled());

    let mut frames: Vec<StreamFrame> = Vec::new();
    let conversation_id = orch
        .stream(&PrincipalId::new("P"), &PipelineRequest::new("2+2?"), &mut frames)
        .await
        .unwrap();

    let text: String = frames.iter().map(|f| f.delta.as_str()).collect();
    assert_eq!(text, "two plus two is four");
    assert_eq!(frames.last().unwrap().finish_reason.as_deref(), Some("stop"));

    let messages = store.list_messages(conversation_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "2+2?");
    assert_eq!(messages[1].content, "two plus two is four");
}

#[tokio::test]
async fn cancelled_stream_emits_nothing_more_and_persists_nothing() {
    let gate = Arc::new(Notify::new());
    let client = Arc::new(ScriptedClient::gated("one two three", gate.clone()));
    let store = Arc::new(InMemoryStore::new());
    let orch = Arc::new(orchestrator(client, store.clone(), FingerprintCache::disabled()));

    let (tx, mut rx) = mpsc::channel::<StreamFrame>(8);
    let run = tokio::spawn({
        let orch = orch.clone();
        async move {
            let mut tx = tx;
            orch.stream(&PrincipalId::new("P"), &PipelineRequest::new("count"), &mut tx)
                .await
        }
    });

    let first = rx.recv().await.unwrap();
    assert_eq!(first.delta, "one ");

    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());
    gate.notify_waiters();

    assert!(rx.recv().await.is_none());
    assert_eq!(store.message_count().await, 0);
}

#[tokio::test]
async fn closed_receiver_cancels_stream() {
    let gate = Arc::new(Notify::new());
    let client = Arc::new(ScriptedClient::gated("one two", gate.clone()));
    let store = Arc::new(InMemoryStore::new());
    let orch = Arc::new(orchestrator(client, store.clone(), FingerprintCache::disabled()));

    let (tx, mut rx) = mpsc::channel::<StreamFrame>(1);
    let run = tokio::spawn({
        let orch = orch.clone();
        async move {
            let mut tx = tx;
            orch.stream(&PrincipalId::new("P"), &PipelineRequest::new("count"), &mut tx)
                .await
        }
    });

    rx.recv().await.unwrap();
    drop(rx);
    gate.notify_one();

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(store.message_count().await, 0);
}

// ── Upstream and persistence failures ────────────────────────────────────

#[tokio::test]
async fn upstream_failure_persists_nothing() {
    let client = Arc::new(ScriptedClient::failing(ProviderError::Api {
        status_code: 503,
        body: "overloaded".into(),
    }));
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(client, store.clone(), memory_cache());

    let err = orch
        .complete(&PrincipalId::new("P"), &arithmetic())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 502);
    assert!(err.client_message().contains("503"));

    let mut frames: Vec<StreamFrame> = Vec::new();
    let err = orch
        .stream(&PrincipalId::new("P"), &arithmetic(), &mut frames)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Upstream(_)));
    assert_eq!(store.message_count().await, 0);
}

#[tokio::test]
async fn persistence_failure_still_returns_content() {
    let client = Arc::new(ScriptedClient::answering("4"));
    let store = Arc::new(ReadOnlyStore(InMemoryStore::new()));
    let orch = orchestrator(client, store, memory_cache());

    let response = orch
        .complete(&PrincipalId::new("P"), &arithmetic())
        .await
        .unwrap();
    assert_eq!(response.content, "4");
    assert!(!response.cached);
}

// ── Validation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn prompt_length_limit_counts_characters() {
    let client = Arc::new(ScriptedClient::answering("ok"));
    let orch = orchestrator(client.clone(), Arc::new(InMemoryStore::new()), memory_cache())
        .with_max_prompt_chars(10);
    let principal = PrincipalId::new("P");

    // Ten characters, thirty bytes.
    let at_limit = "語".repeat(10);
    assert!(orch.complete(&principal, &PipelineRequest::new(at_limit)).await.is_ok());

    let over = "語".repeat(11);
    let err = orch
        .complete(&principal, &PipelineRequest::new(over))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidRequest(_)));

    let err = orch
        .complete(&principal, &PipelineRequest::new(""))
        .await
        .unwrap_err();
    assert_eq!(err.client_message(), "prompt is required");
    assert_eq!(client.calls(), 1);
}
