//! ConversationStore trait: the durable conversation and message store.
//!
//! The pipeline consumes the store through a handful of operations and never
//! sees its schema or transport. Writes are best-effort from the pipeline's
//! point of view; reads used for ownership checks are authoritative.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::{Conversation, ConversationId, Message, PrincipalId};

/// The core ConversationStore trait.
///
/// Implementations: SQLite, PostgreSQL, in-memory (for testing).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "postgres", "memory").
    fn name(&self) -> &str;

    /// Fetch a conversation header by id.
    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> std::result::Result<Option<Conversation>, StoreError>;

    /// Create a conversation.
    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> std::result::Result<(), StoreError>;

    /// Append one message and bump the parent conversation's `updated_at`.
    async fn append_message(&self, message: &Message) -> std::result::Result<(), StoreError>;

    /// All messages of a conversation, oldest first.
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> std::result::Result<Vec<Message>, StoreError>;

    /// A principal's conversations, most recently updated first.
    async fn list_conversations(
        &self,
        owner: &PrincipalId,
        limit: usize,
    ) -> std::result::Result<Vec<Conversation>, StoreError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> std::result::Result<(), StoreError> {
        Ok(())
    }
}
