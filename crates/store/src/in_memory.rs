//! In-memory store: useful for testing and ephemeral deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use promptgate_core::ConversationStore;
use promptgate_core::error::StoreError;
use promptgate_core::message::{Conversation, ConversationId, Message, PrincipalId};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    conversations: HashMap<ConversationId, Conversation>,
    /// Append order is the oldest-first order.
    messages: Vec<Message>,
}

/// A store that keeps everything in process memory.
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Total messages across all conversations.
    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self.state.read().await.conversations.get(&id).cloned())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.conversations.contains_key(&conversation.id) {
            return Err(StoreError::QueryFailed(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }
        state
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| {
                StoreError::QueryFailed(format!(
                    "conversation {} does not exist",
                    message.conversation_id
                ))
            })?;
        conversation.updated_at = conversation.updated_at.max(message.created_at);
        state.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn list_conversations(
        &self,
        owner: &PrincipalId,
        limit: usize,
    ) -> Result<Vec<Conversation>, StoreError> {
        let state = self.state.read().await;
        let mut owned: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.is_owned_by(owner))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        owned.truncate(limit);
        Ok(owned)
    }
}
