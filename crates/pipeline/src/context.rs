//! Context assembly.
//!
//! Builds the turn sequence sent to the completion backend in two steps:
//!
//! 1. **History**: persisted turns for the conversation, oldest first, cut
//!    to the most recent `history_limit`, followed by the new user turn.
//! 2. **Injection**: the configured [`ContextInjector`] may prepend turns
//!    (a system instruction, retrieved context).
//!
//! The orchestrator runs the steps separately so the cache check can sit
//! between them.

use std::sync::Arc;

use async_trait::async_trait;
use promptgate_core::error::StoreError;
use promptgate_core::{ContextInjector, ConversationId, ConversationStore, Role, Turn};
use tracing::debug;

pub struct ContextAssembler {
    store: Arc<dyn ConversationStore>,
    injector: Arc<dyn ContextInjector>,
    history_limit: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn ConversationStore>, injector: Arc<dyn ContextInjector>) -> Self {
        Self {
            store,
            injector,
            history_limit: 20,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Bounded history plus the new user turn, without injected context.
    pub async fn history(
        &self,
        conversation_id: ConversationId,
        prompt: &str,
    ) -> Result<Vec<Turn>, StoreError> {
        let messages = self.store.list_messages(conversation_id).await?;
        let skip = messages.len().saturating_sub(self.history_limit);

        let mut turns: Vec<Turn> = messages[skip..].iter().map(|m| m.to_turn()).collect();
        turns.push(Turn::user(prompt));

        debug!(
            conversation_id = %conversation_id,
            persisted = messages.len(),
            kept = turns.len() - 1,
            "Assembled history"
        );
        Ok(turns)
    }

    /// Hand the sequence to the injector.
    pub async fn inject(&self, turns: Vec<Turn>) -> Vec<Turn> {
        let before = turns.len();
        let turns = self.injector.inject(turns).await;
        debug!(
            injector = self.injector.name(),
            injected = turns.len().saturating_sub(before),
            "Context injected"
        );
        turns
    }

    /// History followed by injection.
    pub async fn build(
        &self,
        conversation_id: ConversationId,
        prompt: &str,
    ) -> Result<Vec<Turn>, StoreError> {
        let turns = self.history(conversation_id, prompt).await?;
        Ok(self.inject(turns).await)
    }
}

/// Prepends one system turn unless the sequence already starts with one.
pub struct SystemPromptInjector {
    prompt: String,
}

impl SystemPromptInjector {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl ContextInjector for SystemPromptInjector {
    fn name(&self) -> &str {
        "system_prompt"
    }

    async fn inject(&self, turns: Vec<Turn>) -> Vec<Turn> {
        if turns.first().is_some_and(|t| t.role == Role::System) {
            return turns;
        }
        let mut out = Vec::with_capacity(turns.len() + 1);
        out.push(Turn::system(self.prompt.clone()));
        out.extend(turns);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptgate_core::{Conversation, Message, NoopInjector, PrincipalId};
    use promptgate_store::InMemoryStore;

    async fn seeded(count: usize) -> (Arc<InMemoryStore>, ConversationId) {
        let store = Arc::new(InMemoryStore::new());
        let conversation = Conversation::new(PrincipalId::new("p"));
        store.create_conversation(&conversation).await.unwrap();
        for i in 0..count {
            let msg = if i % 2 == 0 {
                Message::user(conversation.id, format!("q{i}"))
            } else {
                Message::assistant(conversation.id, format!("a{i}"), "m", 0, 0.0)
            };
            store.append_message(&msg).await.unwrap();
        }
        (store, conversation.id)
    }

    #[tokio::test]
    async fn history_keeps_most_recent_turns_and_appends_prompt() {
        let (store, id) = seeded(25).await;
        let assembler = ContextAssembler::new(store, Arc::new(NoopInjector));

        let turns = assembler.history(id, "next").await.unwrap();
        assert_eq!(turns.len(), 21);
        assert_eq!(turns[0].content, "a5");
        assert_eq!(turns[19].content, "q24");
        assert_eq!(turns[20], Turn::user("next"));
    }

    #[tokio::test]
    async fn short_history_is_kept_whole() {
        let (store, id) = seeded(3).await;
        let assembler = ContextAssembler::new(store, Arc::new(NoopInjector)).with_history_limit(5);

        let turns = assembler.history(id, "next").await.unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["q0", "a1", "q2", "next"]);
    }

    #[tokio::test]
    async fn build_prepends_system_prompt() {
        let (store, id) = seeded(2).await;
        let assembler =
            ContextAssembler::new(store, Arc::new(SystemPromptInjector::new("be helpful")));

        let turns = assembler.build(id, "hi").await.unwrap();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0], Turn::system("be helpful"));
        assert_eq!(turns[3], Turn::user("hi"));
    }

    #[tokio::test]
    async fn system_prompt_injection_is_idempotent() {
        let injector = SystemPromptInjector::new("sys");
        let once = injector.inject(vec![Turn::user("hi")]).await;
        let twice = injector.inject(once.clone()).await;
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
    }

    #[tokio::test]
    async fn existing_system_turn_is_not_replaced() {
        let injector = SystemPromptInjector::new("sys");
        let turns = injector
            .inject(vec![Turn::system("custom"), Turn::user("hi")])
            .await;
        assert_eq!(turns[0].content, "custom");
        assert_eq!(turns.len(), 2);
    }
}
