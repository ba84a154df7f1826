//! Storage collaborator used by the persistence queue

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use strand_core::Message;

use crate::buffer::ConversationBuffer;
use crate::context::OperationContext;
use crate::error::Result;

/// Durable message storage.
///
/// Saving a message whose id already exists replaces the stored version. Timeouts and
/// retries are the implementation's business; the queue calls each operation once.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Write one message
    async fn save_message(
        &self,
        context: &OperationContext,
        message: &Message,
        user_id: &str,
        conversation_id: &str,
    ) -> strand_core::Result<()>;

    /// Load a conversation in history order
    async fn load_messages(&self, user_id: &str, conversation_id: &str) -> strand_core::Result<Vec<Message>>;
}

/// Load a conversation into a buffer, marking every message as already durable
pub async fn load_buffer(
    store: &dyn MessageStore,
    user_id: &str,
    conversation_id: &str,
) -> Result<ConversationBuffer> {
    let messages = store.load_messages(user_id, conversation_id).await?;
    tracing::debug!(user_id, conversation_id, count = messages.len(), "loaded history");
    Ok(ConversationBuffer::with_history(messages))
}

/// Process-local store, mostly useful for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct InMemoryStore {
    conversations: Mutex<HashMap<(String, String), Vec<Message>>>,
    writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save_message` calls served so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Stored messages for a conversation
    pub fn messages(&self, user_id: &str, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .lock()
            .get(&(user_id.to_string(), conversation_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn save_message(
        &self,
        _context: &OperationContext,
        message: &Message,
        user_id: &str,
        conversation_id: &str,
    ) -> strand_core::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut conversations = self.conversations.lock();
        let messages = conversations
            .entry((user_id.to_string(), conversation_id.to_string()))
            .or_default();
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => messages.push(message.clone()),
        }
        Ok(())
    }

    async fn load_messages(&self, user_id: &str, conversation_id: &str) -> strand_core::Result<Vec<Message>> {
        Ok(self.messages(user_id, conversation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::Part;

    #[tokio::test]
    async fn test_save_replaces_by_id() {
        let store = InMemoryStore::new();
        let context = OperationContext::new("u1", "c1");
        let first = Message::assistant(vec![Part::text("draft")]).with_id("m-1");
        let second = Message::assistant(vec![Part::text("final")]).with_id("m-1");

        store.save_message(&context, &first, "u1", "c1").await.unwrap();
        store.save_message(&context, &second, "u1", "c1").await.unwrap();

        let stored = store.messages("u1", "c1");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].text(), "final");
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn test_conversations_are_isolated() {
        let store = InMemoryStore::new();
        let context = OperationContext::new("u1", "c1");
        store
            .save_message(&context, &Message::user("hi"), "u1", "c1")
            .await
            .unwrap();
        assert!(store.messages("u1", "c2").is_empty());
        assert!(store.messages("u2", "c1").is_empty());
    }

    #[tokio::test]
    async fn test_load_buffer_marks_history_durable() {
        let store = InMemoryStore::new();
        let context = OperationContext::new("u1", "c1");
        store
            .save_message(&context, &Message::user("hi"), "u1", "c1")
            .await
            .unwrap();

        let mut buffer = load_buffer(&store, "u1", "c1").await.unwrap();
        assert_eq!(buffer.len(), 1);
        assert!(buffer.drain_pending().is_empty());
    }
}
