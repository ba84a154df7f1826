//! Print a stored conversation

use strand_core::Message;
use strand_history::{MessageStore, SanitizeOptions, load_buffer, sanitize_all};

use crate::render;

#[derive(Debug, Clone, Copy, Default)]
pub struct ShowOptions {
    /// Show what the next model call would receive instead of the stored history
    pub model_view: bool,
    /// Emit JSON instead of text
    pub json: bool,
    pub sanitize: SanitizeOptions,
}

/// Load a conversation and render it per the options
pub async fn show(
    store: &dyn MessageStore,
    user_id: &str,
    conversation_id: &str,
    options: ShowOptions,
) -> anyhow::Result<String> {
    let buffer = load_buffer(store, user_id, conversation_id).await?;
    let messages: Vec<Message> = if options.model_view {
        sanitize_all(buffer.messages(), options.sanitize)
    } else {
        buffer.snapshot()
    };

    if options.json {
        Ok(serde_json::to_string_pretty(&messages)?)
    } else if messages.is_empty() {
        Ok(format!("No messages in conversation {}", conversation_id))
    } else {
        Ok(render::render_conversation(&messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_core::{Part, ToolInvocation};
    use strand_history::{InMemoryStore, OperationContext};

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let context = OperationContext::new("u1", "c1");
        let messages = [
            Message::user("search please").with_id("m-0"),
            Message::assistant(vec![Part::Tool(ToolInvocation::call(
                "call-1",
                "search",
                json!({"query": "rust"}),
            ))])
            .with_id("m-1"),
        ];
        for message in &messages {
            store.save_message(&context, message, "u1", "c1").await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_show_stored_history() {
        let store = seeded_store().await;
        let out = show(&store, "u1", "c1", ShowOptions::default()).await.unwrap();
        assert!(out.contains("0: [user] m-0"));
        assert!(out.contains("[search call-1 input-available]"));
    }

    #[tokio::test]
    async fn test_show_model_view_drops_unfinished_calls() {
        let store = seeded_store().await;
        let options = ShowOptions {
            model_view: true,
            json: true,
            sanitize: SanitizeOptions::default(),
        };
        let out = show(&store, "u1", "c1", options).await.unwrap();
        let messages: Vec<Message> = serde_json::from_str(&out).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m-0");
    }

    #[tokio::test]
    async fn test_show_empty_conversation() {
        let store = InMemoryStore::new();
        let out = show(&store, "u1", "missing", ShowOptions::default()).await.unwrap();
        assert_eq!(out, "No messages in conversation missing");
    }
}
