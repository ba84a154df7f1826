//! JSONL file storage for conversations
//!
//! One file per conversation at `<root>/<user>/<conversation>.jsonl`. Every save appends a
//! line; on load the latest line for each message id wins, in first-seen order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use strand_core::{Message, Result};
use strand_history::{MessageStore, OperationContext};

/// Entry types for the JSONL format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEntry {
    /// Conversation header, written once when the file is created
    Metadata {
        user_id: String,
        conversation_id: String,
        created_at: i64,
    },
    /// A (possibly updated) message
    Message { message: Message, timestamp: i64 },
}

/// Stores conversations as JSONL files under a root directory
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the file backing a conversation
    pub fn conversation_path(&self, user_id: &str, conversation_id: &str) -> PathBuf {
        self.root
            .join(file_component(user_id))
            .join(format!("{}.jsonl", file_component(conversation_id)))
    }

    /// List the stored conversations of a user, newest first
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationInfo>> {
        let dir = self.root.join(file_component(user_id));
        if !fs::try_exists(&dir).await? {
            return Ok(vec![]);
        }

        let mut conversations = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(info) = read_conversation_info(&path).await {
                conversations.push(info);
            }
        }

        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }
}

#[async_trait]
impl MessageStore for FileStore {
    async fn save_message(
        &self,
        _context: &OperationContext,
        message: &Message,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<()> {
        let path = self.conversation_path(user_id, conversation_id);
        let mut contents = String::new();

        if !fs::try_exists(&path).await? {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).await?;
            }
            let header = StoreEntry::Metadata {
                user_id: user_id.to_string(),
                conversation_id: conversation_id.to_string(),
                created_at: chrono::Utc::now().timestamp_millis(),
            };
            contents.push_str(&serde_json::to_string(&header)?);
            contents.push('\n');
        }

        let entry = StoreEntry::Message {
            message: message.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        contents.push_str(&serde_json::to_string(&entry)?);
        contents.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        tracing::debug!(path = %path.display(), message_id = %message.id, "appended message");
        Ok(())
    }

    async fn load_messages(&self, user_id: &str, conversation_id: &str) -> Result<Vec<Message>> {
        let path = self.conversation_path(user_id, conversation_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_messages(&content, &path))
    }
}

/// Latest version of each message, in first-seen order
fn parse_messages(content: &str, path: &Path) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoreEntry>(line) {
            Ok(StoreEntry::Message { message, .. }) => match positions.get(&message.id) {
                Some(&position) => messages[position] = message,
                None => {
                    positions.insert(message.id.clone(), messages.len());
                    messages.push(message);
                }
            },
            Ok(StoreEntry::Metadata { .. }) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), line = index + 1, error = %e, "skipping unreadable entry");
            }
        }
    }
    messages
}

async fn read_conversation_info(path: &Path) -> Option<ConversationInfo> {
    let content = fs::read_to_string(path).await.ok()?;
    let first_line = content.lines().next()?;
    let StoreEntry::Metadata {
        conversation_id,
        created_at,
        ..
    } = serde_json::from_str::<StoreEntry>(first_line).ok()?
    else {
        return None;
    };

    Some(ConversationInfo {
        id: conversation_id,
        created_at,
        message_count: parse_messages(&content, path).len(),
    })
}

/// Keep ids usable as file names
fn file_component(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// Information about a stored conversation
#[derive(Debug, Clone)]
pub struct ConversationInfo {
    pub id: String,
    pub created_at: i64,
    pub message_count: usize,
}

impl ConversationInfo {
    /// Format the created_at timestamp for display
    pub fn created_at_display(&self) -> String {
        use chrono::{TimeZone, Utc};
        Utc.timestamp_millis_opt(self.created_at)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}
