//! Replay a recorded stream of fragments through the pipeline
//!
//! Input is JSONL, one batch per line:
//! `{"source": "response", "fragments": [...], "metadata": {...}}`

use anyhow::Context;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use strand_core::{Fragment, Message, Metadata};
use strand_history::{
    MessageSource, MessageStore, OperationContext, PersistQueue, PersistQueueOptions,
    SanitizeOptions, load_buffer, sanitize_all,
};

/// One batch of fragments as recorded from a model call
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayLine {
    pub source: MessageSource,
    #[serde(default)]
    pub fragments: Vec<Fragment>,
    /// Attached to the last assistant message after the batch is ingested
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub persist: PersistQueueOptions,
    pub sanitize: SanitizeOptions,
    /// Output the buffer contents instead of the model view
    pub raw: bool,
}

/// Feed every line into the conversation buffer, persist, and return the resulting history
pub async fn replay<R>(
    input: R,
    store: Arc<dyn MessageStore>,
    context: &OperationContext,
    options: &ReplayOptions,
) -> anyhow::Result<Vec<Message>>
where
    R: AsyncRead + Unpin,
{
    let (Some(user_id), Some(conversation_id)) =
        (context.user_id.as_deref(), context.conversation_id.as_deref())
    else {
        anyhow::bail!("Replay needs both a user id and a conversation id");
    };

    let buffer = load_buffer(store.as_ref(), user_id, conversation_id)
        .await
        .context("Failed to load stored conversation")?
        .into_shared();
    let queue = PersistQueue::with_options(store, options.persist);

    let mut lines = BufReader::new(input).lines();
    let mut line_number = 0;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let entry: ReplayLine = serde_json::from_str(&line)
            .with_context(|| format!("Invalid replay entry on line {}", line_number))?;

        {
            let mut buffer = buffer.lock();
            buffer.ingest(&entry.fragments, entry.source);
            if let Some(metadata) = entry.metadata {
                if !buffer.attach_metadata_to_last_assistant(metadata, true) {
                    tracing::warn!(line = line_number, "metadata without a pending assistant message");
                }
            }
        }
        queue.schedule_save(&buffer, context);
    }

    queue
        .flush(&buffer, context)
        .await
        .context("Failed to persist conversation")?;

    let snapshot = buffer.lock().snapshot();
    tracing::info!(messages = snapshot.len(), lines = line_number, "replay finished");
    if options.raw {
        Ok(snapshot)
    } else {
        Ok(sanitize_all(&snapshot, options.sanitize))
    }
}
