//! Debounced, per-conversation serialized persistence of buffered messages
//!
//! Each conversation key moves through idle, armed (debounce timer pending) and running
//! (persist task in flight). Tasks for one key run strictly in submission order, each
//! waiting for its predecessor; distinct keys persist in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

use crate::buffer::SharedBuffer;
use crate::context::{Attribution, OperationContext};
use crate::error::{Error, Result};
use crate::store::MessageStore;

/// Default debounce window
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Configuration for [`PersistQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistQueueOptions {
    /// Quiet period after the last `schedule_save` before writing
    pub debounce: Duration,
}

impl Default for PersistQueueOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Writes drained buffer contents to a [`MessageStore`].
///
/// Cheap to clone; clones share timers and task chains. Must be used inside a tokio runtime.
#[derive(Clone)]
pub struct PersistQueue {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn MessageStore>,
    debounce: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

/// Bookkeeping for one conversation key
#[derive(Default)]
struct Entry {
    /// Armed debounce timer and its generation
    timer: Option<(u64, AbortHandle)>,
    generation: u64,
    /// Completes when the most recently enqueued task finishes
    tail: Option<oneshot::Receiver<()>>,
    in_flight: usize,
}

impl PersistQueue {
    /// Create a queue with default options
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_options(store, PersistQueueOptions::default())
    }

    pub fn with_options(store: Arc<dyn MessageStore>, options: PersistQueueOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                debounce: options.debounce,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The debounce window in use
    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    /// Number of conversation keys with an armed timer or a task in flight
    pub fn active_keys(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Arm (or re-arm) the debounce timer for the context's conversation.
    ///
    /// Bursts of calls inside the window coalesce into one persist task. Failures of that
    /// task are logged, since no caller is waiting for them. A no-op when the context has
    /// no user or conversation id.
    pub fn schedule_save(&self, buffer: &SharedBuffer, context: &OperationContext) {
        let Some(key) = context.queue_key() else {
            return;
        };

        let mut entries = self.inner.entries.lock();
        let entry = entries.entry(key.clone()).or_default();
        if let Some((_, timer)) = entry.timer.take() {
            timer.abort();
        }
        entry.generation += 1;
        let generation = entry.generation;

        let inner = Arc::clone(&self.inner);
        let buffer = Arc::clone(buffer);
        let context = context.clone();
        let debounce = self.inner.debounce;
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if !inner.disarm(&timer_key, generation) {
                return;
            }
            // Persist errors are logged by the task itself; only a panic surfaces here
            let task = inner.enqueue(timer_key.clone(), buffer, context);
            if let Err(e) = task.await {
                tracing::error!(key = %timer_key, error = %e, "persist task failed");
            }
        });
        entry.timer = Some((generation, timer.abort_handle()));

        tracing::debug!(key = %key, "schedule");
    }

    /// Cancel any pending timer, persist immediately and wait for the result.
    ///
    /// Runs after every task already queued for the conversation. A no-op when the context
    /// has no user or conversation id.
    pub async fn flush(&self, buffer: &SharedBuffer, context: &OperationContext) -> Result<()> {
        let Some(key) = context.queue_key() else {
            return Ok(());
        };

        if let Some(entry) = self.inner.entries.lock().get_mut(&key) {
            if let Some((_, timer)) = entry.timer.take() {
                timer.abort();
            }
        }
        tracing::debug!(key = %key, "flush");

        let task = self
            .inner
            .enqueue(key, Arc::clone(buffer), context.clone());
        task.await.map_err(|e| Error::TaskFailed(e.to_string()))?
    }
}

impl Inner {
    /// Clear the timer slot if it still belongs to `generation`
    fn disarm(&self, key: &str, generation: u64) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.timer.as_ref().is_some_and(|(g, _)| *g == generation) => {
                entry.timer = None;
                true
            }
            _ => false,
        }
    }

    /// Chain a persist task behind the current tail for `key`
    fn enqueue(
        self: &Arc<Self>,
        key: String,
        buffer: SharedBuffer,
        context: OperationContext,
    ) -> JoinHandle<Result<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        let previous = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_default();
            entry.in_flight += 1;
            entry.tail.replace(done_rx)
        };

        let guard = InFlight {
            inner: Arc::clone(self),
            key,
            _done: done_tx,
        };
        tokio::spawn(async move {
            if let Some(previous) = previous {
                // Resolves (possibly with an error) once the predecessor is gone
                let _ = previous.await;
            }
            let result = guard.inner.persist(&guard.key, &buffer, &context).await;
            if let Err(e) = &result {
                tracing::error!(key = %guard.key, error = %e, "failed to persist conversation messages");
            }
            drop(guard);
            result
        })
    }

    async fn persist(&self, key: &str, buffer: &SharedBuffer, context: &OperationContext) -> Result<()> {
        let (Some(user_id), Some(conversation_id)) =
            (context.user_id.as_deref(), context.conversation_id.as_deref())
        else {
            return Ok(());
        };

        // The lock is never held across the storage await
        let pending = buffer.lock().drain_pending();
        if pending.is_empty() {
            tracing::debug!(key = %key, "nothing-to-persist");
            return Ok(());
        }

        let ids: Vec<&str> = pending.iter().map(|m| m.id.as_str()).collect();
        tracing::debug!(key = %key, count = pending.len(), ids = ?ids, "persisting");

        let attribution = Attribution::from_context(context);
        for message in &pending {
            let message = attribution.apply(message.clone());
            if let Err(source) = self
                .store
                .save_message(context, &message, user_id, conversation_id)
                .await
            {
                tracing::error!(
                    key = %key,
                    message_id = %message.id,
                    error = %source,
                    "failed to save message"
                );
                return Err(Error::Persist {
                    key: key.to_string(),
                    source,
                });
            }
        }
        Ok(())
    }

    fn finish(&self, key: &str) {
        let mut entries = self.entries.lock();
        let idle = match entries.get_mut(key) {
            Some(entry) => {
                entry.in_flight = entry.in_flight.saturating_sub(1);
                entry.in_flight == 0 && entry.timer.is_none()
            }
            None => false,
        };
        if idle {
            entries.remove(key);
        }
    }
}

/// Held by a running persist task; releases the key and wakes the successor when dropped,
/// including on panic
struct InFlight {
    inner: Arc<Inner>,
    key: String,
    _done: oneshot::Sender<()>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner.finish(&self.key);
    }
}
