//! Conversation buffer: folds streamed fragments into canonical, deduplicated messages.
//!
//! One buffer belongs to one agent execution. Calls must be sequenced by the owner; when the
//! persistence queue needs access from a background task the buffer is wrapped in a
//! [`SharedBuffer`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_core::{
    Fragment, FragmentRole, Message, Metadata, Part, ProviderMetadata, Role, ToolInvocation,
    fragment_to_message, new_message_id, provider,
};

/// A buffer shared between the agent loop and the persistence queue
pub type SharedBuffer = Arc<Mutex<ConversationBuffer>>;

/// Where a batch of fragments came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    /// Input typed by the user
    User,
    /// System prompts and instructions
    System,
    /// History loaded from durable storage (never marked pending)
    Memory,
    /// Output of the current model call
    Response,
}

/// Location of a tool part inside the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PartPosition {
    message: usize,
    part: usize,
}

/// Accumulates fragments into an ordered list of canonical messages
#[derive(Debug, Default)]
pub struct ConversationBuffer {
    messages: Vec<Message>,
    pending: HashSet<String>,
    tool_index: HashMap<String, PartPosition>,
    active_assistant: Option<String>,
}

impl ConversationBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer hydrated with already-persisted history
    pub fn with_history(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut buffer = Self::new();
        buffer.ingest_messages(messages, true);
        buffer
    }

    /// Wrap the buffer for sharing with the persistence queue
    pub fn into_shared(self) -> SharedBuffer {
        Arc::new(Mutex::new(self))
    }

    /// Number of messages in the history
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages awaiting persistence
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether a message is awaiting persistence
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    /// Id of the assistant message currently being extended by streaming, if any
    pub fn active_assistant_id(&self) -> Option<&str> {
        self.active_assistant.as_deref()
    }

    /// Borrow the history without copying
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Fold raw fragments into the conversation.
    ///
    /// Malformed content is dropped at part granularity; this never fails.
    pub fn ingest(&mut self, fragments: &[Fragment], source: MessageSource) {
        for fragment in fragments {
            let Some(message) = fragment_to_message(fragment) else {
                tracing::debug!(role = ?fragment.role, "fragment produced no content");
                continue;
            };

            match fragment.role {
                FragmentRole::Assistant => self.handle_assistant(message, source),
                FragmentRole::Tool => {
                    let Some(target) = self.last_assistant_index() else {
                        let ids: Vec<_> = message
                            .tool_invocations()
                            .map(|t| t.tool_call_id.as_str())
                            .collect();
                        tracing::warn!(
                            tool_call_ids = ?ids,
                            "dropping tool result without a preceding assistant message"
                        );
                        continue;
                    };
                    self.merge_into(target, message, source != MessageSource::Memory);
                }
                FragmentRole::User | FragmentRole::System => self.append_new(message, source),
            }
        }
    }

    /// Add canonical messages as-is (e.g. history loaded from storage)
    pub fn ingest_messages(&mut self, messages: impl IntoIterator<Item = Message>, mark_as_saved: bool) {
        for message in messages {
            self.append_existing(message, mark_as_saved);
        }
    }

    /// Take every message not yet persisted, in history order.
    ///
    /// Returns copies; a second call with nothing new pending returns an empty list.
    pub fn drain_pending(&mut self) -> Vec<Message> {
        if self.pending.is_empty() {
            return vec![];
        }

        let drained: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| self.pending.contains(&m.id))
            .cloned()
            .collect();
        self.pending.clear();

        let drained_active = self
            .active_assistant
            .as_ref()
            .is_some_and(|active| drained.iter().any(|m| &m.id == active));
        if drained_active {
            self.active_assistant = None;
        }

        if !drained.is_empty() {
            let ids: Vec<&str> = drained.iter().map(|m| m.id.as_str()).collect();
            tracing::debug!(count = drained.len(), ids = ?ids, "drain-pending");
        }
        drained
    }

    /// Copy of the full history
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Merge `metadata` into the most recent assistant message.
    ///
    /// With `require_pending`, only a message still awaiting persistence qualifies.
    /// Returns whether a target was found.
    pub fn attach_metadata_to_last_assistant(&mut self, metadata: Metadata, require_pending: bool) -> bool {
        let Some(index) = self.last_assistant_index() else {
            return false;
        };
        let id = self.messages[index].id.clone();
        if require_pending && !self.pending.contains(&id) {
            return false;
        }

        let target = self.messages[index].metadata.get_or_insert_with(Metadata::new);
        for (key, value) in metadata {
            target.insert(key, value);
        }
        self.pending.insert(id);
        true
    }

    fn handle_assistant(&mut self, message: Message, source: MessageSource) {
        let Some(last_index) = self.last_assistant_index() else {
            self.append_new(message, source);
            return;
        };
        let last_id = self.messages[last_index].id.clone();

        if source == MessageSource::Response {
            let active = self.active_assistant.as_deref();
            let continues_turn = active == Some(last_id.as_str())
                || active == Some(message.id.as_str())
                || self.pending.contains(&last_id);

            if continues_turn {
                self.merge_into(last_index, message, true);
                self.active_assistant = Some(last_id);
            } else {
                self.append_new(message, source);
            }
            return;
        }

        if message.id == last_id {
            self.merge_into(last_index, message, source != MessageSource::Memory);
        } else {
            self.append_new(message, source);
        }
    }

    fn append_new(&mut self, mut message: Message, source: MessageSource) {
        self.assign_unique_id(&mut message);
        message.parts = place_step_markers(std::mem::take(&mut message.parts));
        let id = message.id.clone();
        let role = message.role;
        self.messages.push(message);
        self.register_tool_parts(self.messages.len() - 1);

        if source != MessageSource::Memory {
            self.pending.insert(id.clone());
        }
        if source == MessageSource::Response {
            self.active_assistant = Some(id.clone());
        }
        tracing::debug!(message_id = %id, role = role.as_str(), ?source, "append-message");
    }

    fn append_existing(&mut self, mut message: Message, mark_as_saved: bool) {
        if message.id.trim().is_empty() {
            message.id = new_message_id();
        } else if self.messages.iter().any(|m| m.id == message.id) {
            tracing::debug!(message_id = %message.id, "skipping duplicate history message");
            return;
        }
        let id = message.id.clone();
        self.messages.push(message);
        self.register_tool_parts(self.messages.len() - 1);
        if !mark_as_saved {
            self.pending.insert(id.clone());
        }
        tracing::debug!(message_id = %id, mark_as_saved, "append-existing");
    }

    fn assign_unique_id(&self, message: &mut Message) {
        if message.id.trim().is_empty() {
            message.id = new_message_id();
        } else if self.messages.iter().any(|m| m.id == message.id) {
            let fresh = new_message_id();
            tracing::warn!(message_id = %message.id, replacement = %fresh, "message id already in history");
            message.id = fresh;
        }
    }

    /// Merge the parts and metadata of `incoming` into the message at `target`
    fn merge_into(&mut self, target: usize, incoming: Message, mark_pending: bool) {
        let mut modified = false;
        let mut touched = BTreeSet::from([target]);

        if let Some(metadata) = incoming.metadata {
            if !metadata.is_empty() {
                let existing = self.messages[target].metadata.get_or_insert_with(Metadata::new);
                for (key, value) in metadata {
                    if existing.get(&key) != Some(&value) {
                        existing.insert(key, value);
                        modified = true;
                    }
                }
            }
        }

        let mut counts = signature_counts(&self.messages[target].parts);
        let mut consumed: HashMap<String, usize> = HashMap::new();

        for part in incoming.parts {
            let part = match part {
                Part::Tool(tool) => {
                    if let Some(owner) = self.merge_tool_part(target, tool, &mut counts) {
                        touched.insert(owner);
                        modified = true;
                    }
                    continue;
                }
                // Markers are synthesized here, never copied from input
                Part::StepStart => continue,
                other => other,
            };

            let signature = part_signature(&part);
            let occurrence = {
                let seen = consumed.entry(signature.clone()).or_insert(0);
                *seen += 1;
                *seen
            };
            let existing = counts.get(&signature).copied().unwrap_or(0);

            if existing >= occurrence {
                if self.update_existing_part(target, &signature, occurrence - 1, &part) {
                    modified = true;
                }
                continue;
            }

            if matches!(part, Part::Text { .. }) && self.ensure_step_before_text(target, &mut counts) {
                modified = true;
            }
            self.messages[target].parts.push(part);
            *counts.entry(signature).or_insert(0) += 1;
            modified = true;
        }

        if !modified {
            return;
        }

        for index in touched {
            if mark_pending {
                self.pending.insert(self.messages[index].id.clone());
            }
            self.register_tool_parts(index);
        }
        tracing::debug!(
            message_id = %self.messages[target].id,
            parts = self.messages[target].parts.len(),
            "merge"
        );
    }

    /// Update a tracked tool part in place, or append it to `target`.
    ///
    /// Returns the index of the message that changed, or `None` if the part was dropped.
    fn merge_tool_part(
        &mut self,
        target: usize,
        incoming: ToolInvocation,
        counts: &mut HashMap<String, usize>,
    ) -> Option<usize> {
        let position = if incoming.has_call_id() {
            self.tool_index.get(&incoming.tool_call_id).copied()
        } else {
            incoming
                .approval
                .as_ref()
                .and_then(|approval| self.find_by_approval(&approval.id))
        };

        if let Some(position) = position {
            let tool_call_id = incoming.tool_call_id.clone();
            let existing = self
                .messages
                .get_mut(position.message)
                .and_then(|m| m.parts.get_mut(position.part))
                .and_then(Part::as_tool_mut)
                .filter(|t| tool_call_id.is_empty() || t.tool_call_id == tool_call_id);
            if let Some(existing) = existing {
                update_tool(existing, incoming);
                return Some(position.message);
            }
        }

        if !incoming.has_call_id() {
            tracing::debug!(tool_name = %incoming.tool_name, "dropping tool part without call id");
            return None;
        }

        let part = Part::Tool(incoming);
        *counts.entry(part_signature(&part)).or_insert(0) += 1;
        let message = &mut self.messages[target];
        message.parts.push(part);
        if let Some(Part::Tool(tool)) = message.parts.last() {
            self.tool_index.insert(
                tool.tool_call_id.clone(),
                PartPosition {
                    message: target,
                    part: message.parts.len() - 1,
                },
            );
        }
        Some(target)
    }

    fn find_by_approval(&self, approval_id: &str) -> Option<PartPosition> {
        self.messages
            .iter()
            .enumerate()
            .rev()
            .find_map(|(message_index, message)| {
                message.parts.iter().rposition(|part| {
                    part.as_tool()
                        .and_then(|t| t.approval.as_ref())
                        .is_some_and(|a| a.id == approval_id)
                })
                .map(|part| PartPosition {
                    message: message_index,
                    part,
                })
            })
    }

    /// Refresh provider metadata or reasoning text on the n-th part with `signature`
    fn update_existing_part(
        &mut self,
        target: usize,
        signature: &str,
        occurrence: usize,
        incoming: &Part,
    ) -> bool {
        let Some(existing) = self.messages[target]
            .parts
            .iter_mut()
            .filter(|part| part_signature(part) == signature)
            .nth(occurrence)
        else {
            return false;
        };

        match (existing, incoming) {
            (
                Part::Text {
                    provider_metadata, ..
                },
                Part::Text {
                    provider_metadata: Some(incoming_meta),
                    ..
                },
            ) => merge_provider_metadata(provider_metadata, incoming_meta),
            (
                Part::Reasoning {
                    text,
                    provider_metadata,
                    ..
                },
                Part::Reasoning {
                    text: incoming_text,
                    provider_metadata: incoming_meta,
                    ..
                },
            ) => {
                let mut updated = false;
                if !incoming_text.trim().is_empty() && text != incoming_text {
                    *text = incoming_text.clone();
                    updated = true;
                }
                if let Some(incoming_meta) = incoming_meta {
                    updated |= merge_provider_metadata(provider_metadata, incoming_meta);
                }
                updated
            }
            _ => false,
        }
    }

    /// A text reply following a finished tool run starts a new step
    fn ensure_step_before_text(&mut self, target: usize, counts: &mut HashMap<String, usize>) -> bool {
        let parts = &mut self.messages[target].parts;
        if !follows_finished_tool(parts) {
            return false;
        }
        parts.push(Part::StepStart);
        *counts.entry(part_signature(&Part::StepStart)).or_insert(0) += 1;
        true
    }

    fn register_tool_parts(&mut self, message_index: usize) {
        for (part_index, part) in self.messages[message_index].parts.iter().enumerate() {
            if let Some(tool) = part.as_tool().filter(|t| t.has_call_id()) {
                self.tool_index.insert(
                    tool.tool_call_id.clone(),
                    PartPosition {
                        message: message_index,
                        part: part_index,
                    },
                );
            }
        }
    }

    fn last_assistant_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == Role::Assistant)
    }
}

fn follows_finished_tool(parts: &[Part]) -> bool {
    parts
        .last()
        .and_then(Part::as_tool)
        .is_some_and(|tool| tool.state.is_terminal())
}

/// Drop incoming markers and start a new step wherever text follows a finished tool run
fn place_step_markers(parts: Vec<Part>) -> Vec<Part> {
    let mut placed: Vec<Part> = Vec::with_capacity(parts.len());
    for part in parts {
        if part.is_step_start() {
            continue;
        }
        if matches!(part, Part::Text { .. }) && follows_finished_tool(&placed) {
            placed.push(Part::StepStart);
        }
        placed.push(part);
    }
    placed
}

/// Overwrite each field present on `incoming`.
///
/// A finished run is never moved back to an incomplete state by a replayed call.
fn update_tool(existing: &mut ToolInvocation, incoming: ToolInvocation) {
    if !(existing.state.is_terminal() && !incoming.state.is_terminal()) {
        existing.state = incoming.state;
    }
    if existing.tool_name.is_empty() && !incoming.tool_name.is_empty() {
        existing.tool_name = incoming.tool_name;
    }
    if let Some(input) = incoming.input.filter(|v| !is_empty_value(v)) {
        existing.input = Some(input);
    }
    if incoming.output.is_some() {
        existing.output = incoming.output;
    }
    if incoming.provider_executed.is_some() {
        existing.provider_executed = incoming.provider_executed;
    }
    if incoming.is_error.is_some() {
        existing.is_error = incoming.is_error;
    }
    if incoming.error_text.is_some() {
        existing.error_text = incoming.error_text;
    }
    if incoming.approval.is_some() {
        existing.approval = incoming.approval;
    }
    if incoming.call_provider_metadata.is_some() {
        existing.call_provider_metadata = incoming.call_provider_metadata;
    }
    if incoming.provider_metadata.is_some() {
        existing.provider_metadata = incoming.provider_metadata;
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Shallow-merge `incoming` into `target`; returns whether anything changed
fn merge_provider_metadata(target: &mut Option<ProviderMetadata>, incoming: &ProviderMetadata) -> bool {
    let existing = target.get_or_insert_with(ProviderMetadata::new);
    let mut changed = false;
    for (key, value) in incoming {
        if existing.get(key) != Some(value) {
            existing.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

fn metadata_json(metadata: Option<&ProviderMetadata>) -> String {
    metadata
        .and_then(|m| serde_json::to_string(m).ok())
        .unwrap_or_else(|| "null".to_string())
}

/// Structural fingerprint used to tell re-sent content from genuinely new content
pub(crate) fn part_signature(part: &Part) -> String {
    match part {
        Part::Text {
            text,
            provider_metadata,
        } => format!("text:{}:{}", text, metadata_json(provider_metadata.as_ref())),
        Part::Reasoning {
            text,
            reasoning_id,
            provider_metadata,
            ..
        } => format!(
            "reasoning:{}:{}:{}",
            text,
            reasoning_id.as_deref().unwrap_or_default(),
            provider::item_id_of(provider_metadata.as_ref()).unwrap_or_default()
        ),
        Part::Tool(tool) => format!("tool-{}:{}:{}", tool.tool_name, tool.tool_call_id, tool.state),
        Part::StepStart => "step-start".to_string(),
        Part::File {
            media_type, url, ..
        } => format!("file:{}:{}", media_type, url),
        Part::Data { name, id, data } => format!(
            "data-{}:{}:{}",
            name,
            id.as_deref().unwrap_or_default(),
            data
        ),
    }
}

fn signature_counts(parts: &[Part]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for part in parts {
        *counts.entry(part_signature(part)).or_insert(0) += 1;
    }
    counts
}
