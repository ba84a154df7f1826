//! Model-facing normalizer: turns buffer history into a request-safe message list
//!
//! The per-message pass ([`sanitize`]) reduces parts to their minimal replayable shape. The
//! collection pass ([`sanitize_all`]) additionally repairs cross-message reasoning pairing and
//! drops tool calls that never completed.

use serde_json::Value;
use strand_core::{Message, Metadata, Part, ProviderMetadata, Role, ToolInvocation, ToolState, provider};

use crate::reasoning::{self, ReasoningLinked};

/// Tools whose calls are internal bookkeeping and never replayed to the model
pub const WORKING_MEMORY_TOOLS: &[&str] = &[
    "update_working_memory",
    "get_working_memory",
    "clear_working_memory",
];

/// Options for [`sanitize_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Drop tool calls that never reached a terminal state
    pub filter_incomplete_tool_calls: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            filter_incomplete_tool_calls: true,
        }
    }
}

/// Normalize one message for the model. Returns `None` when nothing survives.
///
/// Incomplete tool calls are kept here; whether they can be dropped depends on the rest of
/// the conversation, see [`sanitize_all`].
pub fn sanitize(message: &Message) -> Option<Message> {
    let parts: Vec<Part> = message.parts.iter().filter_map(normalize_part).collect();
    let parts = remove_provider_executed_without_reasoning(parts);
    let parts = strip_reasoning_linkage_without_reasoning(parts);
    let parts = collapse_step_markers(parts);

    if parts.is_empty() {
        return None;
    }
    Some(Message {
        id: message.id.clone(),
        role: message.role,
        parts,
        metadata: message.metadata.clone(),
    })
}

/// Normalize a whole history for the next model request, preserving order
pub fn sanitize_all(messages: &[Message], options: SanitizeOptions) -> Vec<Message> {
    let sanitized: Vec<Message> = messages.iter().filter_map(sanitize).collect();
    let merged = merge_reasoning_continuations(sanitized);

    let prepared: Vec<Message> = merged
        .into_iter()
        .filter_map(|mut message| {
            message.parts = insert_step_markers(std::mem::take(&mut message.parts));
            if message.role == Role::Assistant {
                let (parts, changed) = reasoning::strip_dangling(std::mem::take(&mut message.parts));
                if changed {
                    tracing::debug!(message_id = %message.id, "removed dangling reasoning");
                }
                message.parts = parts;
            }
            // Dropping reasoning can leave markers adjacent or trailing
            message.parts = collapse_step_markers(std::mem::take(&mut message.parts));
            (!message.parts.is_empty()).then_some(message)
        })
        .collect();

    if !options.filter_incomplete_tool_calls {
        return prepared;
    }
    filter_incomplete_tool_calls(prepared)
}

fn normalize_part(part: &Part) -> Option<Part> {
    match part {
        Part::Text {
            text,
            provider_metadata,
        } => {
            if text.trim().is_empty() {
                return None;
            }
            Some(Part::Text {
                text: text.clone(),
                provider_metadata: non_empty(provider_metadata.as_ref()),
            })
        }
        Part::Reasoning {
            text,
            reasoning_id,
            provider_metadata,
            confidence,
        } => {
            let metadata = non_empty(provider_metadata.as_ref());
            let reasoning_id = reasoning::resolve_reasoning_id(reasoning_id.as_deref(), metadata.as_ref());
            if text.trim().is_empty() && reasoning_id.is_none() {
                return None;
            }
            let provider_metadata = match reasoning_id.as_deref() {
                Some(id) if provider::is_reasoning_item_id(id) => {
                    let mut linked = metadata
                        .as_ref()
                        .and_then(provider::without_linkage)
                        .unwrap_or_default();
                    linked.extend(provider::linkage_metadata(id));
                    Some(linked)
                }
                _ => metadata,
            };
            Some(Part::Reasoning {
                text: text.clone(),
                reasoning_id,
                provider_metadata,
                confidence: confidence.clone(),
            })
        }
        Part::Tool(tool) => normalize_tool(tool).map(Part::Tool),
        Part::StepStart => Some(Part::StepStart),
        Part::File { url, .. } if url.is_empty() => None,
        other => Some(other.clone()),
    }
}

fn normalize_tool(tool: &ToolInvocation) -> Option<ToolInvocation> {
    if !tool.has_call_id() || WORKING_MEMORY_TOOLS.contains(&tool.tool_name.as_str()) {
        return None;
    }
    Some(ToolInvocation {
        output: tool.output.as_ref().map(unwrap_json_output),
        call_provider_metadata: non_empty(tool.call_provider_metadata.as_ref()),
        provider_metadata: non_empty(tool.provider_metadata.as_ref()),
        ..tool.clone()
    })
}

fn non_empty(metadata: Option<&ProviderMetadata>) -> Option<ProviderMetadata> {
    metadata.filter(|m| !m.is_empty()).cloned()
}

/// Unwrap `{"type": "json", "value": X}` style envelopes (recursively) to `X`
pub fn unwrap_json_output(output: &Value) -> Value {
    match output {
        Value::Array(items) => Value::Array(items.iter().map(unwrap_json_output).collect()),
        Value::Object(object) => {
            let is_json_envelope = object
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|kind| kind.to_lowercase().contains("json"));
            match object.get("value") {
                Some(value) if is_json_envelope => unwrap_json_output(value),
                _ => output.clone(),
            }
        }
        other => other.clone(),
    }
}

/// A provider-executed tool run cannot be replayed without the reasoning that produced it
fn remove_provider_executed_without_reasoning(parts: Vec<Part>) -> Vec<Part> {
    if parts.iter().any(Part::is_reasoning) {
        return parts;
    }
    parts
        .into_iter()
        .filter(|part| {
            !part
                .as_tool()
                .is_some_and(|tool| tool.provider_executed == Some(true))
        })
        .collect()
}

fn strip_reasoning_linkage_without_reasoning(parts: Vec<Part>) -> Vec<Part> {
    if parts.iter().any(Part::is_reasoning) {
        return parts;
    }
    parts
        .into_iter()
        .map(|mut part| {
            match &mut part {
                Part::Text {
                    provider_metadata, ..
                }
                | Part::File {
                    provider_metadata, ..
                } => strip_linkage(provider_metadata),
                Part::Tool(tool) => {
                    strip_linkage(&mut tool.provider_metadata);
                    strip_linkage(&mut tool.call_provider_metadata);
                }
                Part::Reasoning { .. } | Part::StepStart | Part::Data { .. } => {}
            }
            part
        })
        .collect()
}

fn strip_linkage(metadata: &mut Option<ProviderMetadata>) {
    let linked = metadata.as_ref().is_some_and(provider::is_reasoning_linked);
    if linked {
        *metadata = metadata.as_ref().and_then(provider::without_linkage);
    }
}

/// No leading, trailing or repeated step markers
fn collapse_step_markers(parts: Vec<Part>) -> Vec<Part> {
    let mut result: Vec<Part> = Vec::with_capacity(parts.len());
    for part in parts {
        if part.is_step_start() && result.last().is_none_or(Part::is_step_start) {
            continue;
        }
        result.push(part);
    }
    if result.last().is_some_and(Part::is_step_start) {
        result.pop();
    }
    result
}

/// Join an assistant message ending in linked reasoning with the assistant message after it
fn merge_reasoning_continuations(messages: Vec<Message>) -> Vec<Message> {
    let mut result: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        let Some(previous) = result.last_mut() else {
            result.push(message);
            continue;
        };
        let ends_in_linked_reasoning = previous
            .parts
            .iter()
            .rev()
            .find(|part| !part.is_step_start())
            .is_some_and(|part| part.is_linked_reasoning());

        if previous.role == Role::Assistant
            && message.role == Role::Assistant
            && ends_in_linked_reasoning
        {
            tracing::debug!(into = %previous.id, from = %message.id, "merging reasoning continuation");
            previous.parts.extend(message.parts);
            merge_missing_metadata(&mut previous.metadata, message.metadata);
            continue;
        }
        result.push(message);
    }
    result
}

fn merge_missing_metadata(target: &mut Option<Metadata>, incoming: Option<Metadata>) {
    let Some(incoming) = incoming else {
        return;
    };
    let target = target.get_or_insert_with(Metadata::new);
    for (key, value) in incoming {
        target.entry(key).or_insert(value);
    }
}

/// Ensure a step marker separates a tool run from whatever non-tool content follows it
fn insert_step_markers(parts: Vec<Part>) -> Vec<Part> {
    let mut result: Vec<Part> = Vec::with_capacity(parts.len());
    for part in parts {
        let after_tool = result.last().is_some_and(Part::is_tool);
        if after_tool && !part.is_tool() && !part.is_step_start() {
            result.push(Part::StepStart);
        }
        result.push(part);
    }
    result
}

fn filter_incomplete_tool_calls(messages: Vec<Message>) -> Vec<Message> {
    let last = messages.len().saturating_sub(1);
    let removable = |index: usize, tool: &ToolInvocation| {
        tool.state.is_incomplete() || (tool.state == ToolState::ApprovalResponded && index != last)
    };

    let would_remove = messages.iter().enumerate().any(|(index, message)| {
        message.tool_invocations().any(|tool| removable(index, tool))
    });
    if !would_remove {
        return messages;
    }

    if reasoning::any_linked_reasoning(messages.iter().flat_map(|m| m.parts.iter())) {
        tracing::debug!("keeping incomplete tool calls to preserve reasoning linkage");
        return messages;
    }

    messages
        .into_iter()
        .enumerate()
        .filter_map(|(index, mut message)| {
            let before = message.parts.len();
            message
                .parts
                .retain(|part| !part.as_tool().is_some_and(|tool| removable(index, tool)));
            if message.parts.len() != before {
                tracing::debug!(
                    message_id = %message.id,
                    removed = before - message.parts.len(),
                    "filtered incomplete tool calls"
                );
                message.parts = collapse_step_markers(std::mem::take(&mut message.parts));
            }
            (!message.parts.is_empty()).then_some(message)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_core::Approval;

    fn meta(value: Value) -> ProviderMetadata {
        value.as_object().cloned().unwrap()
    }

    fn assistant(parts: Vec<Part>) -> Message {
        Message::assistant(parts).with_id("message-id")
    }

    fn tool(id: &str, name: &str, state: ToolState) -> ToolInvocation {
        ToolInvocation::call(id, name, json!({"query": "hello"})).with_state(state)
    }

    fn linked_reasoning(item_id: &str) -> Part {
        Part::Reasoning {
            text: String::new(),
            reasoning_id: None,
            provider_metadata: Some(provider::linkage_metadata(item_id)),
            confidence: None,
        }
    }

    #[test]
    fn test_drops_working_memory_and_blank_text() {
        let message = assistant(vec![
            Part::Tool(tool("tool-1", "update_working_memory", ToolState::InputAvailable)),
            Part::text("   "),
        ]);
        assert!(sanitize(&message).is_none());
        // Input is untouched
        assert_eq!(message.parts.len(), 2);
    }

    #[test]
    fn test_unwraps_json_outputs() {
        let mut run = tool("call-1", "search", ToolState::OutputAvailable);
        run.output = Some(json!({"type": "json", "value": [{"type": "error-json", "value": {"ok": false}}]}));
        let sanitized = sanitize(&assistant(vec![Part::Tool(run)])).unwrap();
        assert_eq!(sanitized.parts[0].as_tool().unwrap().output, Some(json!([{"ok": false}])));

        let plain = json!({"type": "text", "value": "keep"});
        assert_eq!(unwrap_json_output(&plain), plain);
    }

    #[test]
    fn test_reasoning_id_derived_from_metadata() {
        let message = assistant(vec![Part::Reasoning {
            text: "step".into(),
            reasoning_id: None,
            provider_metadata: Some(meta(json!({"openai": {"reasoning_trace_id": "rs_123"}}))),
            confidence: None,
        }]);
        let sanitized = sanitize(&message).unwrap();
        match &sanitized.parts[0] {
            Part::Reasoning {
                text,
                reasoning_id,
                provider_metadata,
                ..
            } => {
                assert_eq!(text, "step");
                assert_eq!(reasoning_id.as_deref(), Some("rs_123"));
                assert_eq!(provider_metadata.as_ref(), Some(&provider::linkage_metadata("rs_123")));
            }
            other => panic!("unexpected part: {:?}", other),
        }
    }

    #[test]
    fn test_reasoning_noise_dropped_unless_identified() {
        let sanitized = sanitize(&assistant(vec![Part::reasoning("   "), Part::text("ok")])).unwrap();
        assert_eq!(sanitized.parts, vec![Part::text("ok")]);

        let identified = Part::Reasoning {
            text: "   ".into(),
            reasoning_id: Some("rs_123".into()),
            provider_metadata: None,
            confidence: None,
        };
        let sanitized = sanitize(&assistant(vec![identified, Part::text("ok")])).unwrap();
        assert_eq!(sanitized.parts.len(), 2);
    }

    #[test]
    fn test_single_message_keeps_incomplete_and_failed_runs() {
        let message = assistant(vec![
            Part::Tool(tool("call-streaming", "search", ToolState::InputStreaming)),
            Part::Tool(tool("call-error", "search", ToolState::OutputError)),
            Part::Tool(tool("call-denied", "search", ToolState::OutputDenied)),
            Part::Tool(tool("call-output", "search", ToolState::OutputStreaming)),
        ]);
        let states: Vec<_> = sanitize(&message)
            .unwrap()
            .tool_invocations()
            .map(|t| t.state)
            .collect();
        assert_eq!(
            states,
            vec![
                ToolState::InputStreaming,
                ToolState::OutputError,
                ToolState::OutputDenied,
                ToolState::OutputStreaming,
            ]
        );
    }

    #[test]
    fn test_drops_tool_without_call_id() {
        let message = assistant(vec![Part::Tool(tool("", "search", ToolState::OutputAvailable)), Part::text("hi")]);
        let sanitized = sanitize(&message).unwrap();
        assert_eq!(sanitized.parts, vec![Part::text("hi")]);
    }

    #[test]
    fn test_collapses_step_markers() {
        let message = assistant(vec![
            Part::StepStart,
            Part::StepStart,
            Part::text("a"),
            Part::StepStart,
            Part::StepStart,
            Part::text("b"),
            Part::StepStart,
        ]);
        let sanitized = sanitize(&message).unwrap();
        assert_eq!(sanitized.parts, vec![Part::text("a"), Part::StepStart, Part::text("b")]);
    }

    #[test]
    fn test_strips_reasoning_linkage_without_reasoning() {
        let message = assistant(vec![Part::Text {
            text: "final answer".into(),
            provider_metadata: Some(meta(json!({"openai": {"itemId": "rs_123"}, "other": {"keep": true}}))),
        }]);
        let sanitized = sanitize(&message).unwrap();
        assert_eq!(
            sanitized.parts[0].provider_metadata(),
            Some(&meta(json!({"other": {"keep": true}})))
        );

        let message = assistant(vec![Part::Text {
            text: "final answer".into(),
            provider_metadata: Some(meta(json!({"openai": {"itemId": "msg_1"}}))),
        }]);
        let sanitized = sanitize(&message).unwrap();
        assert_eq!(
            sanitized.parts[0].provider_metadata(),
            Some(&provider::linkage_metadata("msg_1"))
        );
    }

    #[test]
    fn test_removes_provider_executed_without_reasoning() {
        let mut executed = tool("ws_1", "web_search", ToolState::OutputAvailable);
        executed.provider_executed = Some(true);
        let message = assistant(vec![Part::Tool(executed.clone()), Part::text("found it")]);
        assert_eq!(sanitize(&message).unwrap().parts, vec![Part::text("found it")]);

        let message = assistant(vec![Part::reasoning("searching"), Part::Tool(executed)]);
        assert_eq!(sanitize(&message).unwrap().parts.len(), 2);
    }

    #[test]
    fn test_keeps_tool_linkage_when_reasoning_present() {
        let mut call = tool("call-1", "search", ToolState::OutputAvailable);
        call.call_provider_metadata = Some(meta(json!({"openai": {"reasoning_trace_id": "rs_1"}})));
        let message = assistant(vec![Part::reasoning("think"), Part::Tool(call)]);
        let sanitized = sanitize(&message).unwrap();
        assert!(sanitized.parts[1].as_tool().unwrap().call_provider_metadata.is_some());
    }

    #[test]
    fn test_drops_reasoning_without_follower() {
        let messages = vec![assistant(vec![linked_reasoning("rs_only")])];
        let options = SanitizeOptions {
            filter_incomplete_tool_calls: false,
        };
        assert!(sanitize_all(&messages, options).is_empty());

        let messages = vec![assistant(vec![linked_reasoning("rs_no_follow"), Part::text("still keep this text")])];
        let sanitized = sanitize_all(&messages, options);
        assert_eq!(sanitized[0].parts, vec![Part::text("still keep this text")]);
    }

    #[test]
    fn test_merges_reasoning_with_next_assistant() {
        let mut call = tool("call-cross", "search", ToolState::InputAvailable);
        call.call_provider_metadata = Some(provider::linkage_metadata("fc_cross"));
        let messages = vec![
            assistant(vec![linked_reasoning("rs_cross")]),
            Message::assistant(vec![Part::Tool(call)]),
        ];
        let sanitized = sanitize_all(
            &messages,
            SanitizeOptions {
                filter_incomplete_tool_calls: false,
            },
        );
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized[0].id, "message-id");
        let tool = sanitized[0].parts[1].as_tool().unwrap();
        assert_eq!(tool.call_provider_metadata, Some(provider::linkage_metadata("fc_cross")));
    }

    #[test]
    fn test_filters_incomplete_tool_calls() {
        let messages = vec![
            assistant(vec![Part::Tool(tool("call-123", "search", ToolState::InputAvailable))]),
            Message::user("follow up"),
        ];
        let sanitized = sanitize_all(&messages, SanitizeOptions::default());
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized[0].role, Role::User);
    }

    #[test]
    fn test_keeps_incomplete_calls_when_reasoning_linked() {
        let mut call = tool("call-123", "search", ToolState::InputAvailable);
        call.call_provider_metadata = Some(provider::linkage_metadata("fc_123"));
        let messages = vec![
            assistant(vec![linked_reasoning("rs_123")]),
            Message::assistant(vec![Part::Tool(call)]),
            Message::user("follow up"),
        ];
        let sanitized = sanitize_all(&messages, SanitizeOptions::default());
        assert_eq!(sanitized.len(), 2);
        let tools: Vec<_> = sanitized[0].tool_invocations().collect();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_call_id, "call-123");
    }

    #[test]
    fn test_preserves_approval_response_on_last_message() {
        let mut run = tool("call-approve", "run_command", ToolState::ApprovalResponded);
        run.approval = Some(Approval {
            id: "approval-123".into(),
            approved: Some(true),
            reason: None,
        });
        let messages = vec![assistant(vec![Part::Tool(run.clone())])];
        let sanitized = sanitize_all(&messages, SanitizeOptions::default());
        assert_eq!(sanitized.len(), 1);
        let kept = sanitized[0].parts[0].as_tool().unwrap();
        assert_eq!(kept.state, ToolState::ApprovalResponded);
        assert_eq!(kept.approval, run.approval);

        // Not on the trailing message: the approval was never acted on
        let messages = vec![assistant(vec![Part::Tool(run)]), Message::user("next")];
        assert_eq!(sanitize_all(&messages, SanitizeOptions::default()).len(), 1);
    }

    #[test]
    fn test_inserts_step_marker_after_tool_output() {
        let mut run = tool("call-9", "weather", ToolState::OutputAvailable);
        run.output = Some(json!({"temp": 20}));
        let messages = vec![assistant(vec![Part::Tool(run), Part::text("done")])];
        let sanitized = sanitize_all(&messages, SanitizeOptions::default());
        assert_eq!(sanitized[0].parts.len(), 3);
        assert_eq!(sanitized[0].parts[1], Part::StepStart);
    }

    #[test]
    fn test_filtering_never_leaves_adjacent_markers() {
        let mut done = tool("call-1", "search", ToolState::OutputAvailable);
        done.output = Some(json!("ok"));
        let messages = vec![
            assistant(vec![
                Part::text("a"),
                Part::StepStart,
                Part::Tool(tool("call-2", "search", ToolState::InputAvailable)),
                Part::StepStart,
                Part::Tool(done),
                Part::text("b"),
            ]),
            Message::user("next"),
        ];
        let sanitized = sanitize_all(&messages, SanitizeOptions::default());
        let parts = &sanitized[0].parts;
        assert!(parts.windows(2).all(|w| !(w[0].is_step_start() && w[1].is_step_start())));
        assert!(parts.iter().all(|p| p.as_tool().is_none_or(ToolInvocation::has_call_id)));
        assert_eq!(parts.iter().filter(|p| p.is_tool()).count(), 1);
    }

    #[test]
    fn test_dropped_reasoning_between_markers_leaves_one() {
        let message = assistant(vec![
            Part::text("a"),
            Part::StepStart,
            linked_reasoning("rs_x"),
            Part::StepStart,
            Part::text("b"),
        ]);
        let result = sanitize_all(&[message], SanitizeOptions::default());
        let kinds: Vec<_> = result[0].parts.iter().map(Part::kind).collect();
        assert_eq!(kinds, vec!["text", "step-start", "text"]);
    }

    #[test]
    fn test_dropped_trailing_reasoning_leaves_no_marker() {
        let message = assistant(vec![Part::text("a"), Part::StepStart, linked_reasoning("rs_9")]);
        let result = sanitize_all(&[message], SanitizeOptions::default());
        assert_eq!(result[0].parts, vec![Part::text("a")]);
    }

    #[test]
    fn test_preserves_order() {
        let messages = vec![
            assistant(vec![Part::Tool(tool("tool-1", "update_working_memory", ToolState::InputAvailable))]),
            Message::assistant(vec![Part::text("visible")]),
        ];
        let sanitized = sanitize_all(&messages, SanitizeOptions::default());
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized[0].parts[0], Part::text("visible"));
    }
}
