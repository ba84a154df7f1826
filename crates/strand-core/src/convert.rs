//! Conversion of raw provider fragments into canonical messages

use std::collections::HashMap;

use base64::Engine;
use serde_json::Value;

use crate::fragment::{ContentItem, FileData, Fragment, FragmentContent, FragmentRole};
use crate::provider;
use crate::types::{Approval, Message, Part, ProviderMetadata, Role, ToolInvocation, ToolState};

/// Convert one fragment into a canonical message.
///
/// Returns `None` when nothing usable survives (empty text, tool items without ids, ...).
/// Tool fragments become assistant messages holding tool parts so they can be merged into
/// the assistant turn that issued the calls.
pub fn fragment_to_message(fragment: &Fragment) -> Option<Message> {
    let mut builder = PartsBuilder::default();

    match (&fragment.content, fragment.role) {
        (FragmentContent::Text(text), FragmentRole::Tool) => {
            tracing::debug!(len = text.len(), "ignoring string content on tool fragment");
        }
        (FragmentContent::Text(text), _) => {
            if !text.trim().is_empty() {
                builder.parts.push(Part::Text {
                    text: text.clone(),
                    provider_metadata: fragment.provider_options.clone(),
                });
            }
        }
        (FragmentContent::Items(items), FragmentRole::Tool) => {
            for item in items {
                builder.push_tool_fragment_item(item);
            }
        }
        (FragmentContent::Items(items), _) => {
            for item in items {
                builder.push_item(item);
            }
        }
    }

    if builder.parts.is_empty() {
        return None;
    }

    let role = match fragment.role {
        FragmentRole::User => Role::User,
        FragmentRole::System => Role::System,
        FragmentRole::Assistant | FragmentRole::Tool => Role::Assistant,
    };

    let mut message = Message::new(role, builder.parts);
    if let Some(id) = fragment.explicit_id() {
        message.id = id.to_string();
    }
    Some(message)
}

/// Convert many fragments, skipping those that produce nothing
pub fn fragments_to_messages(fragments: &[Fragment]) -> Vec<Message> {
    fragments.iter().filter_map(fragment_to_message).collect()
}

#[derive(Default)]
struct PartsBuilder {
    parts: Vec<Part>,
    /// approval id -> tool call id
    approvals: HashMap<String, String>,
    /// tool call id -> approval id, for requests that arrive before their call
    pending_approvals: HashMap<String, String>,
}

impl PartsBuilder {
    fn push_item(&mut self, item: &ContentItem) {
        match item {
            ContentItem::Text {
                text,
                provider_options,
            } => {
                if !text.is_empty() {
                    self.parts.push(Part::Text {
                        text: text.clone(),
                        provider_metadata: provider_options.clone(),
                    });
                }
            }
            ContentItem::Reasoning {
                text,
                id,
                provider_options,
                confidence,
            } => {
                let reasoning_id = id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string);
                let linked = provider_options
                    .as_ref()
                    .is_some_and(provider::has_reasoning_linkage);
                if text.is_empty() && reasoning_id.is_none() && !linked {
                    return;
                }
                self.parts.push(Part::Reasoning {
                    text: text.clone(),
                    reasoning_id,
                    provider_metadata: provider_options.clone(),
                    confidence: confidence.clone().filter(|c| !c.is_null()),
                });
            }
            ContentItem::ToolCall {
                tool_call_id,
                tool_name,
                input,
                provider_executed,
                provider_options,
            } => {
                if tool_call_id.trim().is_empty() {
                    tracing::debug!(tool_name = %tool_name, "dropping tool call without id");
                    return;
                }
                let input = if input.is_null() {
                    Value::Object(Default::default())
                } else {
                    input.clone()
                };
                let mut tool = ToolInvocation::call(tool_call_id.clone(), tool_name.clone(), input);
                tool.provider_executed = *provider_executed;
                tool.call_provider_metadata = provider_options.clone();

                if let Some(approval_id) = self.pending_approvals.remove(tool_call_id) {
                    apply_approval_request(&mut tool, &approval_id);
                    self.approvals.insert(approval_id, tool_call_id.clone());
                }
                self.parts.push(Part::Tool(tool));
            }
            ContentItem::ToolApprovalRequest {
                approval_id,
                tool_call_id,
            } => {
                if approval_id.is_empty() || tool_call_id.is_empty() {
                    return;
                }
                self.approvals
                    .insert(approval_id.clone(), tool_call_id.clone());
                match self.find_tool_mut(tool_call_id) {
                    Some(tool) => apply_approval_request(tool, approval_id),
                    None => {
                        self.pending_approvals
                            .insert(tool_call_id.clone(), approval_id.clone());
                    }
                }
            }
            ContentItem::ToolResult {
                tool_call_id,
                tool_name,
                output,
                is_error,
            } => {
                // Results inside an assistant fragment come from provider-executed tools
                self.assign_result(tool_call_id, tool_name, output, *is_error, true);
            }
            ContentItem::ToolApprovalResponse {
                approval_id,
                approved,
                reason,
            } => {
                self.apply_approval_response(approval_id, *approved, reason.clone(), false);
            }
            ContentItem::Image {
                image,
                media_type,
                provider_options,
            } => {
                let media_type = media_type
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "image/png".to_string());
                let url = file_url(image, &media_type);
                self.push_file(media_type, url, provider_options.clone());
            }
            ContentItem::File {
                data,
                media_type,
                provider_options,
            } => {
                let url = file_url(data, media_type);
                self.push_file(media_type.clone(), url, provider_options.clone());
            }
        }
    }

    fn push_tool_fragment_item(&mut self, item: &ContentItem) {
        match item {
            ContentItem::ToolResult {
                tool_call_id,
                tool_name,
                output,
                is_error,
            } => {
                self.assign_result(tool_call_id, tool_name, output, *is_error, false);
            }
            ContentItem::ToolApprovalResponse {
                approval_id,
                approved,
                reason,
            } => {
                self.apply_approval_response(approval_id, *approved, reason.clone(), true);
            }
            other => {
                tracing::debug!(item = ?other, "ignoring non-result item on tool fragment");
            }
        }
    }

    fn push_file(&mut self, media_type: String, url: String, options: Option<ProviderMetadata>) {
        if url.is_empty() {
            return;
        }
        self.parts.push(Part::File {
            media_type,
            url,
            provider_metadata: options,
        });
    }

    fn find_tool_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolInvocation> {
        self.parts
            .iter_mut()
            .rev()
            .filter_map(Part::as_tool_mut)
            .find(|tool| tool.tool_call_id == tool_call_id)
    }

    fn assign_result(
        &mut self,
        tool_call_id: &str,
        tool_name: &str,
        output: &Value,
        is_error: Option<bool>,
        provider_executed: bool,
    ) {
        if tool_call_id.trim().is_empty() {
            tracing::debug!(tool_name = %tool_name, "dropping tool result without id");
            return;
        }
        let failed = is_error == Some(true);

        if let Some(tool) = self.find_tool_mut(tool_call_id) {
            set_result(tool, output, failed, provider_executed);
            return;
        }

        let mut tool = ToolInvocation::result(tool_call_id, tool_name, Value::Null);
        set_result(&mut tool, output, failed, provider_executed);
        self.parts.push(Part::Tool(tool));
    }

    fn apply_approval_response(
        &mut self,
        approval_id: &str,
        approved: bool,
        reason: Option<String>,
        allow_detached: bool,
    ) {
        if approval_id.is_empty() {
            return;
        }
        let approval = Approval {
            id: approval_id.to_string(),
            approved: Some(approved),
            reason: reason.filter(|r| !r.is_empty()),
        };

        let tool_call_id = self.approvals.get(approval_id).cloned();
        let target = match tool_call_id {
            Some(id) => self.find_tool_mut(&id),
            None => self
                .parts
                .iter_mut()
                .rev()
                .filter_map(Part::as_tool_mut)
                .find(|tool| tool.approval.as_ref().is_some_and(|a| a.id == approval_id)),
        };

        match target {
            Some(tool) => apply_approval_response(tool, approval),
            None if allow_detached => {
                // Resolved against earlier history by approval id downstream
                let mut tool = ToolInvocation::call("", "", Value::Null)
                    .with_state(ToolState::ApprovalResponded);
                tool.input = None;
                tool.approval = Some(approval);
                self.parts.push(Part::Tool(tool));
            }
            None => {}
        }
    }
}

fn set_result(tool: &mut ToolInvocation, output: &Value, failed: bool, provider_executed: bool) {
    tool.provider_executed = Some(provider_executed);
    if failed {
        tool.state = ToolState::OutputError;
        tool.is_error = Some(true);
        tool.error_text = Some(match output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        });
    } else {
        tool.state = ToolState::OutputAvailable;
    }
    tool.output = Some(output.clone());
}

fn apply_approval_request(tool: &mut ToolInvocation, approval_id: &str) {
    tool.approval = Some(Approval::requested(approval_id));
    if !tool.state.is_terminal() {
        tool.state = ToolState::ApprovalRequested;
    }
}

fn apply_approval_response(tool: &mut ToolInvocation, approval: Approval) {
    tool.approval = Some(approval);
    if !tool.state.is_terminal() {
        tool.state = ToolState::ApprovalResponded;
    }
}

/// Build a URL for file content: URLs and data URLs pass through, anything else is base64
fn file_url(data: &FileData, media_type: &str) -> String {
    match data {
        FileData::Text(text) => {
            let lower = text.trim_start().to_ascii_lowercase();
            if lower.starts_with("http://")
                || lower.starts_with("https://")
                || lower.starts_with("data:")
            {
                text.clone()
            } else if text.is_empty() {
                String::new()
            } else {
                format!("data:{};base64,{}", media_type, text)
            }
        }
        FileData::Bytes(bytes) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            format!("data:{};base64,{}", media_type, encoded)
        }
    }
}
