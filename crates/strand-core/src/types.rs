//! Canonical conversation types: parts, messages and tool state

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider-specific metadata attached to parts (opaque, keyed by provider name)
pub type ProviderMetadata = serde_json::Map<String, Value>;

/// Free-form message metadata
pub type Metadata = serde_json::Map<String, Value>;

/// Generate a fresh message id
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Lifecycle state of a tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    ApprovalRequested,
    ApprovalResponded,
    OutputAvailable,
    OutputError,
    OutputDenied,
    OutputStreaming,
}

impl ToolState {
    /// Wire name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolState::InputStreaming => "input-streaming",
            ToolState::InputAvailable => "input-available",
            ToolState::ApprovalRequested => "approval-requested",
            ToolState::ApprovalResponded => "approval-responded",
            ToolState::OutputAvailable => "output-available",
            ToolState::OutputError => "output-error",
            ToolState::OutputDenied => "output-denied",
            ToolState::OutputStreaming => "output-streaming",
        }
    }

    /// Whether the tool run has finished with a result, an error or a denial
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolState::OutputAvailable | ToolState::OutputError | ToolState::OutputDenied
        )
    }

    /// Whether the call is still waiting on input or an approval decision
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            ToolState::InputStreaming | ToolState::InputAvailable | ToolState::ApprovalRequested
        )
    }
}

impl std::fmt::Display for ToolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval request/response attached to a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Approval {
    /// A pending approval request
    pub fn requested(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            approved: None,
            reason: None,
        }
    }

    /// Whether a decision has been recorded
    pub fn is_responded(&self) -> bool {
        self.approved.is_some()
    }
}

/// A single tool call together with everything known about its result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Empty when the upstream fragment omitted it; such parts are dropped by consumers
    #[serde(default)]
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: ToolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_executed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Approval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_provider_metadata: Option<ProviderMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<ProviderMetadata>,
}

impl ToolInvocation {
    /// Create a tool call awaiting execution
    pub fn call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            state: ToolState::InputAvailable,
            input: Some(input),
            output: None,
            provider_executed: None,
            is_error: None,
            error_text: None,
            approval: None,
            call_provider_metadata: None,
            provider_metadata: None,
        }
    }

    /// Create a completed tool run
    pub fn result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: Value,
    ) -> Self {
        Self {
            state: ToolState::OutputAvailable,
            output: Some(output),
            input: None,
            ..Self::call(tool_call_id, tool_name, Value::Null)
        }
    }

    /// Set the state (builder style)
    pub fn with_state(mut self, state: ToolState) -> Self {
        self.state = state;
        self
    }

    /// Whether the part has an identifier to be tracked by
    pub fn has_call_id(&self) -> bool {
        !self.tool_call_id.trim().is_empty()
    }
}

/// One unit of conversation content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    /// Visible text
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    /// Model reasoning, possibly linked to a provider-side reasoning item
    Reasoning {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<Value>,
    },
    /// Tool invocation and its result
    Tool(ToolInvocation),
    /// Separator starting a new reasoning/action step
    StepStart,
    /// File or image attachment
    File {
        media_type: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    /// Application data (e.g. `subagent-stream` attribution payloads)
    Data {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        data: Value,
    },
}

impl Part {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            provider_metadata: None,
        }
    }

    /// Create a reasoning part
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning {
            text: text.into(),
            reasoning_id: None,
            provider_metadata: None,
            confidence: None,
        }
    }

    /// Create a step marker
    pub fn step_start() -> Self {
        Self::StepStart
    }

    /// Create a file part
    pub fn file(media_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self::File {
            media_type: media_type.into(),
            url: url.into(),
            provider_metadata: None,
        }
    }

    /// Short name of the part kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Part::Text { .. } => "text",
            Part::Reasoning { .. } => "reasoning",
            Part::Tool(_) => "tool",
            Part::StepStart => "step-start",
            Part::File { .. } => "file",
            Part::Data { .. } => "data",
        }
    }

    /// Get the tool invocation if this is a tool part
    pub fn as_tool(&self) -> Option<&ToolInvocation> {
        match self {
            Part::Tool(tool) => Some(tool),
            _ => None,
        }
    }

    /// Mutable access to the tool invocation
    pub fn as_tool_mut(&mut self) -> Option<&mut ToolInvocation> {
        match self {
            Part::Tool(tool) => Some(tool),
            _ => None,
        }
    }

    /// Get text if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Part::Tool(_))
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self, Part::Reasoning { .. })
    }

    pub fn is_step_start(&self) -> bool {
        matches!(self, Part::StepStart)
    }

    /// Provider metadata of the part, if any (tool parts report `provider_metadata`)
    pub fn provider_metadata(&self) -> Option<&ProviderMetadata> {
        match self {
            Part::Text {
                provider_metadata, ..
            }
            | Part::Reasoning {
                provider_metadata, ..
            }
            | Part::File {
                provider_metadata, ..
            } => provider_metadata.as_ref(),
            Part::Tool(tool) => tool.provider_metadata.as_ref(),
            Part::StepStart | Part::Data { .. } => None,
        }
    }
}

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A canonical conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identity; never changes once assigned
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Message {
    /// Create a message with a fresh id
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: new_message_id(),
            role,
            parts,
            metadata: None,
        }
    }

    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create an assistant message from parts
    pub fn assistant(parts: Vec<Part>) -> Self {
        Self::new(Role::Assistant, parts)
    }

    /// Replace the id (builder style)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the metadata (builder style)
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Iterate over tool invocations in part order
    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(Part::as_tool)
    }

    /// Combined text content
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_part_wire_shape() {
        let part = Part::Tool(ToolInvocation::call("call-1", "getWeather", json!({"city": "Berlin"})));
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "tool");
        assert_eq!(value["tool_call_id"], "call-1");
        assert_eq!(value["state"], "input-available");
        assert!(value.get("output").is_none());

        let marker = serde_json::to_value(Part::step_start()).unwrap();
        assert_eq!(marker, json!({"type": "step-start"}));
    }

    #[test]
    fn test_tool_part_without_call_id_deserializes() {
        let part: Part = serde_json::from_value(json!({
            "type": "tool",
            "tool_name": "search",
            "state": "output-available"
        }))
        .unwrap();
        assert!(!part.as_tool().unwrap().has_call_id());
    }

    #[test]
    fn test_tool_state_classes() {
        assert!(ToolState::OutputDenied.is_terminal());
        assert!(!ToolState::OutputStreaming.is_terminal());
        assert!(ToolState::ApprovalRequested.is_incomplete());
        assert!(!ToolState::ApprovalResponded.is_incomplete());
        assert_eq!(ToolState::OutputError.to_string(), "output-error");
    }

    #[test]
    fn test_message_text_joins_text_parts() {
        let msg = Message::assistant(vec![
            Part::text("Hello, "),
            Part::reasoning("thinking"),
            Part::text("world"),
        ]);
        assert_eq!(msg.text(), "Hello, world");
        assert!(msg.is_assistant());
        assert!(!msg.id.is_empty());
    }
}
