//! Execution context and sub-agent attribution

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_core::{Message, Metadata, Part};

/// Context key holding the identity of the agent running the execution
pub const AGENT_METADATA_KEY: &str = "agentMetadata";

/// Context key holding a map of tool call id to the sub-agent that served it
pub const SUBAGENT_TOOL_CALL_METADATA_KEY: &str = "subAgentToolCallMetadata";

/// Name of the data part that carries streamed sub-agent output
pub const SUBAGENT_STREAM_DATA: &str = "subagent-stream";

/// Identity of an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub agent_id: String,
    pub agent_name: String,
}

impl AgentIdentity {
    pub fn new(agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
        }
    }
}

/// Per-execution context handed to persistence and storage
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Set when this execution runs as a sub-agent of another agent
    pub parent_agent_id: Option<String>,
    /// Collaborator-defined values; only read by this crate
    pub context: HashMap<String, Value>,
}

impl OperationContext {
    /// Create a context for a conversation
    pub fn new(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            conversation_id: Some(conversation_id.into()),
            ..Default::default()
        }
    }

    /// Set the parent agent id (builder style)
    pub fn with_parent_agent(mut self, parent_agent_id: impl Into<String>) -> Self {
        self.parent_agent_id = Some(parent_agent_id.into());
        self
    }

    /// Record the identity of the running agent (builder style)
    pub fn with_agent_identity(mut self, identity: AgentIdentity) -> Self {
        if let Ok(value) = serde_json::to_value(identity) {
            self.context.insert(AGENT_METADATA_KEY.to_string(), value);
        }
        self
    }

    /// Record which sub-agent served a tool call (builder style)
    pub fn with_tool_call_identity(mut self, tool_call_id: impl Into<String>, identity: AgentIdentity) -> Self {
        let Ok(value) = serde_json::to_value(identity) else {
            return self;
        };
        let map = self
            .context
            .entry(SUBAGENT_TOOL_CALL_METADATA_KEY.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = map {
            map.insert(tool_call_id.into(), value);
        }
        self
    }

    /// Bookkeeping key for the conversation, or `None` when user or conversation is unknown
    pub fn queue_key(&self) -> Option<String> {
        let user_id = self.user_id.as_deref().filter(|id| !id.is_empty())?;
        let conversation_id = self.conversation_id.as_deref().filter(|id| !id.is_empty())?;
        Some(format!("{}:{}", user_id, conversation_id))
    }

    /// Identity of the running agent, if recorded
    pub fn agent_identity(&self) -> Option<AgentIdentity> {
        let value = self.context.get(AGENT_METADATA_KEY)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Tool call id to sub-agent mapping; malformed entries are skipped
    pub fn tool_call_identities(&self) -> HashMap<String, AgentIdentity> {
        let Some(Value::Object(map)) = self.context.get(SUBAGENT_TOOL_CALL_METADATA_KEY) else {
            return HashMap::new();
        };
        map.iter()
            .filter_map(|(id, value)| {
                let identity = serde_json::from_value(value.clone()).ok()?;
                Some((id.clone(), identity))
            })
            .collect()
    }
}

/// Resolves which sub-agent a persisted message belongs to
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    default: Option<AgentIdentity>,
    tool_calls: HashMap<String, AgentIdentity>,
}

impl Attribution {
    /// Read attribution sources from the context.
    ///
    /// The execution-wide identity only applies to sub-agent executions.
    pub fn from_context(context: &OperationContext) -> Self {
        let default = context
            .parent_agent_id
            .as_ref()
            .and_then(|_| context.agent_identity());
        Self {
            default,
            tool_calls: context.tool_call_identities(),
        }
    }

    /// Identity for a message: its tool calls first, then streamed sub-agent data, then the
    /// execution default
    pub fn resolve(&self, message: &Message) -> Option<AgentIdentity> {
        message
            .tool_invocations()
            .find_map(|tool| self.tool_calls.get(&tool.tool_call_id).cloned())
            .or_else(|| message.parts.iter().find_map(stream_identity))
            .or_else(|| self.default.clone())
    }

    /// Write `subAgentId`/`subAgentName` into the message metadata, keeping values already set
    pub fn apply(&self, mut message: Message) -> Message {
        let Some(identity) = self.resolve(&message) else {
            return message;
        };
        let metadata = message.metadata.get_or_insert_with(Metadata::new);
        set_if_missing(metadata, "subAgentId", identity.agent_id);
        set_if_missing(metadata, "subAgentName", identity.agent_name);
        message
    }
}

fn stream_identity(part: &Part) -> Option<AgentIdentity> {
    let Part::Data { name, data, .. } = part else {
        return None;
    };
    if name != SUBAGENT_STREAM_DATA {
        return None;
    }
    let field = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some(AgentIdentity::new(field("subAgentId")?, field("subAgentName")?))
}

fn set_if_missing(metadata: &mut Metadata, key: &str, value: String) {
    let unset = match metadata.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    };
    if unset {
        metadata.insert(key.to_string(), Value::String(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_core::ToolInvocation;

    fn researcher() -> AgentIdentity {
        AgentIdentity::new("researcher-1", "Researcher")
    }

    #[test]
    fn test_queue_key() {
        assert_eq!(OperationContext::new("u1", "c1").queue_key().as_deref(), Some("u1:c1"));
        let missing = OperationContext {
            user_id: Some("u1".into()),
            ..Default::default()
        };
        assert_eq!(missing.queue_key(), None);
        assert_eq!(OperationContext::new("", "c1").queue_key(), None);
    }

    #[test]
    fn test_context_round_trip() {
        let context = OperationContext::new("u1", "c1")
            .with_agent_identity(researcher())
            .with_tool_call_identity("call-1", researcher());
        assert_eq!(context.context[AGENT_METADATA_KEY], json!({"agentId": "researcher-1", "agentName": "Researcher"}));
        assert_eq!(context.agent_identity(), Some(researcher()));
        assert_eq!(context.tool_call_identities().get("call-1"), Some(&researcher()));
    }

    #[test]
    fn test_default_requires_parent_agent() {
        let context = OperationContext::new("u1", "c1").with_agent_identity(researcher());
        let message = Message::assistant(vec![Part::text("hi")]);
        assert_eq!(Attribution::from_context(&context).resolve(&message), None);

        let context = context.with_parent_agent("supervisor");
        assert_eq!(Attribution::from_context(&context).resolve(&message), Some(researcher()));
    }

    #[test]
    fn test_tool_call_identity_takes_priority() {
        let writer = AgentIdentity::new("writer-1", "Writer");
        let context = OperationContext::new("u1", "c1")
            .with_parent_agent("supervisor")
            .with_agent_identity(researcher())
            .with_tool_call_identity("call-7", writer.clone());
        let message = Message::assistant(vec![
            Part::Data {
                name: SUBAGENT_STREAM_DATA.into(),
                id: None,
                data: json!({"subAgentId": "streamer", "subAgentName": "Streamer"}),
            },
            Part::Tool(ToolInvocation::call("call-7", "delegate", json!({}))),
        ]);
        assert_eq!(Attribution::from_context(&context).resolve(&message), Some(writer));
    }

    #[test]
    fn test_stream_data_identity() {
        let message = Message::assistant(vec![Part::Data {
            name: SUBAGENT_STREAM_DATA.into(),
            id: None,
            data: json!({"subAgentId": "streamer", "subAgentName": "Streamer"}),
        }]);
        let applied = Attribution::default().apply(message);
        let metadata = applied.metadata.unwrap();
        assert_eq!(metadata["subAgentId"], "streamer");
        assert_eq!(metadata["subAgentName"], "Streamer");
    }

    #[test]
    fn test_apply_keeps_existing_fields() {
        let context = OperationContext::new("u1", "c1")
            .with_parent_agent("supervisor")
            .with_agent_identity(researcher());
        let message = Message::assistant(vec![Part::text("hi")])
            .with_metadata(json!({"subAgentId": "already-set"}).as_object().cloned().unwrap());
        let applied = Attribution::from_context(&context).apply(message);
        let metadata = applied.metadata.unwrap();
        assert_eq!(metadata["subAgentId"], "already-set");
        assert_eq!(metadata["subAgentName"], "Researcher");
    }

    #[test]
    fn test_no_identity_leaves_message_untouched() {
        let message = Message::user("hello");
        let applied = Attribution::default().apply(message.clone());
        assert_eq!(applied, message);
    }
}
