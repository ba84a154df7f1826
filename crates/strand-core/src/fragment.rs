//! Raw provider message fragments, as produced by the LLM transport
//!
//! Fragments are untrusted: every identifier defaults to empty on deserialisation, items
//! of unknown type or shape are dropped one by one, and half-formed items are dropped
//! during conversion.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::ProviderMetadata;

/// Roles a fragment can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentRole {
    User,
    Assistant,
    System,
    /// Tool results (and approval responses) for earlier calls
    Tool,
}

/// File payload: a URL/data URL/base64 string, or raw bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileData {
    Text(String),
    Bytes(Vec<u8>),
}

/// One content item inside a fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentItem {
    Text {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_options: Option<ProviderMetadata>,
    },
    Reasoning {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_options: Option<ProviderMetadata>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<Value>,
    },
    ToolCall {
        #[serde(default)]
        tool_call_id: String,
        #[serde(default)]
        tool_name: String,
        #[serde(default)]
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_executed: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_options: Option<ProviderMetadata>,
    },
    ToolResult {
        #[serde(default)]
        tool_call_id: String,
        #[serde(default)]
        tool_name: String,
        #[serde(default)]
        output: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    ToolApprovalRequest {
        #[serde(default)]
        approval_id: String,
        #[serde(default)]
        tool_call_id: String,
    },
    ToolApprovalResponse {
        #[serde(default)]
        approval_id: String,
        #[serde(default)]
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Image {
        image: FileData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_options: Option<ProviderMetadata>,
    },
    File {
        data: FileData,
        #[serde(default)]
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_options: Option<ProviderMetadata>,
    },
}

impl ContentItem {
    /// Create a text item
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            provider_options: None,
        }
    }

    /// Create a tool call item
    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self::ToolCall {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
            provider_executed: None,
            provider_options: None,
        }
    }

    /// Create a tool result item
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: Value,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            output,
            is_error: None,
        }
    }

    /// Create a reasoning item linked to a provider item id
    pub fn linked_reasoning(text: impl Into<String>, item_id: &str) -> Self {
        Self::Reasoning {
            text: text.into(),
            id: None,
            provider_options: Some(crate::provider::linkage_metadata(item_id)),
            confidence: None,
        }
    }

    /// Provider options of the item, if it can carry any
    pub fn provider_options(&self) -> Option<&ProviderMetadata> {
        match self {
            ContentItem::Text {
                provider_options, ..
            }
            | ContentItem::Reasoning {
                provider_options, ..
            }
            | ContentItem::ToolCall {
                provider_options, ..
            }
            | ContentItem::Image {
                provider_options, ..
            }
            | ContentItem::File {
                provider_options, ..
            } => provider_options.as_ref(),
            ContentItem::ToolResult { .. }
            | ContentItem::ToolApprovalRequest { .. }
            | ContentItem::ToolApprovalResponse { .. } => None,
        }
    }
}

/// Fragment content: a bare string or a list of items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FragmentContent {
    Text(String),
    Items(#[serde(deserialize_with = "lenient_items")] Vec<ContentItem>),
}

/// Deserialize a list of items, skipping the ones that do not parse
fn lenient_items<'de, D>(deserializer: D) -> Result<Vec<ContentItem>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<ContentItem>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::debug!(error = %e, "dropping unreadable content item");
                None
            }
        })
        .collect())
}

impl Default for FragmentContent {
    fn default() -> Self {
        FragmentContent::Items(vec![])
    }
}

/// A raw message fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: FragmentRole,
    #[serde(default)]
    pub content: FragmentContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_options: Option<ProviderMetadata>,
}

impl Fragment {
    /// Create a fragment from content items
    pub fn new(role: FragmentRole, items: Vec<ContentItem>) -> Self {
        Self {
            id: None,
            role,
            content: FragmentContent::Items(items),
            provider_options: None,
        }
    }

    /// A user fragment with plain text
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: None,
            role: FragmentRole::User,
            content: FragmentContent::Text(text.into()),
            provider_options: None,
        }
    }

    /// An assistant fragment
    pub fn assistant(items: Vec<ContentItem>) -> Self {
        Self::new(FragmentRole::Assistant, items)
    }

    /// A tool-result fragment
    pub fn tool(items: Vec<ContentItem>) -> Self {
        Self::new(FragmentRole::Tool, items)
    }

    /// Attach an explicit id (builder style)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The explicit id, if present and non-blank
    pub fn explicit_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Content items (empty for string content)
    pub fn items(&self) -> &[ContentItem] {
        match &self.content {
            FragmentContent::Items(items) => items,
            FragmentContent::Text(_) => &[],
        }
    }
}
