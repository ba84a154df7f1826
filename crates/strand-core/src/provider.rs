//! Provider linkage ids carried in part metadata
//!
//! Responses-style providers tag every output item (reasoning, message, function call)
//! with an item id under `openai.itemId`. Reasoning items use the `rs_` prefix and must be
//! replayed together with the item that follows them.

use serde_json::Value;

use crate::types::ProviderMetadata;

/// Metadata key holding linkage ids
pub const LINKAGE_PROVIDER_KEY: &str = "openai";

/// Prefix of provider reasoning item ids
pub const REASONING_ID_PREFIX: &str = "rs_";

/// Whether an id refers to a provider reasoning item
pub fn is_reasoning_item_id(id: &str) -> bool {
    id.trim().starts_with(REASONING_ID_PREFIX)
}

fn linkage_entry(metadata: &ProviderMetadata) -> Option<&serde_json::Map<String, Value>> {
    metadata.get(LINKAGE_PROVIDER_KEY)?.as_object()
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// The provider item id (`openai.itemId`), if present and non-empty
pub fn item_id(metadata: &ProviderMetadata) -> Option<&str> {
    non_empty_str(linkage_entry(metadata)?.get("itemId"))
}

/// Same as [`item_id`] for optional metadata
pub fn item_id_of(metadata: Option<&ProviderMetadata>) -> Option<&str> {
    metadata.and_then(item_id)
}

/// Whether the metadata links to a provider reasoning item in any of the known shapes
/// (`itemId`, `reasoning_trace_id`, `reasoning.id`, `reasoningEncryptedContent`)
pub fn has_reasoning_linkage(metadata: &ProviderMetadata) -> bool {
    let Some(entry) = linkage_entry(metadata) else {
        return false;
    };
    if non_empty_str(entry.get("itemId")).is_some()
        || non_empty_str(entry.get("reasoning_trace_id")).is_some()
        || non_empty_str(entry.get("reasoningEncryptedContent")).is_some()
    {
        return true;
    }
    entry
        .get("reasoning")
        .and_then(Value::as_object)
        .is_some_and(|reasoning| non_empty_str(reasoning.get("id")).is_some())
}

/// Whether the metadata holds linkage that only makes sense next to a reasoning item.
///
/// Plain message/function-call item ids (`msg_…`, `fc_…`) are not reasoning-linked.
pub fn is_reasoning_linked(metadata: &ProviderMetadata) -> bool {
    let Some(entry) = linkage_entry(metadata) else {
        return false;
    };
    if non_empty_str(entry.get("itemId")).is_some_and(is_reasoning_item_id) {
        return true;
    }
    entry.contains_key("reasoning_trace_id") || entry.get("reasoning").is_some_and(Value::is_object)
}

/// Build `{ "openai": { "itemId": id } }`
pub fn linkage_metadata(item_id: &str) -> ProviderMetadata {
    let mut entry = serde_json::Map::new();
    entry.insert("itemId".to_string(), Value::String(item_id.to_string()));
    let mut metadata = ProviderMetadata::new();
    metadata.insert(LINKAGE_PROVIDER_KEY.to_string(), Value::Object(entry));
    metadata
}

/// Remove the linkage entry, returning `None` when nothing else remains
pub fn without_linkage(metadata: &ProviderMetadata) -> Option<ProviderMetadata> {
    let mut cleaned = metadata.clone();
    cleaned.remove(LINKAGE_PROVIDER_KEY);
    (!cleaned.is_empty()).then_some(cleaned)
}
