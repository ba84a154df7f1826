//! Reasoning linkage: id extraction and dangling-reference removal
//!
//! Providers that replay reasoning by reference reject a request in which a reasoning item
//! is not immediately followed by the output item it produced. The helpers here work on
//! both canonical [`Part`]s and raw [`ContentItem`]s through [`ReasoningLinked`].

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use strand_core::{ContentItem, Part, ProviderMetadata, provider};

static REASONING_CONTEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)reasoning").expect("hardcoded regex"));

static ID_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|_)id$|id$|trace").expect("hardcoded regex"));

/// Find a reasoning id nested anywhere in provider metadata.
///
/// Matches a non-empty string under a key that ends in `id` or mentions `trace`, where the key
/// itself or one of its ancestors mentions `reasoning`.
pub fn extract_reasoning_id(metadata: &ProviderMetadata) -> Option<String> {
    visit_object(metadata, false)
}

fn visit_object(object: &serde_json::Map<String, Value>, in_reasoning: bool) -> Option<String> {
    for (key, child) in object {
        let in_reasoning = in_reasoning || REASONING_CONTEXT.is_match(key);
        let found = match child {
            Value::String(s) => {
                let trimmed = s.trim();
                (in_reasoning && !trimmed.is_empty() && ID_KEY.is_match(key))
                    .then(|| trimmed.to_string())
            }
            other => visit_value(other, in_reasoning),
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

fn visit_value(value: &Value, in_reasoning: bool) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().find_map(|item| visit_value(item, in_reasoning)),
        Value::Object(object) => visit_object(object, in_reasoning),
        _ => None,
    }
}

/// Resolve the id of a reasoning part: explicit id, then a provider `rs_` item id, then
/// whatever the metadata carries under a reasoning key
pub fn resolve_reasoning_id(
    explicit: Option<&str>,
    metadata: Option<&ProviderMetadata>,
) -> Option<String> {
    if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
        return Some(id.to_string());
    }
    let metadata = metadata?;
    if let Some(item_id) = provider::item_id(metadata).filter(|id| provider::is_reasoning_item_id(id)) {
        return Some(item_id.to_string());
    }
    extract_reasoning_id(metadata)
}

/// Content that can take part in reasoning linkage
pub trait ReasoningLinked {
    /// A reasoning item that references a provider-side reasoning item
    fn is_linked_reasoning(&self) -> bool;

    /// Whether the item carries a provider item id of its own
    fn has_item_id(&self) -> bool;

    /// Structural separators that are skipped when looking for a successor
    fn is_marker(&self) -> bool {
        false
    }
}

impl ReasoningLinked for Part {
    fn is_linked_reasoning(&self) -> bool {
        match self {
            Part::Reasoning {
                reasoning_id,
                provider_metadata,
                ..
            } => {
                provider::item_id_of(provider_metadata.as_ref())
                    .is_some_and(provider::is_reasoning_item_id)
                    || reasoning_id
                        .as_deref()
                        .is_some_and(provider::is_reasoning_item_id)
            }
            _ => false,
        }
    }

    fn has_item_id(&self) -> bool {
        if let Part::Tool(tool) = self {
            if provider::item_id_of(tool.call_provider_metadata.as_ref()).is_some() {
                return true;
            }
        }
        provider::item_id_of(self.provider_metadata()).is_some()
    }

    fn is_marker(&self) -> bool {
        self.is_step_start()
    }
}

impl ReasoningLinked for ContentItem {
    fn is_linked_reasoning(&self) -> bool {
        match self {
            ContentItem::Reasoning {
                id,
                provider_options,
                ..
            } => {
                provider::item_id_of(provider_options.as_ref())
                    .is_some_and(provider::is_reasoning_item_id)
                    || id.as_deref().is_some_and(provider::is_reasoning_item_id)
            }
            _ => false,
        }
    }

    fn has_item_id(&self) -> bool {
        provider::item_id_of(self.provider_options()).is_some()
    }
}

/// Remove linked reasoning items that are not directly followed by an item carrying a
/// provider item id.
///
/// Of two adjacent linked reasoning items only the later one can survive. Returns the
/// remaining items and whether anything was removed.
pub fn strip_dangling<T: ReasoningLinked>(items: Vec<T>) -> (Vec<T>, bool) {
    let keep: Vec<bool> = (0..items.len())
        .map(|index| {
            if !items[index].is_linked_reasoning() {
                return true;
            }
            match items[index + 1..].iter().find(|next| !next.is_marker()) {
                Some(next) => !next.is_linked_reasoning() && next.has_item_id(),
                None => false,
            }
        })
        .collect();

    let changed = keep.iter().any(|keep| !keep);
    if !changed {
        return (items, false);
    }
    let kept = items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect();
    (kept, true)
}

/// Whether any of the given parts is linked reasoning
pub fn any_linked_reasoning<'a>(parts: impl IntoIterator<Item = &'a Part>) -> bool {
    parts.into_iter().any(|part| part.is_linked_reasoning())
}
