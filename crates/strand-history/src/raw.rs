//! Raw-message normalizer for provider fragments that bypass the buffer

use strand_core::{Fragment, FragmentContent, FragmentRole};

use crate::reasoning;

/// Remove reasoning items that the provider could not resolve from assistant fragments.
///
/// A linked reasoning item survives only when the item right after it carries a provider
/// item id. Fragments left without content are removed; everything else passes through
/// untouched.
pub fn strip_dangling_reasoning(fragments: Vec<Fragment>) -> Vec<Fragment> {
    fragments
        .into_iter()
        .filter_map(|mut fragment| {
            if fragment.role != FragmentRole::Assistant {
                return Some(fragment);
            }
            let FragmentContent::Items(items) = &mut fragment.content else {
                return Some(fragment);
            };

            let (kept, changed) = reasoning::strip_dangling(std::mem::take(items));
            if !changed {
                *items = kept;
                return Some(fragment);
            }
            if kept.is_empty() {
                tracing::debug!(id = ?fragment.id, "dropping fragment left without content");
                return None;
            }
            *items = kept;
            Some(fragment)
        })
        .collect()
}
