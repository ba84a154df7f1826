//! strand-core: conversation part model
//!
//! This crate provides the canonical message/part types shared by the conversation
//! pipeline, the raw provider fragment model, and the conversion between them.

pub mod convert;
pub mod error;
pub mod fragment;
pub mod provider;
pub mod types;

pub use convert::{fragment_to_message, fragments_to_messages};
pub use error::{Error, Result};
pub use fragment::{ContentItem, FileData, Fragment, FragmentContent, FragmentRole};
pub use types::*;
