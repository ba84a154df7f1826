//! strand-history: conversation state pipeline
//!
//! Streamed provider fragments are folded into canonical messages by the
//! [`ConversationBuffer`], normalized for the next model request by [`sanitize_all`], and
//! written to durable storage by the debounced [`PersistQueue`].

pub mod buffer;
pub mod context;
pub mod error;
pub mod persist;
pub mod raw;
pub mod reasoning;
pub mod sanitize;
pub mod store;

pub use buffer::{ConversationBuffer, MessageSource, SharedBuffer};
pub use context::{AgentIdentity, Attribution, OperationContext};
pub use error::{Error, Result};
pub use persist::{PersistQueue, PersistQueueOptions};
pub use raw::strip_dangling_reasoning;
pub use sanitize::{SanitizeOptions, sanitize, sanitize_all};
pub use store::{InMemoryStore, MessageStore, load_buffer};
