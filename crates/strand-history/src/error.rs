//! Error types for strand-history

use thiserror::Error;

/// Result type alias using strand-history Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by persistence. Buffer and normalizer operations never fail.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the core layer (storage, serialization)
    #[error(transparent)]
    Core(#[from] strand_core::Error),

    /// Writing a drained batch failed; the rest of the batch was not attempted
    #[error("Failed to persist {key}: {source}")]
    Persist {
        key: String,
        #[source]
        source: strand_core::Error,
    },

    /// A persist task panicked or was cancelled
    #[error("Persist task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Whether retrying the flush could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Core(e) | Error::Persist { source: e, .. } => e.is_retryable(),
            Error::TaskFailed(_) => false,
        }
    }
}
