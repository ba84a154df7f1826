//! Error types for strand-core

use thiserror::Error;

/// Result type alias using strand-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised at the storage and serialization boundaries
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure in a storage backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A fragment could not be interpreted at all
    #[error("Invalid fragment: {0}")]
    InvalidFragment(String),

    /// The storage collaborator rejected a write
    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl Error {
    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Whether a caller could reasonably retry the operation
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            Error::Storage { message } => {
                let msg = message.to_lowercase();
                msg.contains("timeout") || msg.contains("timed out") || msg.contains("busy")
            }
            Error::Json(_) | Error::InvalidFragment(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_io() {
        let e = Error::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk"));
        assert!(e.is_retryable());
        let e = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_retryable_storage_message() {
        assert!(Error::storage("database is busy").is_retryable());
        assert!(!Error::storage("constraint violated").is_retryable());
    }

    #[test]
    fn test_not_retryable_malformed() {
        assert!(!Error::InvalidFragment("no role".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(Error::storage("boom").to_string(), "Storage error: boom");
    }
}
