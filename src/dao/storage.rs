use std::error::Error;
use thiserror::Error;

/// Result alias for court store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failure reported by a court store, independent of the backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or refused the request.
    #[error("court store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A stored record could not be decoded.
    #[error("court store record `{record}` is corrupt")]
    Corrupt {
        record: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub fn unavailable(message: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Whether retrying against the same backend can help.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}
