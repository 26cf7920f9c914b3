use crate::short_id::ShortId;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid short id length {length}; expected 1..={max}")]
    InvalidIdLength { length: usize, max: usize },
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The id is already taken by a different URL. The id itself is still
    /// valid and points at the first writer's URL.
    #[error("short id already maps to a different url: {0}")]
    Conflict(ShortId),
    #[error("link not found: {0}")]
    NotFound(ShortId),
    #[error("link deleted: {0}")]
    Deleted(ShortId),
    #[error("empty request")]
    EmptyRequest,
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage io failed: {0}")]
    Io(String),
    #[error("schema migration failed: {0}")]
    Migration(String),
    #[error("invalid storage configuration: {0}")]
    Configuration(String),
}

impl StorageError {
    /// Returns the id carried by a [`StorageError::Conflict`].
    pub fn conflicting_id(&self) -> Option<&ShortId> {
        match self {
            StorageError::Conflict(id) => Some(id),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<CoreError> for StorageError {
    fn from(value: CoreError) -> Self {
        Self::Configuration(value.to_string())
    }
}
