use snip_core::StorageError;
use snip_pipeline::PipelineError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    /// The url's short id already points at a different url. Carries the
    /// short url of the existing link.
    #[error("short url already taken: {0}")]
    Conflict(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("link not found: {0}")]
    NotFound(String),
    #[error("link deleted: {0}")]
    Deleted(String),
    #[error("empty request")]
    EmptyRequest,
    #[error("deletion queue is full")]
    QueueFull,
    #[error("invalid secret key: {0}")]
    InvalidSecret(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<PipelineError> for ShortenerError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::EmptyRequest => Self::EmptyRequest,
            PipelineError::QueueFull => Self::QueueFull,
            PipelineError::Closed => Self::Storage(value.to_string()),
        }
    }
}

/// Converts a StorageError to a ShortenerError.
///
/// Conflicts are reported with the full short url, so `base_url` is needed.
pub(crate) fn storage_to_shortener_error(e: StorageError, base_url: &str) -> ShortenerError {
    match e {
        StorageError::Conflict(id) => ShortenerError::Conflict(id.to_url(base_url)),
        StorageError::NotFound(id) => ShortenerError::NotFound(id.to_string()),
        StorageError::Deleted(id) => ShortenerError::Deleted(id.to_string()),
        StorageError::EmptyRequest => ShortenerError::EmptyRequest,
        other => ShortenerError::Storage(other.to_string()),
    }
}
