//! Cache error types.

/// Error raised by a [`Store`](crate::Store) or the persistent cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Underlying storage I/O failed.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored value could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The key cannot be mapped onto the storage backend.
    #[error("invalid cache key: {0:?}")]
    InvalidKey(String),
}
