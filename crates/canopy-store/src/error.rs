use canopy_types::ContentId;

/// Errors from revision store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object (node or commit) was not found.
    #[error("object not found: {0}")]
    NotFound(ContentId),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A head install was attempted without holding the head lock.
    #[error("head lock not held")]
    LockNotHeld,

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
