use canopy_store::StoreError;
use canopy_types::TypeError;

/// Errors from edit application and commit construction.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// A referenced path, child, or commit does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A child with the target name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The edit is structurally invalid (for example, moving a node into
    /// its own descendant).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Concurrent edits collide in a way that cannot be auto-resolved.
    /// Surfaces from `commit` only; the head is left unchanged.
    #[error("merge conflict at {path}: {detail}")]
    MergeConflict { path: String, detail: String },

    /// A staging-area invariant was violated.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// Malformed path or name.
    #[error("invalid path: {0}")]
    Path(#[from] TypeError),

    /// Failure in the underlying revision store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CommitError {
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::InternalInconsistency(msg.into())
    }
}

/// Result alias for commit operations.
pub type CommitResult<T> = Result<T, CommitError>;
