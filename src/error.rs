use thiserror::Error;

/// Result type for public view operations.
pub type ViewResult<T> = std::result::Result<T, ViewError>;

/// Failures reported by a backing GUID array.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArrayError {
    /// The index no longer exists; the array changed since the caller last looked.
    #[error("index {index} out of range (length {length})")]
    IndexOutOfRange { index: u32, length: u32 },

    /// A lookup (prefix search, guid) had no answer.
    #[error("not found: {0}")]
    NotFound(String),

    /// The array has been shut down.
    #[error("array closed")]
    Closed,

    /// The storage engine failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors surfaced at the view's public boundary.
#[derive(Debug, Error)]
pub enum ViewError {
    /// Null or out-of-domain parameters. No side effects happened.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The bound list refuses to be sorted.
    #[error("list is not sortable")]
    NotSortable,

    /// The backing array mutated between a lookup and its use.
    #[error("stale reference to array index {index}")]
    StaleReference { index: u32 },

    /// A cache insert could not allocate.
    #[error("out of memory while caching rows")]
    ResourceExhaustion,

    /// Optional grid operation this flat view does not support.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// The operation needs a collaborator that is not bound.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Backing array failure.
    #[error(transparent)]
    Array(#[from] ArrayError),
}

impl ViewError {
    /// Whether a caller may safely treat this error as a no-op.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, ViewError::NotSortable | ViewError::NotImplemented(_))
    }
}

impl From<std::collections::TryReserveError> for ViewError {
    fn from(_: std::collections::TryReserveError) -> Self {
        ViewError::ResourceExhaustion
    }
}
