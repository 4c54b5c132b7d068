/// Errors from key/value backend operations.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// I/O error from the underlying storage engine.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend ran out of space. The store treats this as fatal.
    #[error("no space left on backend")]
    NoSpace,

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for backend operations.
pub type KvResult<T> = Result<T, KvError>;
