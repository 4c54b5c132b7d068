use weft_kvdb::KvError;

/// Errors from object map operations.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// Error from the underlying key/value backend.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Stored data failed to decode.
    #[error("corrupt object map data: {0}")]
    Codec(#[from] bincode::Error),

    /// Stored data is structurally wrong.
    #[error("corrupt object map: {reason}")]
    Corrupt { reason: String },
}

/// Result alias for object map operations.
pub type MapResult<T> = Result<T, MapError>;
