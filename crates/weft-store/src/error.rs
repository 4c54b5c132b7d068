use weft_kvdb::KvError;
use weft_objmap::MapError;

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Missing object, collection, or attribute. Tolerated by the
    /// transaction interpreter for most operations.
    #[error("not found")]
    NotFound,

    /// Attempt to create an existing object or collection.
    #[error("already exists")]
    AlreadyExists,

    /// Collection destroy with remaining objects, or a split target
    /// collision.
    #[error("not empty")]
    NotEmpty,

    /// Bad parameters, read past end of object, or inconsistent state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is intentionally unimplemented.
    #[error("operation not supported")]
    Unsupported,

    /// Out of space. Always fatal at the interpreter: the process aborts
    /// rather than risk a partially applied batch.
    #[error("no space left on store")]
    NoSpace,

    /// I/O failure, real or injected through the debug error sets.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another process holds the store's fsid lock.
    #[error("store is locked by another process")]
    Locked,

    /// On-disk format version does not match this build.
    #[error("store version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    /// Error from the object map or the kv backend beneath it.
    #[error(transparent)]
    Map(MapError),
}

impl From<MapError> for StoreError {
    fn from(e: MapError) -> Self {
        match e {
            // surface backend exhaustion as the fatal kind it is
            MapError::Kv(KvError::NoSpace) => StoreError::NoSpace,
            other => StoreError::Map(other),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
