//! Ordered key/value backend abstraction for the weft object storage engine.
//!
//! The engine consumes any ordered byte-keyed store that offers point and
//! range reads plus an atomic write batch. [`KeyValueDb`] is that contract,
//! [`WriteBatch`] is the accumulated mutation set, and [`MemoryDb`] is the
//! in-memory backend used by tests and embedders. Backends are selected at
//! mount time through [`BackendKind`].

pub mod backend;
pub mod batch;
pub mod error;
pub mod memory;
pub mod traits;

pub use backend::{open_backend, BackendKind};
pub use batch::{BatchOp, WriteBatch};
pub use error::{KvError, KvResult};
pub use memory::MemoryDb;
pub use traits::KeyValueDb;
