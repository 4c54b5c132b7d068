use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::KvResult;
use crate::memory::MemoryDb;
use crate::traits::KeyValueDb;

/// Backend engine selection, decided at mount time.
///
/// On-disk engines are external collaborators wired in by the embedder;
/// the in-memory backend ships here for tests and embedding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    Memory,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Memory
    }
}

/// Open the backend of the given kind rooted at `path`.
///
/// The in-memory backend ignores `path`; it is still passed so the call
/// site reads the same for every engine.
pub fn open_backend(kind: BackendKind, path: &Path) -> KvResult<Arc<dyn KeyValueDb>> {
    match kind {
        BackendKind::Memory => {
            info!(path = %path.display(), "opening in-memory kv backend");
            Ok(Arc::new(MemoryDb::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_memory_backend() {
        let db = open_backend(BackendKind::Memory, Path::new("/nonexistent")).unwrap();
        assert_eq!(db.get(b"k").unwrap(), None);
    }
}
