use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coll::CollectionId;

/// A fully qualified object key.
///
/// Objects are addressed by a placement hash plus name, locator key, snapshot,
/// generation, and shard. The derived ordering (field order below) is total
/// and matches the byte ordering of the storage layer's key encoding, so
/// paginated listings walk objects in `ObjectId` order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    /// Placement hash. Split membership is decided on its low bits.
    pub hash: u32,
    /// Object name.
    pub name: String,
    /// Locator key; empty for most objects.
    pub key: String,
    /// Snapshot id; `SNAP_HEAD` for the live object.
    pub snap: u64,
    /// Generation counter.
    pub generation: u64,
    /// Shard number.
    pub shard: u32,
}

/// Snapshot id of the live (non-snapshotted) object.
pub const SNAP_HEAD: u64 = u64::MAX;

impl ObjectId {
    /// Create a head object with a hash derived from the name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let digest = blake3::hash(name.as_bytes());
        let hash = u32::from_le_bytes(digest.as_bytes()[..4].try_into().expect("4 bytes"));
        Self::with_hash(name, hash)
    }

    /// Create a head object with an explicit placement hash.
    pub fn with_hash(name: impl Into<String>, hash: u32) -> Self {
        let name = name.into();
        assert!(
            !name.as_bytes().contains(&0),
            "object name must not contain NUL"
        );
        Self {
            hash,
            name,
            key: String::new(),
            snap: SNAP_HEAD,
            generation: 0,
            shard: 0,
        }
    }

    /// The pseudo-object standing in for collection `cid` inside
    /// [`CollectionId::meta`].
    pub fn for_collection(cid: &CollectionId) -> Self {
        Self::new(cid.as_str())
    }

    /// Split-membership predicate: the low `bits` bits of the placement hash
    /// equal `rem`.
    pub fn matches_split(&self, bits: u32, rem: u32) -> bool {
        if bits == 0 {
            return true;
        }
        let mask = if bits >= 32 { u32::MAX } else { (1 << bits) - 1 };
        self.hash & mask == rem & mask
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:08x}/{})", self.hash, self.name)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}/{}", self.hash, self.name)
    }
}
