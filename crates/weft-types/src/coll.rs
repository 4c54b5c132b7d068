use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the reserved collection that holds one pseudo-object per user
/// collection. The pseudo-object's header denotes collection existence and
/// its attribute namespace holds collection-level attributes.
pub const META_COLLECTION: &str = "__COLLECTION__";

/// An opaque name identifying a bucket of objects.
///
/// Collection ids are ordered byte-wise and must not contain a NUL byte;
/// the storage layer relies on NUL-terminated, order-preserving key
/// encodings.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionId(String);

impl CollectionId {
    /// Create a collection id from a name.
    ///
    /// # Panics
    ///
    /// Panics if the name contains a NUL byte.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(
            !name.as_bytes().contains(&0),
            "collection name must not contain NUL"
        );
        Self(name)
    }

    /// The reserved collection-of-collections.
    pub fn meta() -> Self {
        Self(META_COLLECTION.to_string())
    }

    /// Returns `true` if this is the reserved collection-of-collections.
    pub fn is_meta(&self) -> bool {
        self.0 == META_COLLECTION
    }

    /// The collection name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionId({})", self.0)
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CollectionId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_is_reserved() {
        let meta = CollectionId::meta();
        assert!(meta.is_meta());
        assert_eq!(meta.as_str(), META_COLLECTION);
    }

    #[test]
    fn user_collection_is_not_meta() {
        assert!(!CollectionId::new("pool.1").is_meta());
    }

    #[test]
    fn ordering_is_bytewise() {
        assert!(CollectionId::new("a") < CollectionId::new("b"));
        assert!(CollectionId::new("a") < CollectionId::new("aa"));
    }

    #[test]
    #[should_panic]
    fn nul_in_name_panics() {
        CollectionId::new("bad\0name");
    }

    #[test]
    fn serde_roundtrip() {
        let cid = CollectionId::new("pool.7_head");
        let json = serde_json::to_string(&cid).unwrap();
        let parsed: CollectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(cid, parsed);
    }
}
