use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::batch::{BatchOp, WriteBatch};
use crate::error::KvResult;
use crate::traits::KeyValueDb;

/// In-memory, `BTreeMap`-based ordered store.
///
/// Intended for tests and embedding. The whole map sits behind a `RwLock`;
/// batch application takes the write lock, which gives batches the required
/// all-or-nothing visibility.
pub struct MemoryDb {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDb {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.map.read().expect("kv lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.map.read().expect("kv lock poisoned").is_empty()
    }
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueDb for MemoryDb {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        let map = self.map.read().expect("kv lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn range(&self, start: &[u8], end: Option<&[u8]>) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read().expect("kv lock poisoned");
        let upper = match end {
            Some(end) => Bound::Excluded(end.to_vec()),
            None => Bound::Unbounded,
        };
        let pairs = map
            .range((Bound::Included(start.to_vec()), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(pairs)
    }

    fn write(&self, batch: WriteBatch) -> KvResult<()> {
        let mut map = self.map.write().expect("kv lock poisoned");
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
                BatchOp::DeleteRange { start, end } => {
                    let upper = match end {
                        Some(end) => Bound::Excluded(end),
                        None => Bound::Unbounded,
                    };
                    let doomed: Vec<Vec<u8>> = map
                        .range((Bound::Included(start), upper))
                        .map(|(k, _)| k.clone())
                        .collect();
                    for key in doomed {
                        map.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDb").field("keys", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(db: &MemoryDb, key: &[u8], value: &[u8]) {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        db.write(batch).unwrap();
    }

    #[test]
    fn put_and_get() {
        let db = MemoryDb::new();
        put(&db, b"k", b"v");
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(db.get(b"missing").unwrap(), None);
    }

    #[test]
    fn batch_is_ordered() {
        let db = MemoryDb::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"first".to_vec());
        batch.put(b"k".to_vec(), b"second".to_vec());
        db.write(batch).unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn delete_then_put_in_one_batch() {
        let db = MemoryDb::new();
        put(&db, b"k", b"old");
        let mut batch = WriteBatch::new();
        batch.delete(b"k".to_vec());
        batch.put(b"k".to_vec(), b"new".to_vec());
        db.write(batch).unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn range_is_key_ordered_and_end_exclusive() {
        let db = MemoryDb::new();
        put(&db, b"a", b"1");
        put(&db, b"b", b"2");
        put(&db, b"c", b"3");
        let pairs = db.range(b"a", Some(b"c")).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, b"a");
        assert_eq!(pairs[1].0, b"b");
    }

    #[test]
    fn range_unbounded_end() {
        let db = MemoryDb::new();
        put(&db, b"a", b"1");
        put(&db, b"z", b"26");
        let pairs = db.range(b"b", None).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, b"z");
    }

    #[test]
    fn range_limited_truncates() {
        let db = MemoryDb::new();
        for i in 0u8..10 {
            put(&db, &[i], b"v");
        }
        let pairs = db.range_limited(&[0], None, 3).unwrap();
        assert_eq!(pairs.len(), 3);
        // zero means unlimited
        let pairs = db.range_limited(&[0], None, 0).unwrap();
        assert_eq!(pairs.len(), 10);
    }

    #[test]
    fn delete_range_end_exclusive() {
        let db = MemoryDb::new();
        put(&db, b"a", b"1");
        put(&db, b"b", b"2");
        put(&db, b"c", b"3");
        let mut batch = WriteBatch::new();
        batch.delete_range(b"a".to_vec(), Some(b"c".to_vec()));
        db.write(batch).unwrap();
        assert_eq!(db.get(b"a").unwrap(), None);
        assert_eq!(db.get(b"b").unwrap(), None);
        assert_eq!(db.get(b"c").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn get_many_skips_missing() {
        let db = MemoryDb::new();
        put(&db, b"a", b"1");
        let out = db.get_many(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(&b"a".to_vec()), Some(&b"1".to_vec()));
    }
}
