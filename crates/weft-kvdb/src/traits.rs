use std::collections::BTreeMap;

use crate::batch::WriteBatch;
use crate::error::KvResult;

/// An ordered byte-keyed store.
///
/// All implementations must satisfy these invariants:
/// - Keys are ordered byte-wise; range reads walk that order.
/// - [`KeyValueDb::write`] is atomic: either every operation in the batch
///   is applied or none is. There is never partial application.
/// - Reads observe only committed batches; a staged batch is invisible
///   until `write` returns.
pub trait KeyValueDb: Send + Sync {
    /// Get the value stored at `key`, if any.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Get the values for several keys in one round trip. Missing keys are
    /// simply absent from the result.
    fn get_many(&self, keys: &[Vec<u8>]) -> KvResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut out = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.get(key)? {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    /// Returns `true` if `key` is present.
    fn contains(&self, key: &[u8]) -> KvResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// All `(key, value)` pairs with `start <= key < end`, in key order.
    /// An absent `end` is unbounded.
    fn range(&self, start: &[u8], end: Option<&[u8]>) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Up to `limit` `(key, value)` pairs with `start <= key < end`, in key
    /// order. A `limit` of zero means unlimited.
    fn range_limited(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = self.range(start, end)?;
        if limit > 0 {
            pairs.truncate(limit);
        }
        Ok(pairs)
    }

    /// Atomically apply a batch of mutations.
    fn write(&self, batch: WriteBatch) -> KvResult<()>;
}
