use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use weft_kvdb::{KeyValueDb, WriteBatch};
use weft_types::{CollectionId, ObjectId};

use crate::error::{MapError, MapResult};
use crate::keys;

/// Persistent header record of one object.
///
/// `seq` names the header's private key namespaces inside the backend.
/// `parents` is the clone-on-write ancestry, nearest ancestor first: a key
/// absent from the header's own namespace resolves through the ancestors'
/// namespaces, so a clone shares its source's data without copying it.
/// Carrying the whole chain in the record keeps resolution self-contained,
/// even for headers cloned by a still-uncommitted batch. `data` is the
/// opaque blob the striped layer stores its own header in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub seq: u64,
    pub parents: Vec<u64>,
    pub cid: CollectionId,
    pub oid: ObjectId,
    pub data: Vec<u8>,
}

impl HeaderRecord {
    /// Namespace seqs to consult for reads, childmost first.
    fn seq_chain(&self) -> impl Iterator<Item = u64> + '_ {
        std::iter::once(self.seq).chain(self.parents.iter().copied())
    }
}

/// Staged mutations for one atomic batch.
///
/// Reads performed while a transaction is being built go straight to the
/// backend; same-batch visibility is the buffered-transaction layer's job.
#[derive(Debug, Default)]
pub struct MapTransaction {
    batch: WriteBatch,
}

impl MapTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.batch.put(key, value);
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.batch.delete(key);
    }

    fn delete_prefix(&mut self, prefix: Vec<u8>) {
        let end = keys::prefix_end(&prefix);
        self.batch.delete_range(prefix, end);
    }
}

/// Maps `(collection, object)` to header records and maintains each
/// header's namespaced key subtrees within the backend.
pub struct GenericObjectMap {
    db: Arc<dyn KeyValueDb>,
    next_seq: AtomicU64,
    in_use: Mutex<HashSet<u64>>,
    in_use_cond: Condvar,
}

impl GenericObjectMap {
    /// Open the map over `db`, loading the seq allocator state.
    pub fn new(db: Arc<dyn KeyValueDb>) -> MapResult<Self> {
        let next_seq = match db.get(keys::NEXT_SEQ_KEY)? {
            Some(raw) => bincode::deserialize::<u64>(&raw)?,
            None => 1,
        };
        debug!(next_seq, "generic object map opened");
        Ok(Self {
            db,
            next_seq: AtomicU64::new(next_seq),
            in_use: Mutex::new(HashSet::new()),
            in_use_cond: Condvar::new(),
        })
    }

    pub fn db(&self) -> &Arc<dyn KeyValueDb> {
        &self.db
    }

    /// Atomically apply a finished transaction.
    pub fn submit(&self, txn: MapTransaction) -> MapResult<()> {
        self.db.write(txn.batch)?;
        Ok(())
    }

    fn alloc_seq(&self, txn: &mut MapTransaction) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        // persist the allocator high-water mark alongside the allocation
        txn.put(
            keys::NEXT_SEQ_KEY.to_vec(),
            bincode::serialize(&self.next_seq.load(Ordering::SeqCst)).expect("u64 encodes"),
        );
        seq
    }

    // ------------------------------------------------------------------
    // Header lookup / creation
    // ------------------------------------------------------------------

    /// Look up the header for `(cid, oid)`, waiting out any in-flight batch
    /// that holds the header in use.
    pub fn lookup_header(&self, cid: &CollectionId, oid: &ObjectId) -> MapResult<Option<HeaderRecord>> {
        loop {
            let raw = match self.db.get(&keys::mapping_key(cid, oid))? {
                Some(raw) => raw,
                None => return Ok(None),
            };
            let record: HeaderRecord = bincode::deserialize(&raw)?;
            let guard = self.in_use.lock().expect("in_use lock poisoned");
            if !guard.contains(&record.seq) {
                return Ok(Some(record));
            }
            // a submitting batch holds this header; wait and re-read
            let _guard = self.in_use_cond.wait(guard).expect("in_use lock poisoned");
        }
    }

    /// Look up the header for `(cid, oid)`, creating a fresh record when
    /// missing. Creation stages the mapping into `txn`.
    pub fn lookup_create_header(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        txn: &mut MapTransaction,
    ) -> MapResult<HeaderRecord> {
        if let Some(record) = self.lookup_header(cid, oid)? {
            return Ok(record);
        }
        let record = HeaderRecord {
            seq: self.alloc_seq(txn),
            parents: Vec::new(),
            cid: cid.clone(),
            oid: oid.clone(),
            data: Vec::new(),
        };
        self.set_header(&record, txn);
        debug!(%cid, %oid, seq = record.seq, "created object header");
        Ok(record)
    }

    /// Stage the header record itself (mapping entry) into `txn`.
    pub fn set_header(&self, record: &HeaderRecord, txn: &mut MapTransaction) {
        txn.put(
            keys::mapping_key(&record.cid, &record.oid),
            bincode::serialize(record).expect("header record encodes"),
        );
    }

    // ------------------------------------------------------------------
    // Namespaced key subtrees
    // ------------------------------------------------------------------

    /// Stage writes of `values` under `(record, prefix)`.
    pub fn set_keys(
        &self,
        record: &HeaderRecord,
        prefix: &str,
        values: &BTreeMap<String, Vec<u8>>,
        txn: &mut MapTransaction,
    ) {
        for (key, value) in values {
            txn.put(keys::data_key(record.seq, prefix, key), value.clone());
        }
    }

    /// Stage removal of `keys` under `(record, prefix)`. Headers that share
    /// ancestor data stage tombstones so the ancestors' entries stay masked.
    pub fn rm_keys(
        &self,
        record: &HeaderRecord,
        prefix: &str,
        keys_to_remove: &BTreeSet<String>,
        txn: &mut MapTransaction,
    ) {
        for key in keys_to_remove {
            txn.delete(keys::data_key(record.seq, prefix, key));
            if !record.parents.is_empty() {
                txn.put(keys::tomb_key(record.seq, prefix, key), Vec::new());
            }
        }
    }

    /// Get the values for `keys` under `(record, prefix)`, resolving each key
    /// through the clone ancestry. Missing keys are absent from the result.
    pub fn get_values(
        &self,
        record: &HeaderRecord,
        prefix: &str,
        wanted: &BTreeSet<String>,
    ) -> MapResult<BTreeMap<String, Vec<u8>>> {
        let mut out = BTreeMap::new();
        for key in wanted {
            'chain: for seq in record.seq_chain() {
                if let Some(value) = self.db.get(&keys::data_key(seq, prefix, key))? {
                    out.insert(key.clone(), value);
                    break 'chain;
                }
                if self.db.contains(&keys::tomb_key(seq, prefix, key))? {
                    break 'chain;
                }
            }
        }
        Ok(out)
    }

    /// The subset of `keys` that are present under `(record, prefix)`.
    pub fn check_keys(
        &self,
        record: &HeaderRecord,
        prefix: &str,
        wanted: &BTreeSet<String>,
    ) -> MapResult<BTreeSet<String>> {
        Ok(self.get_values(record, prefix, wanted)?.into_keys().collect())
    }

    fn scan_ns(&self, prefix_key: Vec<u8>) -> MapResult<Vec<(String, Vec<u8>)>> {
        let end = keys::prefix_end(&prefix_key);
        let pairs = self.db.range(&prefix_key, end.as_deref())?;
        let mut out = Vec::with_capacity(pairs.len());
        for (full_key, value) in pairs {
            let suffix = &full_key[prefix_key.len()..];
            let key = String::from_utf8(suffix.to_vec()).map_err(|_| MapError::Corrupt {
                reason: "non-utf8 user key".to_string(),
            })?;
            out.push((key, value));
        }
        Ok(out)
    }

    /// All `(key, value)` pairs under `(record, prefix)`, merged through the
    /// clone ancestry (nearer entries and tombstones mask farther ones).
    pub fn get_all(
        &self,
        record: &HeaderRecord,
        prefix: &str,
    ) -> MapResult<BTreeMap<String, Vec<u8>>> {
        let mut out = BTreeMap::new();
        let mut masked = BTreeSet::new();
        for seq in record.seq_chain() {
            for (key, value) in self.scan_ns(keys::data_prefix(seq, prefix))? {
                if !out.contains_key(&key) && !masked.contains(&key) {
                    out.insert(key, value);
                }
            }
            for (key, _) in self.scan_ns(keys::tomb_prefix(seq, prefix))? {
                masked.insert(key);
            }
        }
        Ok(out)
    }

    /// All keys under `(record, prefix)`, in order.
    pub fn get_keys(&self, record: &HeaderRecord, prefix: &str) -> MapResult<BTreeSet<String>> {
        Ok(self.get_all(record, prefix)?.into_keys().collect())
    }

    /// Keys in `[first, last)` under `(record, prefix)`, in order.
    pub fn get_keys_in_range(
        &self,
        record: &HeaderRecord,
        prefix: &str,
        first: &str,
        last: &str,
    ) -> MapResult<BTreeSet<String>> {
        Ok(self
            .get_keys(record, prefix)?
            .into_iter()
            .filter(|k| k.as_str() >= first && k.as_str() < last)
            .collect())
    }

    // ------------------------------------------------------------------
    // Clone / rename / clear
    // ------------------------------------------------------------------

    fn read_children(&self, seq: u64) -> MapResult<Option<u32>> {
        match self.db.get(&keys::parent_key(seq))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    fn write_children(&self, seq: u64, children: u32, txn: &mut MapTransaction) {
        txn.put(
            keys::parent_key(seq),
            bincode::serialize(&children).expect("u32 encodes"),
        );
    }

    /// Clone-on-write: produce two fresh header records, both resolving
    /// through the old header's namespaces. The old record becomes a shared
    /// internal ancestor with a live-children counter; the returned origin
    /// record replaces it under its `(cid, oid)`.
    pub fn clone_header(
        &self,
        old: &HeaderRecord,
        cid: &CollectionId,
        oid: &ObjectId,
        txn: &mut MapTransaction,
    ) -> MapResult<(HeaderRecord, HeaderRecord)> {
        let mut parents = Vec::with_capacity(old.parents.len() + 1);
        parents.push(old.seq);
        parents.extend_from_slice(&old.parents);

        let origin = HeaderRecord {
            seq: self.alloc_seq(txn),
            parents: parents.clone(),
            cid: old.cid.clone(),
            oid: old.oid.clone(),
            data: old.data.clone(),
        };
        let target = HeaderRecord {
            seq: self.alloc_seq(txn),
            parents,
            cid: cid.clone(),
            oid: oid.clone(),
            data: old.data.clone(),
        };

        // the old header goes internal: both children now claim it
        self.write_children(old.seq, 2, txn);
        self.set_header(&origin, txn);
        self.set_header(&target, txn);
        debug!(
            old_seq = old.seq,
            origin_seq = origin.seq,
            target_seq = target.seq,
            "cloned object header"
        );
        Ok((origin, target))
    }

    /// Re-point the header's mapping to a new `(cid, oid)`. Data keys stay
    /// under the header's seq.
    pub fn rename_header(
        &self,
        record: &mut HeaderRecord,
        cid: &CollectionId,
        oid: &ObjectId,
        txn: &mut MapTransaction,
    ) {
        txn.delete(keys::mapping_key(&record.cid, &record.oid));
        record.cid = cid.clone();
        record.oid = oid.clone();
        self.set_header(record, txn);
    }

    fn clear_data(&self, seq: u64, txn: &mut MapTransaction) {
        txn.delete_prefix(keys::seq_data_prefix(seq));
        txn.delete_prefix(keys::seq_tomb_prefix(seq));
    }

    /// Stage a full clear: the mapping, every data and tombstone key, and
    /// every ancestor whose last live child this was.
    pub fn clear_header(&self, record: &HeaderRecord, txn: &mut MapTransaction) -> MapResult<()> {
        txn.delete(keys::mapping_key(&record.cid, &record.oid));
        self.clear_data(record.seq, txn);

        for &seq in &record.parents {
            match self.read_children(seq)? {
                Some(children) if children <= 1 => {
                    // last claim released; the ancestor goes with us
                    self.clear_data(seq, txn);
                    txn.delete(keys::parent_key(seq));
                }
                Some(children) => {
                    self.write_children(seq, children - 1, txn);
                    break;
                }
                None => {
                    warn!(seq, "children counter missing during clear; skipping reclaim");
                    break;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    /// List up to `limit` objects of `cid` in `ObjectId` order, starting at
    /// `start` (inclusive). Returns the objects and, when the listing was
    /// cut short, the id to resume from. A `limit` of zero lists everything.
    pub fn list_objects(
        &self,
        cid: &CollectionId,
        start: Option<&ObjectId>,
        limit: usize,
    ) -> MapResult<(Vec<ObjectId>, Option<ObjectId>)> {
        let prefix = keys::mapping_prefix(cid);
        let begin = match start {
            Some(oid) => keys::mapping_key(cid, oid),
            None => prefix.clone(),
        };
        let end = keys::prefix_end(&prefix);
        let fetch = if limit == 0 { 0 } else { limit + 1 };
        let pairs = self.db.range_limited(&begin, end.as_deref(), fetch)?;

        let mut oids = Vec::with_capacity(pairs.len());
        for (_, raw) in &pairs {
            let record: HeaderRecord = bincode::deserialize(raw)?;
            oids.push(record.oid);
        }
        let next = if limit > 0 && oids.len() > limit {
            let next = oids.pop();
            oids.truncate(limit);
            next
        } else {
            None
        };
        Ok((oids, next))
    }

    // ------------------------------------------------------------------
    // In-use tracking
    // ------------------------------------------------------------------

    /// Mark header seqs as held by a submitting batch. Blocks until none of
    /// them is already held.
    pub fn mark_in_use(&self, seqs: &[u64]) {
        let mut guard = self.in_use.lock().expect("in_use lock poisoned");
        while seqs.iter().any(|s| guard.contains(s)) {
            guard = self.in_use_cond.wait(guard).expect("in_use lock poisoned");
        }
        for seq in seqs {
            guard.insert(*seq);
        }
    }

    /// Release header seqs held by a batch and wake waiters.
    pub fn release_in_use(&self, seqs: &[u64]) {
        let mut guard = self.in_use.lock().expect("in_use lock poisoned");
        for seq in seqs {
            guard.remove(seq);
        }
        drop(guard);
        self.in_use_cond.notify_all();
    }
}
