use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use weft_objmap::{check_spos, MapTransaction, StripObjectHeader};
use weft_types::{CollectionId, ObjectId, SequencerPosition};

use crate::error::{StoreError, StoreResult};
use crate::store::StoreInner;

/// Cache key of one header inside a buffered transaction.
pub(crate) type HeaderKey = (CollectionId, ObjectId);

/// The unit of batch application.
///
/// Owns the staged backend transaction, a cache of every strip header the
/// batch has touched, and the position of the operation currently being
/// applied. The cache, together with each header's `buffers` map, gives
/// later operations in the batch a consistent view of earlier ones without
/// flushing the backend.
///
/// Every mutating entry point consults the `spos` gate first: a header
/// already stamped at or past the current position is being replayed, and
/// the mutation is a no-op.
pub(crate) struct BufferTransaction<'a> {
    store: &'a StoreInner,
    txn: MapTransaction,
    headers: BTreeMap<HeaderKey, StripObjectHeader>,
    spos: SequencerPosition,
}

impl<'a> BufferTransaction<'a> {
    pub fn new(store: &'a StoreInner, spos: SequencerPosition) -> Self {
        Self {
            store,
            txn: MapTransaction::new(),
            headers: BTreeMap::new(),
            spos,
        }
    }

    pub fn spos(&self) -> SequencerPosition {
        self.spos
    }

    /// Advance to the position of the operation about to be applied.
    pub fn set_spos(&mut self, spos: SequencerPosition) {
        self.spos = spos;
    }

    /// Collection existence: either the backend has the collection's
    /// pseudo-header, or this batch created one it has not since cleared.
    pub fn check_coll(&self, cid: &CollectionId) -> StoreResult<()> {
        if self.store.check_coll_db(cid).is_ok() {
            return Ok(());
        }
        let key = (CollectionId::meta(), ObjectId::for_collection(cid));
        match self.headers.get(&key) {
            Some(header) if !header.deleted => Ok(()),
            _ => Err(StoreError::NotFound),
        }
    }

    /// Look up the cached header for `(cid, oid)`, falling back to the
    /// striped map and caching the result. A cache entry marked deleted
    /// reads as missing.
    pub fn lookup_cached_header(
        &mut self,
        cid: &CollectionId,
        oid: &ObjectId,
        create_if_missing: bool,
    ) -> StoreResult<HeaderKey> {
        self.check_coll(cid)?;

        let key = (cid.clone(), oid.clone());
        if let Some(header) = self.headers.get(&key) {
            if header.deleted {
                return Err(StoreError::NotFound);
            }
            return Ok(key);
        }

        let header = match self.store.backend.lookup_strip_header(cid, oid)? {
            Some(header) => header,
            None if create_if_missing => {
                self.store.backend.create_strip_header(cid, oid, &mut self.txn)?
            }
            None => return Err(StoreError::NotFound),
        };
        self.headers.insert(key.clone(), header);
        Ok(key)
    }

    pub fn header(&self, key: &HeaderKey) -> &StripObjectHeader {
        self.headers.get(key).expect("header not cached")
    }

    pub fn header_mut(&mut self, key: &HeaderKey) -> &mut StripObjectHeader {
        self.headers.get_mut(key).expect("header not cached")
    }

    /// The cache entry for `(cid, oid)`, if any, deleted or not. Read paths
    /// use this without populating the cache.
    pub fn cached_header(&self, cid: &CollectionId, oid: &ObjectId) -> Option<&StripObjectHeader> {
        self.headers.get(&(cid.clone(), oid.clone()))
    }

    /// Iterate every cached header with its key.
    pub fn cached_headers(&self) -> impl Iterator<Item = (&HeaderKey, &StripObjectHeader)> {
        self.headers.iter()
    }

    pub fn contains_header(&self, key: &HeaderKey) -> bool {
        self.headers.contains_key(key)
    }

    /// Read one key with read-your-writes semantics: the batch's staged
    /// value when present, the backend otherwise.
    pub fn get_buffer_key(&self, key: &HeaderKey, prefix: &str, name: &str) -> StoreResult<Vec<u8>> {
        let header = self.headers.get(key).expect("header not cached");
        if let Some(value) = header.buffers.get(&(prefix.to_string(), name.to_string())) {
            return Ok(value.clone());
        }
        let mut wanted = BTreeSet::new();
        wanted.insert(name.to_string());
        let mut out = self.store.backend.generic().get_values(&header.record, prefix, &wanted)?;
        out.remove(name).ok_or(StoreError::NotFound)
    }

    /// Stage writes into both the backend transaction and the header's
    /// read-your-writes cache.
    pub fn set_buffer_keys(
        &mut self,
        key: &HeaderKey,
        prefix: &str,
        values: BTreeMap<String, Vec<u8>>,
    ) -> StoreResult<()> {
        let spos = self.spos;
        let header = self.headers.get_mut(key).expect("header not cached");
        if check_spos(header, &spos) {
            return Ok(());
        }
        self.store.backend.generic().set_keys(&header.record, prefix, &values, &mut self.txn);
        for (name, value) in values {
            header.buffers.insert((prefix.to_string(), name), value);
        }
        Ok(())
    }

    /// Stage deletes. An empty value in `buffers` stands for the staged
    /// delete, so later reads in this batch see absence without touching
    /// the backend.
    pub fn remove_buffer_keys(
        &mut self,
        key: &HeaderKey,
        prefix: &str,
        names: BTreeSet<String>,
    ) -> StoreResult<()> {
        let spos = self.spos;
        let header = self.headers.get_mut(key).expect("header not cached");
        if check_spos(header, &spos) {
            return Ok(());
        }
        self.store.backend.generic().rm_keys(&header.record, prefix, &names, &mut self.txn);
        for name in names {
            header.buffers.insert((prefix.to_string(), name), Vec::new());
        }
        Ok(())
    }

    /// Blank every staged value of one namespace in the read-your-writes
    /// cache.
    pub fn clear_buffer_keys(&mut self, key: &HeaderKey, prefix: &str) {
        let header = self.headers.get_mut(key).expect("header not cached");
        for ((p, _), value) in header.buffers.iter_mut() {
            if p.as_str() == prefix {
                value.clear();
            }
        }
    }

    /// Mark the header deleted and stage a recursive clear of its entire
    /// key subtree.
    pub fn clear_buffer(&mut self, key: &HeaderKey) -> StoreResult<()> {
        let spos = self.spos;
        let header = self.headers.get_mut(key).expect("header not cached");
        if check_spos(header, &spos) {
            return Ok(());
        }
        header.deleted = true;
        self.store.backend.generic().clear_header(&header.record, &mut self.txn)?;
        Ok(())
    }

    /// Clone within the batch: drop any stale cache entry for the target,
    /// clone at the map layer, and install both new headers.
    ///
    /// No header-level lock is taken: another sequencer can still observe
    /// the origin header while this batch is in flight.
    pub fn clone_buffer(
        &mut self,
        src_key: &HeaderKey,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<()> {
        let spos = self.spos;
        let src = self.headers.get(src_key).expect("header not cached");
        if check_spos(src, &spos) {
            return Ok(());
        }
        let src = src.clone();

        let dst_key = (cid.clone(), oid.clone());
        self.headers.remove(&dst_key);

        let (origin, target) = self.store.backend.clone_wrap(&src, cid, oid, &mut self.txn, &spos)?;
        self.headers.insert(src_key.clone(), origin);
        self.headers.insert(dst_key, target);
        Ok(())
    }

    /// Rename within the batch: rename at the map layer and re-key the
    /// cache entry.
    ///
    /// As with clone, the origin header stays observable by other
    /// sequencers until this batch commits.
    pub fn rename_buffer(
        &mut self,
        src_key: &HeaderKey,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<()> {
        let spos = self.spos;
        {
            let header = self.headers.get(src_key).expect("header not cached");
            if check_spos(header, &spos) {
                return Ok(());
            }
        }
        let mut header = self.headers.remove(src_key).expect("header not cached");
        self.store.backend.rename_wrap(&mut header, cid, oid, &mut self.txn, &spos);
        self.headers.insert((cid.clone(), oid.clone()), header);
        Ok(())
    }

    /// Flush: stamp and re-encode every live header that has not already
    /// reached this position, then submit the whole backend batch. The
    /// touched headers are held in-use across the submission.
    pub fn submit(mut self) -> StoreResult<()> {
        let spos = self.spos;
        for header in self.headers.values_mut() {
            if check_spos(header, &spos) || header.deleted {
                continue;
            }
            header.spos = Some(spos);
            self.store.backend.save_strip_header(header, &mut self.txn)?;
        }

        let seqs: Vec<u64> = self.headers.values().map(|h| h.record.seq).collect();
        let generic = self.store.backend.generic();
        generic.mark_in_use(&seqs);
        let result = generic.submit(self.txn);
        generic.release_in_use(&seqs);

        debug!(position = %spos, headers = seqs.len(), "buffered transaction submitted");
        result.map_err(Into::into)
    }
}
