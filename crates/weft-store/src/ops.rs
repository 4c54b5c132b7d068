//! Mutating object operations, invoked by the transaction interpreter.
//!
//! Shared shape: look up (or create) the cached header, then stage the
//! mutation through the buffered transaction's primitives. Missing headers
//! surface as [`StoreError::NotFound`] on non-creating operations.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use weft_objmap::{
    file_to_extents, strip_object_key, COLLECTION_ATTR, OBJECT_OMAP, OBJECT_OMAP_HEADER,
    OBJECT_OMAP_HEADER_KEY, OBJECT_STRIP_PREFIX, OBJECT_XATTR,
};
use weft_types::{CollectionId, ObjectId};

use crate::buffer::{BufferTransaction, HeaderKey};
use crate::error::{StoreError, StoreResult};
use crate::store::StoreInner;

impl StoreInner {
    fn coll_key(cid: &CollectionId) -> HeaderKey {
        (CollectionId::meta(), ObjectId::for_collection(cid))
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    pub(crate) fn op_touch(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        bt.lookup_cached_header(cid, oid, true)?;
        debug!(%cid, %oid, "touch");
        Ok(())
    }

    pub(crate) fn op_write(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        len: u64,
        data: &[u8],
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let hk = bt.lookup_cached_header(cid, oid, true)?;
        let len = len.min(data.len() as u64);

        let strip_size = bt.header(&hk).strip_size;
        {
            let header = bt.header_mut(&hk);
            if len + offset > header.max_size {
                header.max_size = len + offset;
                header.bits.resize(header.max_size / strip_size + 1);
            }
        }

        let extents = file_to_extents(offset, len, strip_size);
        let mut values = BTreeMap::new();
        let mut consumed = 0usize;
        for ext in &extents {
            let key = strip_object_key(ext.no);
            let chunk = &data[consumed..consumed + ext.len as usize];
            consumed += ext.len as usize;

            let lo = ext.offset as usize;
            let hi = (ext.offset + ext.len) as usize;
            let value = if bt.header(&hk).bits.get(ext.no) {
                if ext.offset == 0 && ext.len == strip_size {
                    chunk.to_vec()
                } else {
                    // partial overwrite of a present strip: read-modify-write
                    let mut old = bt.get_buffer_key(&hk, OBJECT_STRIP_PREFIX, &key)?;
                    if old.len() as u64 != strip_size {
                        return Err(StoreError::InvalidArgument(format!(
                            "strip {key} has length {} instead of {strip_size}",
                            old.len()
                        )));
                    }
                    old[lo..hi].copy_from_slice(chunk);
                    old
                }
            } else {
                let mut value = vec![0u8; strip_size as usize];
                value[lo..hi].copy_from_slice(chunk);
                value
            };
            debug_assert_eq!(value.len() as u64, strip_size);
            values.insert(key, value);
            bt.header_mut(&hk).bits.set(ext.no, true);
        }
        debug_assert_eq!(consumed as u64, len);

        bt.set_buffer_keys(&hk, OBJECT_STRIP_PREFIX, values)?;
        debug!(%cid, %oid, offset, len, "write");
        Ok(())
    }

    pub(crate) fn op_zero(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        len: u64,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let zeros = vec![0u8; len as usize];
        self.op_write(cid, oid, offset, len, &zeros, bt)
    }

    pub(crate) fn op_truncate(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        size: u64,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let hk = bt.lookup_cached_header(cid, oid, false)?;
        let (strip_size, max_size) = {
            let header = bt.header(&hk);
            (header.strip_size, header.max_size)
        };
        if max_size == size {
            return Ok(());
        }

        if max_size > size {
            let extents = file_to_extents(size, max_size - size, strip_size);
            let mut remaining = extents.as_slice();

            // a cut that lands mid-strip keeps the strip's head and
            // zero-fills the rest
            if let Some((first, rest)) = extents.split_first() {
                if first.offset != 0 {
                    remaining = rest;
                    if bt.header(&hk).bits.get(first.no) {
                        let key = strip_object_key(first.no);
                        let old = bt.get_buffer_key(&hk, OBJECT_STRIP_PREFIX, &key)?;
                        let mut value = old[..first.offset as usize].to_vec();
                        value.resize(strip_size as usize, 0);
                        let mut values = BTreeMap::new();
                        values.insert(key, value);
                        bt.set_buffer_keys(&hk, OBJECT_STRIP_PREFIX, values)?;
                    }
                }
            }

            let mut doomed = BTreeSet::new();
            for ext in remaining {
                if bt.header(&hk).bits.get(ext.no) {
                    doomed.insert(strip_object_key(ext.no));
                    bt.header_mut(&hk).bits.set(ext.no, false);
                }
            }
            if !doomed.is_empty() {
                bt.remove_buffer_keys(&hk, OBJECT_STRIP_PREFIX, doomed)?;
            }
        }

        let header = bt.header_mut(&hk);
        header.bits.resize(size / strip_size + 1);
        header.max_size = size;
        debug!(%cid, %oid, size, "truncate");
        Ok(())
    }

    pub(crate) fn op_remove(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let hk = bt.lookup_cached_header(cid, oid, false)?;
        bt.clear_buffer(&hk)?;
        self.debug_obj_on_delete(oid);
        debug!(%cid, %oid, "remove");
        Ok(())
    }

    pub(crate) fn op_clone(
        &self,
        cid: &CollectionId,
        src: &ObjectId,
        dst: &ObjectId,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        if src == dst {
            return Ok(());
        }
        let src_key = bt.lookup_cached_header(cid, src, false)?;
        bt.clone_buffer(&src_key, cid, dst)?;
        debug!(%cid, %src, %dst, "clone");
        Ok(())
    }

    pub(crate) fn op_clone_range(
        &self,
        cid: &CollectionId,
        src: &ObjectId,
        dst: &ObjectId,
        src_offset: u64,
        len: u64,
        dst_offset: u64,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let data = self.generic_read(cid, src, src_offset, len, Some(&*bt))?;
        self.op_write(cid, dst, dst_offset, data.len() as u64, &data, bt)
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub(crate) fn op_setattrs(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        attrs: BTreeMap<String, Vec<u8>>,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let hk = bt.lookup_cached_header(cid, oid, false)?;
        bt.set_buffer_keys(&hk, OBJECT_XATTR, attrs)
    }

    pub(crate) fn op_rmattr(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        name: &str,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let hk = bt.lookup_cached_header(cid, oid, false)?;
        let mut names = BTreeSet::new();
        names.insert(name.to_string());
        bt.remove_buffer_keys(&hk, OBJECT_XATTR, names)
    }

    pub(crate) fn op_rmattrs(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let hk = bt.lookup_cached_header(cid, oid, false)?;
        let names = self.backend.generic().get_keys(&bt.header(&hk).record, OBJECT_XATTR)?;
        bt.remove_buffer_keys(&hk, OBJECT_XATTR, names)?;
        bt.clear_buffer_keys(&hk, OBJECT_XATTR);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Omap
    // ------------------------------------------------------------------

    pub(crate) fn op_omap_clear(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let hk = bt.lookup_cached_header(cid, oid, false)?;
        let names = self.backend.generic().get_keys(&bt.header(&hk).record, OBJECT_OMAP)?;
        bt.remove_buffer_keys(&hk, OBJECT_OMAP, names)?;

        let mut header_key = BTreeSet::new();
        header_key.insert(OBJECT_OMAP_HEADER_KEY.to_string());
        bt.remove_buffer_keys(&hk, OBJECT_OMAP_HEADER, header_key)?;
        bt.clear_buffer_keys(&hk, OBJECT_OMAP_HEADER);
        Ok(())
    }

    pub(crate) fn op_omap_setkeys(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        keys: BTreeMap<String, Vec<u8>>,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let hk = bt.lookup_cached_header(cid, oid, false)?;
        bt.set_buffer_keys(&hk, OBJECT_OMAP, keys)
    }

    pub(crate) fn op_omap_rmkeys(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        keys: BTreeSet<String>,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let hk = bt.lookup_cached_header(cid, oid, false)?;
        bt.remove_buffer_keys(&hk, OBJECT_OMAP, keys)
    }

    pub(crate) fn op_omap_rmkeyrange(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        first: &str,
        last: &str,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let hk = bt.lookup_cached_header(cid, oid, false)?;
        let keys = self.backend.generic().get_keys_in_range(
            &bt.header(&hk).record,
            OBJECT_OMAP,
            first,
            last,
        )?;
        bt.remove_buffer_keys(&hk, OBJECT_OMAP, keys)
    }

    pub(crate) fn op_omap_setheader(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        data: Vec<u8>,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let hk = bt.lookup_cached_header(cid, oid, false)?;
        let mut values = BTreeMap::new();
        values.insert(OBJECT_OMAP_HEADER_KEY.to_string(), data);
        bt.set_buffer_keys(&hk, OBJECT_OMAP_HEADER, values)
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    pub(crate) fn op_create_collection(
        &self,
        cid: &CollectionId,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let key = Self::coll_key(cid);
        match bt.lookup_cached_header(&key.0, &key.1, false) {
            Ok(_) => return Err(StoreError::AlreadyExists),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }
        bt.lookup_cached_header(&key.0, &key.1, true)?;
        debug!(%cid, "create collection");
        Ok(())
    }

    pub(crate) fn op_destroy_collection(
        &self,
        cid: &CollectionId,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let key = Self::coll_key(cid);
        let hk = bt.lookup_cached_header(&key.0, &key.1, false)?;

        // every header this batch touched in the collection must be deleted
        let mut modified = 0usize;
        for ((hcid, _), header) in bt.cached_headers() {
            if hcid != cid {
                continue;
            }
            modified += 1;
            if !header.deleted {
                return Err(StoreError::NotEmpty);
            }
        }

        // and the backend must not know any object this batch did not delete
        let (oids, _) = self.backend.generic().list_objects(cid, None, modified + 1)?;
        for oid in &oids {
            if !bt.contains_header(&(cid.clone(), oid.clone())) {
                return Err(StoreError::NotEmpty);
            }
        }

        bt.clear_buffer(&hk)?;
        debug!(%cid, "destroy collection");
        Ok(())
    }

    /// Copy semantics: the object's bytes are read from the source
    /// collection and written into the destination.
    pub(crate) fn op_collection_add(
        &self,
        dst_cid: &CollectionId,
        src_cid: &CollectionId,
        oid: &ObjectId,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let src_key = bt.lookup_cached_header(src_cid, oid, false)?;
        match bt.lookup_cached_header(dst_cid, oid, false) {
            Ok(_) => return Err(StoreError::AlreadyExists),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let max_size = bt.header(&src_key).max_size;
        let data = self
            .generic_read(src_cid, oid, 0, max_size, Some(&*bt))
            .map_err(|e| StoreError::InvalidArgument(format!("collection add read: {e}")))?;
        self.op_write(dst_cid, oid, 0, data.len() as u64, &data, bt)
            .map_err(|e| StoreError::InvalidArgument(format!("collection add write: {e}")))?;
        debug!(%src_cid, %dst_cid, %oid, "collection add");
        Ok(())
    }

    pub(crate) fn op_collection_move_rename(
        &self,
        src_cid: &CollectionId,
        src_oid: &ObjectId,
        dst_cid: &CollectionId,
        dst_oid: &ObjectId,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        match bt.lookup_cached_header(dst_cid, dst_oid, false) {
            Ok(_) => return Err(StoreError::AlreadyExists),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }
        let src_key = bt.lookup_cached_header(src_cid, src_oid, false)?;
        bt.rename_buffer(&src_key, dst_cid, dst_oid)?;
        debug!(%src_cid, %src_oid, %dst_cid, %dst_oid, "collection move rename");
        Ok(())
    }

    pub(crate) fn op_collection_setattr(
        &self,
        cid: &CollectionId,
        name: &str,
        value: Vec<u8>,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let key = Self::coll_key(cid);
        let hk = bt.lookup_cached_header(&key.0, &key.1, false)?;
        let mut values = BTreeMap::new();
        values.insert(name.to_string(), value);
        bt.set_buffer_keys(&hk, COLLECTION_ATTR, values)
    }

    pub(crate) fn op_collection_rmattr(
        &self,
        cid: &CollectionId,
        name: &str,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let key = Self::coll_key(cid);
        let hk = bt.lookup_cached_header(&key.0, &key.1, false)?;
        let mut names = BTreeSet::new();
        names.insert(name.to_string());
        bt.remove_buffer_keys(&hk, COLLECTION_ATTR, names)
    }

    /// Move every object whose hash matches `(bits, rem)` from `cid` to
    /// `dst`, paginating through the collection. A missing source or
    /// destination makes this a replay no-op.
    pub(crate) fn op_split_collection(
        &self,
        cid: &CollectionId,
        bits: u32,
        rem: u32,
        dst: &CollectionId,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let src_coll = Self::coll_key(cid);
        if bt.lookup_cached_header(&src_coll.0, &src_coll.1, false).is_err() {
            debug!(%cid, "split source missing; nothing to do");
            return Ok(());
        }
        let dst_coll = Self::coll_key(dst);
        if bt.lookup_cached_header(&dst_coll.0, &dst_coll.1, false).is_err() {
            debug!(%dst, "split destination missing; nothing to do");
            return Ok(());
        }

        let mut moved = 0u64;
        let mut current: Option<ObjectId> = None;
        loop {
            let (objects, next) =
                self.backend
                    .generic()
                    .list_objects(cid, current.as_ref(), self.config.ideal_list_max)?;
            if objects.is_empty() {
                break;
            }
            for oid in &objects {
                if oid.matches_split(bits, rem) {
                    self.op_collection_add(dst, cid, oid, bt)?;
                    self.op_remove(cid, oid, bt)?;
                    moved += 1;
                }
            }
            match next {
                Some(next) => current = Some(next),
                None => break,
            }
        }
        debug!(%cid, %dst, bits, rem, moved, "split collection");

        if self.config.debug_verify_split {
            self.verify_split(cid, bits, rem, dst, bt)?;
        }
        Ok(())
    }

    /// Re-scan both collections asserting the hash partition. Failure is a
    /// fatal inconsistency.
    fn verify_split(
        &self,
        cid: &CollectionId,
        bits: u32,
        rem: u32,
        dst: &CollectionId,
        bt: &BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let survivors = |coll: &CollectionId| -> StoreResult<Vec<ObjectId>> {
            // the backend still lists objects this batch has removed
            let (oids, _) = self.backend.generic().list_objects(coll, None, 0)?;
            Ok(oids
                .into_iter()
                .filter(|oid| {
                    bt.cached_header(coll, oid).map_or(true, |header| !header.deleted)
                })
                .collect())
        };
        for oid in survivors(cid)? {
            if oid.matches_split(bits, rem) {
                return Err(StoreError::InvalidArgument(format!(
                    "split verify: {oid} still in source {cid}"
                )));
            }
        }
        for oid in survivors(dst)? {
            if !oid.matches_split(bits, rem) {
                return Err(StoreError::InvalidArgument(format!(
                    "split verify: {oid} landed in destination {dst}"
                )));
            }
        }
        Ok(())
    }

    /// Remove every object of the collection, then the collection itself.
    /// Pages through the backend listing the way split does.
    pub(crate) fn op_collection_remove_recursive(
        &self,
        cid: &CollectionId,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        let key = Self::coll_key(cid);
        let hk = match bt.lookup_cached_header(&key.0, &key.1, false) {
            Ok(hk) => hk,
            Err(StoreError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut current: Option<ObjectId> = None;
        loop {
            let (objects, next) =
                self.backend
                    .generic()
                    .list_objects(cid, current.as_ref(), self.config.ideal_list_max)?;
            if objects.is_empty() {
                break;
            }
            for oid in &objects {
                match self.op_remove(cid, oid, bt) {
                    Ok(()) | Err(StoreError::NotFound) => {}
                    Err(e) => return Err(e),
                }
            }
            match next {
                Some(next) => current = Some(next),
                None => break,
            }
        }

        bt.clear_buffer(&hk)?;
        debug!(%cid, "collection removed recursively");
        Ok(())
    }
}
