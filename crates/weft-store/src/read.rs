//! Read paths. These never stage mutations; a read performed inside a
//! buffered transaction honors the batch's staged strip values.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use weft_objmap::{
    file_to_extents, strip_object_key, StripObjectHeader, COLLECTION_ATTR, OBJECT_OMAP,
    OBJECT_OMAP_HEADER, OBJECT_OMAP_HEADER_KEY, OBJECT_STRIP_PREFIX, OBJECT_XATTR,
};
use weft_types::{CollectionId, ObjectId};

use crate::buffer::BufferTransaction;
use crate::error::{StoreError, StoreResult};
use crate::store::StoreInner;

/// Object metadata returned by [`Store::stat`](crate::Store::stat).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stat {
    /// Logical object size in bytes.
    pub size: u64,
    /// Number of strips covering the object.
    pub blocks: u64,
    /// Strip size in bytes.
    pub block_size: u64,
}

impl StoreInner {
    /// Collection existence against the backend only. The meta collection
    /// always exists.
    pub(crate) fn check_coll_db(&self, cid: &CollectionId) -> StoreResult<()> {
        if cid.is_meta() {
            return Ok(());
        }
        let pseudo = ObjectId::for_collection(cid);
        match self.backend.lookup_strip_header(&CollectionId::meta(), &pseudo)? {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound),
        }
    }

    pub(crate) fn exists(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<bool> {
        self.check_coll_db(cid)?;
        Ok(self.backend.lookup_strip_header(cid, oid)?.is_some())
    }

    pub(crate) fn stat(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<Stat> {
        if self.debug_mdata_eio(oid) {
            return Err(injected_eio());
        }
        self.check_coll_db(cid)?;
        let header = self
            .backend
            .lookup_strip_header(cid, oid)?
            .ok_or(StoreError::NotFound)?;
        Ok(Stat {
            size: header.max_size,
            blocks: header.strip_count(),
            block_size: header.strip_size,
        })
    }

    /// Read `[offset, offset + len)`, clamped to the object's length.
    /// A `len` of zero reads to end-of-object; an `offset` past the end is
    /// an error. Sparse strips read as zeros. When `bt` is given, values
    /// staged by that batch win over the backend.
    pub(crate) fn generic_read(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        len: u64,
        bt: Option<&BufferTransaction<'_>>,
    ) -> StoreResult<Vec<u8>> {
        self.check_coll_db(cid).or_else(|e| {
            // the batch may have created the collection
            match bt {
                Some(bt) => bt.check_coll(cid),
                None => Err(e),
            }
        })?;

        let cached = bt.and_then(|bt| bt.cached_header(cid, oid));
        let fetched;
        let header: &StripObjectHeader = match cached {
            Some(header) if header.deleted => return Err(StoreError::NotFound),
            Some(header) => header,
            None => {
                fetched = self
                    .backend
                    .lookup_strip_header(cid, oid)?
                    .ok_or(StoreError::NotFound)?;
                &fetched
            }
        };

        if offset > header.max_size {
            return Err(StoreError::InvalidArgument(format!(
                "read at {offset} past object length {}",
                header.max_size
            )));
        }
        let len = if len == 0 {
            header.max_size - offset
        } else {
            len.min(header.max_size - offset)
        };

        let extents = file_to_extents(offset, len, header.strip_size);
        let mut staged: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut wanted = BTreeSet::new();
        for ext in &extents {
            if !header.bits.get(ext.no) {
                continue;
            }
            let key = strip_object_key(ext.no);
            match header.buffers.get(&(OBJECT_STRIP_PREFIX.to_string(), key.clone())) {
                Some(value) if !value.is_empty() => {
                    staged.insert(key, value.clone());
                }
                _ => {
                    wanted.insert(key);
                }
            }
        }

        let fetched_values = self
            .backend
            .generic()
            .get_values(&header.record, OBJECT_STRIP_PREFIX, &wanted)?;
        if fetched_values.len() != wanted.len() {
            return Err(StoreError::InvalidArgument(
                "strip data missing for present bits".to_string(),
            ));
        }
        staged.extend(fetched_values);

        let mut data = Vec::with_capacity(len as usize);
        for ext in &extents {
            match staged.get(&strip_object_key(ext.no)) {
                Some(value) => {
                    data.extend_from_slice(&value[ext.offset as usize..(ext.offset + ext.len) as usize])
                }
                None => data.resize(data.len() + ext.len as usize, 0),
            }
        }
        debug_assert_eq!(data.len() as u64, len);
        debug!(%cid, %oid, offset, len, "read");
        Ok(data)
    }

    pub(crate) fn read(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        len: u64,
    ) -> StoreResult<Vec<u8>> {
        if self.debug_data_eio(oid) {
            return Err(injected_eio());
        }
        self.generic_read(cid, oid, offset, len, None)
    }

    /// Extent map of `[offset, offset + len)`: intra-object offset to
    /// length, one entry per strip-sized piece.
    pub(crate) fn extent_map(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        offset: u64,
        len: u64,
    ) -> StoreResult<BTreeMap<u64, u64>> {
        self.check_coll_db(cid)?;
        let header = self
            .backend
            .lookup_strip_header(cid, oid)?
            .ok_or(StoreError::NotFound)?;
        let mut map = BTreeMap::new();
        for ext in file_to_extents(offset, len, header.strip_size) {
            map.insert(ext.offset, ext.len);
        }
        Ok(map)
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    fn lookup_object(&self, cid: &CollectionId, oid: &ObjectId) -> StoreResult<StripObjectHeader> {
        self.check_coll_db(cid)?;
        self.backend
            .lookup_strip_header(cid, oid)?
            .ok_or(StoreError::NotFound)
    }

    pub(crate) fn getattr(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        name: &str,
    ) -> StoreResult<Vec<u8>> {
        if self.debug_mdata_eio(oid) {
            return Err(injected_eio());
        }
        let header = self.lookup_object(cid, oid)?;
        let mut wanted = BTreeSet::new();
        wanted.insert(name.to_string());
        let mut got = self.backend.generic().get_values(&header.record, OBJECT_XATTR, &wanted)?;
        got.remove(name).ok_or(StoreError::NotFound)
    }

    pub(crate) fn getattrs(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        if self.debug_mdata_eio(oid) {
            return Err(injected_eio());
        }
        let header = self.lookup_object(cid, oid)?;
        Ok(self.backend.generic().get_all(&header.record, OBJECT_XATTR)?)
    }

    pub(crate) fn collection_getattr(&self, cid: &CollectionId, name: &str) -> StoreResult<Vec<u8>> {
        self.check_coll_db(cid)?;
        let pseudo = ObjectId::for_collection(cid);
        let header = self.lookup_object(&CollectionId::meta(), &pseudo)?;
        let mut wanted = BTreeSet::new();
        wanted.insert(name.to_string());
        let mut got = self
            .backend
            .generic()
            .get_values(&header.record, COLLECTION_ATTR, &wanted)?;
        got.remove(name).ok_or(StoreError::NotFound)
    }

    pub(crate) fn collection_getattrs(
        &self,
        cid: &CollectionId,
    ) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        self.check_coll_db(cid)?;
        let pseudo = ObjectId::for_collection(cid);
        let header = self.lookup_object(&CollectionId::meta(), &pseudo)?;
        Ok(self.backend.generic().get_all(&header.record, COLLECTION_ATTR)?)
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    pub(crate) fn list_collections(&self) -> StoreResult<Vec<CollectionId>> {
        let (oids, _) = self.backend.generic().list_objects(&CollectionId::meta(), None, 0)?;
        Ok(oids.into_iter().map(|oid| CollectionId::new(oid.name)).collect())
    }

    pub(crate) fn collection_exists(&self, cid: &CollectionId) -> bool {
        self.check_coll_db(cid).is_ok()
    }

    pub(crate) fn collection_empty(&self, cid: &CollectionId) -> StoreResult<bool> {
        self.check_coll_db(cid)?;
        let (oids, _) = self.backend.generic().list_objects(cid, None, 1)?;
        Ok(oids.is_empty())
    }

    pub(crate) fn collection_list(&self, cid: &CollectionId) -> StoreResult<Vec<ObjectId>> {
        self.check_coll_db(cid)?;
        let (oids, _) = self.backend.generic().list_objects(cid, None, 0)?;
        Ok(oids)
    }

    pub(crate) fn collection_list_partial(
        &self,
        cid: &CollectionId,
        start: Option<&ObjectId>,
        max: usize,
    ) -> StoreResult<(Vec<ObjectId>, Option<ObjectId>)> {
        self.check_coll_db(cid)?;
        Ok(self.backend.generic().list_objects(cid, start, max)?)
    }

    /// Objects in `[start, end)`, paginated internally between the
    /// configured listing bounds.
    pub(crate) fn collection_list_range(
        &self,
        cid: &CollectionId,
        start: Option<&ObjectId>,
        end: &ObjectId,
    ) -> StoreResult<Vec<ObjectId>> {
        self.check_coll_db(cid)?;
        let mut out = Vec::new();
        let mut current = start.cloned();
        loop {
            let (page, next) =
                self.backend
                    .generic()
                    .list_objects(cid, current.as_ref(), self.config.ideal_list_max)?;
            if page.is_empty() {
                break;
            }
            for oid in page {
                if oid >= *end {
                    return Ok(out);
                }
                out.push(oid);
            }
            match next {
                Some(next) if next < *end => current = Some(next),
                _ => break,
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Omap
    // ------------------------------------------------------------------

    pub(crate) fn omap_get(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<(Option<Vec<u8>>, BTreeMap<String, Vec<u8>>)> {
        let keys = self.omap_get_all(cid, oid)?;
        let header = self.omap_get_header(cid, oid)?;
        Ok((header, keys))
    }

    fn omap_get_all(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let header = self.lookup_object(cid, oid)?;
        Ok(self.backend.generic().get_all(&header.record, OBJECT_OMAP)?)
    }

    pub(crate) fn omap_get_header(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<Option<Vec<u8>>> {
        let header = self.lookup_object(cid, oid)?;
        let mut wanted = BTreeSet::new();
        wanted.insert(OBJECT_OMAP_HEADER_KEY.to_string());
        let mut got = self
            .backend
            .generic()
            .get_values(&header.record, OBJECT_OMAP_HEADER, &wanted)?;
        Ok(got.remove(OBJECT_OMAP_HEADER_KEY))
    }

    pub(crate) fn omap_get_keys(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> StoreResult<BTreeSet<String>> {
        let header = self.lookup_object(cid, oid)?;
        Ok(self.backend.generic().get_keys(&header.record, OBJECT_OMAP)?)
    }

    pub(crate) fn omap_get_values(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        keys: &BTreeSet<String>,
    ) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let header = self.lookup_object(cid, oid)?;
        Ok(self.backend.generic().get_values(&header.record, OBJECT_OMAP, keys)?)
    }

    pub(crate) fn omap_check_keys(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        keys: &BTreeSet<String>,
    ) -> StoreResult<BTreeSet<String>> {
        let header = self.lookup_object(cid, oid)?;
        Ok(self.backend.generic().check_keys(&header.record, OBJECT_OMAP, keys)?)
    }
}

fn injected_eio() -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "injected read error",
    ))
}
