use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_kvdb::KeyValueDb;
use weft_types::{CollectionId, ObjectId, SequencerPosition};

use crate::error::MapResult;
use crate::generic::{GenericObjectMap, HeaderRecord, MapTransaction};
use crate::Bitmap;

/// Namespace prefix of strip data keys.
pub const OBJECT_STRIP_PREFIX: &str = "_STRIP_";
/// Namespace prefix of extended attributes.
pub const OBJECT_XATTR: &str = "__OBJATTR__";
/// Namespace prefix of the per-object sorted key/value map.
pub const OBJECT_OMAP: &str = "__OBJOMAP__";
/// Namespace prefix of the omap header blob.
pub const OBJECT_OMAP_HEADER: &str = "__OBJOMAP_HEADER__";
/// The single key under [`OBJECT_OMAP_HEADER`] holding the omap header.
pub const OBJECT_OMAP_HEADER_KEY: &str = "__OBJOMAP_HEADER__KEY_";
/// Namespace prefix of collection-level attributes (on the pseudo-object).
pub const COLLECTION_ATTR: &str = "__COLL_ATTR__";

/// Strip data key for strip `no`: fixed-width decimal so lexicographic
/// order equals numeric order.
pub fn strip_object_key(no: u64) -> String {
    format!("{no:020}")
}

/// One piece of a byte range, tiled onto a single strip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StripExtent {
    /// Strip number.
    pub no: u64,
    /// Offset within the strip.
    pub offset: u64,
    /// Length within the strip; `offset + len <= strip_size`.
    pub len: u64,
}

/// Tile the byte range `[offset, offset + len)` onto strips of `strip_size`.
///
/// Emits a leading partial extent when `offset` is unaligned, one full
/// extent per fully covered strip, and a trailing partial extent when the
/// range's end is unaligned. The emitted lengths sum to `len`.
pub fn file_to_extents(offset: u64, len: u64, strip_size: u64) -> Vec<StripExtent> {
    let mut extents = Vec::new();
    if len == 0 {
        return extents;
    }

    let mut start = offset / strip_size;
    let end = (offset + len) / strip_size;
    let mut strip_offset = start * strip_size;

    // the range may begin in the middle of the first strip
    if offset > strip_offset {
        let extent_offset = offset - strip_offset;
        let extent_len = if extent_offset + len <= strip_size {
            len
        } else {
            strip_size - extent_offset
        };
        extents.push(StripExtent {
            no: start,
            offset: extent_offset,
            len: extent_len,
        });
        start += 1;
        strip_offset += strip_size;
    }

    while start < end {
        extents.push(StripExtent {
            no: start,
            offset: 0,
            len: strip_size,
        });
        start += 1;
        strip_offset += strip_size;
    }

    // the end of the range may be partial
    if offset + len > strip_offset {
        extents.push(StripExtent {
            no: start,
            offset: 0,
            len: offset + len - strip_offset,
        });
    }

    extents
}

/// Per-object metadata record of the striped map.
///
/// The persisted part is `(strip_size, max_size, bits, spos)`; everything
/// else is in-memory state for the batch currently holding the header.
/// `buffers` is the read-your-writes cache: values staged by the current
/// batch, keyed by `(prefix, key)`, with an empty value standing for a
/// staged delete.
#[derive(Clone, Debug)]
pub struct StripObjectHeader {
    pub cid: CollectionId,
    pub oid: ObjectId,
    /// Size of each strip in bytes. Immutable once the header exists.
    pub strip_size: u64,
    /// Logical object length in bytes.
    pub max_size: u64,
    /// Bit `n` set iff strip `n` has ever been written.
    pub bits: Bitmap,
    /// Position of the most recent mutation reflected by this header.
    pub spos: Option<SequencerPosition>,
    /// Set inside a buffered transaction once the object is cleared.
    pub deleted: bool,
    /// Read-your-writes cache for the owning batch.
    pub buffers: BTreeMap<(String, String), Vec<u8>>,
    /// The generic-map record this header wraps.
    pub record: HeaderRecord,
}

impl StripObjectHeader {
    /// Number of strips needed to cover `max_size`.
    pub fn strip_count(&self) -> u64 {
        self.max_size.div_ceil(self.strip_size)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StripHeaderDisk {
    strip_size: u64,
    max_size: u64,
    bits: Bitmap,
    spos: Option<SequencerPosition>,
}

/// Idempotency gate: returns `true` (skip the mutation) iff the header
/// already reflects a position at or past `spos`. A header that has never
/// been positioned is always mutated.
pub fn check_spos(header: &StripObjectHeader, spos: &SequencerPosition) -> bool {
    match header.spos {
        Some(stamped) => *spos <= stamped,
        None => false,
    }
}

/// The striped object map: strip headers plus their key subtrees, layered
/// on the generic object map.
pub struct StripObjectMap {
    generic: GenericObjectMap,
    default_strip_size: u64,
}

impl StripObjectMap {
    /// Open the striped map over `db`. Headers whose persisted strip size is
    /// zero are given `default_strip_size` at load.
    pub fn new(db: Arc<dyn KeyValueDb>, default_strip_size: u64) -> MapResult<Self> {
        assert!(default_strip_size > 0, "strip size must be positive");
        Ok(Self {
            generic: GenericObjectMap::new(db)?,
            default_strip_size,
        })
    }

    pub fn generic(&self) -> &GenericObjectMap {
        &self.generic
    }

    pub fn default_strip_size(&self) -> u64 {
        self.default_strip_size
    }

    fn decode(&self, record: HeaderRecord) -> MapResult<StripObjectHeader> {
        let disk: StripHeaderDisk = if record.data.is_empty() {
            StripHeaderDisk::default()
        } else {
            bincode::deserialize(&record.data)?
        };
        let strip_size = if disk.strip_size == 0 {
            self.default_strip_size
        } else {
            disk.strip_size
        };
        Ok(StripObjectHeader {
            cid: record.cid.clone(),
            oid: record.oid.clone(),
            strip_size,
            max_size: disk.max_size,
            bits: disk.bits,
            spos: disk.spos,
            deleted: false,
            buffers: BTreeMap::new(),
            record,
        })
    }

    /// Look up the strip header for `(cid, oid)`.
    pub fn lookup_strip_header(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
    ) -> MapResult<Option<StripObjectHeader>> {
        match self.generic.lookup_header(cid, oid)? {
            Some(record) => Ok(Some(self.decode(record)?)),
            None => Ok(None),
        }
    }

    /// Look up or create the strip header for `(cid, oid)`. Idempotent: an
    /// existing header is returned as-is; a fresh one starts empty with the
    /// store's default strip size.
    pub fn create_strip_header(
        &self,
        cid: &CollectionId,
        oid: &ObjectId,
        txn: &mut MapTransaction,
    ) -> MapResult<StripObjectHeader> {
        let record = self.generic.lookup_create_header(cid, oid, txn)?;
        self.decode(record)
    }

    /// Re-encode the header's persisted part and stage it into `txn`.
    pub fn save_strip_header(
        &self,
        header: &mut StripObjectHeader,
        txn: &mut MapTransaction,
    ) -> MapResult<()> {
        let disk = StripHeaderDisk {
            strip_size: header.strip_size,
            max_size: header.max_size,
            bits: header.bits.clone(),
            spos: header.spos,
        };
        header.record.data = bincode::serialize(&disk)?;
        self.generic.set_header(&header.record, txn);
        Ok(())
    }

    /// Clone-on-write at the generic layer, then propagate identity and
    /// position into two new header values. The caller replaces its old
    /// header reference with the returned origin.
    pub fn clone_wrap(
        &self,
        old: &StripObjectHeader,
        cid: &CollectionId,
        oid: &ObjectId,
        txn: &mut MapTransaction,
        spos: &SequencerPosition,
    ) -> MapResult<(StripObjectHeader, StripObjectHeader)> {
        let (origin_rec, target_rec) = self.generic.clone_header(&old.record, cid, oid, txn)?;
        let origin = StripObjectHeader {
            cid: old.cid.clone(),
            oid: old.oid.clone(),
            strip_size: old.strip_size,
            max_size: old.max_size,
            bits: old.bits.clone(),
            spos: Some(*spos),
            deleted: false,
            buffers: old.buffers.clone(),
            record: origin_rec,
        };
        let target = StripObjectHeader {
            cid: cid.clone(),
            oid: oid.clone(),
            strip_size: old.strip_size,
            max_size: old.max_size,
            bits: old.bits.clone(),
            spos: Some(*spos),
            deleted: false,
            buffers: old.buffers.clone(),
            record: target_rec,
        };
        debug!(src = %old.oid, dst = %oid, "clone_wrap");
        Ok((origin, target))
    }

    /// Rename at the generic layer and update the header's identity and
    /// position in place.
    pub fn rename_wrap(
        &self,
        header: &mut StripObjectHeader,
        cid: &CollectionId,
        oid: &ObjectId,
        txn: &mut MapTransaction,
        spos: &SequencerPosition,
    ) {
        self.generic.rename_header(&mut header.record, cid, oid, txn);
        header.cid = cid.clone();
        header.oid = oid.clone();
        header.spos = Some(*spos);
    }
}
