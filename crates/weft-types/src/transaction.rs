use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::coll::CollectionId;
use crate::object::ObjectId;

/// One typed operation inside a [`Transaction`].
///
/// The variant set mirrors the engine's wire-level op tags. Deprecated tags
/// are kept so old journals can still be replayed; the builder methods on
/// [`Transaction`] never emit them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionOp {
    Nop,
    Touch {
        cid: CollectionId,
        oid: ObjectId,
    },
    Write {
        cid: CollectionId,
        oid: ObjectId,
        offset: u64,
        len: u64,
        data: Vec<u8>,
    },
    Zero {
        cid: CollectionId,
        oid: ObjectId,
        offset: u64,
        len: u64,
    },
    Truncate {
        cid: CollectionId,
        oid: ObjectId,
        size: u64,
    },
    Remove {
        cid: CollectionId,
        oid: ObjectId,
    },
    SetAttr {
        cid: CollectionId,
        oid: ObjectId,
        name: String,
        value: Vec<u8>,
    },
    SetAttrs {
        cid: CollectionId,
        oid: ObjectId,
        attrs: BTreeMap<String, Vec<u8>>,
    },
    RmAttr {
        cid: CollectionId,
        oid: ObjectId,
        name: String,
    },
    RmAttrs {
        cid: CollectionId,
        oid: ObjectId,
    },
    Clone {
        cid: CollectionId,
        src: ObjectId,
        dst: ObjectId,
    },
    /// Legacy range clone: destination offset equals source offset.
    CloneRange {
        cid: CollectionId,
        src: ObjectId,
        dst: ObjectId,
        offset: u64,
        len: u64,
    },
    CloneRange2 {
        cid: CollectionId,
        src: ObjectId,
        dst: ObjectId,
        src_offset: u64,
        len: u64,
        dst_offset: u64,
    },
    CreateCollection {
        cid: CollectionId,
    },
    RemoveCollection {
        cid: CollectionId,
    },
    CollectionAdd {
        dst_cid: CollectionId,
        src_cid: CollectionId,
        oid: ObjectId,
    },
    CollectionRemove {
        cid: CollectionId,
        oid: ObjectId,
    },
    /// Deprecated and buggy; present only so old journals replay. Note the
    /// operand order: the object is added back to the *source* collection
    /// and then removed from it, which is the historical (broken) behavior.
    CollectionMove {
        src_cid: CollectionId,
        dst_cid: CollectionId,
        oid: ObjectId,
    },
    CollectionMoveRename {
        src_cid: CollectionId,
        src_oid: ObjectId,
        dst_cid: CollectionId,
        dst_oid: ObjectId,
    },
    CollectionSetAttr {
        cid: CollectionId,
        name: String,
        value: Vec<u8>,
    },
    CollectionRmAttr {
        cid: CollectionId,
        name: String,
    },
    StartSync,
    /// Unsupported; applying it is an error.
    CollectionRename {
        cid: CollectionId,
        new_cid: CollectionId,
    },
    OmapClear {
        cid: CollectionId,
        oid: ObjectId,
    },
    OmapSetKeys {
        cid: CollectionId,
        oid: ObjectId,
        keys: BTreeMap<String, Vec<u8>>,
    },
    OmapRmKeys {
        cid: CollectionId,
        oid: ObjectId,
        keys: BTreeSet<String>,
    },
    OmapRmKeyRange {
        cid: CollectionId,
        oid: ObjectId,
        first: String,
        last: String,
    },
    OmapSetHeader {
        cid: CollectionId,
        oid: ObjectId,
        data: Vec<u8>,
    },
    /// Deprecated alias of [`TransactionOp::SplitCollection2`]; replay only.
    SplitCollection {
        cid: CollectionId,
        bits: u32,
        rem: u32,
        dst: CollectionId,
    },
    SplitCollection2 {
        cid: CollectionId,
        bits: u32,
        rem: u32,
        dst: CollectionId,
    },
}

impl TransactionOp {
    /// Payload bytes carried by this operation.
    pub fn num_bytes(&self) -> u64 {
        match self {
            TransactionOp::Write { data, .. } | TransactionOp::OmapSetHeader { data, .. } => {
                data.len() as u64
            }
            TransactionOp::Zero { len, .. } => *len,
            TransactionOp::SetAttr { value, .. } | TransactionOp::CollectionSetAttr { value, .. } => {
                value.len() as u64
            }
            TransactionOp::SetAttrs { attrs, .. } | TransactionOp::OmapSetKeys { keys: attrs, .. } => {
                attrs.values().map(|v| v.len() as u64).sum()
            }
            _ => 0,
        }
    }
}

/// An ordered list of typed operations, applied atomically with respect to
/// the underlying key/value database and in submit order with respect to
/// its sequencer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    ops: Vec<TransactionOp>,
}

impl Transaction {
    /// Create an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// The ordered operations.
    pub fn ops(&self) -> &[TransactionOp] {
        &self.ops
    }

    /// Number of operations.
    pub fn num_ops(&self) -> u64 {
        self.ops.len() as u64
    }

    /// Total payload bytes across all operations.
    pub fn num_bytes(&self) -> u64 {
        self.ops.iter().map(TransactionOp::num_bytes).sum()
    }

    /// Append a raw operation. Used by replay; prefer the typed builders.
    pub fn push(&mut self, op: TransactionOp) {
        self.ops.push(op);
    }

    pub fn nop(&mut self) {
        self.ops.push(TransactionOp::Nop);
    }

    pub fn touch(&mut self, cid: CollectionId, oid: ObjectId) {
        self.ops.push(TransactionOp::Touch { cid, oid });
    }

    pub fn write(&mut self, cid: CollectionId, oid: ObjectId, offset: u64, data: Vec<u8>) {
        let len = data.len() as u64;
        self.ops.push(TransactionOp::Write {
            cid,
            oid,
            offset,
            len,
            data,
        });
    }

    pub fn zero(&mut self, cid: CollectionId, oid: ObjectId, offset: u64, len: u64) {
        self.ops.push(TransactionOp::Zero {
            cid,
            oid,
            offset,
            len,
        });
    }

    pub fn truncate(&mut self, cid: CollectionId, oid: ObjectId, size: u64) {
        self.ops.push(TransactionOp::Truncate { cid, oid, size });
    }

    pub fn remove(&mut self, cid: CollectionId, oid: ObjectId) {
        self.ops.push(TransactionOp::Remove { cid, oid });
    }

    pub fn setattr(&mut self, cid: CollectionId, oid: ObjectId, name: impl Into<String>, value: Vec<u8>) {
        self.ops.push(TransactionOp::SetAttr {
            cid,
            oid,
            name: name.into(),
            value,
        });
    }

    pub fn setattrs(&mut self, cid: CollectionId, oid: ObjectId, attrs: BTreeMap<String, Vec<u8>>) {
        self.ops.push(TransactionOp::SetAttrs { cid, oid, attrs });
    }

    pub fn rmattr(&mut self, cid: CollectionId, oid: ObjectId, name: impl Into<String>) {
        self.ops.push(TransactionOp::RmAttr {
            cid,
            oid,
            name: name.into(),
        });
    }

    pub fn rmattrs(&mut self, cid: CollectionId, oid: ObjectId) {
        self.ops.push(TransactionOp::RmAttrs { cid, oid });
    }

    pub fn clone_object(&mut self, cid: CollectionId, src: ObjectId, dst: ObjectId) {
        self.ops.push(TransactionOp::Clone { cid, src, dst });
    }

    pub fn clone_range(
        &mut self,
        cid: CollectionId,
        src: ObjectId,
        dst: ObjectId,
        src_offset: u64,
        len: u64,
        dst_offset: u64,
    ) {
        self.ops.push(TransactionOp::CloneRange2 {
            cid,
            src,
            dst,
            src_offset,
            len,
            dst_offset,
        });
    }

    pub fn create_collection(&mut self, cid: CollectionId) {
        self.ops.push(TransactionOp::CreateCollection { cid });
    }

    pub fn remove_collection(&mut self, cid: CollectionId) {
        self.ops.push(TransactionOp::RemoveCollection { cid });
    }

    pub fn collection_add(&mut self, dst_cid: CollectionId, src_cid: CollectionId, oid: ObjectId) {
        self.ops.push(TransactionOp::CollectionAdd {
            dst_cid,
            src_cid,
            oid,
        });
    }

    pub fn collection_remove(&mut self, cid: CollectionId, oid: ObjectId) {
        self.ops.push(TransactionOp::CollectionRemove { cid, oid });
    }

    pub fn collection_move_rename(
        &mut self,
        src_cid: CollectionId,
        src_oid: ObjectId,
        dst_cid: CollectionId,
        dst_oid: ObjectId,
    ) {
        self.ops.push(TransactionOp::CollectionMoveRename {
            src_cid,
            src_oid,
            dst_cid,
            dst_oid,
        });
    }

    pub fn collection_setattr(&mut self, cid: CollectionId, name: impl Into<String>, value: Vec<u8>) {
        self.ops.push(TransactionOp::CollectionSetAttr {
            cid,
            name: name.into(),
            value,
        });
    }

    pub fn collection_rmattr(&mut self, cid: CollectionId, name: impl Into<String>) {
        self.ops.push(TransactionOp::CollectionRmAttr {
            cid,
            name: name.into(),
        });
    }

    pub fn omap_clear(&mut self, cid: CollectionId, oid: ObjectId) {
        self.ops.push(TransactionOp::OmapClear { cid, oid });
    }

    pub fn omap_setkeys(&mut self, cid: CollectionId, oid: ObjectId, keys: BTreeMap<String, Vec<u8>>) {
        self.ops.push(TransactionOp::OmapSetKeys { cid, oid, keys });
    }

    pub fn omap_rmkeys(&mut self, cid: CollectionId, oid: ObjectId, keys: BTreeSet<String>) {
        self.ops.push(TransactionOp::OmapRmKeys { cid, oid, keys });
    }

    pub fn omap_rmkeyrange(
        &mut self,
        cid: CollectionId,
        oid: ObjectId,
        first: impl Into<String>,
        last: impl Into<String>,
    ) {
        self.ops.push(TransactionOp::OmapRmKeyRange {
            cid,
            oid,
            first: first.into(),
            last: last.into(),
        });
    }

    pub fn omap_setheader(&mut self, cid: CollectionId, oid: ObjectId, data: Vec<u8>) {
        self.ops.push(TransactionOp::OmapSetHeader { cid, oid, data });
    }

    pub fn split_collection(&mut self, cid: CollectionId, bits: u32, rem: u32, dst: CollectionId) {
        self.ops.push(TransactionOp::SplitCollection2 {
            cid,
            bits,
            rem,
            dst,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid() -> CollectionId {
        CollectionId::new("c")
    }

    fn oid() -> ObjectId {
        ObjectId::new("o")
    }

    #[test]
    fn builders_preserve_order() {
        let mut t = Transaction::new();
        t.touch(cid(), oid());
        t.write(cid(), oid(), 0, b"abc".to_vec());
        t.remove(cid(), oid());
        assert_eq!(t.num_ops(), 3);
        assert!(matches!(t.ops()[0], TransactionOp::Touch { .. }));
        assert!(matches!(t.ops()[1], TransactionOp::Write { .. }));
        assert!(matches!(t.ops()[2], TransactionOp::Remove { .. }));
    }

    #[test]
    fn write_records_len() {
        let mut t = Transaction::new();
        t.write(cid(), oid(), 4, b"hello".to_vec());
        match &t.ops()[0] {
            TransactionOp::Write { offset, len, data, .. } => {
                assert_eq!(*offset, 4);
                assert_eq!(*len, 5);
                assert_eq!(data, b"hello");
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn num_bytes_counts_payloads() {
        let mut t = Transaction::new();
        t.write(cid(), oid(), 0, vec![0; 10]);
        t.zero(cid(), oid(), 0, 6);
        t.setattr(cid(), oid(), "a", vec![0; 3]);
        assert_eq!(t.num_bytes(), 19);
    }

    #[test]
    fn clone_range_builder_uses_current_tag() {
        let mut t = Transaction::new();
        t.clone_range(cid(), oid(), ObjectId::new("dst"), 8, 16, 0);
        assert!(matches!(t.ops()[0], TransactionOp::CloneRange2 { .. }));
    }

    #[test]
    fn serde_roundtrip() {
        let mut t = Transaction::new();
        t.create_collection(cid());
        t.write(cid(), oid(), 0, b"payload".to_vec());
        t.omap_rmkeyrange(cid(), oid(), "a", "z");
        let bytes = bincode::serialize(&t).unwrap();
        let parsed: Transaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(t, parsed);
    }
}
