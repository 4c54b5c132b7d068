//! The transaction interpreter: walks each batch's typed op stream,
//! dispatches to the object operations, and enforces the error policy.
//!
//! Policy: a missing object or collection is tolerated for most ops (the
//! batch may be a replay); on clones it means upstream state is
//! inconsistent. Anything else, and out-of-space always, dumps the
//! offending transaction and aborts the process rather than leave a batch
//! half applied.

use tracing::{debug, error};

use weft_types::{SequencerPosition, Transaction, TransactionOp};

use crate::buffer::BufferTransaction;
use crate::error::{StoreError, StoreResult};
use crate::pool::TpHandle;
use crate::store::StoreInner;

impl StoreInner {
    /// Apply one batch: every transaction through one buffered transaction,
    /// then a single backend submission. Submission failure is fatal.
    pub(crate) fn do_transactions(
        &self,
        transactions: &[Transaction],
        op_seq: u64,
        handle: &TpHandle,
    ) {
        let mut bt = BufferTransaction::new(self, SequencerPosition::new(op_seq, 0, 0));
        for (trans_num, transaction) in transactions.iter().enumerate() {
            self.do_transaction(transaction, &mut bt, op_seq, trans_num as u32, handle);
            handle.reset_timeout();
        }
        if let Err(err) = bt.submit() {
            error!(op_seq, error = %err, "backend submission failed; aborting");
            std::process::abort();
        }
    }

    fn do_transaction(
        &self,
        transaction: &Transaction,
        bt: &mut BufferTransaction<'_>,
        op_seq: u64,
        trans_num: u32,
        handle: &TpHandle,
    ) {
        for (op_index, op) in transaction.ops().iter().enumerate() {
            handle.reset_timeout();
            bt.set_spos(SequencerPosition::new(op_seq, trans_num, op_index as u32));

            if let Err(err) = self.apply_op(op, bt) {
                if tolerated(&err, op) {
                    debug!(position = %bt.spos(), error = %err, "tolerated op error");
                    continue;
                }
                let context = match &err {
                    StoreError::NotFound => "missing object on clone suggests upstream inconsistency",
                    StoreError::NoSpace => "out of space; refusing to partially apply",
                    _ => "unexpected error code",
                };
                let dump = serde_json::to_string(transaction)
                    .unwrap_or_else(|_| "<unencodable transaction>".to_string());
                error!(position = %bt.spos(), error = %err, context, "fatal error applying op");
                error!(transaction = %dump, "transaction dump");
                std::process::abort();
            }
        }
    }

    pub(crate) fn apply_op(
        &self,
        op: &TransactionOp,
        bt: &mut BufferTransaction<'_>,
    ) -> StoreResult<()> {
        match op {
            TransactionOp::Nop => Ok(()),
            TransactionOp::Touch { cid, oid } => self.op_touch(cid, oid, bt),
            TransactionOp::Write {
                cid,
                oid,
                offset,
                len,
                data,
            } => self.op_write(cid, oid, *offset, *len, data, bt),
            TransactionOp::Zero { cid, oid, offset, len } => {
                self.op_zero(cid, oid, *offset, *len, bt)
            }
            TransactionOp::Truncate { cid, oid, size } => self.op_truncate(cid, oid, *size, bt),
            TransactionOp::Remove { cid, oid } => self.op_remove(cid, oid, bt),
            TransactionOp::SetAttr { cid, oid, name, value } => {
                let mut attrs = std::collections::BTreeMap::new();
                attrs.insert(name.clone(), value.clone());
                self.op_setattrs(cid, oid, attrs, bt)
            }
            TransactionOp::SetAttrs { cid, oid, attrs } => {
                self.op_setattrs(cid, oid, attrs.clone(), bt)
            }
            TransactionOp::RmAttr { cid, oid, name } => self.op_rmattr(cid, oid, name, bt),
            TransactionOp::RmAttrs { cid, oid } => self.op_rmattrs(cid, oid, bt),
            TransactionOp::Clone { cid, src, dst } => self.op_clone(cid, src, dst, bt),
            TransactionOp::CloneRange {
                cid,
                src,
                dst,
                offset,
                len,
            } => self.op_clone_range(cid, src, dst, *offset, *len, *offset, bt),
            TransactionOp::CloneRange2 {
                cid,
                src,
                dst,
                src_offset,
                len,
                dst_offset,
            } => self.op_clone_range(cid, src, dst, *src_offset, *len, *dst_offset, bt),
            TransactionOp::CreateCollection { cid } => self.op_create_collection(cid, bt),
            TransactionOp::RemoveCollection { cid } => self.op_destroy_collection(cid, bt),
            TransactionOp::CollectionAdd { dst_cid, src_cid, oid } => {
                self.op_collection_add(dst_cid, src_cid, oid, bt)
            }
            TransactionOp::CollectionRemove { cid, oid } => self.op_remove(cid, oid, bt),
            TransactionOp::CollectionMove { src_cid, dst_cid, oid } => {
                // historical replay-only behavior, preserved verbatim: copy
                // into the source collection, then remove from it
                self.op_collection_add(src_cid, dst_cid, oid, bt)?;
                self.op_remove(src_cid, oid, bt)
            }
            TransactionOp::CollectionMoveRename {
                src_cid,
                src_oid,
                dst_cid,
                dst_oid,
            } => self.op_collection_move_rename(src_cid, src_oid, dst_cid, dst_oid, bt),
            TransactionOp::CollectionSetAttr { cid, name, value } => {
                self.op_collection_setattr(cid, name, value.clone(), bt)
            }
            TransactionOp::CollectionRmAttr { cid, name } => {
                self.op_collection_rmattr(cid, name, bt)
            }
            TransactionOp::StartSync => Ok(()), // no journal to kick
            TransactionOp::CollectionRename { .. } => Err(StoreError::Unsupported),
            TransactionOp::OmapClear { cid, oid } => self.op_omap_clear(cid, oid, bt),
            TransactionOp::OmapSetKeys { cid, oid, keys } => {
                self.op_omap_setkeys(cid, oid, keys.clone(), bt)
            }
            TransactionOp::OmapRmKeys { cid, oid, keys } => {
                self.op_omap_rmkeys(cid, oid, keys.clone(), bt)
            }
            TransactionOp::OmapRmKeyRange { cid, oid, first, last } => {
                self.op_omap_rmkeyrange(cid, oid, first, last, bt)
            }
            TransactionOp::OmapSetHeader { cid, oid, data } => {
                self.op_omap_setheader(cid, oid, data.clone(), bt)
            }
            TransactionOp::SplitCollection { cid, bits, rem, dst }
            | TransactionOp::SplitCollection2 { cid, bits, rem, dst } => {
                self.op_split_collection(cid, *bits, *rem, dst, bt)
            }
        }
    }
}

/// A missing object is normal for most ops (replayed batches); on clones
/// it is not.
fn tolerated(err: &StoreError, op: &TransactionOp) -> bool {
    match err {
        StoreError::NotFound => !matches!(
            op,
            TransactionOp::Clone { .. }
                | TransactionOp::CloneRange { .. }
                | TransactionOp::CloneRange2 { .. }
        ),
        _ => false,
    }
}
