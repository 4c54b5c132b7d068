use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of one operation within the global submit stream.
///
/// `op_seq` is assigned by the submit manager and is monotonic store-wide;
/// `trans_num` is the index of the transaction within one submitted batch;
/// `op_index` is the index of the operation within that transaction.
///
/// Ordering: `op_seq` → `trans_num` → `op_index` (total order). Headers are
/// stamped with the position of the mutation that last touched them, which
/// makes replay after a crash idempotent: an operation at a position less
/// than or equal to the stamp is skipped.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequencerPosition {
    /// Monotonic batch sequence number from the submit manager.
    pub op_seq: u64,
    /// Transaction index within the batch.
    pub trans_num: u32,
    /// Operation index within the transaction.
    pub op_index: u32,
}

impl SequencerPosition {
    /// Create a position with explicit components.
    pub fn new(op_seq: u64, trans_num: u32, op_index: u32) -> Self {
        Self {
            op_seq,
            trans_num,
            op_index,
        }
    }
}

impl PartialOrd for SequencerPosition {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SequencerPosition {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.op_seq
            .cmp(&other.op_seq)
            .then(self.trans_num.cmp(&other.trans_num))
            .then(self.op_index.cmp(&other.op_index))
    }
}

impl fmt::Debug for SequencerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequencerPosition({self})")
    }
}

impl fmt::Display for SequencerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.op_seq, self.trans_num, self.op_index)
    }
}
