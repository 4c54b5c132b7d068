use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use weft_types::Transaction;

/// Callback fired when a batch reaches a completion point.
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

/// The three completion callbacks a submitted batch may carry.
///
/// `onreadable_sync` fires synchronously on the worker right after apply;
/// `onreadable` is queued to the readable finisher; `ondisk` is queued to
/// the on-disk finisher once the backend submission has returned.
#[derive(Default)]
pub struct Completions {
    pub(crate) onreadable: Option<Completion>,
    pub(crate) onreadable_sync: Option<Completion>,
    pub(crate) ondisk: Option<Completion>,
}

impl Completions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn onreadable(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.onreadable = Some(Box::new(f));
        self
    }

    pub fn onreadable_sync(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.onreadable_sync = Some(Box::new(f));
        self
    }

    pub fn ondisk(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.ondisk = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for Completions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completions")
            .field("onreadable", &self.onreadable.is_some())
            .field("onreadable_sync", &self.onreadable_sync.is_some())
            .field("ondisk", &self.ondisk.is_some())
            .finish()
    }
}

/// One submitted batch: the transactions plus accounting and completions.
pub(crate) struct Op {
    pub op_seq: u64,
    pub transactions: Vec<Transaction>,
    pub ops: u64,
    pub bytes: u64,
    pub onreadable: Option<Completion>,
    pub onreadable_sync: Option<Completion>,
    pub ondisk: Option<Completion>,
}

impl Op {
    pub fn build(transactions: Vec<Transaction>, completions: Completions) -> Self {
        let ops = transactions.iter().map(Transaction::num_ops).sum();
        let bytes = transactions.iter().map(Transaction::num_bytes).sum();
        Self {
            op_seq: 0,
            transactions,
            ops,
            bytes,
            onreadable: completions.onreadable,
            onreadable_sync: completions.onreadable_sync,
            ondisk: completions.ondisk,
        }
    }
}

/// Per-sequencer state: a FIFO of pending ops plus the apply lock that
/// serializes their application.
///
/// The worker pool's work item is the sequencer, queued once per op, so
/// whichever workers pick it up, ops apply in enqueue order under the
/// apply lock.
pub(crate) struct OpSequencer {
    name: String,
    queue: Mutex<VecDeque<Op>>,
    apply_lock: Mutex<()>,
}

impl OpSequencer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            apply_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue_op(&self, op: Op) {
        self.queue.lock().expect("op queue poisoned").push_back(op);
    }

    pub fn dequeue(&self) -> Option<Op> {
        self.queue.lock().expect("op queue poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("op queue poisoned").len()
    }

    /// Held for the entirety of one batch's application, including the
    /// backend submission.
    pub fn apply_lock(&self) -> MutexGuard<'_, ()> {
        self.apply_lock.lock().expect("apply lock poisoned")
    }
}

/// Client-visible ordering domain. Batches submitted through the same
/// sequencer apply in submit order; batches on different sequencers may
/// apply in parallel.
#[derive(Clone)]
pub struct Sequencer {
    pub(crate) inner: Arc<OpSequencer>,
}

impl Sequencer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(OpSequencer::new(name)),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Number of ops queued and not yet applied.
    pub fn pending(&self) -> usize {
        self.inner.len()
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("name", &self.name())
            .field("pending", &self.pending())
            .finish()
    }
}

#[derive(Default)]
struct SubmitState {
    op_seq: u64,
    op_submitted: u64,
}

/// Serializes op-number assignment. The lock is taken in
/// [`SubmitManager::op_submit_start`] and held, through the returned
/// ticket, until [`SubmitTicket::finish`], so ops reach their sequencers
/// in strict op-seq order. No I/O happens under it.
#[derive(Default)]
pub(crate) struct SubmitManager {
    state: Mutex<SubmitState>,
}

pub(crate) struct SubmitTicket<'a> {
    guard: MutexGuard<'a, SubmitState>,
    op: u64,
}

impl SubmitManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op_submit_start(&self) -> SubmitTicket<'_> {
        let mut guard = self.state.lock().expect("submit lock poisoned");
        guard.op_seq += 1;
        let op = guard.op_seq;
        debug!(op, "op_submit_start");
        SubmitTicket { guard, op }
    }
}

impl SubmitTicket<'_> {
    pub fn op(&self) -> u64 {
        self.op
    }

    pub fn finish(mut self) {
        debug!(op = self.op, "op_submit_finish");
        assert_eq!(
            self.op,
            self.guard.op_submitted + 1,
            "out of order op submit finish"
        );
        self.guard.op_submitted = self.op;
    }
}
