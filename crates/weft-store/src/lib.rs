//! Striped object storage engine over an ordered key/value backend.
//!
//! Objects, addressed by `(collection, object)`, expose random-offset
//! reads and writes, extended attributes, a per-object sorted key/value
//! map, cloning, and collection membership. An object's byte stream is
//! decomposed into fixed-size strips stored as individual backend values;
//! presence and size live in a per-object strip header.
//!
//! Clients submit [`Transaction`] batches through
//! [`Store::queue_transactions`]. Each batch applies atomically with
//! respect to the backend: a buffered transaction coalesces the batch's
//! operations, keeps read-your-writes visibility within it, and flushes a
//! single backend submission. Batches on one [`Sequencer`] apply in submit
//! order; batches on different sequencers may run in parallel on the
//! worker pool. Headers carry the position of the last mutation that
//! touched them, which makes journal-driven replay idempotent.
//!
//! ```no_run
//! use weft_store::{Store, StoreConfig};
//! use weft_types::{CollectionId, ObjectId, Transaction};
//!
//! # fn main() -> Result<(), weft_store::StoreError> {
//! let config = StoreConfig::default();
//! Store::mkfs("/var/lib/weft", &config)?;
//! let store = Store::mount("/var/lib/weft", config)?;
//!
//! let cid = CollectionId::new("pool.1");
//! let oid = ObjectId::new("object");
//! let mut t = Transaction::new();
//! t.create_collection(cid.clone());
//! t.write(cid.clone(), oid.clone(), 0, b"hello".to_vec());
//! store.apply(None, vec![t])?;
//!
//! assert_eq!(store.read(&cid, &oid, 0, 0)?, b"hello");
//! store.umount();
//! # Ok(())
//! # }
//! ```

mod apply;
mod buffer;
mod config;
mod disk;
mod error;
mod ops;
mod pool;
mod read;
mod sequencer;
mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use read::Stat;
pub use sequencer::{Completion, Completions, Sequencer};
pub use store::Store;

pub use weft_types::{CollectionId, ObjectId, SequencerPosition, Transaction, TransactionOp};

#[cfg(test)]
mod tests;
