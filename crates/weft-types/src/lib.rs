//! Foundation types for the weft object storage engine.
//!
//! This crate provides the identifier, ordering, and transaction types used
//! throughout the weft system. Every other weft crate depends on `weft-types`.
//!
//! # Key Types
//!
//! - [`CollectionId`] — Named bucket of objects
//! - [`ObjectId`] — Fully qualified, totally ordered object key
//! - [`SequencerPosition`] — Monotonic `(op_seq, trans_num, op_index)` tag
//!   used for ordering and replay idempotency
//! - [`Transaction`] / [`TransactionOp`] — Ordered list of typed operations
//!   submitted as one atomic batch member

pub mod coll;
pub mod object;
pub mod spos;
pub mod transaction;

pub use coll::CollectionId;
pub use object::ObjectId;
pub use spos::SequencerPosition;
pub use transaction::{Transaction, TransactionOp};
