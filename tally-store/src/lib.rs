//! Typed persistence layer for the tally points indexer, built on RocksDB.
//!
//! Every entity lives in its own column family behind a typed [`kvtable`]
//! facade. Mutations are staged on a [`Batch`] that offers read-your-writes
//! and lands atomically on commit, one batch per indexed block.

pub mod batch;
pub mod kvtable;
pub mod model;
pub mod projections;
pub mod store;

#[cfg(test)]
mod tests;

pub use batch::Batch;
pub use kvtable::Error;
pub use projections::{AllPointsRow, PointsStats, ReceiverPoints, ReceiverType};
pub use store::{StateRead, Store};
