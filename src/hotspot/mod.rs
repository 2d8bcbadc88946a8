//! Collection-Scoped Deletion Module
//!
//! Keys may embed a 64-bit **collection id** at a fixed byte offset. Deleting
//! any key of a collection logically deletes the whole collection: no
//! tombstone is written, the delete is recorded in an in-memory
//! [`DeleteTable`] keyed by collection id, and every read consults the table
//! before returning data. Physical reclamation rides on ordinary compaction:
//! covered versions are dropped from compaction output, file references are
//! retired as inputs are destroyed, and a collection's entry disappears the
//! moment its last file reference goes away.
//!
//! Two types cooperate:
//!
//! - [`DeleteTable`] — the concurrent bookkeeping structure: per-collection
//!   file-reference sets, delete flags, and delete LSNs, with an MVCC
//!   visibility predicate and an atomic compaction-accounting update.
//! - [`HotspotManager`] — the engine-facing façade: extracts collection ids
//!   from raw keys per a configured [`KeySchema`], intercepts deletes, and
//!   translates flush/compaction events into table mutations.
//!
//! The table is deliberately memory-resident. File references are rebuilt on
//! engine open from SSTable metadata; delete flags do not survive a restart
//! (an embedder that needs durable deletes replays its own journal through
//! [`DeleteTable::mark_deleted`]).

#[cfg(test)]
mod tests;

mod delete_table;
mod manager;

pub use delete_table::{CollectionRefUpdate, DeleteTable};
pub use manager::{HotspotManager, KeySchema};

/// Sentinel LSN meaning "unbounded" / "no such event".
///
/// Never compares less than any real LSN. A delete LSN of `LSN_MAX` means the
/// collection has no effective delete; a visible LSN of `LSN_MAX` means a
/// read without a snapshot (sees everything).
pub const LSN_MAX: u64 = u64::MAX;
