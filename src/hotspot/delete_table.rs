//! The collection delete table.
//!
//! One process-wide concurrent map from collection id to an entry holding the
//! set of live SSTable ids containing data for that collection, a logical
//! delete flag, and the LSN at which the delete was issued.
//!
//! ## Invariants
//!
//! - Every live SSTable containing at least one key of collection `c` is a
//!   member of `c`'s file set (readers may transiently observe an
//!   over-approximation while a compaction update is in flight, never an
//!   under-approximation — outputs are credited before inputs are debited).
//! - An entry that is both marked deleted and holds no file references is
//!   erased. The erase check runs at untrack time and at the end of a
//!   compaction update — never in [`DeleteTable::mark_deleted`], because a
//!   delete may legally arrive before the collection's first file is
//!   registered.
//! - The delete LSN only ever increases.
//!
//! All observable operations on an entry happen under a single acquisition of
//! the shared/exclusive lock; there is no read-then-relock pattern.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, trace};

use super::LSN_MAX;

/// Per-collection bookkeeping entry.
#[derive(Debug)]
struct CollectionEntry {
    /// SSTable ids of every live file containing at least one key of this
    /// collection.
    files: HashSet<u64>,

    /// A logical delete has been issued at least once.
    is_deleted: bool,

    /// LSN of the most recent delete, or [`LSN_MAX`] if none.
    deleted_lsn: u64,
}

impl CollectionEntry {
    fn new() -> Self {
        Self {
            files: HashSet::new(),
            is_deleted: false,
            deleted_lsn: LSN_MAX,
        }
    }

    /// True when the entry has served its purpose and can be erased.
    fn is_reclaimable(&self) -> bool {
        self.is_deleted && self.files.is_empty()
    }
}

/// Parameters of one compaction's reference accounting, applied atomically.
///
/// `involved` lists every collection appearing in any input file;
/// `input_files` every SSTable id the compaction consumed; `outputs` maps
/// each newly produced SSTable id to the collections surviving into it.
#[derive(Debug, Default)]
pub struct CollectionRefUpdate {
    pub involved: HashSet<u64>,
    pub input_files: Vec<u64>,
    pub outputs: BTreeMap<u64, HashSet<u64>>,
}

/// Concurrent map from collection id to delete/refcount state.
///
/// Readers (the visibility predicate, diagnostics) take the shared lock;
/// every mutation takes the exclusive lock. Lock poisoning is recovered via
/// `into_inner` — entries are plain data and every mutation leaves the map
/// consistent, so a panicking reader/writer cannot strand invalid state.
#[derive(Debug, Default)]
pub struct DeleteTable {
    table: RwLock<HashMap<u64, CollectionEntry>>,
}

impl DeleteTable {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
        }
    }

    fn read_table(&self) -> RwLockReadGuard<'_, HashMap<u64, CollectionEntry>> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, HashMap<u64, CollectionEntry>> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `file_id` as containing data for `collection`.
    ///
    /// Creates the entry if absent. Returns `true` if the file was not
    /// already tracked for this collection — callers use the signal to avoid
    /// double-counting external references.
    pub fn track_file(&self, collection: u64, file_id: u64) -> bool {
        let mut table = self.write_table();
        let entry = table.entry(collection).or_insert_with(CollectionEntry::new);

        let newly_added = entry.files.insert(file_id);
        if newly_added {
            trace!(collection, file_id, "tracking file reference");
        }
        newly_added
    }

    /// Removes `file_id` from `collection`'s reference set.
    ///
    /// Erases the entry when the set empties and the collection is marked
    /// deleted. Removing an untracked file is a silent no-op.
    pub fn untrack_file(&self, collection: u64, file_id: u64) {
        let mut table = self.write_table();
        if let Some(entry) = table.get_mut(&collection) {
            entry.files.remove(&file_id);
            trace!(collection, file_id, "untracked file reference");

            if entry.is_reclaimable() {
                table.remove(&collection);
                info!(collection, "collection entry reclaimed");
            }
        }
    }

    /// Batched form of [`DeleteTable::untrack_file`] with a single erase
    /// check at the end.
    pub fn untrack_files(&self, collection: u64, file_ids: &[u64]) {
        let mut table = self.write_table();
        if let Some(entry) = table.get_mut(&collection) {
            for file_id in file_ids {
                entry.files.remove(file_id);
            }
            trace!(collection, count = file_ids.len(), "untracked file references");

            if entry.is_reclaimable() {
                table.remove(&collection);
                info!(collection, "collection entry reclaimed");
            }
        }
    }

    /// Marks `collection` logically deleted at `lsn`.
    ///
    /// Creates the entry if absent. The stored delete LSN never decreases: a
    /// stale delete arriving after a newer one leaves the newer LSN in place.
    /// No erase check runs here — a fresh delete may precede the collection's
    /// first file registration.
    pub fn mark_deleted(&self, collection: u64, lsn: u64) -> bool {
        let mut table = self.write_table();
        let entry = table.entry(collection).or_insert_with(CollectionEntry::new);

        entry.is_deleted = true;
        if entry.deleted_lsn == LSN_MAX || lsn > entry.deleted_lsn {
            entry.deleted_lsn = lsn;
        }

        debug!(collection, lsn, effective_lsn = entry.deleted_lsn, "marked deleted");
        true
    }

    /// MVCC visibility predicate: is a datum of `collection`, written at
    /// `found_lsn` and read at `visible_lsn`, hidden by a logical delete?
    ///
    /// True iff the collection is marked deleted at some `d ≠ LSN_MAX`, the
    /// reader's horizon sees the delete (`visible_lsn ≥ d`), and the datum
    /// predates it **strictly** (`found_lsn < d`). The strict comparison
    /// keeps re-inserted data alive: a put stamped with the same LSN as the
    /// delete is *not* covered by it.
    pub fn is_deleted(&self, collection: u64, visible_lsn: u64, found_lsn: u64) -> bool {
        let table = self.read_table();
        let Some(entry) = table.get(&collection) else {
            return false;
        };
        if !entry.is_deleted || entry.deleted_lsn == LSN_MAX {
            return false;
        }

        visible_lsn >= entry.deleted_lsn && found_lsn < entry.deleted_lsn
    }

    /// Returns the delete LSN of `collection`, or [`LSN_MAX`] if the
    /// collection is not tracked or not marked deleted.
    pub fn delete_lsn(&self, collection: u64) -> u64 {
        let table = self.read_table();
        match table.get(&collection) {
            Some(entry) if entry.is_deleted => entry.deleted_lsn,
            _ => LSN_MAX,
        }
    }

    /// Number of live files currently referencing `collection`.
    pub fn ref_count(&self, collection: u64) -> usize {
        let table = self.read_table();
        table.get(&collection).map_or(0, |entry| entry.files.len())
    }

    /// Whether the table holds any entry for `collection`.
    pub fn is_tracked(&self, collection: u64) -> bool {
        self.read_table().contains_key(&collection)
    }

    /// Applies one compaction's reference accounting in a single critical
    /// section.
    ///
    /// Order matters:
    ///
    /// 1. **Credit outputs first.** Every surviving collection gains its new
    ///    file references (entries lazily created), so a concurrent reader
    ///    never observes a refcount below the true on-disk state.
    /// 2. **Debit inputs.** Every involved collection loses every consumed
    ///    input file. A collection absent from the table is skipped — there
    ///    is nothing to debit.
    /// 3. **Erase pass.** Any touched collection that is marked deleted and
    ///    now reference-free is removed.
    ///
    /// The protocol is insensitive to file splitting (all outputs credited
    /// before any debit) and zero-output drops (the collection simply never
    /// appears in `outputs`). A file that migrates unchanged is reported
    /// under its true final identifier in `outputs` and, if that identifier
    /// was reused rather than reissued, omitted from `input_files` — the
    /// file was not destroyed.
    pub fn apply_compaction(&self, update: &CollectionRefUpdate) {
        let mut table = self.write_table();

        // 1. Credit outputs.
        for (&out_id, collections) in &update.outputs {
            for &collection in collections {
                let entry = table.entry(collection).or_insert_with(CollectionEntry::new);
                if entry.files.insert(out_id) {
                    trace!(collection, file_id = out_id, "compaction credit");
                }
            }
        }

        // 2. Debit inputs.
        for &collection in &update.involved {
            let Some(entry) = table.get_mut(&collection) else {
                continue;
            };
            for &input_id in &update.input_files {
                if entry.files.remove(&input_id) {
                    trace!(collection, file_id = input_id, "compaction debit");
                }
            }
        }

        // 3. Erase pass over every touched collection.
        let touched: HashSet<u64> = update
            .involved
            .iter()
            .copied()
            .chain(update.outputs.values().flatten().copied())
            .collect();

        for collection in touched {
            if table.get(&collection).is_some_and(CollectionEntry::is_reclaimable) {
                table.remove(&collection);
                info!(collection, "collection entry reclaimed by compaction");
            }
        }
    }
}
