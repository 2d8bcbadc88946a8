//! Engine-facing façade over the delete table.
//!
//! The manager owns one [`DeleteTable`] and the key schema describing where a
//! collection id lives inside a raw key. The engine calls into it at four
//! points: delete interception on the write path, file registration on flush
//! (and on open, when rebuilding state from disk), reference accounting on
//! compaction completion, and the visibility predicate on every read.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use super::delete_table::{CollectionRefUpdate, DeleteTable};
use super::LSN_MAX;

/// Describes where the collection id is embedded in a raw key.
///
/// The id occupies [`KeySchema::WIDTH`] bytes starting at `offset`, encoded
/// big-endian. Keys too short to cover the range have no collection (id `0`),
/// and id `0` itself always means "no collection" — such keys are invisible
/// to the hotspot machinery and behave like plain KV data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySchema {
    /// Byte offset of the collection id within the key.
    pub offset: usize,
}

impl KeySchema {
    /// Width of the embedded collection id, in bytes. Fixed.
    pub const WIDTH: usize = 8;

    pub fn new(offset: usize) -> Self {
        Self { offset }
    }

    /// Decodes the collection id from `key`, or `0` when the key is shorter
    /// than the extraction range.
    pub fn extract(&self, key: &[u8]) -> u64 {
        if key.len() < self.offset + Self::WIDTH {
            return 0;
        }
        let mut raw = [0u8; Self::WIDTH];
        raw.copy_from_slice(&key[self.offset..self.offset + Self::WIDTH]);
        u64::from_be_bytes(raw)
    }
}

impl Default for KeySchema {
    /// 16-byte application prefix followed by the 8-byte collection id.
    fn default() -> Self {
        Self { offset: 16 }
    }
}

/// Mediates between the storage engine and the [`DeleteTable`].
///
/// Stateless apart from the table it owns; safe to share behind an `Arc` —
/// all synchronization lives in the table's lock.
#[derive(Debug)]
pub struct HotspotManager {
    schema: KeySchema,
    table: DeleteTable,
}

impl HotspotManager {
    pub fn new(schema: KeySchema) -> Self {
        Self {
            schema,
            table: DeleteTable::new(),
        }
    }

    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    /// Direct access to the underlying table, for diagnostics and tests.
    pub fn delete_table(&self) -> &DeleteTable {
        &self.table
    }

    /// Decodes the collection id of `key` per the configured schema.
    pub fn extract_collection(&self, key: &[u8]) -> u64 {
        self.schema.extract(key)
    }

    /// Write-path hook: called in place of tombstone creation.
    ///
    /// Returns `false` for keys without a collection id — the engine proceeds
    /// with a normal tombstone delete. Otherwise records the logical delete
    /// at `lsn` and returns `true`, instructing the engine to skip the WAL
    /// record and the memtable insertion entirely. `lsn` must be the very
    /// sequence number the tombstone would have carried; it anchors the
    /// visibility predicate.
    pub fn intercept_delete(&self, key: &[u8], lsn: u64) -> bool {
        let collection = self.schema.extract(key);
        if collection == 0 {
            return false;
        }

        self.table.mark_deleted(collection, lsn);
        debug!(collection, lsn, "intercepted delete");
        true
    }

    /// Flush hook: registers a newly materialized SSTable for every
    /// collection appearing in its keys.
    ///
    /// Must run before (or atomically with) the file becoming visible to
    /// readers, under the engine's version lock.
    pub fn register_file_refs(&self, file_id: u64, collections: &[u64]) {
        for &collection in collections {
            if collection != 0 {
                self.table.track_file(collection, file_id);
            }
        }
    }

    /// Compaction hook: applies the reference accounting for one finished
    /// compaction as a single atomic update.
    pub fn apply_compaction_result(
        &self,
        involved: HashSet<u64>,
        input_files: Vec<u64>,
        outputs: BTreeMap<u64, HashSet<u64>>,
    ) {
        self.table.apply_compaction(&CollectionRefUpdate {
            involved,
            input_files,
            outputs,
        });
    }

    /// Read-path predicate: is a version of `collection` written at
    /// `found_lsn` hidden from a reader whose horizon is `visible_lsn`?
    pub fn is_collection_deleted(&self, collection: u64, visible_lsn: u64, found_lsn: u64) -> bool {
        if collection == 0 {
            return false;
        }
        self.table.is_deleted(collection, visible_lsn, found_lsn)
    }

    /// Delete LSN of `collection`, or [`LSN_MAX`] when not deleted.
    pub fn delete_lsn(&self, collection: u64) -> u64 {
        self.table.delete_lsn(collection)
    }

    /// Number of live SSTables referencing `collection`.
    pub fn ref_count(&self, collection: u64) -> usize {
        self.table.ref_count(collection)
    }

    /// Whether any state exists for `collection`.
    pub fn is_tracked(&self, collection: u64) -> bool {
        self.table.is_tracked(collection)
    }

    /// Compaction-iterator drop predicate.
    ///
    /// A version of `collection` written at `key_lsn` may be physically
    /// dropped when the collection's delete covers it (`key_lsn <
    /// delete_lsn`) *and* no live snapshot could still see it. A snapshot at
    /// `s` with `key_lsn ≤ s < delete_lsn` reads the version (the delete is
    /// not visible at `s`), so its presence blocks the drop.
    ///
    /// `live_snapshots` must be sorted ascending.
    pub fn should_drop_at_compaction(
        &self,
        collection: u64,
        key_lsn: u64,
        live_snapshots: &[u64],
    ) -> bool {
        if collection == 0 {
            return false;
        }

        let delete_lsn = self.table.delete_lsn(collection);
        if delete_lsn == LSN_MAX || key_lsn >= delete_lsn {
            return false;
        }

        // Smallest live snapshot at or after the version's LSN; if it sits
        // below the delete, that snapshot still reads the version.
        let idx = live_snapshots.partition_point(|&s| s < key_lsn);
        match live_snapshots.get(idx) {
            Some(&snapshot) if snapshot < delete_lsn => false,
            _ => true,
        }
    }
}
