//! # LSM Storage Engine
//!
//! A **synchronous**, **crash-safe** LSM-tree storage engine with
//! multi-version concurrency, MVCC snapshots, and **collection-scoped
//! logical deletion**.
//!
//! ## Design Overview
//!
//! The engine organises data across three layers, queried newest-first:
//!
//! 1. **Active memtable** — an in-memory sorted multi-version map backed by a
//!    write-ahead log (WAL).
//! 2. **Frozen memtables** — read-only snapshots of previously active
//!    memtables, awaiting flush to persistent SSTables.
//! 3. **SSTables** — immutable, sorted, on-disk files with bloom filters,
//!    block indices, and per-file collection metadata.
//!
//! Writes go through the WAL first, then into the active memtable. When the
//! memtable exceeds [`EngineConfig::write_buffer_size`] it is frozen and a
//! fresh memtable + WAL is created. Frozen memtables are flushed to SSTables
//! via [`Engine::flush`] / [`Engine::flush_all_frozen`].
//!
//! ## Collection deletes
//!
//! Keys may carry a collection id (see [`KeySchema`]). [`Engine::delete`] on
//! such a key writes **no tombstone**: the delete is intercepted by the
//! [`HotspotManager`], which records the collection as deleted at the LSN the
//! tombstone would have carried. Every read applies the manager's visibility
//! predicate after locating a version; compaction physically drops covered
//! versions and retires file references until the collection's bookkeeping
//! entry disappears.
//!
//! Three hook points keep the delete table consistent with the disk state:
//!
//! - **flush** registers each new SSTable's collection set before the table
//!   becomes visible to readers (both under the engine's write lock);
//! - **compaction completion** applies the involved/inputs/outputs
//!   accounting and the SSTable list swap under one write-lock critical
//!   section, so readers never observe refcounts inconsistent with the live
//!   file set;
//! - **open** re-registers every loaded SSTable, rebuilding refcounts after
//!   a restart (delete flags are deliberately memory-only).
//!
//! ## Concurrency Model
//!
//! All engine state is protected by a single `Arc<RwLock<EngineInner>>`.
//! Reads acquire a **read lock**; writes, flushes, and compactions acquire a
//! **write lock**. The hotspot manager and the snapshot registry carry their
//! own internal locks and are shared outside the engine lock.
//!
//! ## Guarantees
//!
//! - **Durability:** every write is persisted to WAL before acknowledgement.
//! - **Crash recovery:** on [`Engine::open`], the manifest, WALs, and
//!   SSTables are replayed to reconstruct the last durable state.
//! - **Snapshot isolation:** a [`Snapshot`] pins an LSN; reads through it see
//!   exactly the state as of that LSN, across flushes and compactions.
//! - **Atomic flushes:** each frozen memtable becomes one SSTable, with the
//!   manifest and the delete table updated atomically with visibility.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::compaction::{CompactionContext, CompactionResult, CompactionStrategyType};
use crate::hotspot::{HotspotManager, KeySchema, LSN_MAX};
use crate::manifest::{Manifest, ManifestError, ManifestSstEntry};
use crate::memtable::{FrozenMemtable, Memtable, MemtableError, MemtableGetResult};
use crate::sstable::{self, PointEntry, SSTable, SSTableError, SstGetResult};

pub mod snapshot;
pub mod utils;
pub mod visibility;

pub use snapshot::{Snapshot, SnapshotList};
pub use utils::Record;
pub use visibility::VisibilityFilter;

#[cfg(test)]
mod tests;

pub const MANIFEST_DIR: &str = "manifest";
pub const MEMTABLE_DIR: &str = "memtables";
pub const SSTABLE_DIR: &str = "sstables";

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the manifest subsystem.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Error originating from the memtable subsystem.
    #[error("Memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error originating from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration for an [`Engine`] instance.
pub struct EngineConfig {
    /// Max memtable size (bytes) before freeze.
    pub write_buffer_size: usize,

    /// Compaction strategy family backing `minor_compact` / `major_compact`.
    pub compaction_strategy: CompactionStrategyType,

    /// Lower bound multiplier for bucket size range ([avg × bucket_low, avg × bucket_high]).
    pub bucket_low: f64,

    /// Upper bound multiplier for bucket size range.
    pub bucket_high: f64,

    /// Min size (bytes) for regular buckets; smaller SSTables go to the "small" bucket.
    pub min_sstable_size: usize,

    /// Min SSTables in a bucket to trigger minor compaction.
    pub min_threshold: usize,

    /// Max SSTables to compact at once in minor compaction.
    pub max_threshold: usize,

    /// Target size (bytes) of one compaction output file. Compaction output
    /// exceeding this splits into multiple SSTables at key boundaries.
    pub target_sst_size: usize,

    /// Where the collection id lives inside raw keys.
    pub key_schema: KeySchema,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 4 * 1024 * 1024,
            compaction_strategy: CompactionStrategyType::Stcs,
            bucket_low: 0.5,
            bucket_high: 1.5,
            min_sstable_size: 50 * 1024,
            min_threshold: 4,
            max_threshold: 32,
            target_sst_size: 64 * 1024 * 1024,
            key_schema: KeySchema::default(),
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
pub struct EngineStats {
    /// Number of frozen memtables pending flush.
    pub frozen_count: usize,
    /// Total number of SSTables on disk.
    pub sstables_count: usize,
    /// Sum of all SSTable file sizes in bytes.
    pub total_sst_size_bytes: u64,
    /// Per-SSTable file sizes in bytes (newest-first order).
    pub sst_sizes: Vec<u64>,
}

struct EngineInner {
    /// Persistent manifest for this engine.
    manifest: Manifest,

    /// Active memtable that accepts writes.
    active: Memtable,

    /// Frozen memtables waiting to be flushed, newest first.
    frozen: Vec<FrozenMemtable>,

    /// Loaded SSTables, ordered by `max_lsn` descending.
    sstables: Vec<SSTable>,

    /// Path where the engine is mounted.
    data_dir: String,

    /// Thresholds, sizes, key schema.
    config: EngineConfig,
}

/// The main LSM storage engine handle.
///
/// Thread-safe — can be cloned and shared across threads.
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,
    hotspot: Arc<HotspotManager>,
    snapshots: Arc<SnapshotList>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            hotspot: Arc::clone(&self.hotspot),
            snapshots: Arc::clone(&self.snapshots),
        }
    }
}

fn wal_file_path(data_dir: &str, wal_id: u64) -> String {
    format!("{data_dir}/{MEMTABLE_DIR}/wal-{wal_id:06}.log")
}

impl Engine {
    /// Opens (or creates) an engine rooted at the given directory.
    ///
    /// On a fresh directory the manifest, WAL, and SSTable sub-directories
    /// are created automatically. On an existing directory the manifest is
    /// replayed, frozen WALs are loaded, SSTables are opened, and every
    /// SSTable's collection set is re-registered with the delete table so
    /// file refcounts match the disk state again.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let data_dir = path.as_ref().to_string_lossy().to_string();
        let manifest_dir = format!("{data_dir}/{MANIFEST_DIR}");
        let memtable_dir = format!("{data_dir}/{MEMTABLE_DIR}");
        let sstable_dir = format!("{data_dir}/{SSTABLE_DIR}");

        fs::create_dir_all(&manifest_dir)?;
        fs::create_dir_all(&memtable_dir)?;
        fs::create_dir_all(&sstable_dir)?;

        let hotspot = Arc::new(HotspotManager::new(config.key_schema));

        // 1. Load or create manifest.
        let manifest = Manifest::open(&manifest_dir)?;
        let manifest_last_lsn = manifest.get_last_lsn()?;

        // 2. Load active and frozen memtables from their WALs.
        let active_wal_nr = manifest.get_active_wal()?;
        let memtable = Memtable::new(
            wal_file_path(&data_dir, active_wal_nr),
            active_wal_nr,
            None,
            config.write_buffer_size,
        )?;

        let mut frozen_memtables = Vec::new();
        for wal_nr in manifest.get_frozen_wals()? {
            let memtable = Memtable::new(
                wal_file_path(&data_dir, wal_nr),
                wal_nr,
                None,
                config.write_buffer_size,
            )?;
            frozen_memtables.push(memtable.frozen()?);
        }

        // 3. Discover existing SSTables on disk and remove orphans the
        //    manifest does not know about (half-finished flushes).
        let sstables = manifest.get_sstables()?;

        for entry in fs::read_dir(&sstable_dir)? {
            let entry = entry?;
            let file_path = entry.path();

            if file_path.is_file()
                && file_path.extension().and_then(|s| s.to_str()) == Some("sst")
                && let Some(file_name) = file_path.file_name().and_then(|s| s.to_str())
                && let Some(id) = file_name
                    .strip_prefix("sstable-")
                    .and_then(|s| s.strip_suffix(".sst"))
                    .and_then(|s| s.parse::<u64>().ok())
                && !sstables.iter().any(|entry| entry.id == id)
            {
                tracing::warn!(id, path = %file_path.display(), "removing orphan SSTable");
                fs::remove_file(&file_path)?;
            }
        }

        // 4. Load SSTables from the manifest and rebuild file refcounts.
        let mut sstable_handles = Vec::new();
        for sstable_entry in sstables {
            let mut sstable = SSTable::open(&sstable_entry.path)?;
            sstable.id = sstable_entry.id;
            hotspot.register_file_refs(sstable.id, sstable.collections());
            sstable_handles.push(sstable);
        }

        // 5. Compute the global max LSN and seed the active memtable's counter.
        let mut max_lsn = manifest_last_lsn;
        max_lsn = max_lsn.max(memtable.max_lsn());
        for frozen in &frozen_memtables {
            max_lsn = max_lsn.max(frozen.max_lsn());
        }
        for sstable in &sstable_handles {
            max_lsn = max_lsn.max(sstable.properties.max_lsn);
        }
        if memtable.max_lsn() != max_lsn {
            memtable.inject_max_lsn(max_lsn);
        }

        // Sort frozen memtables by WAL segment id, newest first. Segment ids
        // are used rather than creation timestamps because crash recovery
        // replays all frozen WALs at nearly the same instant.
        frozen_memtables.sort_by(|a, b| b.memtable.wal.wal_seq().cmp(&a.memtable.wal.wal_seq()));

        // Sort SSTables by max_lsn descending. This lets get() terminate
        // early: once a result at LSN L is found, any SSTable whose
        // max_lsn ≤ L cannot contain a newer version.
        sstable_handles.sort_by(|a, b| b.properties.max_lsn.cmp(&a.properties.max_lsn));

        tracing::info!(
            data_dir = %data_dir,
            sstables = sstable_handles.len(),
            frozen = frozen_memtables.len(),
            max_lsn,
            "engine opened"
        );

        let inner = EngineInner {
            manifest,
            active: memtable,
            frozen: frozen_memtables,
            sstables: sstable_handles,
            data_dir,
            config,
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            hotspot,
            snapshots: Arc::new(SnapshotList::new()),
        })
    }

    /// Gracefully shuts down the engine.
    ///
    /// Flushes all remaining frozen memtables, checkpoints the manifest, and
    /// fsyncs all directories. The active memtable's data stays in its WAL
    /// and is replayed on the next open. Collection delete flags are
    /// memory-only and do not survive shutdown.
    pub fn close(&self) -> Result<(), EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        while !inner.frozen.is_empty() {
            Self::flush_frozen_to_sstable_inner(&mut inner, &self.hotspot)?;
        }

        let max_lsn = inner.active.max_lsn();
        inner.manifest.update_lsn(max_lsn)?;
        inner.manifest.checkpoint()?;

        let manifest_dir = format!("{}/{}", inner.data_dir, MANIFEST_DIR);
        let memtable_dir = format!("{}/{}", inner.data_dir, MEMTABLE_DIR);
        let sstable_dir = format!("{}/{}", inner.data_dir, SSTABLE_DIR);

        for dir_path in [&manifest_dir, &memtable_dir, &sstable_dir] {
            if let Ok(dir) = fs::File::open(dir_path) {
                dir.sync_all()?;
            }
        }
        if let Ok(root) = fs::File::open(&inner.data_dir) {
            root.sync_all()?;
        }

        Ok(())
    }

    /// Direct access to the hotspot manager (diagnostics, refcount queries).
    pub fn hotspot(&self) -> &HotspotManager {
        &self.hotspot
    }

    /// Takes an MVCC snapshot pinned at the current LSN.
    ///
    /// Reads through [`Engine::get_at`] / [`Engine::scan_at`] observe the
    /// state as of this point, regardless of later writes, deletes (including
    /// collection deletes), flushes, or compactions. The pin also blocks
    /// compaction from reclaiming versions the snapshot can still read.
    pub fn snapshot(&self) -> Result<Snapshot, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        Ok(Snapshot::new(
            inner.active.max_lsn(),
            Arc::clone(&self.snapshots),
        ))
    }

    /// Insert a key-value pair.
    ///
    /// Returns `Ok(true)` if the active memtable was frozen (caller should
    /// arrange a flush), `Ok(false)` otherwise.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<bool, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        match inner.active.put(key.clone(), value.clone()) {
            Ok(()) => Ok(false),

            Err(MemtableError::FlushRequired) => {
                Self::freeze_active(&mut inner)?;
                inner.active.put(key, value)?;

                let max_lsn = inner.active.max_lsn();
                inner.manifest.update_lsn(max_lsn)?;

                Ok(true)
            }

            Err(e) => Err(e.into()),
        }
    }

    /// Delete a key.
    ///
    /// For keys carrying a non-zero collection id, the delete is intercepted:
    /// the whole collection is marked logically deleted at the LSN the
    /// tombstone would have received, and **nothing** is written to the WAL
    /// or the memtable. For plain keys a point tombstone is inserted as
    /// usual.
    ///
    /// Returns `Ok(true)` if the active memtable was frozen, `Ok(false)`
    /// otherwise (always `false` for intercepted deletes).
    pub fn delete(&self, key: Vec<u8>) -> Result<bool, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        if self.hotspot.extract_collection(&key) != 0 {
            // Consume the LSN the tombstone would have been stamped with;
            // the engine write lock makes the mark atomic with respect to
            // in-flight readers.
            let lsn = inner.active.allocate_lsn();
            self.hotspot.intercept_delete(&key, lsn);
            return Ok(false);
        }

        match inner.active.delete(key.clone()) {
            Ok(()) => Ok(false),

            Err(MemtableError::FlushRequired) => {
                Self::freeze_active(&mut inner)?;
                inner.active.delete(key)?;

                let max_lsn = inner.active.max_lsn();
                inner.manifest.update_lsn(max_lsn)?;

                Ok(true)
            }

            Err(e) => Err(e.into()),
        }
    }

    /// Look up a single key at the latest state.
    ///
    /// Returns `Ok(Some(value))` if the key exists, `Ok(None)` if it has
    /// been deleted (point tombstone or collection delete) or was never
    /// written.
    pub fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError> {
        self.get_with_horizon(&key, LSN_MAX)
    }

    /// Look up a single key as of `snapshot`.
    pub fn get_at(&self, key: Vec<u8>, snapshot: &Snapshot) -> Result<Option<Vec<u8>>, EngineError> {
        self.get_with_horizon(&key, snapshot.lsn())
    }

    /// The shared lookup path: locate the newest version with
    /// `lsn ≤ visible_lsn` across all layers, then apply tombstone and
    /// collection-delete semantics.
    ///
    /// Lookup order is active memtable → frozen memtables → SSTables. The
    /// memtable layers are strictly newer in LSN-space than everything below
    /// them, so the first layer holding *any* visible version wins. SSTables
    /// are walked in `max_lsn`-descending order with early termination, and
    /// tables whose `min_lsn` exceeds the horizon are skipped outright.
    fn get_with_horizon(&self, key: &[u8], visible_lsn: u64) -> Result<Option<Vec<u8>>, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        let collection = self.hotspot.extract_collection(key);

        let resolve_put = |value: Vec<u8>, found_lsn: u64| -> Option<Vec<u8>> {
            if self
                .hotspot
                .is_collection_deleted(collection, visible_lsn, found_lsn)
            {
                None
            } else {
                Some(value)
            }
        };

        // 1. Active memtable (newest).
        match inner.active.get_at(key, visible_lsn)? {
            MemtableGetResult::Put { value, lsn } => return Ok(resolve_put(value, lsn)),
            MemtableGetResult::Delete { .. } => return Ok(None),
            MemtableGetResult::NotFound => {}
        }

        // 2. Frozen memtables (newest → oldest).
        for frozen in &inner.frozen {
            match frozen.get_at(key, visible_lsn)? {
                MemtableGetResult::Put { value, lsn } => return Ok(resolve_put(value, lsn)),
                MemtableGetResult::Delete { .. } => return Ok(None),
                MemtableGetResult::NotFound => {}
            }
        }

        // 3. SSTables (sorted by max_lsn descending).
        let mut best: Option<SstGetResult> = None;
        let mut best_lsn: u64 = 0;

        for sst in &inner.sstables {
            // Early termination: this SSTable (and all after it) cannot
            // contain a newer visible version.
            if best.is_some() && sst.properties.max_lsn <= best_lsn {
                break;
            }
            // Nothing in this table is visible at the horizon.
            if sst.properties.min_lsn > visible_lsn {
                continue;
            }

            match sst.get_at(key, visible_lsn)? {
                SstGetResult::NotFound => {}
                result => {
                    if result.lsn() > best_lsn {
                        best_lsn = result.lsn();
                        best = Some(result);
                    }
                }
            }
        }

        match best {
            Some(SstGetResult::Put { value, lsn, .. }) => Ok(resolve_put(value, lsn)),
            Some(SstGetResult::Delete { .. }) | Some(SstGetResult::NotFound) | None => Ok(None),
        }
    }

    /// Scan all live key-value pairs in `[start_key, end_key)` at the latest
    /// state.
    pub fn scan(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, Vec<u8>)> + use<>, EngineError> {
        self.scan_with_horizon(start_key, end_key, LSN_MAX)
    }

    /// Scan all key-value pairs in `[start_key, end_key)` visible at
    /// `snapshot`.
    pub fn scan_at(
        &self,
        start_key: &[u8],
        end_key: &[u8],
        snapshot: &Snapshot,
    ) -> Result<impl Iterator<Item = (Vec<u8>, Vec<u8>)> + use<>, EngineError> {
        self.scan_with_horizon(start_key, end_key, snapshot.lsn())
    }

    fn scan_with_horizon(
        &self,
        start_key: &[u8],
        end_key: &[u8],
        visible_lsn: u64,
    ) -> Result<VisibilityFilter<utils::MergeIterator<'static>>, EngineError> {
        let merged = self.raw_scan(start_key, end_key)?;
        Ok(VisibilityFilter::new(
            merged,
            visible_lsn,
            Arc::clone(&self.hotspot),
        ))
    }

    fn raw_scan(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> Result<utils::MergeIterator<'static>, EngineError> {
        if start_key >= end_key {
            return Ok(utils::MergeIterator::new(Vec::new()));
        }

        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        let mut iters: Vec<Box<dyn Iterator<Item = Record>>> = Vec::new();

        // Active memtable — collect to own the data.
        let active_records: Vec<_> = inner.active.scan(start_key, end_key)?.collect();
        iters.push(Box::new(active_records.into_iter()));

        // Frozen memtables.
        for frozen in &inner.frozen {
            let records: Vec<_> = frozen.scan(start_key, end_key)?.collect();
            iters.push(Box::new(records.into_iter()));
        }

        // SSTables.
        for sstable in &inner.sstables {
            let records: Vec<_> = sstable.scan(start_key, end_key)?.collect();
            iters.push(Box::new(records.into_iter()));
        }

        Ok(utils::MergeIterator::new(iters))
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        let sst_sizes: Vec<u64> = inner.sstables.iter().map(|s| s.file_size()).collect();
        let total_sst_size_bytes: u64 = sst_sizes.iter().sum();

        Ok(EngineStats {
            frozen_count: inner.frozen.len(),
            sstables_count: inner.sstables.len(),
            total_sst_size_bytes,
            sst_sizes,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Flush API
    // --------------------------------------------------------------------------------------------

    /// Freeze the current active memtable and swap in a fresh one.
    /// The old memtable is pushed to the front of `inner.frozen`.
    fn freeze_active(inner: &mut EngineInner) -> Result<(), EngineError> {
        let frozen_wal_id = inner.active.wal.wal_seq();
        let current_max_lsn = inner.active.max_lsn();
        let new_active_wal_id = frozen_wal_id + 1;

        let new_active = Memtable::new(
            wal_file_path(&inner.data_dir, new_active_wal_id),
            new_active_wal_id,
            None,
            inner.config.write_buffer_size,
        )?;

        let old_active = std::mem::replace(&mut inner.active, new_active);
        let frozen = old_active.frozen()?;
        // Insert at the front to keep newest-first order.
        inner.frozen.insert(0, frozen);

        // Ensure LSN continuity across the swap.
        inner.active.inject_max_lsn(current_max_lsn);

        inner.manifest.add_frozen_wal(frozen_wal_id)?;
        inner.manifest.set_active_wal(new_active_wal_id)?;

        Ok(())
    }

    /// Flush everything buffered in memory to SSTables: freezes the active
    /// memtable (if it holds data) and flushes all frozen memtables.
    ///
    /// Returns the number of SSTables produced.
    pub fn flush(&self) -> Result<usize, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        if !inner.active.is_empty() {
            Self::freeze_active(&mut inner)?;
            let max_lsn = inner.active.max_lsn();
            inner.manifest.update_lsn(max_lsn)?;
        }

        let mut count = 0usize;
        while !inner.frozen.is_empty() {
            if Self::flush_frozen_to_sstable_inner(&mut inner, &self.hotspot)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Flush the oldest frozen memtable to a new SSTable.
    ///
    /// Returns `Ok(true)` if a frozen memtable was flushed, `Ok(false)` if
    /// there were none.
    pub fn flush_oldest_frozen(&self) -> Result<bool, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        if inner.frozen.is_empty() {
            return Ok(false);
        }
        Self::flush_frozen_to_sstable_inner(&mut inner, &self.hotspot)?;
        Ok(true)
    }

    /// Flush **all** frozen memtables to SSTables.
    ///
    /// Returns the number of frozen memtables that were flushed.
    pub fn flush_all_frozen(&self) -> Result<usize, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        let mut count = 0usize;
        while !inner.frozen.is_empty() {
            Self::flush_frozen_to_sstable_inner(&mut inner, &self.hotspot)?;
            count += 1;
        }
        Ok(count)
    }

    /// Flushes the oldest frozen memtable. Returns `false` when the memtable
    /// was empty and no SSTable was produced.
    ///
    /// Runs under the engine write lock; the new SSTable's collection set is
    /// registered with the delete table *before* the table joins the
    /// readable set, so file refcounts never under-approximate disk state.
    fn flush_frozen_to_sstable_inner(
        inner: &mut EngineInner,
        hotspot: &HotspotManager,
    ) -> Result<bool, EngineError> {
        // Take the oldest frozen memtable (last in the newest-first vec).
        // Flushing oldest-first keeps `insert(0, sstable)` producing a
        // newest-first SSTable list.
        let Some(frozen) = inner.frozen.pop() else {
            return Ok(false);
        };
        let frozen_wal_id = frozen.memtable.wal.wal_seq();

        let entries: Vec<PointEntry> = frozen
            .iter_for_flush()?
            .map(|record| match record {
                Record::Put {
                    key,
                    value,
                    lsn,
                    timestamp,
                } => PointEntry {
                    key,
                    value: Some(value),
                    lsn,
                    timestamp,
                },
                Record::Delete {
                    key,
                    lsn,
                    timestamp,
                } => PointEntry {
                    key,
                    value: None,
                    lsn,
                    timestamp,
                },
            })
            .collect();

        if entries.is_empty() {
            // Nothing to persist; retire the WAL segment.
            inner.manifest.remove_frozen_wal(frozen_wal_id)?;
            drop(frozen);
            let wal_path = wal_file_path(&inner.data_dir, frozen_wal_id);
            if let Err(e) = fs::remove_file(&wal_path) {
                tracing::warn!(%e, %wal_path, "failed to remove empty frozen WAL");
            }
            return Ok(false);
        }

        let sstable_id = inner.manifest.allocate_sst_id()?;
        let sstable_path = format!(
            "{}/{}/sstable-{:06}.sst",
            inner.data_dir, SSTABLE_DIR, sstable_id
        );

        let count = entries.len();
        sstable::build_from_iterators(
            &sstable_path,
            hotspot.schema(),
            count,
            entries.into_iter(),
        )?;

        let mut sstable = SSTable::open(&sstable_path)?;
        sstable.id = sstable_id;

        // Register collection references before the table becomes readable.
        hotspot.register_file_refs(sstable_id, sstable.collections());

        tracing::info!(
            sstable_id,
            collections = sstable.collections().len(),
            records = sstable.properties.record_count,
            "flushed memtable to SSTable"
        );

        inner.sstables.insert(0, sstable);

        inner.manifest.add_sstable(ManifestSstEntry {
            id: sstable_id,
            path: sstable_path,
        })?;
        inner.manifest.remove_frozen_wal(frozen_wal_id)?;

        // The WAL's contents are durable in the SSTable now.
        drop(frozen);
        let wal_path = wal_file_path(&inner.data_dir, frozen_wal_id);
        if let Err(e) = fs::remove_file(&wal_path) {
            tracing::warn!(%e, %wal_path, "failed to remove flushed WAL segment");
        }

        Ok(true)
    }

    // --------------------------------------------------------------------------------------------
    // Compaction API
    // --------------------------------------------------------------------------------------------

    /// Execute a compaction strategy, applying the result to the engine and
    /// the delete-table accounting.
    ///
    /// Returns `Ok(true)` if compaction was performed, `Ok(false)` if the
    /// strategy decided there was nothing to do.
    fn run_compaction(
        &self,
        strategy: &dyn crate::compaction::CompactionStrategy,
    ) -> Result<bool, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        let inner = &mut *inner; // reborrow to split fields
        let sst_count = inner.sstables.len();

        let live_snapshots = self.snapshots.live();
        let ctx = CompactionContext {
            hotspot: &self.hotspot,
            live_snapshots: &live_snapshots,
        };

        let result = strategy
            .compact(
                &inner.sstables,
                &mut inner.manifest,
                &inner.data_dir,
                &inner.config,
                &ctx,
            )
            .map_err(|e| EngineError::Internal(format!("Compaction failed: {e}")))?;

        match result {
            None => {
                tracing::debug!(sst_count, "compaction strategy found nothing to do");
                Ok(false)
            }
            Some(cr) => {
                tracing::info!(
                    sst_count_before = sst_count,
                    removed = cr.removed_ids.len(),
                    outputs = cr.outputs.len(),
                    "compaction applied"
                );
                Self::apply_compaction_result(inner, &self.hotspot, cr)?;
                Ok(true)
            }
        }
    }

    /// Runs one round of **minor compaction** (size-tiered).
    ///
    /// Selects the best bucket whose size exceeds `min_threshold` and merges
    /// those SSTables, applying snapshot-aware version retention and the
    /// collection drop predicate.
    ///
    /// Returns `Ok(true)` if compaction was performed, `Ok(false)` if no
    /// bucket met the threshold.
    pub fn minor_compact(&self) -> Result<bool, EngineError> {
        let strategy = {
            let inner = self
                .inner
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            inner.config.compaction_strategy.minor()
        };
        self.run_compaction(strategy.as_ref())
    }

    /// Runs **major compaction** — merges all SSTables.
    ///
    /// Drops spent tombstones and physically reclaims logically deleted
    /// collections (subject to live snapshots). Output may split into
    /// several SSTables per [`EngineConfig::target_sst_size`].
    ///
    /// Returns `Ok(true)` if compaction was performed, `Ok(false)` if there
    /// was nothing on disk.
    pub fn major_compact(&self) -> Result<bool, EngineError> {
        let strategy = {
            let inner = self
                .inner
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            inner.config.compaction_strategy.major()
        };
        self.run_compaction(strategy.as_ref())
    }

    /// Applies a [`CompactionResult`] to the in-memory engine state and the
    /// delete table, in one write-lock critical section.
    ///
    /// The accounting derives entirely from SSTable collection metadata: the
    /// involved set is the union over consumed handles, the output mapping
    /// comes from the freshly opened output files. Credit-before-debit
    /// inside the table keeps refcounts from under-approximating disk state.
    fn apply_compaction_result(
        inner: &mut EngineInner,
        hotspot: &HotspotManager,
        cr: CompactionResult,
    ) -> Result<(), EngineError> {
        // Involved collections, from the consumed input handles.
        let mut involved: HashSet<u64> = HashSet::new();
        for sst in inner
            .sstables
            .iter()
            .filter(|sst| cr.removed_ids.contains(&sst.id))
        {
            involved.extend(sst.collections().iter().copied());
        }

        // Open outputs and derive their surviving-collection sets.
        let mut outputs_map: BTreeMap<u64, HashSet<u64>> = BTreeMap::new();
        let mut new_handles: Vec<SSTable> = Vec::new();
        for out in &cr.outputs {
            let mut sst = SSTable::open(&out.path)?;
            sst.id = out.id;
            outputs_map.insert(out.id, sst.collections().iter().copied().collect());
            new_handles.push(sst);
        }

        // Reference accounting: credit outputs, debit inputs, reclaim.
        hotspot.apply_compaction_result(involved, cr.removed_ids.clone(), outputs_map);

        // Swap the SSTable list.
        inner.sstables.retain(|sst| !cr.removed_ids.contains(&sst.id));
        inner.sstables.extend(new_handles);

        // Re-sort by max_lsn descending to maintain the early-termination
        // invariant used by get().
        inner
            .sstables
            .sort_by(|a, b| b.properties.max_lsn.cmp(&a.properties.max_lsn));

        Ok(())
    }
}
