//! # Compaction Module
//!
//! Size-tiered compaction for the engine, in two flavors:
//!
//! ## Minor Compaction (Size-Tiered)
//!
//! Groups SSTables into **size buckets** and merges similarly-sized tables
//! when a bucket exceeds `min_threshold` entries. Point tombstones are
//! **preserved** — SSTables outside the merge set may still hold covered
//! data.
//!
//! ## Major Compaction (Full Merge)
//!
//! User-triggered via `Engine::major_compact()`. Merges **all** SSTables;
//! tombstones with nothing left to suppress are dropped.
//!
//! ## MVCC version retention
//!
//! Both flavors share [`reconcile_records`], which walks each key's versions
//! newest-first and keeps exactly one version per **snapshot stripe**: for
//! every live snapshot LSN (plus the implicit latest-state horizon), the
//! newest version at or below it survives; everything shadowed within a
//! stripe is dropped. On top of that, versions covered by a **collection
//! delete** are dropped whenever no live snapshot in `[version, delete)`
//! could still read them — this is the mechanism that physically reclaims
//! logically deleted collections without tombstones.
//!
//! ## Multi-output finalization
//!
//! [`finalize_compaction`] splits surviving entries into multiple SSTables at
//! key-group boundaries once an output exceeds `target_sst_size`, then
//! applies the whole add/remove set to the manifest atomically. The engine
//! feeds the resulting output→collection mapping to the hotspot delete table
//! so reference accounting survives file splits.

pub mod stcs;

pub use crate::engine::utils::MergeIterator;

use crate::engine::EngineConfig;
use crate::engine::utils::Record;
use crate::hotspot::HotspotManager;
use crate::manifest::{Manifest, ManifestError, ManifestSstEntry};
use crate::sstable::{self, PointEntry, SSTable, SSTableError};

use crate::engine::SSTABLE_DIR;
use tracing::{debug, info, warn};

// ------------------------------------------------------------------------------------------------
// CompactionStrategy trait
// ------------------------------------------------------------------------------------------------

/// Ambient state a compaction needs beyond the SSTable set: the collection
/// delete predicate and the live snapshot horizon list (sorted ascending).
pub struct CompactionContext<'a> {
    pub hotspot: &'a HotspotManager,
    pub live_snapshots: &'a [u64],
}

/// A uniform interface for compaction strategies.
///
/// Each strategy receives the current SSTables, a mutable manifest for
/// atomic metadata updates, the data directory, the engine configuration,
/// and the [`CompactionContext`]. It returns:
///
/// - `Ok(Some(result))` — compaction was performed; the caller updates
///   in-memory state and reference accounting from [`CompactionResult`].
/// - `Ok(None)` — nothing to compact (thresholds not met, etc.).
pub trait CompactionStrategy {
    /// Execute one round of compaction, if the strategy's preconditions are
    /// met. Implementations must be idempotent — calling when there is
    /// nothing to do simply returns `Ok(None)`.
    fn compact(
        &self,
        sstables: &[SSTable],
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
        ctx: &CompactionContext<'_>,
    ) -> Result<Option<CompactionResult>, CompactionError>;
}

// ------------------------------------------------------------------------------------------------
// CompactionStrategyType — config-level strategy selector
// ------------------------------------------------------------------------------------------------

/// Selects which compaction strategy family the engine should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyType {
    /// Size-Tiered Compaction Strategy (STCS).
    ///
    /// Groups SSTables into size buckets and merges similarly-sized tables.
    /// Good for write-heavy workloads with moderate space amplification.
    Stcs,
}

impl CompactionStrategyType {
    /// Returns the minor compaction strategy for this family.
    pub fn minor(&self) -> Box<dyn CompactionStrategy> {
        match self {
            Self::Stcs => Box::new(stcs::MinorCompaction),
        }
    }

    /// Returns the major compaction strategy for this family.
    pub fn major(&self) -> Box<dyn CompactionStrategy> {
        match self {
            Self::Stcs => Box::new(stcs::MajorCompaction),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Shared types
// ------------------------------------------------------------------------------------------------

/// One SSTable produced by a compaction.
#[derive(Debug, Clone)]
pub struct NewSst {
    /// Allocated SSTable id.
    pub id: u64,

    /// Path of the built file.
    pub path: String,
}

/// Result of a compaction execution — enough information to update the
/// manifest, the in-memory SSTable list, and the delete-table accounting.
#[derive(Debug)]
pub struct CompactionResult {
    /// SSTable ids that were consumed (already removed from the manifest).
    pub removed_ids: Vec<u64>,

    /// Newly built SSTables. Empty when every entry was eliminated — the
    /// zero-output case that lets a fully deleted collection vanish.
    pub outputs: Vec<NewSst>,
}

/// Unified error type for all compaction strategies.
#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How [`reconcile_records`] treats tombstones that survive striping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Subset merge: other SSTables may hold older covered versions, so
    /// every surviving tombstone is preserved.
    Minor,

    /// Full merge: a tombstone with no surviving older version beneath it
    /// suppresses nothing anywhere and is dropped.
    Major,
}

// ------------------------------------------------------------------------------------------------
// Version reconciliation
// ------------------------------------------------------------------------------------------------

/// The snapshot stripe a version belongs to: the smallest live snapshot LSN
/// at or above it, or `u64::MAX` for the latest-state stripe.
fn stripe_for(lsn: u64, live_snapshots: &[u64]) -> u64 {
    let idx = live_snapshots.partition_point(|&s| s < lsn);
    live_snapshots.get(idx).copied().unwrap_or(u64::MAX)
}

/// Reconciles a merged `(key ASC, LSN DESC)` record stream into the entries
/// that must survive compaction.
///
/// Per key:
///
/// 1. **Snapshot striping.** Walking versions newest-first, the first version
///    landing in each snapshot stripe is kept; later (older) versions in the
///    same stripe are shadowed and dropped.
/// 2. **Collection drop.** A kept version whose collection is logically
///    deleted is dropped when no live snapshot inside `[version, delete)`
///    could still read it.
/// 3. **Tombstone rule.** In [`ReconcileMode::Major`], trailing tombstones —
///    those with no surviving older version of the key beneath them — are
///    dropped. In [`ReconcileMode::Minor`] all surviving tombstones are kept.
pub fn reconcile_records(
    merge_iter: impl Iterator<Item = Record>,
    ctx: &CompactionContext<'_>,
    mode: ReconcileMode,
) -> Vec<PointEntry> {
    let mut out: Vec<PointEntry> = Vec::new();

    let mut current_key: Option<Vec<u8>> = None;
    let mut current_collection: u64 = 0;
    let mut last_stripe: Option<u64> = None;
    let mut group_start = 0usize; // index into `out` where this key's entries begin

    let close_group = |out: &mut Vec<PointEntry>, group_start: usize| {
        if mode == ReconcileMode::Major {
            // Strip trailing tombstones: oldest-first from the group's tail.
            while out.len() > group_start && out.last().is_some_and(|e| e.value.is_none()) {
                out.pop();
            }
        }
    };

    for record in merge_iter {
        if current_key.as_deref() != Some(record.key().as_slice()) {
            close_group(&mut out, group_start);
            current_key = Some(record.key().clone());
            current_collection = ctx.hotspot.extract_collection(record.key());
            last_stripe = None;
            group_start = out.len();
        }

        let lsn = record.lsn();

        // 1. Snapshot striping — only the newest version per stripe survives.
        let stripe = stripe_for(lsn, ctx.live_snapshots);
        if last_stripe == Some(stripe) {
            continue;
        }
        last_stripe = Some(stripe);

        // 2. Collection drop predicate.
        if ctx
            .hotspot
            .should_drop_at_compaction(current_collection, lsn, ctx.live_snapshots)
        {
            continue;
        }

        out.push(match record {
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
        });
    }
    close_group(&mut out, group_start);

    out
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Creates scan iterators for the given SSTables covering their full key
/// range, suitable for feeding into [`MergeIterator`].
///
/// Iteration is streaming — one data block per SSTable resident at a time.
pub fn full_range_scan_iters<'a>(
    sstables: &[&'a SSTable],
) -> Result<Vec<Box<dyn Iterator<Item = Record> + 'a>>, SSTableError> {
    if sstables.is_empty() {
        return Ok(Vec::new());
    }

    let min_key = sstables
        .iter()
        .map(|s| &s.properties.min_key)
        .min()
        .ok_or_else(|| SSTableError::Internal("empty sstables in full_range_scan".into()))?
        .clone();

    let mut max_key = sstables
        .iter()
        .map(|s| &s.properties.max_key)
        .max()
        .ok_or_else(|| SSTableError::Internal("empty sstables in full_range_scan".into()))?
        .clone();
    // Extend past the actual max key to make the bound exclusive.
    max_key.push(0xFF);

    let mut iters: Vec<Box<dyn Iterator<Item = Record> + 'a>> = Vec::new();
    for sst in sstables {
        let scan = sst.scan(&min_key, &max_key)?;
        iters.push(Box::new(scan));
    }

    Ok(iters)
}

// ------------------------------------------------------------------------------------------------
// Finalize — shared build + manifest + cleanup
// ------------------------------------------------------------------------------------------------

/// Approximate per-cell overhead beyond key and value bytes, used for the
/// output-splitting size estimate.
const CELL_OVERHEAD: usize = 25;

/// Splits `entries` into consecutive output files, closing a file at a
/// key-group boundary once it exceeds `target_sst_size` bytes (estimated).
fn split_into_outputs(entries: Vec<PointEntry>, target_sst_size: usize) -> Vec<Vec<PointEntry>> {
    let mut outputs: Vec<Vec<PointEntry>> = Vec::new();
    let mut current: Vec<PointEntry> = Vec::new();
    let mut current_bytes = 0usize;

    for entry in entries {
        // Never split the versions of one key across files.
        let same_key = current.last().is_some_and(|prev| prev.key == entry.key);
        if !same_key && current_bytes >= target_sst_size && !current.is_empty() {
            outputs.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current_bytes +=
            CELL_OVERHEAD + entry.key.len() + entry.value.as_ref().map_or(0, Vec::len);
        current.push(entry);
    }

    if !current.is_empty() {
        outputs.push(current);
    }

    outputs
}

/// Builds the output SSTables for a compaction, atomically updates the
/// manifest, and deletes the consumed files.
///
/// If `entries` is empty no output is produced — the consumed SSTables are
/// simply removed (this is what makes zero-output collection GC possible).
///
/// This is the common tail shared by minor and major compaction.
pub(crate) fn finalize_compaction(
    manifest: &mut Manifest,
    data_dir: &str,
    removed_ids: Vec<u64>,
    entries: Vec<PointEntry>,
    ctx: &CompactionContext<'_>,
    target_sst_size: usize,
) -> Result<CompactionResult, CompactionError> {
    use std::fs;

    if entries.is_empty() {
        info!(
            removed_count = removed_ids.len(),
            ?removed_ids,
            "finalize: all entries eliminated, removing old SSTables"
        );
        manifest.apply_compaction(Vec::new(), removed_ids.clone())?;
        manifest.checkpoint()?;

        for id in &removed_ids {
            let path = format!("{}/{}/sstable-{:06}.sst", data_dir, SSTABLE_DIR, id);
            if let Err(e) = fs::remove_file(&path) {
                warn!(id, %e, "failed to remove old SSTable file during compaction");
            }
        }

        return Ok(CompactionResult {
            removed_ids,
            outputs: Vec::new(),
        });
    }

    let chunks = split_into_outputs(entries, target_sst_size);

    let mut outputs: Vec<NewSst> = Vec::new();
    let mut added: Vec<ManifestSstEntry> = Vec::new();

    for chunk in chunks {
        let new_sst_id = manifest.allocate_sst_id()?;
        let new_sst_path = format!("{}/{}/sstable-{:06}.sst", data_dir, SSTABLE_DIR, new_sst_id);

        let count = chunk.len();
        debug!(
            new_sst_id,
            entry_count = count,
            path = %new_sst_path,
            "finalize: building output SSTable"
        );

        sstable::build_from_iterators(
            &new_sst_path,
            ctx.hotspot.schema(),
            count,
            chunk.into_iter(),
        )?;

        added.push(ManifestSstEntry {
            id: new_sst_id,
            path: new_sst_path.clone(),
        });
        outputs.push(NewSst {
            id: new_sst_id,
            path: new_sst_path,
        });
    }

    // Atomic manifest update: add all outputs, remove all inputs.
    manifest.apply_compaction(added, removed_ids.clone())?;
    manifest.checkpoint()?;

    for id in &removed_ids {
        let path = format!("{}/{}/sstable-{:06}.sst", data_dir, SSTABLE_DIR, id);
        if let Err(e) = fs::remove_file(&path) {
            warn!(id, %e, "failed to remove old SSTable file during compaction");
        }
    }

    info!(
        removed_count = removed_ids.len(),
        output_count = outputs.len(),
        "finalize: compaction applied"
    );

    Ok(CompactionResult {
        removed_ids,
        outputs,
    })
}
