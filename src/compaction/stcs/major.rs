//! Major compaction — full merge of all SSTables.
//!
//! Because the entire on-disk dataset participates, this is where logical
//! state becomes physical: tombstones whose covered data is gone are
//! dropped, and versions of logically deleted collections are elided
//! (subject to live snapshots), letting the delete table retire the
//! collection's last file references.

use crate::compaction::{
    CompactionContext, CompactionError, CompactionResult, ReconcileMode, finalize_compaction,
    full_range_scan_iters, reconcile_records,
};
use crate::engine::EngineConfig;
use crate::engine::utils::MergeIterator;
use crate::manifest::Manifest;
use crate::sstable::SSTable;
use tracing::{debug, info};

/// Executes a major compaction, merging all SSTables.
///
/// Always user-triggered (via `Engine::major_compact()`). Runs with any
/// number of SSTables ≥ 1 — rewriting even a single file is how a deleted
/// collection's data is physically reclaimed on demand.
///
/// Returns `Ok(None)` when there is nothing on disk.
pub fn compact(
    sstables: &[SSTable],
    manifest: &mut Manifest,
    data_dir: &str,
    config: &EngineConfig,
    ctx: &CompactionContext<'_>,
) -> Result<Option<CompactionResult>, CompactionError> {
    if sstables.is_empty() {
        debug!("major compaction: no SSTables, skipping");
        return Ok(None);
    }

    let ids: Vec<u64> = sstables.iter().map(|s| s.id).collect();
    info!(
        sstable_count = sstables.len(),
        ?ids,
        "major compaction: starting full merge"
    );

    let result = execute(sstables, manifest, data_dir, config, ctx)?;

    info!(
        output_count = result.outputs.len(),
        removed_count = result.removed_ids.len(),
        "major compaction: complete"
    );

    Ok(Some(result))
}

fn execute(
    sstables: &[SSTable],
    manifest: &mut Manifest,
    data_dir: &str,
    config: &EngineConfig,
    ctx: &CompactionContext<'_>,
) -> Result<CompactionResult, CompactionError> {
    let sst_refs: Vec<&SSTable> = sstables.iter().collect();
    let removed_ids: Vec<u64> = sstables.iter().map(|s| s.id).collect();

    let iters = full_range_scan_iters(&sst_refs)?;
    let merge_iter = MergeIterator::new(iters);

    // Full-merge reconciliation: snapshot striping, collection drops, and
    // spent-tombstone removal.
    let entries = reconcile_records(merge_iter, ctx, ReconcileMode::Major);

    finalize_compaction(
        manifest,
        data_dir,
        removed_ids,
        entries,
        ctx,
        config.target_sst_size,
    )
}
