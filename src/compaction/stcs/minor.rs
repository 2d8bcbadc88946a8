//! Minor compaction — size-tiered, bucket-based.
//!
//! Merges a group of similarly-sized SSTables, applying snapshot-striped
//! version retention and the collection drop predicate. **Surviving
//! tombstones are preserved** — SSTables outside the merge set may still
//! hold covered data.

use super::{bucket_sstables, select_compaction_bucket};
use crate::compaction::{
    CompactionContext, CompactionError, CompactionResult, ReconcileMode, finalize_compaction,
    full_range_scan_iters, reconcile_records,
};
use crate::engine::EngineConfig;
use crate::engine::utils::MergeIterator;
use crate::manifest::Manifest;
use crate::sstable::SSTable;
use tracing::{debug, info};

/// Checks if minor compaction is needed and executes it if so.
///
/// Returns `Ok(Some(result))` if compaction was performed, or `Ok(None)` if
/// no bucket met the threshold.
pub fn maybe_compact(
    sstables: &[SSTable],
    manifest: &mut Manifest,
    data_dir: &str,
    config: &EngineConfig,
    ctx: &CompactionContext<'_>,
) -> Result<Option<CompactionResult>, CompactionError> {
    let buckets = bucket_sstables(sstables, config);
    let selected = match select_compaction_bucket(&buckets, config) {
        Some(s) => s,
        None => {
            debug!(
                sstable_count = sstables.len(),
                "minor compaction: no bucket met threshold"
            );
            return Ok(None);
        }
    };

    let selected_ids: Vec<u64> = selected.iter().map(|&i| sstables[i].id).collect();
    info!(
        selected_count = selected.len(),
        ?selected_ids,
        "minor compaction: starting merge"
    );

    let result = execute(sstables, &selected, manifest, data_dir, config, ctx)?;

    info!(
        output_count = result.outputs.len(),
        removed_count = result.removed_ids.len(),
        "minor compaction: complete"
    );

    Ok(Some(result))
}

/// Executes minor compaction on the selected SSTable indices.
fn execute(
    sstables: &[SSTable],
    selected_indices: &[usize],
    manifest: &mut Manifest,
    data_dir: &str,
    config: &EngineConfig,
    ctx: &CompactionContext<'_>,
) -> Result<CompactionResult, CompactionError> {
    let selected_ssts: Vec<&SSTable> = selected_indices.iter().map(|&i| &sstables[i]).collect();
    let removed_ids: Vec<u64> = selected_ssts.iter().map(|s| s.id).collect();

    // Streaming merge over the selected SSTables.
    let iters = full_range_scan_iters(&selected_ssts)?;
    let merge_iter = MergeIterator::new(iters);

    // Snapshot-aware retention; tombstones survive the subset merge.
    let entries = reconcile_records(merge_iter, ctx, ReconcileMode::Minor);

    finalize_compaction(
        manifest,
        data_dir,
        removed_ids,
        entries,
        ctx,
        config.target_sst_size,
    )
}
