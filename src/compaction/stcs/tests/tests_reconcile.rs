//! Version reconciliation: snapshot striping, collection drops, and the
//! tombstone rules.

use crate::compaction::{CompactionContext, ReconcileMode, reconcile_records};
use crate::engine::utils::Record;
use crate::hotspot::{HotspotManager, KeySchema};
use crate::sstable::PointEntry;

fn collection_key(collection: u64, suffix: u32) -> Vec<u8> {
    let mut key = vec![0u8; 16];
    key.extend_from_slice(&collection.to_be_bytes());
    key.extend_from_slice(&suffix.to_be_bytes());
    key
}

fn put(key: &[u8], lsn: u64) -> Record {
    Record::Put {
        key: key.to_vec(),
        value: format!("v{lsn}").into_bytes(),
        lsn,
        timestamp: lsn,
    }
}

fn del(key: &[u8], lsn: u64) -> Record {
    Record::Delete {
        key: key.to_vec(),
        lsn,
        timestamp: lsn,
    }
}

fn lsns(entries: &[PointEntry]) -> Vec<u64> {
    entries.iter().map(|e| e.lsn).collect()
}

fn reconcile(
    records: Vec<Record>,
    hotspot: &HotspotManager,
    snapshots: &[u64],
    mode: ReconcileMode,
) -> Vec<PointEntry> {
    let ctx = CompactionContext {
        hotspot,
        live_snapshots: snapshots,
    };
    reconcile_records(records.into_iter(), &ctx, mode)
}

// ----------------------------------------------------------------
// Snapshot striping
// ----------------------------------------------------------------

#[test]
fn no_snapshots_keeps_only_newest_version() {
    let hotspot = HotspotManager::new(KeySchema::default());
    let records = vec![put(b"k", 30), put(b"k", 20), put(b"k", 10)];

    let kept = reconcile(records, &hotspot, &[], ReconcileMode::Major);
    assert_eq!(lsns(&kept), vec![30]);
}

#[test]
fn one_version_per_snapshot_stripe_survives() {
    let hotspot = HotspotManager::new(KeySchema::default());
    // Snapshot at 15 separates {10} from {20, 30}.
    let records = vec![put(b"k", 30), put(b"k", 20), put(b"k", 10)];

    let kept = reconcile(records, &hotspot, &[15], ReconcileMode::Major);
    assert_eq!(lsns(&kept), vec![30, 10]);
}

#[test]
fn snapshot_at_version_lsn_pins_it() {
    let hotspot = HotspotManager::new(KeySchema::default());
    let records = vec![put(b"k", 30), put(b"k", 10)];

    let kept = reconcile(records, &hotspot, &[10], ReconcileMode::Major);
    assert_eq!(lsns(&kept), vec![30, 10]);
}

#[test]
fn every_stripe_boundary_retains_a_version() {
    let hotspot = HotspotManager::new(KeySchema::default());
    let records = vec![put(b"k", 40), put(b"k", 30), put(b"k", 20), put(b"k", 10)];

    // Snapshots isolating each version.
    let kept = reconcile(records, &hotspot, &[10, 20, 30], ReconcileMode::Major);
    assert_eq!(lsns(&kept), vec![40, 30, 20, 10]);
}

#[test]
fn distinct_keys_stripe_independently() {
    let hotspot = HotspotManager::new(KeySchema::default());
    let records = vec![put(b"a", 20), put(b"a", 10), put(b"b", 22), put(b"b", 12)];

    let kept = reconcile(records, &hotspot, &[], ReconcileMode::Major);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].key, b"a".to_vec());
    assert_eq!(kept[0].lsn, 20);
    assert_eq!(kept[1].key, b"b".to_vec());
    assert_eq!(kept[1].lsn, 22);
}

// ----------------------------------------------------------------
// Tombstone rules
// ----------------------------------------------------------------

#[test]
fn major_drops_tombstone_with_nothing_beneath() {
    let hotspot = HotspotManager::new(KeySchema::default());
    let records = vec![del(b"k", 20), put(b"k", 10)];

    // The put is shadowed in the same stripe, leaving the tombstone with
    // nothing to suppress — it goes too.
    let kept = reconcile(records, &hotspot, &[], ReconcileMode::Major);
    assert!(kept.is_empty());
}

#[test]
fn major_keeps_tombstone_guarding_a_pinned_version() {
    let hotspot = HotspotManager::new(KeySchema::default());
    let records = vec![del(b"k", 20), put(b"k", 10)];

    // Snapshot at 10 pins the put; the tombstone must stay so newer reads
    // still see the key as deleted.
    let kept = reconcile(records, &hotspot, &[10], ReconcileMode::Major);
    assert_eq!(lsns(&kept), vec![20, 10]);
    assert!(kept[0].value.is_none());
    assert!(kept[1].value.is_some());
}

#[test]
fn minor_preserves_tombstones() {
    let hotspot = HotspotManager::new(KeySchema::default());
    let records = vec![del(b"k", 20), put(b"k", 10)];

    // Other files outside the merge set may still hold covered data.
    let kept = reconcile(records, &hotspot, &[], ReconcileMode::Minor);
    assert_eq!(lsns(&kept), vec![20]);
    assert!(kept[0].value.is_none());
}

// ----------------------------------------------------------------
// Collection drops
// ----------------------------------------------------------------

#[test]
fn deleted_collection_versions_are_elided() {
    let hotspot = HotspotManager::new(KeySchema::default());
    let key = collection_key(100, 1);
    hotspot.intercept_delete(&key, 50);

    let records = vec![put(&key, 30), put(&key, 20)];
    let kept = reconcile(records, &hotspot, &[], ReconcileMode::Major);
    assert!(kept.is_empty(), "all versions predate the delete");
}

#[test]
fn versions_after_the_delete_survive() {
    let hotspot = HotspotManager::new(KeySchema::default());
    let key = collection_key(100, 1);
    hotspot.intercept_delete(&key, 50);

    let records = vec![put(&key, 60), put(&key, 30)];
    let kept = reconcile(records, &hotspot, &[], ReconcileMode::Major);
    assert_eq!(lsns(&kept), vec![60]);
}

#[test]
fn snapshot_inside_delete_window_blocks_elision() {
    let hotspot = HotspotManager::new(KeySchema::default());
    let key = collection_key(100, 1);
    hotspot.intercept_delete(&key, 50);

    // Snapshot at 40 still reads the version written at 30.
    let records = vec![put(&key, 30)];
    let kept = reconcile(records, &hotspot, &[40], ReconcileMode::Major);
    assert_eq!(lsns(&kept), vec![30]);

    // Without the snapshot the version is reclaimable.
    let records = vec![put(&key, 30)];
    let kept = reconcile(records, &hotspot, &[], ReconcileMode::Major);
    assert!(kept.is_empty());
}

#[test]
fn unrelated_collections_are_untouched() {
    let hotspot = HotspotManager::new(KeySchema::default());
    let doomed = collection_key(100, 1);
    let alive = collection_key(200, 1);
    hotspot.intercept_delete(&doomed, 50);

    let mut records = vec![put(&doomed, 30), put(&alive, 31)];
    records.sort_by(|a, b| crate::engine::utils::record_cmp(a, b));

    let kept = reconcile(records, &hotspot, &[], ReconcileMode::Major);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].key, alive);
}

#[test]
fn plain_keys_never_match_the_drop_predicate() {
    let hotspot = HotspotManager::new(KeySchema::default());
    hotspot.delete_table().mark_deleted(7, 100);

    // Key too short to carry a collection id.
    let records = vec![put(b"plain", 5)];
    let kept = reconcile(records, &hotspot, &[], ReconcileMode::Major);
    assert_eq!(kept.len(), 1);
}
