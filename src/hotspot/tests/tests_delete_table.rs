//! Delete table basics: tracking, delete marking, visibility, reclamation.

use crate::hotspot::{DeleteTable, LSN_MAX};

// ----------------------------------------------------------------
// Tracking
// ----------------------------------------------------------------

#[test]
fn track_is_idempotent_and_signals_first_insert() {
    let table = DeleteTable::new();

    assert!(table.track_file(100, 1), "first insert reports newly added");
    assert!(!table.track_file(100, 1), "second insert is a no-op");
    assert_eq!(table.ref_count(100), 1);
}

#[test]
fn ref_count_follows_tracked_files() {
    let table = DeleteTable::new();

    table.track_file(100, 1);
    table.track_file(100, 2);
    table.track_file(100, 3);
    assert_eq!(table.ref_count(100), 3);

    table.untrack_file(100, 2);
    assert_eq!(table.ref_count(100), 2);
}

#[test]
fn untracked_collection_reports_defaults() {
    let table = DeleteTable::new();

    assert!(!table.is_tracked(5));
    assert_eq!(table.ref_count(5), 0);
    assert_eq!(table.delete_lsn(5), LSN_MAX);
    assert!(!table.is_deleted(5, LSN_MAX, 0));
}

#[test]
fn untrack_of_unknown_file_is_noop() {
    let table = DeleteTable::new();

    table.track_file(100, 1);
    table.untrack_file(100, 99);
    table.untrack_file(777, 1);
    assert_eq!(table.ref_count(100), 1);
}

// ----------------------------------------------------------------
// Delete marking
// ----------------------------------------------------------------

#[test]
fn mark_deleted_records_lsn() {
    let table = DeleteTable::new();

    assert!(table.mark_deleted(100, 10));
    assert_eq!(table.delete_lsn(100), 10);
}

#[test]
fn delete_lsn_is_monotonic() {
    let table = DeleteTable::new();

    table.mark_deleted(100, 10);
    table.mark_deleted(100, 5); // stale delete must not regress
    assert_eq!(table.delete_lsn(100), 10);

    table.mark_deleted(100, 20);
    assert_eq!(table.delete_lsn(100), 20);
}

#[test]
fn mark_deleted_before_any_registration_keeps_entry() {
    // A delete may precede the first flush; the entry must survive with an
    // empty file set until untrack-time reclamation applies.
    let table = DeleteTable::new();

    table.mark_deleted(100, 10);
    assert!(table.is_tracked(100));
    assert_eq!(table.ref_count(100), 0);
}

#[test]
fn lazy_creation_commutes() {
    let a = DeleteTable::new();
    a.mark_deleted(100, 10);
    a.track_file(100, 1);

    let b = DeleteTable::new();
    b.track_file(100, 1);
    b.mark_deleted(100, 10);

    for t in [&a, &b] {
        assert_eq!(t.ref_count(100), 1);
        assert_eq!(t.delete_lsn(100), 10);
        assert!(t.is_deleted(100, LSN_MAX, 0));
    }
}

// ----------------------------------------------------------------
// Visibility predicate
// ----------------------------------------------------------------

#[test]
fn visibility_requires_delete_mark() {
    let table = DeleteTable::new();

    table.track_file(100, 1);
    assert!(!table.is_deleted(100, LSN_MAX, 0));
}

#[test]
fn snapshot_before_delete_still_sees_data() {
    let table = DeleteTable::new();
    table.mark_deleted(100, 10);

    // Reader pinned at LSN 9 predates the delete.
    assert!(!table.is_deleted(100, 9, 5));
    // Reader at or after the delete does not.
    assert!(table.is_deleted(100, 10, 5));
    assert!(table.is_deleted(100, LSN_MAX, 5));
}

#[test]
fn data_at_delete_tick_survives() {
    // Strict comparison: a put sharing the delete's LSN is new data.
    let table = DeleteTable::new();
    table.mark_deleted(100, 10);

    assert!(table.is_deleted(100, LSN_MAX, 9));
    assert!(!table.is_deleted(100, LSN_MAX, 10));
    assert!(!table.is_deleted(100, LSN_MAX, 11));
}

// ----------------------------------------------------------------
// Reclamation
// ----------------------------------------------------------------

#[test]
fn untrack_reclaims_deleted_empty_entry() {
    let table = DeleteTable::new();

    table.track_file(100, 1);
    table.mark_deleted(100, 10);
    assert!(table.is_tracked(100));

    table.untrack_file(100, 1);
    assert!(!table.is_tracked(100), "deleted + empty must be erased");
}

#[test]
fn untrack_keeps_live_empty_entry() {
    // Not marked deleted: the entry stays (it may be re-registered).
    let table = DeleteTable::new();

    table.track_file(200, 1);
    table.untrack_file(200, 1);
    assert!(table.is_tracked(200));
    assert_eq!(table.ref_count(200), 0);
}

#[test]
fn batched_untrack_runs_single_reclaim_check() {
    let table = DeleteTable::new();

    for id in 1..=4 {
        table.track_file(300, id);
    }
    table.mark_deleted(300, 50);

    table.untrack_files(300, &[1, 2, 3]);
    assert!(table.is_tracked(300));
    assert_eq!(table.ref_count(300), 1);

    table.untrack_files(300, &[4]);
    assert!(!table.is_tracked(300));
}
