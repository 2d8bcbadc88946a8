//! MVCC snapshot isolation, including interplay with collection deletes
//! and compaction.

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::engine::tests::helpers::*;
    use tempfile::TempDir;

    #[test]
    fn snapshot_ignores_later_writes() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
        let snap = engine.snapshot().unwrap();

        engine.put(b"k".to_vec(), b"v2".to_vec()).unwrap();

        assert_eq!(engine.get(b"k".to_vec()).unwrap(), Some(b"v2".to_vec()));
        assert_eq!(
            engine.get_at(b"k".to_vec(), &snap).unwrap(),
            Some(b"v1".to_vec())
        );
    }

    #[test]
    fn snapshot_ignores_later_tombstones() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        let snap = engine.snapshot().unwrap();
        engine.delete(b"k".to_vec()).unwrap();

        assert_eq!(engine.get(b"k".to_vec()).unwrap(), None);
        assert_eq!(
            engine.get_at(b"k".to_vec(), &snap).unwrap(),
            Some(b"v".to_vec())
        );
    }

    #[test]
    fn snapshot_before_key_existed_sees_nothing() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        let snap = engine.snapshot().unwrap();
        engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();

        assert_eq!(engine.get_at(b"k".to_vec(), &snap).unwrap(), None);
    }

    // ----------------------------------------------------------------
    // Time travel across a collection delete
    // ----------------------------------------------------------------

    #[test]
    fn time_travel_read_survives_collection_delete() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), default_config()).unwrap();

        for i in 0..100 {
            engine
                .put(collection_key(100, i), b"v_original".to_vec())
                .unwrap();
        }
        engine.flush().unwrap();

        let snap = engine.snapshot().unwrap();

        engine.delete(collection_key(100, 0)).unwrap();

        // Current view: everything gone.
        let (lo, hi) = collection_bounds(100);
        assert_eq!(collect_scan(&engine, &lo, &hi).len(), 0);
        assert_eq!(engine.get(collection_key(100, 50)).unwrap(), None);

        // Historical view: all 100 keys intact.
        let historical: Vec<_> = engine.scan_at(&lo, &hi, &snap).unwrap().collect();
        assert_eq!(historical.len(), 100);
        assert_eq!(
            engine.get_at(collection_key(100, 50), &snap).unwrap(),
            Some(b"v_original".to_vec())
        );
    }

    #[test]
    fn snapshot_taken_after_delete_sees_the_delete() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), default_config()).unwrap();

        engine.put(collection_key(100, 1), b"v".to_vec()).unwrap();
        engine.flush().unwrap();
        engine.delete(collection_key(100, 1)).unwrap();

        let snap = engine.snapshot().unwrap();
        assert_eq!(engine.get_at(collection_key(100, 1), &snap).unwrap(), None);
    }

    // ----------------------------------------------------------------
    // Multi-version chaos (four snapshots straddling put/put/delete/put)
    // ----------------------------------------------------------------

    #[test]
    fn multi_version_chaos_after_compaction() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), default_config()).unwrap();
        let key = || collection_key(300, 1);

        engine.put(key(), b"V1".to_vec()).unwrap();
        let snap_v1 = engine.snapshot().unwrap();

        engine.put(key(), b"V2".to_vec()).unwrap();
        let snap_v2 = engine.snapshot().unwrap();

        engine.delete(key()).unwrap();
        let snap_v3 = engine.snapshot().unwrap();

        engine.put(key(), b"V4".to_vec()).unwrap();
        let snap_v4 = engine.snapshot().unwrap();

        // Force the whole history through flush + full merge.
        engine.flush().unwrap();
        assert!(engine.major_compact().unwrap());

        assert_eq!(engine.get_at(key(), &snap_v1).unwrap(), Some(b"V1".to_vec()));
        assert_eq!(engine.get_at(key(), &snap_v2).unwrap(), Some(b"V2".to_vec()));
        assert_eq!(engine.get_at(key(), &snap_v3).unwrap(), None);
        assert_eq!(engine.get_at(key(), &snap_v4).unwrap(), Some(b"V4".to_vec()));
        assert_eq!(engine.get(key()).unwrap(), Some(b"V4".to_vec()));
    }

    // ----------------------------------------------------------------
    // Snapshots pin data against compaction GC
    // ----------------------------------------------------------------

    #[test]
    fn live_snapshot_blocks_collection_gc() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), default_config()).unwrap();

        for i in 0..10 {
            engine.put(collection_key(400, i), b"v".to_vec()).unwrap();
        }
        engine.flush().unwrap();

        let snap = engine.snapshot().unwrap();
        engine.delete(collection_key(400, 0)).unwrap();

        // The snapshot predates the delete, so compaction must retain the
        // versions and the file references.
        assert!(engine.major_compact().unwrap());
        assert!(engine.hotspot().is_tracked(400));
        assert!(engine.hotspot().ref_count(400) >= 1);

        let (lo, hi) = collection_bounds(400);
        let historical: Vec<_> = engine.scan_at(&lo, &hi, &snap).unwrap().collect();
        assert_eq!(historical.len(), 10, "snapshot still reads all versions");

        // Release the pin; the next full merge reclaims everything.
        drop(snap);
        assert!(engine.major_compact().unwrap());
        assert!(!engine.hotspot().is_tracked(400));
        assert_eq!(engine.stats().unwrap().sstables_count, 0);
    }

    #[test]
    fn released_snapshot_unpins_versions() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
        let snap = engine.snapshot().unwrap();
        engine.put(b"k".to_vec(), b"v2".to_vec()).unwrap();

        drop(snap);
        // With no pins left the engine reports only the latest state.
        assert_eq!(engine.get(b"k".to_vec()).unwrap(), Some(b"v2".to_vec()));
    }
}
