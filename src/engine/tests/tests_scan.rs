//! Range scans: merging, bounds, tombstones, collection hiding.

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::engine::tests::helpers::*;
    use tempfile::TempDir;

    #[test]
    fn scan_returns_sorted_live_pairs() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"c".to_vec(), b"3".to_vec()).unwrap();
        engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();

        let results = collect_scan(&engine, b"a", b"z");
        assert_eq!(
            results,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn scan_bounds_are_half_open() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        for key in [b"a", b"b", b"c"] {
            engine.put(key.to_vec(), b"v".to_vec()).unwrap();
        }

        let keys: Vec<_> = collect_scan(&engine, b"a", b"c")
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        assert!(collect_scan(&engine, b"c", b"a").is_empty());
    }

    #[test]
    fn scan_merges_layers_with_latest_version() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), default_config()).unwrap();

        engine.put(b"k1".to_vec(), b"old".to_vec()).unwrap();
        engine.put(b"k2".to_vec(), b"keep".to_vec()).unwrap();
        engine.flush().unwrap();
        engine.put(b"k1".to_vec(), b"new".to_vec()).unwrap();

        let results = collect_scan(&engine, b"k", b"l");
        assert_eq!(
            results,
            vec![
                (b"k1".to_vec(), b"new".to_vec()),
                (b"k2".to_vec(), b"keep".to_vec()),
            ]
        );
    }

    #[test]
    fn scan_skips_tombstoned_keys() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), default_config()).unwrap();

        engine.put(b"k1".to_vec(), b"v1".to_vec()).unwrap();
        engine.put(b"k2".to_vec(), b"v2".to_vec()).unwrap();
        engine.flush().unwrap();
        engine.delete(b"k1".to_vec()).unwrap();

        let results = collect_scan(&engine, b"k", b"l");
        assert_eq!(results, vec![(b"k2".to_vec(), b"v2".to_vec())]);
    }

    #[test]
    fn scan_hides_deleted_collections_inline() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), default_config()).unwrap();

        for i in 0..5 {
            engine.put(collection_key(100, i), b"gone".to_vec()).unwrap();
            engine.put(collection_key(200, i), b"kept".to_vec()).unwrap();
        }
        engine.flush().unwrap();
        engine.delete(collection_key(100, 0)).unwrap();

        // Scanning across both collections yields only the live one.
        let (lo, _) = collection_bounds(100);
        let (_, hi) = collection_bounds(200);
        let results: Vec<_> = engine.scan(&lo, &hi).unwrap().collect();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|(_, v)| v == b"kept"));
    }

    #[test]
    fn empty_scan_range() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert!(collect_scan(&engine, b"x", b"z").is_empty());
    }
}
