//! Point-delete correctness for plain keys (tombstone path).

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::engine::tests::helpers::*;
    use tempfile::TempDir;

    #[test]
    fn delete_existing_key() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(engine.get(b"k".to_vec()).unwrap(), Some(b"v".to_vec()));

        engine.delete(b"k".to_vec()).unwrap();
        assert_eq!(engine.get(b"k".to_vec()).unwrap(), None);
    }

    #[test]
    fn delete_nonexistent_key_is_noop() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.delete(b"ghost".to_vec()).unwrap();
        assert_eq!(engine.get(b"ghost".to_vec()).unwrap(), None);
    }

    #[test]
    fn delete_then_put_resurrects_key() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
        engine.delete(b"k".to_vec()).unwrap();
        assert_eq!(engine.get(b"k".to_vec()).unwrap(), None);

        engine.put(b"k".to_vec(), b"v2".to_vec()).unwrap();
        assert_eq!(engine.get(b"k".to_vec()).unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn double_delete() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        engine.delete(b"k".to_vec()).unwrap();
        engine.delete(b"k".to_vec()).unwrap();
        assert_eq!(engine.get(b"k".to_vec()).unwrap(), None);
    }

    #[test]
    fn delete_key_in_sstable() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with_sstables(tmp.path(), 200, "key");

        assert!(engine.get(b"key_0050".to_vec()).unwrap().is_some());

        // Delete from the active memtable — shadows the SSTable entry.
        engine.delete(b"key_0050".to_vec()).unwrap();
        assert_eq!(engine.get(b"key_0050".to_vec()).unwrap(), None);
    }

    #[test]
    fn plain_delete_writes_a_tombstone_not_a_mark() {
        // A short key has no collection id, so the hotspot manager must not
        // track anything for it.
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"plain".to_vec(), b"v".to_vec()).unwrap();
        engine.delete(b"plain".to_vec()).unwrap();

        assert_eq!(engine.get(b"plain".to_vec()).unwrap(), None);
        assert!(!engine.hotspot().is_tracked(0));
    }

    #[test]
    fn tombstone_survives_flush() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), default_config()).unwrap();

        engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        engine.flush().unwrap();
        engine.delete(b"k".to_vec()).unwrap();
        engine.flush().unwrap();

        assert_eq!(engine.get(b"k".to_vec()).unwrap(), None);
    }

    #[test]
    fn delete_alternating_keys() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        for i in 0..20 {
            let key = format!("key_{i:02}").into_bytes();
            let val = format!("val_{i:02}").into_bytes();
            engine.put(key, val).unwrap();
        }

        for i in (0..20).step_by(2) {
            engine.delete(format!("key_{i:02}").into_bytes()).unwrap();
        }

        for i in 0..20 {
            let key = format!("key_{i:02}").into_bytes();
            let result = engine.get(key).unwrap();
            if i % 2 == 0 {
                assert_eq!(result, None, "key_{i:02} should be deleted");
            } else {
                assert_eq!(
                    result,
                    Some(format!("val_{i:02}").into_bytes()),
                    "key_{i:02} should exist"
                );
            }
        }
    }
}
