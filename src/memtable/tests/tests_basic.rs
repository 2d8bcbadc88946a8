//! Core put/delete/get behavior and WAL-backed recovery.

use crate::memtable::{Memtable, MemtableError, MemtableGetResult};
use tempfile::TempDir;

fn memtable(tmp: &TempDir, buffer: usize) -> Memtable {
    Memtable::new(tmp.path().join("wal-000001.log"), 1, None, buffer).unwrap()
}

#[test]
fn put_then_get_latest() {
    let tmp = TempDir::new().unwrap();
    let mt = memtable(&tmp, 64 * 1024);

    mt.put(b"k".to_vec(), b"v".to_vec()).unwrap();

    match mt.get_at(b"k", u64::MAX).unwrap() {
        MemtableGetResult::Put { value, .. } => assert_eq!(value, b"v"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn get_missing_key() {
    let tmp = TempDir::new().unwrap();
    let mt = memtable(&tmp, 64 * 1024);

    assert_eq!(mt.get_at(b"ghost", u64::MAX).unwrap(), MemtableGetResult::NotFound);
}

#[test]
fn delete_shadows_put() {
    let tmp = TempDir::new().unwrap();
    let mt = memtable(&tmp, 64 * 1024);

    mt.put(b"k".to_vec(), b"v".to_vec()).unwrap();
    mt.delete(b"k".to_vec()).unwrap();

    assert!(matches!(
        mt.get_at(b"k", u64::MAX).unwrap(),
        MemtableGetResult::Delete { .. }
    ));
}

#[test]
fn empty_key_or_value_rejected() {
    let tmp = TempDir::new().unwrap();
    let mt = memtable(&tmp, 64 * 1024);

    assert!(mt.put(Vec::new(), b"v".to_vec()).is_err());
    assert!(mt.put(b"k".to_vec(), Vec::new()).is_err());
    assert!(mt.delete(Vec::new()).is_err());
}

#[test]
fn full_buffer_requires_flush() {
    let tmp = TempDir::new().unwrap();
    let mt = memtable(&tmp, 128);

    let mut flush_hit = false;
    for i in 0..64 {
        let key = format!("key_{i:04}").into_bytes();
        match mt.put(key, vec![b'x'; 16]) {
            Ok(()) => {}
            Err(MemtableError::FlushRequired) => {
                flush_hit = true;
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(flush_hit, "small buffer must eventually demand a flush");
}

#[test]
fn lsn_increases_per_mutation() {
    let tmp = TempDir::new().unwrap();
    let mt = memtable(&tmp, 64 * 1024);

    mt.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    let first = mt.max_lsn();
    mt.delete(b"a".to_vec()).unwrap();
    assert_eq!(mt.max_lsn(), first + 1);
}

#[test]
fn allocate_lsn_advances_counter_without_writing() {
    let tmp = TempDir::new().unwrap();
    let mt = memtable(&tmp, 64 * 1024);

    mt.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    let reserved = mt.allocate_lsn();
    mt.put(b"b".to_vec(), b"2".to_vec()).unwrap();

    // The reserved LSN sits between the two puts and was never logged.
    match mt.get_at(b"b", u64::MAX).unwrap() {
        MemtableGetResult::Put { lsn, .. } => assert_eq!(lsn, reserved + 1),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn wal_replay_restores_state_and_lsn() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal-000001.log");

    {
        let mt = Memtable::new(&path, 1, None, 64 * 1024).unwrap();
        mt.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        mt.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        mt.delete(b"a".to_vec()).unwrap();
    }

    let mt = Memtable::new(&path, 1, None, 64 * 1024).unwrap();
    assert!(matches!(
        mt.get_at(b"a", u64::MAX).unwrap(),
        MemtableGetResult::Delete { .. }
    ));
    assert!(matches!(
        mt.get_at(b"b", u64::MAX).unwrap(),
        MemtableGetResult::Put { .. }
    ));
    assert_eq!(mt.max_lsn(), 3);
}

#[test]
fn frozen_memtable_serves_reads() {
    let tmp = TempDir::new().unwrap();
    let mt = memtable(&tmp, 64 * 1024);

    mt.put(b"k".to_vec(), b"v".to_vec()).unwrap();
    let frozen = mt.frozen().unwrap();

    assert!(matches!(
        frozen.get_at(b"k", u64::MAX).unwrap(),
        MemtableGetResult::Put { .. }
    ));
    assert_eq!(frozen.max_lsn(), 1);
}
