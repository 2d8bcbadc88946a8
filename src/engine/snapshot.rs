//! MVCC snapshots.
//!
//! A [`Snapshot`] pins the engine's LSN at creation time; reads through
//! [`Engine::get_at`](crate::engine::Engine::get_at) and
//! [`Engine::scan_at`](crate::engine::Engine::scan_at) then observe exactly
//! the versions with `lsn ≤ snapshot.lsn()`. The shared [`SnapshotList`] is
//! the registry compaction consults: a version still readable by any live
//! snapshot is never dropped, and a collection delete only becomes physical
//! once no live snapshot predates it.
//!
//! Dropping a `Snapshot` releases its pin automatically.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::trace;

/// Registry of live snapshot LSNs.
///
/// A multiset (`BTreeMap<lsn, count>`) — several snapshots may pin the same
/// LSN. Shared between the engine and every outstanding [`Snapshot`] handle.
#[derive(Debug, Default)]
pub struct SnapshotList {
    inner: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, usize>> {
        // Registration and release are plain counter updates; recover from a
        // poisoned lock rather than wedging every reader.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers one snapshot pinned at `lsn`.
    pub fn register(&self, lsn: u64) {
        let mut guard = self.lock();
        *guard.entry(lsn).or_insert(0) += 1;
        trace!(lsn, "snapshot registered");
    }

    /// Releases one snapshot pinned at `lsn`.
    pub fn release(&self, lsn: u64) {
        let mut guard = self.lock();
        if let Some(count) = guard.get_mut(&lsn) {
            *count -= 1;
            if *count == 0 {
                guard.remove(&lsn);
            }
            trace!(lsn, "snapshot released");
        }
    }

    /// All live snapshot LSNs, ascending and deduplicated.
    ///
    /// This is the list compaction feeds into version retention and the
    /// collection drop predicate.
    pub fn live(&self) -> Vec<u64> {
        self.lock().keys().copied().collect()
    }

    /// The oldest live snapshot LSN, if any.
    pub fn oldest(&self) -> Option<u64> {
        self.lock().keys().next().copied()
    }

    /// True when no snapshots are outstanding.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// A handle pinning the database state as of a specific LSN.
///
/// Obtained from [`Engine::snapshot`](crate::engine::Engine::snapshot); the
/// pin is released when the handle is dropped.
#[derive(Debug)]
pub struct Snapshot {
    lsn: u64,
    list: Arc<SnapshotList>,
}

impl Snapshot {
    pub(crate) fn new(lsn: u64, list: Arc<SnapshotList>) -> Self {
        list.register(lsn);
        Self { lsn, list }
    }

    /// The LSN this snapshot reads at.
    pub fn lsn(&self) -> u64 {
        self.lsn
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.list.release(self.lsn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_release_round_trip() {
        let list = Arc::new(SnapshotList::new());

        let snap = Snapshot::new(10, Arc::clone(&list));
        assert_eq!(list.live(), vec![10]);
        assert_eq!(snap.lsn(), 10);

        drop(snap);
        assert!(list.is_empty());
    }

    #[test]
    fn duplicate_lsns_are_multiset_counted() {
        let list = Arc::new(SnapshotList::new());

        let a = Snapshot::new(5, Arc::clone(&list));
        let b = Snapshot::new(5, Arc::clone(&list));
        assert_eq!(list.live(), vec![5]);

        drop(a);
        assert_eq!(list.live(), vec![5], "second pin still holds");
        drop(b);
        assert!(list.is_empty());
    }

    #[test]
    fn live_list_is_sorted() {
        let list = Arc::new(SnapshotList::new());

        let _c = Snapshot::new(30, Arc::clone(&list));
        let _a = Snapshot::new(10, Arc::clone(&list));
        let _b = Snapshot::new(20, Arc::clone(&list));

        assert_eq!(list.live(), vec![10, 20, 30]);
        assert_eq!(list.oldest(), Some(10));
    }
}
