//! # Memtable Module
//!
//! ## Design Invariants
//!
//! - All writes are WAL-first and assigned a monotonically increasing LSN.
//! - The memtable keeps **every** version of a key, ordered by descending
//!   LSN. Readers resolve visibility at lookup time against an LSN horizon,
//!   so snapshot reads work without copying state.
//! - Point deletes are represented as tombstone versions (`value: None`),
//!   not physical removal. Collection-scoped deletes never reach the
//!   memtable at all — they are intercepted upstream by the hotspot manager.
//!
//! ## Flush Semantics
//!
//! - `iter_for_flush` returns a *logical snapshot* of the memtable state:
//!   all versions of all keys, ordered `(key ASC, LSN DESC)`.
//! - Every version is emitted, not just the newest — SSTables must retain
//!   the history that live snapshots may still read.
//! - Flush iteration does **not** mutate or clear in-memory state.
//!
//! ## Frozen Memtable
//!
//! - A `FrozenMemtable` is read-only.
//! - It retains ownership of the WAL to guarantee durability until the data
//!   is persisted to an SSTable.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    cmp::Reverse,
    collections::BTreeMap,
    path::Path,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crate::engine::utils::Record;
use crate::wal::{Wal, WalError};
use thiserror::Error;
use tracing::{error, info, trace};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Represents possible errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Underlying WAL I/O failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Write buffer limit reached; a flush is required before further writes.
    #[error("Flush required")]
    FlushRequired,

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Memtable Core
// ------------------------------------------------------------------------------------------------

/// The mutable, in-memory write buffer of the storage engine.
///
/// The memtable:
/// - Accepts writes (`put`, `delete`)
/// - Persists all mutations to a WAL before applying them in memory
/// - Serves reads (`get_at`, `scan`) at an arbitrary LSN horizon
/// - Can be logically flushed via `iter_for_flush`
///
/// # Concurrency
/// - Writers acquire an exclusive lock
/// - Readers may proceed concurrently
/// - The LSN counter is a separate atomic so sequence allocation does not
///   serialize behind the data lock
pub struct Memtable {
    /// Thread-safe container for in-memory data and metadata.
    inner: Arc<RwLock<MemtableInner>>,

    /// Associated write-ahead log for durability.
    pub wal: Wal<MemtableRecord>,

    /// Monotonic log sequence number (LSN) for version ordering.
    next_lsn: AtomicU64,
}

/// A single version of a key stored in the memtable.
///
/// A key may have many versions, ordered by LSN; `value: None` marks a
/// tombstone.
#[derive(Debug, PartialEq, Clone)]
pub struct MemtableVersion {
    /// The stored value. `None` indicates a deletion (tombstone).
    pub value: Option<Vec<u8>>,

    /// Logical timestamp in nanoseconds since UNIX epoch.
    pub timestamp: u64,

    /// Log sequence number for ordering updates.
    pub lsn: u64,
}

/// A logical WAL record representing a memtable mutation.
///
/// These records are appended to the WAL, replayed during recovery, and
/// emitted during memtable flush. Together they form a complete, replayable
/// history.
#[derive(Debug, PartialEq, bincode::Encode, bincode::Decode)]
pub enum MemtableRecord {
    /// Insert or update a single key.
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        lsn: u64,
        timestamp: u64,
    },

    /// Delete a single key (point tombstone).
    Delete {
        key: Vec<u8>,
        lsn: u64,
        timestamp: u64,
    },
}

/// Result of a versioned `get` on the memtable.
#[derive(Debug, PartialEq)]
pub enum MemtableGetResult {
    /// Newest visible version is a put.
    Put { value: Vec<u8>, lsn: u64 },

    /// Newest visible version is a point tombstone.
    Delete { lsn: u64 },

    /// No version of the key is visible at the requested horizon.
    NotFound,
}

/// Internal shared state of the memtable.
struct MemtableInner {
    /// Point entries grouped by key, then ordered by descending LSN.
    tree: BTreeMap<Vec<u8>, BTreeMap<Reverse<u64>, MemtableVersion>>,

    /// Approximate in-memory footprint.
    approximate_size: usize,

    /// Configured maximum buffer size before flush is required.
    write_buffer_size: usize,
}

impl Memtable {
    /// Creates a new mutable [`Memtable`] backed by a write-ahead log.
    ///
    /// Replays the WAL (if present) to reconstruct in-memory state, restores
    /// the highest observed LSN, and advances the internal counter so
    /// subsequent writes continue with monotonically increasing LSNs.
    pub fn new<P: AsRef<Path>>(
        wal_path: P,
        wal_seq: u64,
        max_record_size: Option<u32>,
        write_buffer_size: usize,
    ) -> Result<Self, MemtableError> {
        let wal = Wal::open(&wal_path, wal_seq, max_record_size)?;

        let mut inner = MemtableInner {
            tree: BTreeMap::new(),
            approximate_size: 0,
            write_buffer_size,
        };

        let mut max_lsn_seen: u64 = 0;

        for record in wal.replay_iter()? {
            let record: MemtableRecord = record?;

            let (key, version) = match record {
                MemtableRecord::Put {
                    key,
                    value,
                    lsn,
                    timestamp,
                } => (
                    key,
                    MemtableVersion {
                        value: Some(value),
                        timestamp,
                        lsn,
                    },
                ),
                MemtableRecord::Delete {
                    key,
                    lsn,
                    timestamp,
                } => (
                    key,
                    MemtableVersion {
                        value: None,
                        timestamp,
                        lsn,
                    },
                ),
            };

            inner.approximate_size += Self::version_size(&key, &version);
            if version.lsn > max_lsn_seen {
                max_lsn_seen = version.lsn;
            }

            inner
                .tree
                .entry(key)
                .or_default()
                .insert(Reverse(version.lsn), version);
        }

        info!(wal_seq, max_lsn = max_lsn_seen, "memtable initialized");

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            wal,
            next_lsn: AtomicU64::new(max_lsn_seen.saturating_add(1)),
        })
    }

    fn version_size(key: &[u8], version: &MemtableVersion) -> usize {
        std::mem::size_of::<MemtableVersion>()
            + key.len()
            + version.value.as_ref().map_or(0, Vec::len)
    }

    /// Allocates the next LSN without writing anything.
    ///
    /// Used by the engine's delete-interception path: a collection delete
    /// consumes the sequence number its tombstone would have carried, so the
    /// delete table anchors at exactly the right point in the write order.
    pub fn allocate_lsn(&self) -> u64 {
        self.next_lsn.fetch_add(1, Ordering::SeqCst)
    }

    /// Inserts or updates a key with a new value.
    ///
    /// The mutation is appended to the WAL first, then applied to the
    /// in-memory tree with a freshly allocated LSN.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), MemtableError> {
        trace!("put() started, key: {}", HexKey(&key));

        if key.is_empty() || value.is_empty() {
            return Err(MemtableError::Internal("Key or value is empty".to_string()));
        }

        let lsn = self.allocate_lsn();
        let timestamp = Self::current_timestamp();

        let version = MemtableVersion {
            value: Some(value.clone()),
            timestamp,
            lsn,
        };
        let record_size = Self::version_size(&key, &version);
        let record = MemtableRecord::Put {
            key: key.clone(),
            value,
            lsn,
            timestamp,
        };

        let mut guard = self.inner.write().map_err(|_| {
            error!("Read-write lock poisoned during put");
            MemtableError::Internal("RwLock poisoned".into())
        })?;

        if guard.approximate_size + record_size > guard.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        // 1. WAL first (crash safety)
        self.wal.append(&record)?;

        // 2. In-memory update
        guard
            .tree
            .entry(key)
            .or_default()
            .insert(Reverse(version.lsn), version);
        guard.approximate_size += record_size;

        Ok(())
    }

    /// Deletes a key by inserting a tombstone version.
    ///
    /// The key remains in the memtable; readers at or after the tombstone's
    /// LSN resolve it to not-found.
    pub fn delete(&self, key: Vec<u8>) -> Result<(), MemtableError> {
        trace!("delete() started, key: {}", HexKey(&key));

        if key.is_empty() {
            return Err(MemtableError::Internal("Key is empty".to_string()));
        }

        let lsn = self.allocate_lsn();
        let timestamp = Self::current_timestamp();

        let version = MemtableVersion {
            value: None,
            timestamp,
            lsn,
        };
        let record_size = Self::version_size(&key, &version);
        let record = MemtableRecord::Delete {
            key: key.clone(),
            lsn,
            timestamp,
        };

        let mut guard = self.inner.write().map_err(|_| {
            error!("Read-write lock poisoned during delete");
            MemtableError::Internal("RwLock poisoned".into())
        })?;

        if guard.approximate_size + record_size > guard.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        // 1. WAL first (crash safety)
        self.wal.append(&record)?;

        // 2. In-memory update
        guard
            .tree
            .entry(key)
            .or_default()
            .insert(Reverse(version.lsn), version);
        guard.approximate_size += record_size;

        Ok(())
    }

    /// Retrieves the newest version of `key` visible at `visible_lsn`.
    ///
    /// Versions with `lsn > visible_lsn` are skipped; the first remaining
    /// one wins. Pass [`u64::MAX`] for a latest-state read.
    pub fn get_at(&self, key: &[u8], visible_lsn: u64) -> Result<MemtableGetResult, MemtableError> {
        let guard = self.inner.read().map_err(|_| {
            error!("Read-write lock poisoned during get");
            MemtableError::Internal("RwLock poisoned".into())
        })?;

        let Some(versions) = guard.tree.get(key) else {
            return Ok(MemtableGetResult::NotFound);
        };

        // Descending LSN order; the first version at or below the horizon is
        // the newest visible one.
        for version in versions.values() {
            if version.lsn > visible_lsn {
                continue;
            }
            return Ok(match &version.value {
                Some(value) => MemtableGetResult::Put {
                    value: value.clone(),
                    lsn: version.lsn,
                },
                None => MemtableGetResult::Delete { lsn: version.lsn },
            });
        }

        Ok(MemtableGetResult::NotFound)
    }

    /// Returns **all** versions of all keys in `[start, end)` as raw records,
    /// ordered `(key ASC, LSN DESC)`.
    ///
    /// Visibility resolution (tombstones, snapshot horizon, collection
    /// deletes) is the caller's job — this keeps the memtable layer
    /// symmetric with SSTable scans so the merge iterator can interleave
    /// them.
    pub fn scan(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<impl Iterator<Item = Record> + use<>, MemtableError> {
        if start >= end {
            return Ok(Vec::new().into_iter());
        }

        let guard = self.inner.read().map_err(|_| {
            error!("Read-write lock poisoned during scan");
            MemtableError::Internal("RwLock poisoned".into())
        })?;

        let mut records = Vec::new();
        for (key, versions) in guard.tree.range(start.to_vec()..end.to_vec()) {
            for version in versions.values() {
                records.push(Self::record_for(key, version));
            }
        }

        Ok(records.into_iter())
    }

    /// Returns a logical snapshot of the memtable suitable for flushing.
    ///
    /// Emits every version of every key, ordered `(key ASC, LSN DESC)` — the
    /// order the SSTable builder requires for adjacent duplicate keys.
    /// Does not mutate in-memory state.
    pub fn iter_for_flush(&self) -> Result<impl Iterator<Item = Record> + use<>, MemtableError> {
        let guard = self.inner.read().map_err(|_| {
            error!("Read-write lock poisoned during iter_for_flush");
            MemtableError::Internal("RwLock poisoned".into())
        })?;

        let mut records = Vec::new();
        for (key, versions) in guard.tree.iter() {
            for version in versions.values() {
                records.push(Self::record_for(key, version));
            }
        }

        Ok(records.into_iter())
    }

    fn record_for(key: &[u8], version: &MemtableVersion) -> Record {
        match &version.value {
            Some(value) => Record::Put {
                key: key.to_vec(),
                value: value.clone(),
                lsn: version.lsn,
                timestamp: version.timestamp,
            },
            None => Record::Delete {
                key: key.to_vec(),
                lsn: version.lsn,
                timestamp: version.timestamp,
            },
        }
    }

    /// Converts this mutable memtable into an immutable [`FrozenMemtable`].
    pub fn frozen(self) -> Result<FrozenMemtable, MemtableError> {
        Ok(FrozenMemtable::new(self))
    }

    /// True when no entries are buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().map(|guard| guard.tree.is_empty()).unwrap_or(false)
    }

    /// Override the current LSN counter with a recovered value.
    ///
    /// Must only be called during recovery, before any writes; future LSNs
    /// will always increase beyond the recovered state.
    pub fn inject_max_lsn(&self, lsn: u64) {
        self.next_lsn.store(lsn.saturating_add(1), Ordering::SeqCst);
    }

    /// Returns the highest assigned LSN so far.
    pub fn max_lsn(&self) -> u64 {
        self.next_lsn.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Returns the current system timestamp in nanoseconds.
    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_nanos() as u64
    }
}

// ------------------------------------------------------------------------------------------------
// Frozen Memtable
// ------------------------------------------------------------------------------------------------

/// An immutable, read-only view of a memtable awaiting flush.
///
/// Retains ownership of the WAL so durability holds until the data lands in
/// an SSTable.
pub struct FrozenMemtable {
    pub memtable: Memtable,
    pub creation_timestamp: u64,
}

impl FrozenMemtable {
    pub fn new(memtable: Memtable) -> Self {
        Self {
            memtable,
            creation_timestamp: Memtable::current_timestamp(),
        }
    }

    /// Retrieves the newest version of `key` visible at `visible_lsn`.
    pub fn get_at(&self, key: &[u8], visible_lsn: u64) -> Result<MemtableGetResult, MemtableError> {
        self.memtable.get_at(key, visible_lsn)
    }

    /// Performs a raw multi-version range scan over the frozen memtable.
    pub fn scan(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<impl Iterator<Item = Record> + use<>, MemtableError> {
        self.memtable.scan(start, end)
    }

    /// Returns all records required to materialize this memtable into an SSTable.
    pub fn iter_for_flush(&self) -> Result<impl Iterator<Item = Record> + use<>, MemtableError> {
        self.memtable.iter_for_flush()
    }

    /// Returns the highest assigned LSN so far.
    pub fn max_lsn(&self) -> u64 {
        self.memtable.max_lsn()
    }
}

// ------------------------------------------------------------------------------------------------
// Tracing Helper
// ------------------------------------------------------------------------------------------------

struct HexKey<'a>(&'a [u8]);

impl<'a> std::fmt::Display for HexKey<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{:02x}", byte)?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{:02x}", byte)?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
