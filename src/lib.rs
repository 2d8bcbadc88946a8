//! # EmberDB
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture, with
//! **collection-scoped logical deletion**: keys carry a 64-bit collection id
//! at a fixed byte offset, and deleting any key of a collection logically
//! deletes the whole collection — no tombstones are written, reads hide the
//! data immediately, and the physical bytes are reclaimed by ordinary
//! compaction work.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Engine                            │
//! │  ┌────────────┐  ┌──────────────┐  ┌─────────────┐       │
//! │  │  Active    │  │   Frozen     │  │  SSTables   │       │
//! │  │  Memtable  │  │  Memtables   │  │  (on disk)  │       │
//! │  │  + WAL     │  │  + WALs      │  │             │       │
//! │  └─────┬──────┘  └──────┬───────┘  └──────┬──────┘       │
//! │        │   freeze       │   flush         │              │
//! │        └─────────►      └────────►        │              │
//! │                                           │              │
//! │  ┌────────────────────────────────────────┘              │
//! │  │  Compaction (minor / major, multi-output)             │
//! │  └──────────────────────────────────────────────────────┐│
//! │                                                         ││
//! │  ┌──────────────────┐  ┌───────────────────────────────┐││
//! │  │ Hotspot manager  │  │  Manifest (WAL + snapshot)    │││
//! │  │ + delete table   │  └───────────────────────────────┘││
//! │  └──────────────────┘                                   ││
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, scan, snapshots, flush, compact |
//! | [`hotspot`] | Collection delete table and manager — logical deletes, file refcounts, GC accounting |
//! | [`memtable`] | In-memory write buffer with multi-version entries |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`sstable`] | Immutable, sorted, on-disk tables with bloom filters and per-file collection metadata |
//! | [`manifest`] | Persistent metadata manager (WAL + snapshot model) |
//! | [`compaction`] | Size-tiered compaction with snapshot-aware version retention |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL before
//!   being acknowledged, guaranteeing durability and crash recovery.
//! - **Multi-version concurrency** — multiple versions per key, ordered by
//!   log sequence number (LSN). [`engine::Engine::snapshot`] pins an LSN and
//!   [`engine::Engine::get_at`] / [`engine::Engine::scan_at`] read the state
//!   as of that point.
//! - **Tombstone-free bulk deletes** — deleting a key whose collection id is
//!   non-zero marks the whole collection deleted in the in-memory delete
//!   table instead of writing a tombstone. Reads consult the table; compaction
//!   physically drops the covered versions and retires file references until
//!   the collection's entry disappears.
//! - **Bloom filter lookups** — each SSTable carries a bloom filter for
//!   fast negative point-lookup responses.
//! - **Block-level CRC32 integrity** — every on-disk block (WAL records,
//!   SSTable data blocks, headers, footers) is checksummed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use emberdb::engine::{Engine, EngineConfig};
//!
//! let engine = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! // Plain keys (shorter than the collection schema) behave like a normal KV store.
//! engine.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello".to_vec()).unwrap(), Some(b"world".to_vec()));
//!
//! // Collection keys: 16-byte prefix, 8-byte big-endian collection id, suffix.
//! let key = |coll: u64, n: u32| {
//!     let mut k = vec![0u8; 16];
//!     k.extend_from_slice(&coll.to_be_bytes());
//!     k.extend_from_slice(&n.to_be_bytes());
//!     k
//! };
//! engine.put(key(42, 0), b"v".to_vec()).unwrap();
//! engine.flush().unwrap();
//!
//! // Deleting any key of collection 42 logically deletes the whole collection.
//! engine.delete(key(42, 0)).unwrap();
//! assert_eq!(engine.get(key(42, 0)).unwrap(), None);
//!
//! engine.close().unwrap();
//! ```

pub mod compaction;
pub mod engine;
pub mod hotspot;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod wal;

pub use engine::{Engine, EngineConfig};
pub use hotspot::{HotspotManager, KeySchema, LSN_MAX};
