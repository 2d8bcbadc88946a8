//! # Manifest Component
//!
//! The **Manifest** is the central metadata authority for the engine. It
//! tracks durable state: the active WAL segment, frozen WAL segments, the
//! SSTable list, the latest durable global LSN, and the monotonic SSTable id
//! counter (SSTable ids double as the file identifiers the hotspot delete
//! table refcounts).
//!
//! ## Data durability strategy
//!
//! Metadata is persisted with a **WAL + periodic snapshot** model:
//!
//! 1. The manifest WAL (`000000.log`) records mutation events — WAL
//!    switches, SSTable additions/removals, compactions, LSN updates, id
//!    allocations.
//! 2. The snapshot (`MANIFEST-000001`) is a compact encoded dump of the whole
//!    structure with a CRC32 for corruption detection.
//! 3. On startup: load the snapshot if valid, then replay the WAL on top. A
//!    corrupt snapshot is discarded and the WAL replayed from scratch — the
//!    WAL is ground truth, snapshots are an optimisation.
//!
//! ## Thread safety
//!
//! The WAL is internally synchronized; `ManifestData` sits behind a `Mutex`.
//! Only [`Manifest::checkpoint`] needs `&mut self`, because it truncates the
//! WAL and must not race concurrent mutations.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use crate::wal::{Wal, WalError};
use bincode::{config::standard, decode_from_slice, encode_to_vec};
use crc32fast::Hasher as Crc32;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;
use tracing::{error, info, warn};

const SNAPSHOT_TMP_SUFFIX: &str = ".tmp";
const SNAPSHOT_FILENAME: &str = "MANIFEST-000001";
/// Manifest WAL filename — a fixed, single-segment WAL that never rotates.
/// Truncated to header-only on each checkpoint.
const WAL_FILENAME: &str = "000000.log";
/// Segment id stored in the manifest WAL header.
const WAL_SEGMENT: u64 = 0;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying WAL failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot serialization error.
    #[error("Serialization (encode) error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Snapshot deserialization error.
    #[error("Deserialization (decode) error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Snapshot file is corrupted or checksum mismatched.
    #[error("Snapshot checksum mismatch")]
    SnapshotChecksumMismatch,

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Manifest data structures
// ------------------------------------------------------------------------------------------------

/// In-memory representation of the manifest durable state.
///
/// Fields are private to enforce invariants through the [`Manifest`] API.
#[derive(Debug, PartialEq, Clone, bincode::Encode, bincode::Decode)]
pub(crate) struct ManifestData {
    /// Monotonically increasing manifest version.
    version: u64,

    /// Last globally assigned LSN.
    last_lsn: u64,

    /// Identifier of the current active WAL segment.
    active_wal: u64,

    /// Identifiers of frozen WAL segments (older, awaiting flush).
    frozen_wals: Vec<u64>,

    /// All SSTables belonging to the LSM tree.
    sstables: Vec<ManifestSstEntry>,

    /// Next SSTable id to allocate. Monotonically increasing — ids are never
    /// reused over the lifetime of the database.
    next_sst_id: u64,
}

impl Default for ManifestData {
    fn default() -> Self {
        Self {
            version: 1,
            last_lsn: 0,
            active_wal: 0,
            frozen_wals: Vec::new(),
            sstables: Vec::new(),
            next_sst_id: 1,
        }
    }
}

/// Entry describing a single SSTable known to the manifest.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct ManifestSstEntry {
    /// Globally unique SSTable id.
    pub id: u64,

    /// Filesystem path to the SSTable file.
    pub path: String,
}

/// Record stored in the manifest WAL. Each variant describes a single
/// metadata mutation applied to [`ManifestData`].
#[derive(Debug, bincode::Encode, bincode::Decode)]
pub enum ManifestEvent {
    /// Sets a new manifest version.
    Version { version: u64 },

    /// Sets a new WAL segment as active.
    SetActiveWal { wal: u64 },

    /// Adds a WAL segment to the frozen list.
    AddFrozenWal { wal: u64 },

    /// Removes a frozen WAL from manifest state.
    RemoveFrozenWal { wal: u64 },

    /// Adds a new SSTable entry.
    AddSst { entry: ManifestSstEntry },

    /// Removes an SSTable by id.
    RemoveSst { id: u64 },

    /// Updates the global last known LSN.
    UpdateLsn { last_lsn: u64 },

    /// Allocates the next SSTable id (persists the counter increment).
    AllocateSstId { id: u64 },

    /// Atomic compaction: adds new SSTables and removes consumed ones in a
    /// single WAL entry, ensuring crash-safe manifest transitions.
    Compaction {
        added: Vec<ManifestSstEntry>,
        removed: Vec<u64>,
    },
}

/// Serialized snapshot stored in `MANIFEST-000001`.
#[derive(Debug, bincode::Encode, bincode::Decode)]
struct ManifestSnapshot {
    /// Snapshot version number (matches manifest version).
    version: u64,

    /// The LSN at the time of snapshot creation.
    snapshot_lsn: u64,

    /// Full metadata.
    manifest_data: ManifestData,

    /// CRC32 over the serialized payload, computed with this field zeroed.
    /// Must remain the last field — checkpointing patches the trailing four
    /// bytes in place.
    checksum: u32,
}

// ------------------------------------------------------------------------------------------------
// Manifest core
// ------------------------------------------------------------------------------------------------

/// Persistent metadata manager of the LSM engine.
///
/// Every mutation appends an event to the manifest WAL before updating the
/// in-memory state; [`Manifest::checkpoint`] compacts state into a snapshot
/// and truncates the WAL.
#[derive(Debug)]
pub struct Manifest {
    /// Engine metadata directory.
    path: PathBuf,

    /// Manifest WAL storing metadata events. Internally thread-safe.
    wal: Wal<ManifestEvent>,

    /// In-memory manifest state.
    data: Mutex<ManifestData>,
}

impl Manifest {
    /// Opens the manifest from the given directory.
    ///
    /// Loads the snapshot if present (falling back to pure WAL replay when
    /// the snapshot is corrupt), then replays the manifest WAL to recover the
    /// latest consistent state.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let snapshot_path = path.join(SNAPSHOT_FILENAME);
        let mut data = ManifestData::default();
        let mut snapshot_lsn: u64 = 0;

        if snapshot_path.exists() {
            match Self::read_snapshot(&snapshot_path) {
                Ok((snap, slsn)) => {
                    data = snap;
                    snapshot_lsn = slsn;
                    info!("Loaded manifest snapshot from {:?}", snapshot_path);
                }
                Err(e) => {
                    warn!(
                        "Failed to read manifest snapshot {:?}: {}; \
                         falling back to full WAL replay",
                        snapshot_path, e
                    );
                    data = ManifestData::default();
                    snapshot_lsn = 0;
                }
            }
        }

        let wal_path = path.join(WAL_FILENAME);
        let wal = Wal::<ManifestEvent>::open(&wal_path, WAL_SEGMENT, None)?;

        let manifest = Manifest {
            path,
            wal,
            data: Mutex::new(data),
        };

        manifest.replay_wal(snapshot_lsn)?;

        Ok(manifest)
    }

    // --------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------

    fn lock_data(&self) -> Result<std::sync::MutexGuard<'_, ManifestData>, ManifestError> {
        self.data.lock().map_err(|_| {
            error!("Mutex poisoned");
            ManifestError::Internal("Mutex poisoned".into())
        })
    }

    // --------------------------------------------------------------------
    // Read accessors
    // --------------------------------------------------------------------

    /// Returns the active WAL segment id.
    pub fn get_active_wal(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.active_wal)
    }

    /// Returns the frozen WAL segment list.
    pub fn get_frozen_wals(&self) -> Result<Vec<u64>, ManifestError> {
        Ok(self.lock_data()?.frozen_wals.clone())
    }

    /// Returns the list of SSTable entries.
    pub fn get_sstables(&self) -> Result<Vec<ManifestSstEntry>, ManifestError> {
        Ok(self.lock_data()?.sstables.clone())
    }

    /// Returns the last persisted LSN.
    pub fn get_last_lsn(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.last_lsn)
    }

    /// Returns the next SSTable id without allocating it.
    pub fn peek_next_sst_id(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.next_sst_id)
    }

    // --------------------------------------------------------------------
    // Mutation methods
    // --------------------------------------------------------------------
    //
    // All mutation methods take `&self`; interior mutability comes from the
    // `Mutex<ManifestData>` and the internally-synchronised WAL.

    /// Updates the active WAL segment.
    pub fn set_active_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::SetActiveWal { wal: wal_id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Adds a WAL segment to the frozen list.
    pub fn add_frozen_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::AddFrozenWal { wal: wal_id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Removes a frozen WAL.
    pub fn remove_frozen_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::RemoveFrozenWal { wal: wal_id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Adds an SSTable entry.
    pub fn add_sstable(&self, entry: ManifestSstEntry) -> Result<(), ManifestError> {
        let rec = ManifestEvent::AddSst { entry };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Removes an SSTable entry by id.
    pub fn remove_sstable(&self, sst_id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::RemoveSst { id: sst_id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Atomically allocates the next SSTable id.
    ///
    /// The data lock is held across the read-and-increment so two concurrent
    /// callers can never receive the same id.
    pub fn allocate_sst_id(&self) -> Result<u64, ManifestError> {
        let mut data = self.lock_data()?;
        let id = data.next_sst_id;
        let rec = ManifestEvent::AllocateSstId { id };
        self.wal.append(&rec)?;
        data.next_sst_id = id + 1;
        Ok(id)
    }

    /// Atomically records a compaction: adds new SSTables and removes the
    /// consumed ones in a single WAL entry.
    pub fn apply_compaction(
        &self,
        added: Vec<ManifestSstEntry>,
        removed: Vec<u64>,
    ) -> Result<(), ManifestError> {
        let rec = ManifestEvent::Compaction { added, removed };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Updates the last durable LSN.
    pub fn update_lsn(&self, last_lsn: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::UpdateLsn { last_lsn };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Creates a manifest snapshot and truncates the manifest WAL.
    ///
    /// Requires `&mut self` so no concurrent mutation races the truncation.
    pub fn checkpoint(&mut self) -> Result<(), ManifestError> {
        // 1. Capture current state with a checksum placeholder.
        let snapshot = {
            let data = self.lock_data()?.clone();
            ManifestSnapshot {
                version: data.version,
                snapshot_lsn: data.last_lsn,
                manifest_data: data,
                checksum: 0,
            }
        };

        // 2. Single-pass checksum: serialize with checksum=0, CRC the bytes,
        //    patch the trailing 4 bytes (the checksum is the last field and
        //    fixed-int encoded).
        let config = standard().with_fixed_int_encoding();
        let mut snapshot_bytes = encode_to_vec(&snapshot, config)?;

        let mut hasher = Crc32::new();
        hasher.update(&snapshot_bytes);
        let checksum = hasher.finalize();

        let len = snapshot_bytes.len();
        snapshot_bytes[len - 4..].copy_from_slice(&checksum.to_le_bytes());

        // 3. Write to a temp file, fsync, atomically rename, fsync the dir.
        let tmp_name = format!("{SNAPSHOT_FILENAME}{SNAPSHOT_TMP_SUFFIX}");
        let tmp_path = self.path.join(&tmp_name);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&snapshot_bytes)?;
            f.sync_all()?;
        }

        let final_path = self.path.join(SNAPSHOT_FILENAME);
        fs::rename(&tmp_path, &final_path)?;
        Self::fsync_dir(&self.path)?;

        info!("Manifest snapshot written to {:?}", final_path);

        // 4. Truncate the manifest WAL — safe now that the snapshot is durable.
        self.wal.truncate()?;

        Ok(())
    }

    fn fsync_dir(dir: &Path) -> Result<(), ManifestError> {
        let dir_file = File::open(dir)?;
        dir_file.sync_all()?;
        Ok(())
    }

    fn read_snapshot(p: &Path) -> Result<(ManifestData, u64), ManifestError> {
        let mut f = File::open(p)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;

        let config = standard().with_fixed_int_encoding();
        let (snap, _) = decode_from_slice::<ManifestSnapshot, _>(&buf, config)?;

        // Verify: re-encode with the checksum zeroed, CRC, compare.
        let verify = ManifestSnapshot {
            checksum: 0,
            version: snap.version,
            snapshot_lsn: snap.snapshot_lsn,
            manifest_data: snap.manifest_data.clone(),
        };
        let verify_bytes = encode_to_vec(&verify, config)?;

        let mut hasher = Crc32::new();
        hasher.update(&verify_bytes);
        if snap.checksum != hasher.finalize() {
            return Err(ManifestError::SnapshotChecksumMismatch);
        }

        Ok((snap.manifest_data, snap.snapshot_lsn))
    }

    fn replay_wal(&self, snapshot_lsn: u64) -> Result<(), ManifestError> {
        let iter = self.wal.replay_iter()?;

        let mut count: u64 = 0;
        for item in iter {
            match item {
                Ok(rec) => {
                    self.apply_record(&rec)?;
                    count += 1;
                }
                Err(e) => {
                    warn!("Manifest WAL replay stopped due to WAL error: {}", e);
                    break;
                }
            }
        }

        // After replay the manifest LSN must be at least the snapshot
        // baseline; anything lower indicates WAL truncation or data loss.
        let current_lsn = self.lock_data()?.last_lsn;
        if snapshot_lsn > 0 && current_lsn < snapshot_lsn {
            warn!(
                "Manifest LSN after WAL replay ({}) is less than snapshot LSN ({}); \
                 possible WAL truncation or data loss",
                current_lsn, snapshot_lsn
            );
        }

        info!(
            "Manifest WAL replay: {} entries applied (snapshot_lsn={})",
            count, snapshot_lsn
        );

        Ok(())
    }

    fn apply_record(&self, rec: &ManifestEvent) -> Result<(), ManifestError> {
        let mut data = self.lock_data()?;

        match rec {
            ManifestEvent::Version { version } => {
                data.version = *version;
            }

            ManifestEvent::SetActiveWal { wal } => {
                data.active_wal = *wal;
                data.frozen_wals.retain(|w| w != wal);
            }

            ManifestEvent::AddFrozenWal { wal } => {
                if !data.frozen_wals.contains(wal) {
                    data.frozen_wals.push(*wal);
                }
            }

            ManifestEvent::RemoveFrozenWal { wal } => {
                data.frozen_wals.retain(|w| w != wal);
            }

            ManifestEvent::AddSst { entry } => {
                // Idempotent — duplicate ids are skipped on replay.
                if !data.sstables.iter().any(|e| e.id == entry.id) {
                    data.sstables.push(entry.clone());
                }
                if entry.id >= data.next_sst_id {
                    data.next_sst_id = entry.id + 1;
                }
            }

            ManifestEvent::RemoveSst { id } => {
                data.sstables.retain(|e| e.id != *id);
            }

            ManifestEvent::UpdateLsn { last_lsn } => {
                if *last_lsn > data.last_lsn {
                    data.last_lsn = *last_lsn;
                }
            }

            ManifestEvent::AllocateSstId { id } => {
                // Advance the counter past the allocated id (self-healing on
                // replay).
                if *id >= data.next_sst_id {
                    data.next_sst_id = *id + 1;
                }
            }

            ManifestEvent::Compaction { added, removed } => {
                for id in removed {
                    data.sstables.retain(|e| e.id != *id);
                }
                for entry in added {
                    if !data.sstables.iter().any(|e| e.id == entry.id) {
                        data.sstables.push(entry.clone());
                    }
                    if entry.id >= data.next_sst_id {
                        data.next_sst_id = entry.id + 1;
                    }
                }
            }
        }

        Ok(())
    }
}
