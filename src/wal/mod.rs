//! Write-Ahead Logging (WAL) Module
//!
//! A **durable**, **append-only**, and **generic** write-ahead log. Any record
//! type implementing [`WalData`] can be persisted with CRC32 protection and
//! replayed after a crash. Both the memtable (`MemtableRecord`) and the
//! manifest (`ManifestEvent`) log through this type.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES][HEADER_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! ...
//! ```
//!
//! - **Header** — a [`WalHeader`] followed by a 4-byte CRC32 checksum.
//! - **Record** — a 4-byte little-endian length prefix, the `bincode`-encoded
//!   record bytes, and a 4-byte CRC32 computed over `len || record_bytes`.
//!
//! # Concurrency model
//!
//! The file handle is shared behind `Arc<Mutex<File>>`. [`WalIter`] tracks its
//! own logical offset and seeks before each read, so replay can run while an
//! appender holds the same WAL.
//!
//! # Guarantees
//!
//! - **Durability:** every `append()` ends in `fsync` via [`File::sync_all`].
//! - **Integrity:** header and record checksums are verified during replay.
//! - **Corruption detection:** replay stops at the first failed checksum or
//!   truncated write.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
    sync::{Arc, Mutex},
};

use bincode::{config::standard, decode_from_slice, encode_to_vec};
use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{error, info, trace, warn};

const U32_SIZE: usize = std::mem::size_of::<u32>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error.
    #[error("Serialization (encode) error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Deserialization error.
    #[error("Deserialization (decode) error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Data integrity failure — checksum did not match.
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Record exceeds the configured maximum size.
    #[error("Record size exceeds limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// Unexpected end-of-file during read.
    #[error("Unexpected end of file")]
    UnexpectedEof,

    /// WAL header failed integrity validation.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Internal consistency or locking error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Metadata written at the start of the WAL file, followed by a CRC32
/// checksum protecting it against corruption.
#[derive(Debug, bincode::Encode, bincode::Decode)]
pub struct WalHeader {
    /// Magic constant to identify WAL files (`b"EWAL"`).
    pub magic: [u8; 4],

    /// WAL format version.
    pub version: u32,

    /// Maximum record size (in bytes).
    pub max_record_size: u32,

    /// Monotonically-increasing WAL segment id.
    pub wal_seq: u64,
}

impl WalHeader {
    /// Expected 4-byte magic constant.
    pub const MAGIC: [u8; 4] = *b"EWAL";

    /// Current supported version number.
    pub const VERSION: u32 = 1;

    /// Default maximum record size (1 MiB).
    pub const DEFAULT_MAX_RECORD_SIZE: u32 = 1024 * 1024;

    pub fn new(max_record_size: u32, wal_seq: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            max_record_size,
            wal_seq,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Traits
// ------------------------------------------------------------------------------------------------

/// Marker trait for record types storable in a [`Wal`].
///
/// Blanket-implemented for anything `bincode`-codable, `Debug`, and
/// thread-safe.
pub trait WalData: bincode::Encode + bincode::Decode<()> + std::fmt::Debug + Send + Sync {}
impl<T> WalData for T where T: bincode::Encode + bincode::Decode<()> + std::fmt::Debug + Send + Sync {}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// A generic, thread-safe write-ahead log for durable record storage.
///
/// See the [module-level documentation](self) for format, concurrency, and
/// guarantees.
#[derive(Debug)]
pub struct Wal<T: WalData> {
    /// Thread-safe file handle for WAL operations.
    inner_file: Arc<Mutex<File>>,

    /// Path to the WAL file on disk.
    path: String,

    /// Persistent header with metadata and integrity info.
    header: WalHeader,

    /// Marker associating this WAL with the record type `T`.
    _phantom: std::marker::PhantomData<T>,
}

impl<T: WalData> Wal<T> {
    /// Open or create a WAL file at the given path.
    ///
    /// `wal_seq` identifies the segment; an existing file must carry the same
    /// segment id in its header. A fresh file gets a new header written and
    /// synced before the call returns.
    pub fn open<P: AsRef<Path>>(
        path: P,
        wal_seq: u64,
        max_record_size: Option<u32>,
    ) -> Result<Self, WalError> {
        let path_ref = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path_ref)?;

        let config = standard().with_fixed_int_encoding();

        // Fresh file → write a new header. Existing file → read and verify.
        let header = if file.metadata()?.len() == 0 {
            let header = WalHeader::new(
                max_record_size.unwrap_or(WalHeader::DEFAULT_MAX_RECORD_SIZE),
                wal_seq,
            );

            let header_bytes = encode_to_vec(&header, config)?;

            let mut hasher = Crc32::new();
            hasher.update(&header_bytes);
            let checksum = hasher.finalize();

            file.write_all(&header_bytes)?;
            file.write_all(&checksum.to_le_bytes())?;
            file.sync_all()?;

            info!(path = %path_ref.display(), wal_seq, "created new WAL header");

            header
        } else {
            file.seek(SeekFrom::Start(0))?;

            // Header is fixed-int encoded, so its length is constant.
            let sample = WalHeader::new(WalHeader::DEFAULT_MAX_RECORD_SIZE, 0);
            let header_len = encode_to_vec(&sample, config)?.len();

            let mut header_bytes = vec![0u8; header_len];
            file.read_exact(&mut header_bytes)?;

            let mut checksum_bytes = [0u8; U32_SIZE];
            file.read_exact(&mut checksum_bytes)?;
            let stored_checksum = u32::from_le_bytes(checksum_bytes);

            let mut hasher = Crc32::new();
            hasher.update(&header_bytes);
            if stored_checksum != hasher.finalize() {
                return Err(WalError::InvalidHeader("header checksum mismatch".into()));
            }

            let (header, _) = decode_from_slice::<WalHeader, _>(&header_bytes, config)?;

            if header.magic != WalHeader::MAGIC {
                return Err(WalError::InvalidHeader("bad magic".into()));
            }
            if header.version != WalHeader::VERSION {
                return Err(WalError::InvalidHeader(format!(
                    "unsupported version {}",
                    header.version
                )));
            }
            if header.wal_seq != wal_seq {
                return Err(WalError::InvalidHeader(format!(
                    "segment id mismatch: header {} vs expected {}",
                    header.wal_seq, wal_seq
                )));
            }

            info!(
                path = %path_ref.display(),
                max_record_size = header.max_record_size,
                "loaded WAL header"
            );

            header
        };

        Ok(Self {
            inner_file: Arc::new(Mutex::new(file)),
            path: path_ref.display().to_string(),
            header,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Appends a single record to the WAL.
    ///
    /// The record is serialized with `bincode` and written as
    /// `[u32 len LE][record_bytes][u32 crc32 LE]`, where the CRC covers
    /// `len || record_bytes`. The file is fsynced before returning.
    pub fn append(&self, record: &T) -> Result<(), WalError> {
        let config = standard().with_fixed_int_encoding();

        let record_bytes = encode_to_vec(record, config)?;
        let record_len = record_bytes.len() as u32;

        if record_len > self.header.max_record_size {
            return Err(WalError::RecordTooLarge(record_len as usize));
        }

        let mut hasher = Crc32::new();
        hasher.update(&record_len.to_le_bytes());
        hasher.update(&record_bytes);
        let checksum = hasher.finalize();

        let mut guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;

        guard.write_all(&record_len.to_le_bytes())?;
        guard.write_all(&record_bytes)?;
        guard.write_all(&checksum.to_le_bytes())?;
        guard.sync_all()?;

        trace!(record_len, checksum, "appended WAL record");
        Ok(())
    }

    /// Returns an iterator replaying all valid records from the WAL.
    ///
    /// The iterator reads sequentially, verifies CRC checksums, and decodes
    /// each entry back into `T`.
    pub fn replay_iter(&self) -> Result<WalIter<T>, WalError> {
        trace!(path = %self.path, "starting WAL replay");

        let config = standard().with_fixed_int_encoding();
        let header_bytes = encode_to_vec(&self.header, config)?;
        let start_offset = (header_bytes.len() + U32_SIZE) as u64;

        Ok(WalIter {
            file: Arc::clone(&self.inner_file),
            config,
            offset: start_offset,
            max_record_size: self.header.max_record_size as usize,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Truncate (clear) the WAL and rewrite its header.
    ///
    /// After truncation the WAL contains only the header and its checksum.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        let mut guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;

        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;

        let config = standard().with_fixed_int_encoding();
        let header_bytes = encode_to_vec(&self.header, config)?;

        let mut hasher = Crc32::new();
        hasher.update(&header_bytes);
        let checksum = hasher.finalize();

        guard.write_all(&header_bytes)?;
        guard.write_all(&checksum.to_le_bytes())?;
        guard.sync_all()?;

        info!(path = %self.path, "truncated WAL file");
        Ok(())
    }

    /// Segment id of this WAL file.
    pub fn wal_seq(&self) -> u64 {
        self.header.wal_seq
    }

    /// Path of the underlying WAL file.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl<T: WalData> Drop for Wal<T> {
    fn drop(&mut self) {
        match self.inner_file.lock() {
            Ok(guard) => {
                if let Err(e) = guard.sync_all() {
                    error!("Failed to sync WAL on drop: {}", e);
                }
            }
            Err(poisoned) => {
                let file = poisoned.into_inner();
                if let Err(e) = file.sync_all() {
                    error!("Failed to sync WAL (poisoned) on drop: {}", e);
                } else {
                    warn!("Recovered and synced WAL after poisoned lock");
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// WalIter
// ------------------------------------------------------------------------------------------------

/// Streaming WAL replay iterator.
///
/// Reads records sequentially and yields decoded `T` values. Holds the shared
/// `Arc<Mutex<File>>`, locking only for the duration of one record read, and
/// seeks to its own logical offset before each read so concurrent appends do
/// not disturb it.
pub struct WalIter<T: WalData> {
    /// Shared file handle protected by a mutex.
    file: Arc<Mutex<File>>,

    /// Bincode configuration for decoding.
    config: bincode::config::Configuration<
        bincode::config::LittleEndian,
        bincode::config::Fixint,
        bincode::config::NoLimit,
    >,

    /// Current byte offset within the WAL file.
    offset: u64,

    /// Maximum allowed record size.
    max_record_size: usize,

    /// Marker associating this iterator with the record type `T`.
    _phantom: std::marker::PhantomData<T>,
}

impl<T: WalData> Iterator for WalIter<T> {
    type Item = Result<T, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(_) => return Some(Err(WalError::Internal("Mutex poisoned".into()))),
        };

        if let Err(e) = guard.seek(SeekFrom::Start(self.offset)) {
            return Some(Err(WalError::Io(e)));
        }

        // Length prefix (4 bytes). Clean EOF here means end of log.
        let mut len_bytes = [0u8; U32_SIZE];
        match guard.read_exact(&mut len_bytes) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                trace!("end of WAL reached");
                return None;
            }
            Err(e) => return Some(Err(WalError::Io(e))),
        }

        let record_len = u32::from_le_bytes(len_bytes) as usize;
        if record_len > self.max_record_size {
            return Some(Err(WalError::RecordTooLarge(record_len)));
        }

        let mut record_bytes = vec![0u8; record_len];
        if let Err(e) = guard.read_exact(&mut record_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                error!("truncated WAL record detected");
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }

        let mut checksum_bytes = [0u8; U32_SIZE];
        if let Err(e) = guard.read_exact(&mut checksum_bytes) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                error!("truncated WAL record detected");
                return Some(Err(WalError::UnexpectedEof));
            }
            return Some(Err(WalError::Io(e)));
        }
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        if let Ok(pos) = guard.stream_position() {
            self.offset = pos;
        }

        let mut hasher = Crc32::new();
        hasher.update(&len_bytes);
        hasher.update(&record_bytes);
        if stored_checksum != hasher.finalize() {
            error!(record_len, "checksum mismatch for WAL record");
            return Some(Err(WalError::ChecksumMismatch));
        }

        match decode_from_slice::<T, _>(&record_bytes, self.config) {
            Ok((record, _)) => Some(Ok(record)),
            Err(e) => Some(Err(WalError::Decode(e))),
        }
    }
}
