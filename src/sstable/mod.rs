//! Sorted String Table (SSTable) Module
//!
//! An **immutable**, **disk-backed**, **multi-version** sorted string table.
//! Each SSTable stores every version of its keys (puts and point tombstones),
//! ordered `(key ASC, LSN DESC)`, plus a bloom filter for fast negative point
//! lookups and a **collections block** listing the distinct collection ids
//! appearing in its keys. The collections block is what lets the engine
//! register file references with the hotspot delete table on flush, and
//! compute the involved/surviving collection sets when a compaction retires
//! this file.
//!
//! Data is serialized using [`bincode`] with fixed integer encoding; every
//! block carries a CRC32 checksum.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! ...
//! [BLOOM_FILTER_LEN_LE][BLOOM_FILTER_BYTES][BLOOM_FILTER_CRC32_LE]
//! [COLLECTIONS_LEN_LE][COLLECTIONS_BYTES][COLLECTIONS_CRC32_LE]
//! [PROPERTIES_LEN_LE][PROPERTIES_BYTES][PROPERTIES_CRC32_LE]
//! [METAINDEX_LEN_LE][METAINDEX_BYTES][METAINDEX_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER_BYTES]
//! ```
//!
//! - **Header** — [`SSTableHeader`] with an embedded CRC32.
//! - **Data blocks** — serialized [`SSTableCell`] entries (put or tombstone).
//!   A block boundary never splits the version group of one key, so a point
//!   lookup needs exactly one block.
//! - **Bloom filter block** — fast existence checks for point keys.
//! - **Collections block** — sorted distinct collection ids in this file.
//! - **Properties block** — min/max key, LSN range, counts, timestamps.
//! - **Metaindex block** — directory of the meta blocks above.
//! - **Index block** — directory of data blocks for binary search.
//! - **Footer** — [`SSTableFooter`] with block handles and CRC32.
//!
//! # Concurrency model
//!
//! SSTables are immutable; reads are lock-free and thread-safe. The file is
//! memory-mapped and never written after the atomic `.tmp → final` rename.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::BTreeSet,
    fs::{File, OpenOptions, rename},
    io::{self, BufWriter, Seek, Write},
    mem,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use bincode::{
    config::{Configuration, Fixint, LittleEndian, standard},
    decode_from_slice, encode_to_vec,
};
use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::engine::utils::Record;
use crate::hotspot::KeySchema;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const SST_HDR_MAGIC: [u8; 4] = *b"ESST";
const SST_HDR_VERSION: u32 = 1;
const SST_BLOOM_FILTER_FALSE_POSITIVE_RATE: f64 = 0.01;
const SST_DATA_BLOCK_MAX_SIZE: usize = 4096;
const SST_HDR_SIZE: usize = 12;
const SST_FOOTER_SIZE: usize = 44;
const SST_BLOCK_LEN_SIZE: usize = 4;
const SST_BLOCK_CHECKSUM_SIZE: usize = 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Represents possible errors returned by SSTable operations.
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error.
    #[error("Serialization (encode) error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Deserialization error.
    #[error("Deserialization (decode) error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Checksum mismatch.
    #[error("Checksum mismatch")]
    ChecksumMismatch,
}

// ------------------------------------------------------------------------------------------------
// On-disk structures
// ------------------------------------------------------------------------------------------------

/// SSTable file header, written at the beginning of the file.
#[derive(Default, bincode::Encode, bincode::Decode)]
pub(crate) struct SSTableHeader {
    /// Magic bytes identifying the SSTable format (`b"ESST"`).
    magic: [u8; 4],

    /// SSTable format version.
    version: u32,

    /// CRC32 checksum of the header (computed with this field zeroed).
    header_crc: u32,
}

/// A data block: a raw concatenation of encoded cells.
#[derive(bincode::Encode, bincode::Decode)]
struct SSTableDataBlock {
    data: Vec<u8>,
}

/// Serialized bloom filter bytes.
#[derive(bincode::Encode, bincode::Decode)]
pub(crate) struct SSTableBloomBlock {
    data: Vec<u8>,
}

/// Metadata block containing SSTable-level properties and statistics.
#[derive(Debug, bincode::Encode, bincode::Decode)]
pub struct SSTablePropertiesBlock {
    /// Creation timestamp (UNIX epoch nanos).
    pub creation_timestamp: u64,

    /// Total number of cells (all versions, including tombstones).
    pub record_count: u64,

    /// Number of point tombstone cells.
    pub tombstone_count: u64,

    /// Number of distinct collection ids present in this file.
    pub collection_count: u64,

    /// Minimum LSN present in this SSTable.
    pub min_lsn: u64,

    /// Maximum LSN present in this SSTable.
    pub max_lsn: u64,

    /// Minimum timestamp in this SSTable.
    pub min_timestamp: u64,

    /// Maximum timestamp in this SSTable.
    pub max_timestamp: u64,

    /// Minimum key in the SSTable.
    pub min_key: Vec<u8>,

    /// Maximum key in the SSTable.
    pub max_key: Vec<u8>,
}

/// Index entry pointing at one data block.
#[derive(bincode::Encode, bincode::Decode)]
pub(crate) struct SSTableIndexEntry {
    /// First key of the block.
    separator_key: Vec<u8>,

    /// Offset and size of the block.
    handle: BlockHandle,
}

/// SSTable footer, stored at the very end of the file. Fixed-size.
#[derive(bincode::Encode, bincode::Decode)]
pub(crate) struct SSTableFooter {
    /// Handle of the metaindex block.
    metaindex: BlockHandle,

    /// Handle of the main index block.
    index: BlockHandle,

    /// Total size of the SSTable file, including this footer.
    total_file_size: u64,

    /// CRC32 checksum computed over the footer with this field zeroed.
    footer_crc32: u32,
}

/// Fixed-width per-cell header preceding key and value bytes.
#[derive(bincode::Encode, bincode::Decode)]
struct SSTableCell {
    /// Length of the key in bytes.
    key_len: u32,

    /// Length of the value in bytes (0 for tombstones).
    value_len: u32,

    /// Timestamp of the operation.
    timestamp: u64,

    /// Whether this cell is a point tombstone.
    is_delete: bool,

    /// Log sequence number of this version.
    lsn: u64,
}

/// Handle to a block in the SSTable file.
#[derive(Debug, bincode::Encode, bincode::Decode)]
struct BlockHandle {
    /// Byte offset of the block in the file.
    offset: u64,

    /// Size of the block in bytes, including length prefix and checksum.
    size: u64,
}

/// One entry of the metaindex block.
#[derive(Debug, bincode::Encode, bincode::Decode)]
struct MetaIndexEntry {
    /// Block name (`filter.bloom`, `meta.properties`, `meta.collections`).
    name: String,

    /// Handle pointing at the block.
    handle: BlockHandle,
}

// ------------------------------------------------------------------------------------------------
// Lookup result
// ------------------------------------------------------------------------------------------------

/// Result of a single-SSTable point lookup.
#[derive(Debug, PartialEq, Clone)]
pub enum SstGetResult {
    /// Newest visible version is a put.
    Put {
        value: Vec<u8>,
        lsn: u64,
        timestamp: u64,
    },

    /// Newest visible version is a point tombstone.
    Delete { lsn: u64, timestamp: u64 },

    /// This SSTable holds no visible version of the key.
    NotFound,
}

impl SstGetResult {
    /// LSN of the found version, or 0 for [`SstGetResult::NotFound`].
    pub fn lsn(&self) -> u64 {
        match self {
            Self::Put { lsn, .. } => *lsn,
            Self::Delete { lsn, .. } => *lsn,
            Self::NotFound => 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// SSTable reader
// ------------------------------------------------------------------------------------------------

/// A fully memory-mapped, immutable sorted string table.
pub struct SSTable {
    /// Engine-assigned unique id (the manifest's monotonic counter).
    pub id: u64,

    /// Memory-mapped file contents.
    mmap: Mmap,

    /// Parsed header.
    #[allow(dead_code)]
    header: SSTableHeader,

    /// Bloom filter bytes for fast membership tests.
    bloom: SSTableBloomBlock,

    /// Properties block with statistics and metadata.
    pub properties: SSTablePropertiesBlock,

    /// Sorted distinct collection ids present in this file.
    collections: Vec<u64>,

    /// Index entries mapping first keys to data blocks.
    index: Vec<SSTableIndexEntry>,

    /// Footer with block handles and total file size.
    footer: SSTableFooter,
}

impl SSTable {
    /// Opens an SSTable from disk, verifying header, footer, and every meta
    /// block checksum along the way.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(..) }`; sound because the file is immutable
    /// after its atomic rename, the mapping is read-only, and all block
    /// boundaries are bounds-checked before slicing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SSTableError> {
        let file = File::open(path)?;

        let mmap = unsafe { Mmap::map(&file)? };
        let config = standard().with_fixed_int_encoding();

        let file_len = mmap.len();
        if file_len < SST_HDR_SIZE + SST_FOOTER_SIZE {
            return Err(SSTableError::Internal("File too small".into()));
        }

        // Header: decode, zero the CRC field, re-encode, compare.
        let (mut header, _) = decode_from_slice::<SSTableHeader, _>(&mmap[..SST_HDR_SIZE], config)?;
        let stored_header_crc = header.header_crc;
        header.header_crc = 0;

        let header_bytes = encode_to_vec(&header, config)?;
        let mut hasher = Crc32::new();
        hasher.update(&header_bytes);
        if stored_header_crc != hasher.finalize() {
            return Err(SSTableError::ChecksumMismatch);
        }

        if header.magic != SST_HDR_MAGIC {
            return Err(SSTableError::Internal("SSTable header magic mismatch".into()));
        }
        if header.version != SST_HDR_VERSION {
            return Err(SSTableError::Internal("SSTable header version mismatch".into()));
        }

        // Footer: same zero-and-compare scheme.
        let footer_start = file_len - SST_FOOTER_SIZE;
        let (mut footer, _) = decode_from_slice::<SSTableFooter, _>(&mmap[footer_start..], config)?;
        let stored_footer_crc = footer.footer_crc32;
        footer.footer_crc32 = 0;

        let footer_bytes = encode_to_vec(&footer, config)?;
        let mut hasher = Crc32::new();
        hasher.update(&footer_bytes);
        if stored_footer_crc != hasher.finalize() {
            return Err(SSTableError::ChecksumMismatch);
        }

        // Metaindex → named meta blocks.
        let metaindex_data = Self::read_block_bytes(&mmap, &footer.metaindex)?;
        let (meta_entries, _) =
            decode_from_slice::<Vec<MetaIndexEntry>, _>(&metaindex_data, config)?;

        let mut bloom_handle: Option<BlockHandle> = None;
        let mut properties_handle: Option<BlockHandle> = None;
        let mut collections_handle: Option<BlockHandle> = None;

        for entry in meta_entries {
            match entry.name.as_str() {
                "filter.bloom" => bloom_handle = Some(entry.handle),
                "meta.properties" => properties_handle = Some(entry.handle),
                "meta.collections" => collections_handle = Some(entry.handle),
                other => {
                    return Err(SSTableError::Internal(format!(
                        "unexpected metaindex entry: {other}"
                    )));
                }
            }
        }

        let bloom = match bloom_handle {
            Some(handle) => {
                let bytes = Self::read_block_bytes(&mmap, &handle)?;
                let (bloom, _) = decode_from_slice::<SSTableBloomBlock, _>(&bytes, config)?;
                bloom
            }
            None => SSTableBloomBlock { data: Vec::new() },
        };

        let properties = match properties_handle {
            Some(handle) => {
                let bytes = Self::read_block_bytes(&mmap, &handle)?;
                let (properties, _) =
                    decode_from_slice::<SSTablePropertiesBlock, _>(&bytes, config)?;
                properties
            }
            None => return Err(SSTableError::Internal("SSTable missing properties".into())),
        };

        let collections = match collections_handle {
            Some(handle) => {
                let bytes = Self::read_block_bytes(&mmap, &handle)?;
                let (ids, _) = decode_from_slice::<Vec<u64>, _>(&bytes, config)?;
                ids
            }
            None => return Err(SSTableError::Internal("SSTable missing collections".into())),
        };

        let index_bytes = Self::read_block_bytes(&mmap, &footer.index)?;
        let (index_entries, _) =
            decode_from_slice::<Vec<SSTableIndexEntry>, _>(&index_bytes, config)?;

        Ok(Self {
            id: 0,
            mmap,
            header,
            bloom,
            properties,
            collections,
            index: index_entries,
            footer,
        })
    }

    /// Sorted distinct collection ids present in this file.
    ///
    /// This is the set the engine registers with the hotspot delete table,
    /// and the basis of compaction reference accounting.
    pub fn collections(&self) -> &[u64] {
        &self.collections
    }

    /// Whether any key of `collection` lives in this file.
    pub fn contains_collection(&self, collection: u64) -> bool {
        self.collections.binary_search(&collection).is_ok()
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.footer.total_file_size
    }

    /// Looks up the newest version of `key` with `lsn ≤ visible_lsn`.
    ///
    /// Versions above the horizon are ignored, which is how snapshot reads
    /// and the engine's cross-SSTable early termination compose. Pass
    /// [`u64::MAX`] for a latest-state read.
    ///
    /// # Lookup pipeline
    ///
    /// 1. Bloom filter — a definite miss skips the block search.
    /// 2. Index binary search for the candidate data block.
    /// 3. Block-local seek; collect the best version at or below the horizon
    ///    (ties broken by timestamp). All versions of a key share one block,
    ///    so a single block read suffices.
    pub fn get_at(&self, key: &[u8], visible_lsn: u64) -> Result<SstGetResult, SSTableError> {
        if !self.bloom.data.is_empty() {
            match Bloom::<Vec<u8>>::from_slice(&self.bloom.data) {
                Ok(bloom) => {
                    if !bloom.check(&key.to_vec()) {
                        return Ok(SstGetResult::NotFound);
                    }
                }
                Err(_) => {} // corrupted bloom → fall back to block search
            }
        }

        if self.index.is_empty() {
            return Ok(SstGetResult::NotFound);
        }

        let block_idx = self.find_block_for_key(key);
        let entry = &self.index[block_idx];

        let config = standard().with_fixed_int_encoding();
        let raw = Self::read_block_bytes(&self.mmap, &entry.handle)?;
        let (block, _) = decode_from_slice::<SSTableDataBlock, _>(&raw, config)?;

        let mut iter = BlockIterator::new(block.data);
        iter.seek_to(key);

        let mut best: Option<(SstGetResult, u64)> = None; // (result, timestamp)

        for item in iter {
            if item.key != key {
                break;
            }
            if item.lsn > visible_lsn {
                continue;
            }

            let candidate_ts = item.timestamp;
            let candidate = if item.is_delete {
                SstGetResult::Delete {
                    lsn: item.lsn,
                    timestamp: item.timestamp,
                }
            } else {
                SstGetResult::Put {
                    value: item.value,
                    lsn: item.lsn,
                    timestamp: item.timestamp,
                }
            };

            best = Some(match best {
                Some((existing, existing_ts)) => {
                    if candidate.lsn() > existing.lsn()
                        || (candidate.lsn() == existing.lsn() && candidate_ts > existing_ts)
                    {
                        (candidate, candidate_ts)
                    } else {
                        (existing, existing_ts)
                    }
                }
                None => (candidate, candidate_ts),
            });
        }

        Ok(best.map_or(SstGetResult::NotFound, |(result, _)| result))
    }

    /// Latest-state point lookup.
    pub fn get(&self, key: &[u8]) -> Result<SstGetResult, SSTableError> {
        self.get_at(key, u64::MAX)
    }

    /// Returns a range-scan iterator over `[start_key, end_key)`.
    ///
    /// Yields **raw MVCC entries** (all versions, puts and tombstones) in
    /// `(key ASC, LSN DESC)` order. Higher layers deduplicate versions and
    /// apply visibility rules.
    pub fn scan(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> Result<SSTableScanIterator<'_>, SSTableError> {
        SSTableScanIterator::new(self, start_key.to_vec(), end_key.to_vec())
    }

    /// Reads a block referenced by a [`BlockHandle`] and verifies its
    /// checksum.
    fn read_block_bytes(mmap: &Mmap, handle: &BlockHandle) -> Result<Vec<u8>, SSTableError> {
        let start = handle.offset as usize;
        let size = handle.size as usize;

        if start + size > mmap.len() {
            return Err(SSTableError::Internal("Block out of range".into()));
        }

        let mut cursor = start;

        let len_bytes: [u8; SST_BLOCK_LEN_SIZE] = mmap[cursor..cursor + SST_BLOCK_LEN_SIZE]
            .try_into()
            .map_err(|_| SSTableError::Internal("Short block length".into()))?;
        let content_len = u32::from_le_bytes(len_bytes) as usize;
        cursor += SST_BLOCK_LEN_SIZE;

        if cursor + content_len + SST_BLOCK_CHECKSUM_SIZE > mmap.len() {
            return Err(SSTableError::Internal("Block out of range".into()));
        }

        let content = &mmap[cursor..cursor + content_len];
        cursor += content_len;

        let checksum_bytes: [u8; SST_BLOCK_CHECKSUM_SIZE] = mmap
            [cursor..cursor + SST_BLOCK_CHECKSUM_SIZE]
            .try_into()
            .map_err(|_| SSTableError::Internal("Short checksum".into()))?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let mut hasher = Crc32::new();
        hasher.update(content);
        if hasher.finalize() != stored_checksum {
            return Err(SSTableError::ChecksumMismatch);
        }

        Ok(content.to_vec())
    }

    /// Locates the index entry whose block may contain `key`.
    fn find_block_for_key(&self, key: &[u8]) -> usize {
        if self.index.is_empty() {
            return 0;
        }

        match self
            .index
            .binary_search_by(|entry| entry.separator_key.as_slice().cmp(key))
        {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Data Block Iterator
// ------------------------------------------------------------------------------------------------

/// A fully decoded entry from a data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockItem {
    /// The user key bytes.
    pub key: Vec<u8>,

    /// The value bytes. Empty for tombstones.
    pub value: Vec<u8>,

    /// Whether this entry represents a point delete.
    pub is_delete: bool,

    /// Log sequence number of this version.
    pub lsn: u64,

    /// Commit timestamp supplied by the storage engine.
    pub timestamp: u64,
}

/// Iterator over the entries within a single SSTable data block.
///
/// Decodes [`SSTableCell`] boundaries with fixed-int `bincode`, supports
/// forward iteration and linear key seeking. Blocks are small (≈4 KiB), so
/// the linear seek is cheap. Corruption or truncation ends iteration.
pub struct BlockIterator {
    /// Raw block payload (concatenated encoded cells).
    data: Vec<u8>,

    /// Cursor into `data`, always at the next cell header.
    cursor: usize,

    /// bincode decoding configuration.
    config: Configuration<LittleEndian, Fixint>,
}

impl BlockIterator {
    /// Create a new iterator from already-decoded block bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            cursor: 0,
            config: standard().with_fixed_int_encoding(),
        }
    }

    /// Reset the iterator to the first entry in the block.
    pub fn seek_to_first(&mut self) {
        self.cursor = 0;
    }

    /// Seek to the first entry whose key is **≥ `search_key`**.
    pub fn seek_to(&mut self, search_key: &[u8]) {
        self.cursor = 0;
        while self.cursor < self.data.len() {
            match decode_from_slice::<SSTableCell, _>(&self.data[self.cursor..], self.config) {
                Ok((cell, cell_len)) => {
                    let pos = self.cursor + cell_len;
                    let key_len = cell.key_len as usize;
                    let value_len = cell.value_len as usize;

                    if pos + key_len + value_len > self.data.len() {
                        self.cursor = self.data.len();
                        return;
                    }

                    let key_bytes = &self.data[pos..pos + key_len];
                    if key_bytes >= search_key {
                        return; // cursor stays at this cell's header
                    }

                    self.cursor = pos + key_len + value_len;
                }
                Err(_) => {
                    self.cursor = self.data.len();
                    return;
                }
            }
        }
    }

    /// Decode and return the next entry, advancing the cursor.
    pub fn next_item(&mut self) -> Option<BlockItem> {
        if self.cursor >= self.data.len() {
            return None;
        }

        match decode_from_slice::<SSTableCell, _>(&self.data[self.cursor..], self.config) {
            Ok((cell, cell_len)) => {
                self.cursor += cell_len;

                let key_len = cell.key_len as usize;
                let value_len = cell.value_len as usize;

                if self.cursor + key_len + value_len > self.data.len() {
                    self.cursor = self.data.len();
                    return None;
                }

                let key = self.data[self.cursor..self.cursor + key_len].to_vec();
                self.cursor += key_len;
                let value = self.data[self.cursor..self.cursor + value_len].to_vec();
                self.cursor += value_len;

                Some(BlockItem {
                    key,
                    value,
                    is_delete: cell.is_delete,
                    lsn: cell.lsn,
                    timestamp: cell.timestamp,
                })
            }
            Err(_) => {
                self.cursor = self.data.len();
                None
            }
        }
    }
}

impl Iterator for BlockIterator {
    type Item = BlockItem;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item()
    }
}

// ------------------------------------------------------------------------------------------------
// Scan Iterator
// ------------------------------------------------------------------------------------------------

/// Sorted forward scan over one SSTable, yielding all point entries in
/// `[start_key, end_key)` as [`Record`]s, `(key ASC, LSN DESC)`.
///
/// Blocks are decoded lazily and sequentially; the iterator does not merge
/// multiple SSTables or resolve visibility — that happens upstream.
pub struct SSTableScanIterator<'a> {
    /// The SSTable being scanned.
    sstable: &'a SSTable,

    /// Current position in the SSTable block index.
    current_block_index: usize,

    /// Iterator over the current data block.
    current_block_iter: Option<BlockIterator>,

    /// Exclusive upper bound of the scan.
    end_key: Vec<u8>,
}

impl<'a> SSTableScanIterator<'a> {
    /// Create a scan iterator for the half-open range `[start_key, end_key)`.
    pub fn new(
        sstable: &'a SSTable,
        start_key: Vec<u8>,
        end_key: Vec<u8>,
    ) -> Result<Self, SSTableError> {
        if start_key >= end_key {
            return Err(SSTableError::Internal("scan start >= end".to_string()));
        }

        let current_block_index = sstable.find_block_for_key(&start_key);

        let block_iter = if current_block_index < sstable.index.len() {
            let entry = &sstable.index[current_block_index];
            let block_bytes = SSTable::read_block_bytes(&sstable.mmap, &entry.handle)?;
            let (block, _) = decode_from_slice::<SSTableDataBlock, _>(
                &block_bytes,
                standard().with_fixed_int_encoding(),
            )?;
            let mut it = BlockIterator::new(block.data);
            it.seek_to(&start_key);
            Some(it)
        } else {
            None
        };

        Ok(Self {
            sstable,
            current_block_index,
            current_block_iter: block_iter,
            end_key,
        })
    }

    /// Load the next data block and position a fresh [`BlockIterator`] on it.
    fn load_next_block(&mut self) -> Result<bool, SSTableError> {
        self.current_block_index += 1;

        if self.current_block_index >= self.sstable.index.len() {
            self.current_block_iter = None;
            return Ok(false);
        }

        let entry = &self.sstable.index[self.current_block_index];
        let block_bytes = SSTable::read_block_bytes(&self.sstable.mmap, &entry.handle)?;

        let (block, _) = decode_from_slice::<SSTableDataBlock, _>(
            &block_bytes,
            standard().with_fixed_int_encoding(),
        )?;
        let mut it = BlockIterator::new(block.data);
        it.seek_to_first();
        self.current_block_iter = Some(it);

        Ok(true)
    }
}

impl<'a> Iterator for SSTableScanIterator<'a> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let it = self.current_block_iter.as_mut()?;

            if let Some(item) = it.next_item() {
                if item.key.as_slice() >= self.end_key.as_slice() {
                    return None;
                }

                return Some(if item.is_delete {
                    Record::Delete {
                        key: item.key,
                        lsn: item.lsn,
                        timestamp: item.timestamp,
                    }
                } else {
                    Record::Put {
                        key: item.key,
                        value: item.value,
                        lsn: item.lsn,
                        timestamp: item.timestamp,
                    }
                });
            }

            match self.load_next_block() {
                Ok(true) => continue,
                Ok(false) | Err(_) => return None,
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Builder input
// ------------------------------------------------------------------------------------------------

/// One versioned point mutation destined for an SSTable: a put or, with
/// `value: None`, a point tombstone.
#[derive(Debug, Clone)]
pub struct PointEntry {
    /// Key of the entry.
    pub key: Vec<u8>,

    /// Value of the entry; `None` indicates a point deletion.
    pub value: Option<Vec<u8>>,

    /// Log sequence number of this version.
    pub lsn: u64,

    /// Timestamp associated with this mutation.
    pub timestamp: u64,
}

// ------------------------------------------------------------------------------------------------
// SSTable builder
// ------------------------------------------------------------------------------------------------

/// Build a complete SSTable file from one sorted entry stream.
///
/// # Input requirements
///
/// - `entries` must be sorted by key ascending, with all versions of a key
///   **adjacent** and ordered by LSN descending — the order produced by
///   memtable flush iteration and by [`MergeIterator`](crate::engine::utils::MergeIterator).
/// - Duplicate keys are expected: SSTables store multiple versions per key.
///
/// # Output guarantees
///
/// - Data blocks close only at key-group boundaries, so every version of a
///   key shares one block and point lookups read exactly one block.
/// - The bloom filter covers all keys, including tombstones.
/// - The collections block records the sorted distinct collection ids of all
///   keys, decoded per `schema`.
/// - The file is written to `<path>.tmp`, fsynced, and atomically renamed —
///   a crash cannot leave a partially-written SSTable at the final path.
///
/// # Errors
///
/// Building from an empty iterator is an error; I/O and encoding failures
/// are propagated.
pub fn build_from_iterators(
    path: impl AsRef<Path>,
    schema: &KeySchema,
    entries_count: usize,
    entries: impl Iterator<Item = PointEntry>,
) -> Result<(), SSTableError> {
    let mut entries = entries.peekable();

    if entries.peek().is_none() {
        return Err(SSTableError::Internal(
            "Empty iterator cannot build SSTable".into(),
        ));
    }

    let final_path = path.as_ref();
    let tmp_path = final_path.with_extension("tmp");

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;

    let mut writer = BufWriter::new(&mut file);
    let config = standard().with_fixed_int_encoding();

    // 1. Header with embedded CRC (encoded twice: once with the field zeroed
    //    to compute the checksum, once for real).
    let header = SSTableHeader {
        magic: SST_HDR_MAGIC,
        version: SST_HDR_VERSION,
        header_crc: 0,
    };
    let header_bytes = encode_to_vec(&header, config)?;
    let mut hasher = Crc32::new();
    hasher.update(&header_bytes);
    let header_with_crc = SSTableHeader {
        header_crc: hasher.finalize(),
        ..header
    };
    writer.write_all(&encode_to_vec(&header_with_crc, config)?)?;

    // 2. Data blocks + running statistics.
    let mut record_count: u64 = 0;
    let mut tombstone_count: u64 = 0;
    let mut min_lsn = u64::MAX;
    let mut max_lsn = 0u64;
    let mut min_timestamp = u64::MAX;
    let mut max_timestamp = 0u64;
    let mut min_key: Option<Vec<u8>> = None;
    let mut max_key: Option<Vec<u8>> = None;
    let mut collections: BTreeSet<u64> = BTreeSet::new();

    let mut current_block = Vec::<u8>::new();
    let mut block_first_key: Option<Vec<u8>> = None;
    let mut index_entries: Vec<SSTableIndexEntry> = Vec::new();

    let mut bloom: Bloom<Vec<u8>> =
        Bloom::new_for_fp_rate(entries_count.max(1), SST_BLOOM_FILTER_FALSE_POSITIVE_RATE)
            .map_err(|e| SSTableError::Internal(e.to_string()))?;

    let flush_block = |writer: &mut BufWriter<&mut File>,
                           current_block: &mut Vec<u8>,
                           block_first_key: &mut Option<Vec<u8>>,
                           index_entries: &mut Vec<SSTableIndexEntry>|
     -> Result<(), SSTableError> {
        if current_block.is_empty() {
            return Ok(());
        }
        let block_offset = writer.stream_position()?;

        let block = SSTableDataBlock {
            data: mem::take(current_block),
        };
        let block_bytes = encode_to_vec(&block, config)?;
        let block_size = block_bytes.len() as u32;

        let mut hasher = Crc32::new();
        hasher.update(&block_bytes);
        let block_checksum = hasher.finalize();

        writer.write_all(&block_size.to_le_bytes())?;
        writer.write_all(&block_bytes)?;
        writer.write_all(&block_checksum.to_le_bytes())?;

        index_entries.push(SSTableIndexEntry {
            separator_key: block_first_key
                .take()
                .ok_or_else(|| SSTableError::Internal("block without first key".into()))?,
            handle: BlockHandle {
                offset: block_offset,
                size: (SST_BLOCK_LEN_SIZE + block_size as usize + SST_BLOCK_CHECKSUM_SIZE) as u64,
            },
        });

        Ok(())
    };

    if let Some(first) = entries.peek() {
        min_key = Some(first.key.clone());
    }

    let mut prev_key: Option<Vec<u8>> = None;

    while let Some(entry) = entries.next() {
        // Close the block at a key-group boundary once it is full; never
        // split the versions of one key across blocks.
        let new_key_group = prev_key.as_ref() != Some(&entry.key);
        if new_key_group && current_block.len() >= SST_DATA_BLOCK_MAX_SIZE {
            flush_block(
                &mut writer,
                &mut current_block,
                &mut block_first_key,
                &mut index_entries,
            )?;
        }

        record_count += 1;
        if entry.value.is_none() {
            tombstone_count += 1;
        }

        min_timestamp = min_timestamp.min(entry.timestamp);
        max_timestamp = max_timestamp.max(entry.timestamp);
        min_lsn = min_lsn.min(entry.lsn);
        max_lsn = max_lsn.max(entry.lsn);

        if block_first_key.is_none() {
            block_first_key = Some(entry.key.clone());
        }

        if new_key_group {
            bloom.set(&entry.key);
            let collection = schema.extract(&entry.key);
            if collection != 0 {
                collections.insert(collection);
            }
        }

        max_key = Some(entry.key.clone());
        prev_key = Some(entry.key.clone());

        let cell = SSTableCell {
            key_len: entry.key.len() as u32,
            value_len: entry.value.as_ref().map_or(0, Vec::len) as u32,
            timestamp: entry.timestamp,
            is_delete: entry.value.is_none(),
            lsn: entry.lsn,
        };

        let mut cell_bytes = encode_to_vec(&cell, config)?;
        cell_bytes.extend_from_slice(&entry.key);
        if let Some(value) = entry.value {
            cell_bytes.extend_from_slice(&value);
        }
        current_block.extend_from_slice(&cell_bytes);
    }

    flush_block(
        &mut writer,
        &mut current_block,
        &mut block_first_key,
        &mut index_entries,
    )?;

    // Helper writing one length-prefixed, checksummed meta block.
    let write_meta_block = |writer: &mut BufWriter<&mut File>,
                                bytes: &[u8]|
     -> Result<BlockHandle, SSTableError> {
        let offset = writer.stream_position()?;
        let size = bytes.len() as u32;

        let mut hasher = Crc32::new();
        hasher.update(bytes);
        let checksum = hasher.finalize();

        writer.write_all(&size.to_le_bytes())?;
        writer.write_all(bytes)?;
        writer.write_all(&checksum.to_le_bytes())?;

        Ok(BlockHandle {
            offset,
            size: (SST_BLOCK_LEN_SIZE + bytes.len() + SST_BLOCK_CHECKSUM_SIZE) as u64,
        })
    };

    // 3. Bloom filter block.
    let bloom_block = SSTableBloomBlock {
        data: bloom.as_slice().to_vec(),
    };
    let bloom_bytes = encode_to_vec(&bloom_block, config)?;
    let bloom_handle = write_meta_block(&mut writer, &bloom_bytes)?;

    // 4. Collections block.
    let collection_ids: Vec<u64> = collections.into_iter().collect();
    let collections_bytes = encode_to_vec(&collection_ids, config)?;
    let collections_handle = write_meta_block(&mut writer, &collections_bytes)?;

    // 5. Properties block.
    let properties = SSTablePropertiesBlock {
        creation_timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_nanos() as u64,
        record_count,
        tombstone_count,
        collection_count: collection_ids.len() as u64,
        min_lsn,
        max_lsn,
        min_timestamp,
        max_timestamp,
        min_key: min_key.unwrap_or_default(),
        max_key: max_key.unwrap_or_default(),
    };
    let properties_bytes = encode_to_vec(&properties, config)?;
    let properties_handle = write_meta_block(&mut writer, &properties_bytes)?;

    // 6. Metaindex block.
    let meta_entries = vec![
        MetaIndexEntry {
            name: "filter.bloom".to_string(),
            handle: bloom_handle,
        },
        MetaIndexEntry {
            name: "meta.collections".to_string(),
            handle: collections_handle,
        },
        MetaIndexEntry {
            name: "meta.properties".to_string(),
            handle: properties_handle,
        },
    ];
    let metaindex_bytes = encode_to_vec(&meta_entries, config)?;
    let metaindex_handle = write_meta_block(&mut writer, &metaindex_bytes)?;

    // 7. Index block.
    let index_bytes = encode_to_vec(&index_entries, config)?;
    let index_handle = write_meta_block(&mut writer, &index_bytes)?;

    // 8. Footer (CRC embedded via the zero-and-re-encode scheme).
    writer.flush()?;
    drop(writer);
    file.sync_all()?;

    let current_pos = file.metadata()?.len();
    let footer = SSTableFooter {
        metaindex: metaindex_handle,
        index: index_handle,
        total_file_size: current_pos + SST_FOOTER_SIZE as u64,
        footer_crc32: 0,
    };

    let footer_bytes = encode_to_vec(&footer, config)?;
    let mut hasher = Crc32::new();
    hasher.update(&footer_bytes);
    let footer_with_crc = SSTableFooter {
        footer_crc32: hasher.finalize(),
        ..footer
    };

    let mut writer = BufWriter::new(&mut file);
    writer.write_all(&encode_to_vec(&footer_with_crc, config)?)?;
    writer.flush()?;
    drop(writer);
    file.sync_all()?;

    rename(&tmp_path, final_path)?;

    debug!(
        path = %final_path.display(),
        record_count,
        tombstone_count,
        collections = collection_ids.len(),
        blocks = index_entries.len(),
        "built SSTable"
    );

    Ok(())
}
