//! Corruption and truncation detection during replay.

use crate::wal::{Wal, WalError};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use tempfile::TempDir;

#[derive(Debug, PartialEq, bincode::Encode, bincode::Decode)]
struct Entry {
    payload: Vec<u8>,
    lsn: u64,
}

fn populated_wal(tmp: &TempDir, count: usize) -> std::path::PathBuf {
    let path = tmp.path().join("wal-000001.log");
    let wal = Wal::<Entry>::open(&path, 1, None).unwrap();
    for i in 0..count {
        wal.append(&Entry {
            payload: vec![i as u8; 32],
            lsn: i as u64,
        })
        .unwrap();
    }
    path
}

#[test]
fn flipped_payload_byte_fails_checksum() {
    let tmp = TempDir::new().unwrap();
    let path = populated_wal(&tmp, 3);

    // Flip a byte in the middle of the file, past the header region.
    let len = std::fs::metadata(&path).unwrap().len();
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(len / 2)).unwrap();
    file.write_all(&[0xFF]).unwrap();
    file.sync_all().unwrap();
    drop(file);

    let wal = Wal::<Entry>::open(&path, 1, None).unwrap();
    let results: Vec<_> = wal.replay_iter().unwrap().collect();

    assert!(
        results.iter().any(|r| r.is_err()),
        "replay should surface a corruption error"
    );
}

#[test]
fn truncated_tail_stops_replay_with_error() {
    let tmp = TempDir::new().unwrap();
    let path = populated_wal(&tmp, 3);

    // Chop a few bytes off the last record's checksum.
    let len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 2).unwrap();
    file.sync_all().unwrap();
    drop(file);

    let wal = Wal::<Entry>::open(&path, 1, None).unwrap();
    let results: Vec<_> = wal.replay_iter().unwrap().collect();

    // First two records replay cleanly, the torn tail errors out.
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(matches!(
        results.last().unwrap(),
        Err(WalError::UnexpectedEof | WalError::ChecksumMismatch | WalError::Io(_))
    ));
}

#[test]
fn corrupted_header_is_rejected_on_open() {
    let tmp = TempDir::new().unwrap();
    let path = populated_wal(&tmp, 1);

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(4)).unwrap();
    file.write_all(&[0xEE, 0xEE]).unwrap();
    file.sync_all().unwrap();
    drop(file);

    let err = Wal::<Entry>::open(&path, 1, None).unwrap_err();
    assert!(matches!(err, WalError::InvalidHeader(_)));
}
