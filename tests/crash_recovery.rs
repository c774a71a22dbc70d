//! # Crash-Recovery Tests
//!
//! Simulated process kills against the column store's HARE file. A crash
//! leaves the sanity byte "in use"; the next open must recompute CRC32C
//! over all data pages and accept the file iff it matches the checksum the
//! last commit stored. A flipped byte anywhere in a data page must surface
//! as corruption.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

use cottontail::column::{Column, TxMode};
use cottontail::config::constants::DEFAULT_DATA_PAGE_SHIFT as SHIFT;
use cottontail::error::{DatabaseError, StorageError};
use cottontail::types::{ColumnDef, ColumnType, Value};
use tempfile::tempdir;

/// Populates a column, commits, and "kills the process": the files are
/// copied aside while the column is still open, so the copies carry
/// sanity = in-use exactly like a killed process would leave them.
fn populate_and_crash(work: &std::path::Path, crashed: &std::path::Path) {
    let column = Column::create(
        work,
        ColumnDef::scalar("c", ColumnType::Long, false),
        SHIFT,
        500,
    )
    .unwrap();
    let mut tx = column.tx(TxMode::ReadWrite).unwrap();
    tx.insert_all((0..500).map(|i| Some(Value::Long(i * 7))).collect())
        .unwrap();
    tx.commit().unwrap();
    drop(tx);

    fs::create_dir_all(crashed).unwrap();
    fs::copy(
        work.join("col_c.db"),
        crashed.join("col_c.db"),
    )
    .unwrap();
    column.close().unwrap();
}

#[test]
fn reopen_after_kill_succeeds_when_pages_are_intact() {
    let dir = tempdir().unwrap();
    let work = dir.path().join("work");
    let crashed = dir.path().join("crashed");
    fs::create_dir_all(&work).unwrap();
    populate_and_crash(&work, &crashed);

    // The copy was taken mid-session: sanity is in-use, so the open path
    // must verify the checksum and then accept the file.
    let column = Column::open(&crashed, "c", SHIFT, 500).unwrap();
    let tx = column.tx(TxMode::ReadOnly).unwrap();
    assert_eq!(tx.count().unwrap(), 500);
    assert_eq!(tx.read(2).unwrap(), Some(Value::Long(0)));
    assert_eq!(tx.read(501).unwrap(), Some(Value::Long(499 * 7)));
    drop(tx);
    column.close().unwrap();
}

#[test]
fn reopen_after_kill_detects_a_corrupted_data_page() {
    let dir = tempdir().unwrap();
    let work = dir.path().join("work");
    let crashed = dir.path().join("crashed");
    fs::create_dir_all(&work).unwrap();
    populate_and_crash(&work, &crashed);

    // Flip one byte in the middle of data page 2.
    let path = crashed.join("col_c.db");
    let mut file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .unwrap();
    let offset = (2u64 << SHIFT) + 1000;
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
    drop(file);

    let result = Column::open(&crashed, "c", SHIFT, 500);
    assert!(
        matches!(
            result,
            Err(DatabaseError::Storage(StorageError::Corruption { .. }))
        ),
        "corrupted page must be detected, got {result:?}"
    );
}

#[test]
fn clean_close_skips_checksum_verification_but_still_validates() {
    let dir = tempdir().unwrap();
    {
        let column = Column::create(
            dir.path(),
            ColumnDef::scalar("c", ColumnType::Long, false),
            SHIFT,
            500,
        )
        .unwrap();
        let mut tx = column.tx(TxMode::ReadWrite).unwrap();
        tx.insert(Some(Value::Long(42))).unwrap();
        tx.commit().unwrap();
        drop(tx);
        column.close().unwrap();
    }

    let column = Column::open(dir.path(), "c", SHIFT, 500).unwrap();
    let tx = column.tx(TxMode::ReadOnly).unwrap();
    assert_eq!(tx.read(2).unwrap(), Some(Value::Long(42)));
    drop(tx);
    column.close().unwrap();
}

#[test]
fn garbage_file_is_rejected_as_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("col_c.db");
    fs::write(&path, vec![0xA5u8; 8192]).unwrap();

    let result = Column::open(dir.path(), "c", SHIFT, 500);
    assert!(matches!(
        result,
        Err(DatabaseError::Storage(StorageError::Corruption { .. }))
    ));
}
