//! # Disk Managers
//!
//! A disk manager owns one HARE file: it translates `PageId ↔ file offset`,
//! reads and writes whole pages, maintains the file header and sanity flag,
//! and holds a mandatory exclusive file lock from open to close.
//!
//! Two variants implement the [`DiskManager`] trait:
//!
//! - [`DirectDiskManager`] writes every `update`/`allocate` straight through
//!   to the file. `commit` is a header flush + fsync; `rollback` is
//!   unsupported.
//! - [`WalDiskManager`](super::WalDiskManager) buffers modifications in a
//!   sibling log file and gains real commit/rollback semantics (see
//!   `wal.rs`).
//!
//! ## Open protocol
//!
//! 1. Open the channel read+write+create.
//! 2. Poll for the exclusive OS file lock until `lock_timeout` elapses,
//!    then fail with a lock-timeout error.
//! 3. New file: initialise the header in memory and flush it.
//!    Existing file: parse and validate the header; if the sanity byte says
//!    "in use" the previous process died mid-write, so recompute CRC32C over
//!    all data pages and compare against the stored checksum.
//! 4. Set sanity to "in use" and flush.
//!
//! `close` is the mirror image: flush everything, store the freshly computed
//! checksum with sanity "clean", release the lock.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crc::{Crc, CRC_32_ISCSI};

use crate::config::constants::{FILE_HEADER_SIZE, LOCK_POLL_INTERVAL_MS};
use crate::error::StorageError;

use super::header::{FileHeader, FileType, SANITY_CLEAN, SANITY_IN_USE};
use super::{check_page_id, Page, PageId};

/// CRC32C, the checksum the HARE header stores over all data pages.
const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Common contract of the storage variants.
pub trait DiskManager: Send {
    /// Fills `page` with the content of data page `id`.
    fn read(&mut self, id: PageId, page: &mut Page) -> Result<(), StorageError>;

    /// Persists `page` as the new content of data page `id`.
    fn update(&mut self, id: PageId, page: &Page) -> Result<(), StorageError>;

    /// Assigns the next free page id, stores `page` there and returns the id.
    fn allocate(&mut self, page: &Page) -> Result<PageId, StorageError>;

    /// Marks a page as reusable. Accounting only; the file never shrinks.
    fn free(&mut self, id: PageId) -> Result<(), StorageError>;

    /// Makes all pending modifications durable.
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Discards all pending modifications.
    fn rollback(&mut self) -> Result<(), StorageError>;

    /// Number of data pages (page 0 excluded).
    fn page_count(&self) -> u64;

    /// Page size in bytes.
    fn page_size(&self) -> usize;

    /// Flushes the header with a clean sanity byte and releases the lock.
    fn close(&mut self) -> Result<(), StorageError>;
}

/// Acquires the mandatory exclusive lock, polling until the timeout elapses.
fn acquire_file_lock(file: &File, path: &Path, timeout_ms: u64) -> Result<(), StorageError> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        match file.try_lock() {
            Ok(()) => return Ok(()),
            Err(TryLockError::WouldBlock) => {
                if Instant::now() >= deadline {
                    return Err(StorageError::LockTimeout {
                        path: path.to_path_buf(),
                        timeout_ms,
                    });
                }
                std::thread::sleep(Duration::from_millis(LOCK_POLL_INTERVAL_MS));
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }
    }
}

/// Shared plumbing of both disk manager variants: the locked channel, the
/// page shift and the in-memory copy of the header.
pub(crate) struct HareFile {
    pub(crate) file: File,
    pub(crate) path: PathBuf,
    pub(crate) shift: u32,
    pub(crate) header: FileHeader,
}

impl HareFile {
    /// Opens the channel, acquires the lock and parses the header. Returns
    /// the file plus whether the previous process left it marked in use.
    /// Checksum verification is the caller's move: the write-ahead variant
    /// must replay a committed log first (replay heals torn pages), the
    /// direct variant verifies immediately.
    pub(crate) fn open(
        path: &Path,
        file_type: FileType,
        shift: u32,
        lock_timeout_ms: u64,
    ) -> Result<(Self, bool), StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        acquire_file_lock(&file, path, lock_timeout_ms)?;

        let len = file.metadata()?.len();
        let (mut hare, was_in_use) = if len == 0 {
            let mut hare = Self {
                file,
                path: path.to_path_buf(),
                shift,
                header: FileHeader::new(file_type),
            };
            hare.flush_header()?;
            (hare, false)
        } else {
            let mut bytes = [0u8; FILE_HEADER_SIZE];
            let mut file = file;
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut bytes)?;
            let header = FileHeader::from_bytes(&bytes, file_type, path)?;
            let was_in_use = header.sanity() == SANITY_IN_USE;

            let hare = Self {
                file,
                path: path.to_path_buf(),
                shift,
                header,
            };
            (hare, was_in_use)
        };

        hare.header.set_sanity(SANITY_IN_USE);
        hare.flush_header()?;
        hare.file.sync_all()?;
        Ok((hare, was_in_use))
    }

    /// Recomputes CRC32C over all data pages and compares it against the
    /// header. Called when a file is reopened after an unclean shutdown.
    pub(crate) fn verify_checksum(&mut self) -> Result<(), StorageError> {
        log::warn!(
            "{:?} was not closed cleanly; verifying checksum over {} pages",
            self.path,
            self.header.pages()
        );
        let computed = self.compute_checksum()?;
        if computed != self.header.checksum() {
            return Err(StorageError::Corruption {
                path: self.path.clone(),
                reason: format!(
                    "checksum mismatch: computed {computed:#x}, stored {:#x}",
                    self.header.checksum()
                ),
            });
        }
        Ok(())
    }

    pub(crate) fn page_size(&self) -> usize {
        1usize << self.shift
    }

    fn offset_of(&self, id: PageId) -> u64 {
        id << self.shift
    }

    /// Reads data page `id` from the main file. Pages inside the allocated
    /// range that were never materialised read back as zeroes.
    pub(crate) fn read_page(&mut self, id: PageId, buf: &mut [u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(self.offset_of(id)))?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf[filled..].fill(0);
        Ok(())
    }

    pub(crate) fn write_page(&mut self, id: PageId, buf: &[u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(self.offset_of(id)))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    pub(crate) fn flush_header(&mut self) -> Result<(), StorageError> {
        let mut bytes = [0u8; FILE_HEADER_SIZE];
        self.header.write_to(&mut bytes);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        Ok(())
    }

    /// CRC32C over all data pages, widened to u64 for the header slot.
    pub(crate) fn compute_checksum(&mut self) -> Result<u64, StorageError> {
        let mut digest = CRC32C.digest();
        let mut buf = vec![0u8; self.page_size()];
        for id in 1..=self.header.pages() {
            self.read_page(id, &mut buf)?;
            digest.update(&buf);
        }
        Ok(u64::from(digest.finalize()))
    }

    /// Seals the file: checksum, clean sanity byte, fsync, unlock.
    pub(crate) fn seal(&mut self) -> Result<(), StorageError> {
        let checksum = self.compute_checksum()?;
        self.header.set_checksum(checksum);
        self.header.set_sanity(SANITY_CLEAN);
        self.flush_header()?;
        self.file.sync_all()?;
        self.file.unlock()?;
        Ok(())
    }
}

/// Write-through disk manager. Every modification hits the file immediately;
/// `commit` only forces durability and `rollback` is unsupported.
pub struct DirectDiskManager {
    hare: HareFile,
    closed: bool,
}

impl DirectDiskManager {
    pub fn open(
        path: &Path,
        file_type: FileType,
        shift: u32,
        lock_timeout_ms: u64,
    ) -> Result<Self, StorageError> {
        let (mut hare, was_in_use) = HareFile::open(path, file_type, shift, lock_timeout_ms)?;
        if was_in_use {
            hare.verify_checksum()?;
        }
        Ok(Self { hare, closed: false })
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Unsupported("disk manager is closed"));
        }
        Ok(())
    }
}

impl DiskManager for DirectDiskManager {
    fn read(&mut self, id: PageId, page: &mut Page) -> Result<(), StorageError> {
        self.ensure_open()?;
        check_page_id(id, self.hare.header.pages())?;
        self.hare.read_page(id, page.as_mut_slice())
    }

    fn update(&mut self, id: PageId, page: &Page) -> Result<(), StorageError> {
        self.ensure_open()?;
        check_page_id(id, self.hare.header.pages())?;
        self.hare.write_page(id, page.as_slice())
    }

    fn allocate(&mut self, page: &Page) -> Result<PageId, StorageError> {
        self.ensure_open()?;
        let id = self.hare.header.pages() + 1;
        self.hare.write_page(id, page.as_slice())?;
        self.hare.header.set_pages(id);
        self.hare.flush_header()?;
        Ok(id)
    }

    fn free(&mut self, id: PageId) -> Result<(), StorageError> {
        self.ensure_open()?;
        check_page_id(id, self.hare.header.pages())?;
        let freed = self.hare.header.freed() + 1;
        self.hare.header.set_freed(freed);
        self.hare.flush_header()
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.ensure_open()?;
        let checksum = self.hare.compute_checksum()?;
        self.hare.header.set_checksum(checksum);
        self.hare.flush_header()?;
        self.hare.file.sync_all()?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        Err(StorageError::Unsupported(
            "rollback on a direct disk manager",
        ))
    }

    fn page_count(&self) -> u64 {
        self.hare.header.pages()
    }

    fn page_size(&self) -> usize {
        self.hare.page_size()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.hare.seal()
    }
}

impl Drop for DirectDiskManager {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                log::warn!("failed to close {:?} on drop: {e}", self.hare.path);
            }
        }
    }
}
