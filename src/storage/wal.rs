//! # Write-Ahead-Logged Disk Manager
//!
//! [`WalDiskManager`] buffers every modification in a sibling log file
//! (`<name>.wal`) and only touches the main file at commit time. This is
//! what gives column and entity stores their transactional semantics.
//!
//! ## Log format
//!
//! The log is a flat sequence of entries:
//!
//! ```text
//! +----------+---------+---------------+--------+
//! | page_id  | length  | bytes[length] |  lsn   |
//! |  u64 LE  | u32 LE  |               | u64 LE |
//! +----------+---------+---------------+--------+
//! ```
//!
//! - `length == page_size`: the new content of `page_id` (update or
//!   allocation; an allocation is simply an update beyond the committed
//!   page count).
//! - `length == 0`, `page_id < u64::MAX`: a `free` of `page_id`.
//! - `page_id == u64::MAX`: the commit marker terminating the log.
//!
//! Log sequence numbers increase by one per entry and let recovery reject
//! torn or reordered tails.
//!
//! ## Commit / rollback
//!
//! `commit` appends the marker, syncs the log, replays every entry onto the
//! main file in order, syncs the main file, flushes the header (recording
//! the commit timestamp) and truncates the log. `rollback` truncates the log
//! and restores the in-memory header from its committed copy.
//!
//! A crash at any point is safe: before the marker the log is discarded on
//! reopen, after it the replay is idempotent and simply re-applied.
//!
//! ## Read-your-writes
//!
//! Reads consult an in-memory index of logged pages first, so a transaction
//! observes its own uncommitted modifications while the main file still
//! holds the last committed state for everyone else.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use crate::config::constants::{
    WAL_COMMIT_MARKER, WAL_ENTRY_HEADER_SIZE, WAL_ENTRY_TRAILER_SIZE,
};
use crate::error::StorageError;

use super::disk::{DiskManager, HareFile};
use super::header::FileType;
use super::{check_page_id, now_millis, Page, PageId};

/// A parsed log entry.
enum LogEntry {
    Write { page_id: PageId, offset: u64 },
    Free { page_id: PageId },
    Commit,
}

pub struct WalDiskManager {
    hare: HareFile,
    log_path: PathBuf,
    log: File,
    /// Byte offset of the log tail (next append position).
    log_tail: u64,
    /// Latest logged content per page: page id -> payload offset in the log.
    page_index: HashMap<PageId, u64>,
    /// Entry order for replay: (page id, payload offset or free marker).
    entries: Vec<(PageId, Option<u64>)>,
    next_lsn: u64,
    /// Committed page/freed counters, restored on rollback.
    committed_pages: u64,
    committed_freed: u32,
    closed: bool,
}

impl WalDiskManager {
    pub fn open(
        path: &Path,
        file_type: FileType,
        shift: u32,
        lock_timeout_ms: u64,
    ) -> Result<Self, StorageError> {
        let (hare, was_in_use) = HareFile::open(path, file_type, shift, lock_timeout_ms)?;
        let log_path = path.with_extension("wal");
        let log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&log_path)?;

        let committed_pages = hare.header.pages();
        let committed_freed = hare.header.freed();
        let mut manager = Self {
            hare,
            log_path,
            log,
            log_tail: 0,
            page_index: HashMap::new(),
            entries: Vec::new(),
            next_lsn: 0,
            committed_pages,
            committed_freed,
            closed: false,
        };
        manager.recover(was_in_use)?;
        Ok(manager)
    }

    /// Handles a leftover log from a previous process: re-applies it when it
    /// is terminated by a commit marker, discards it otherwise. A replayed
    /// log refreshes the checksum, so the unclean-shutdown verification only
    /// runs when no replay happened.
    fn recover(&mut self, was_in_use: bool) -> Result<(), StorageError> {
        let len = self.log.metadata()?.len();
        let mut replayed = false;

        if len > 0 {
            match self.scan_log(len) {
                Ok(true) => {
                    log::info!(
                        "{:?}: replaying committed write-ahead log ({} entries)",
                        self.log_path,
                        self.entries.len()
                    );
                    self.apply_log()?;
                    replayed = true;
                }
                Ok(false) => {
                    log::warn!(
                        "{:?}: discarding uncommitted write-ahead log",
                        self.log_path
                    );
                }
                Err(e) => {
                    log::warn!(
                        "{:?}: discarding unreadable write-ahead log: {e}",
                        self.log_path
                    );
                }
            }
        }
        self.reset_log()?;
        if was_in_use && !replayed {
            self.hare.verify_checksum()?;
        }
        Ok(())
    }

    /// Scans the log from the start, rebuilding the page index and entry
    /// list. Returns whether a commit marker terminates the log.
    fn scan_log(&mut self, len: u64) -> Result<bool, StorageError> {
        let page_size = self.hare.page_size();
        self.page_index.clear();
        self.entries.clear();
        self.next_lsn = 0;

        let mut pages = self.committed_pages;
        let mut freed = self.committed_freed;
        let mut offset = 0u64;
        self.log.seek(SeekFrom::Start(0))?;

        let mut header = [0u8; WAL_ENTRY_HEADER_SIZE];
        let mut trailer = [0u8; WAL_ENTRY_TRAILER_SIZE];
        let mut payload = vec![0u8; page_size];

        loop {
            if offset + (WAL_ENTRY_HEADER_SIZE + WAL_ENTRY_TRAILER_SIZE) as u64 > len {
                return Ok(false);
            }
            self.log.read_exact(&mut header)?;
            let page_id = u64::from_le_bytes(header[..8].try_into().unwrap());
            let length = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;

            if length > page_size {
                return Err(StorageError::Wal(format!(
                    "entry length {length} exceeds page size {page_size}"
                )));
            }
            let entry_size =
                (WAL_ENTRY_HEADER_SIZE + length + WAL_ENTRY_TRAILER_SIZE) as u64;
            if offset + entry_size > len {
                return Ok(false);
            }
            if length > 0 {
                self.log.read_exact(&mut payload[..length])?;
            }
            self.log.read_exact(&mut trailer)?;
            let lsn = u64::from_le_bytes(trailer);
            if lsn != self.next_lsn {
                return Err(StorageError::Wal(format!(
                    "log sequence break: expected {}, found {lsn}",
                    self.next_lsn
                )));
            }
            self.next_lsn += 1;

            if page_id == WAL_COMMIT_MARKER {
                self.log_tail = offset + entry_size;
                self.hare.header.set_pages(pages);
                self.hare.header.set_freed(freed);
                return Ok(true);
            }
            if length == 0 {
                freed += 1;
                self.entries.push((page_id, None));
            } else {
                let payload_offset = offset + WAL_ENTRY_HEADER_SIZE as u64;
                self.page_index.insert(page_id, payload_offset);
                self.entries.push((page_id, Some(payload_offset)));
                pages = pages.max(page_id);
            }
            offset += entry_size;
        }
    }

    /// Replays all scanned entries onto the main file and flushes it.
    fn apply_log(&mut self) -> Result<(), StorageError> {
        let page_size = self.hare.page_size();
        let mut payload = vec![0u8; page_size];
        let entries = std::mem::take(&mut self.entries);
        for (page_id, slot) in &entries {
            if let Some(offset) = slot {
                self.log.seek(SeekFrom::Start(*offset))?;
                self.log.read_exact(&mut payload)?;
                self.hare.write_page(*page_id, &payload)?;
            }
        }
        self.entries = entries;
        let checksum = self.hare.compute_checksum()?;
        self.hare.header.set_checksum(checksum);
        self.hare.header.set_last_wal(now_millis());
        self.hare.flush_header()?;
        self.hare.file.sync_all()?;
        Ok(())
    }

    /// Truncates the log and clears all in-memory log state.
    fn reset_log(&mut self) -> Result<(), StorageError> {
        self.log.set_len(0)?;
        self.log.seek(SeekFrom::Start(0))?;
        self.log_tail = 0;
        self.page_index.clear();
        self.entries.clear();
        self.next_lsn = 0;
        self.committed_pages = self.hare.header.pages();
        self.committed_freed = self.hare.header.freed();
        Ok(())
    }

    fn append_entry(&mut self, page_id: PageId, payload: &[u8]) -> Result<(), StorageError> {
        self.log.seek(SeekFrom::Start(self.log_tail))?;
        let mut header = [0u8; WAL_ENTRY_HEADER_SIZE];
        header[..8].copy_from_slice(&page_id.to_le_bytes());
        header[8..12].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        self.log.write_all(&header)?;
        if !payload.is_empty() {
            self.log.write_all(payload)?;
        }
        self.log.write_all(&self.next_lsn.to_le_bytes())?;

        let payload_offset = self.log_tail + WAL_ENTRY_HEADER_SIZE as u64;
        self.log_tail +=
            (WAL_ENTRY_HEADER_SIZE + payload.len() + WAL_ENTRY_TRAILER_SIZE) as u64;
        self.next_lsn += 1;

        if page_id != WAL_COMMIT_MARKER {
            if payload.is_empty() {
                self.entries.push((page_id, None));
            } else {
                self.page_index.insert(page_id, payload_offset);
                self.entries.push((page_id, Some(payload_offset)));
            }
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Unsupported("disk manager is closed"));
        }
        Ok(())
    }

    /// True when the log holds modifications that have not been committed.
    pub fn is_dirty(&self) -> bool {
        !self.entries.is_empty()
    }
}

impl DiskManager for WalDiskManager {
    fn read(&mut self, id: PageId, page: &mut Page) -> Result<(), StorageError> {
        self.ensure_open()?;
        check_page_id(id, self.hare.header.pages())?;
        if let Some(&offset) = self.page_index.get(&id) {
            self.log.seek(SeekFrom::Start(offset))?;
            self.log.read_exact(page.as_mut_slice())?;
            return Ok(());
        }
        if id <= self.committed_pages {
            return self.hare.read_page(id, page.as_mut_slice());
        }
        // Allocated in this transaction but never written through; the log
        // always carries allocation payloads, so this slot is simply empty.
        page.clear();
        Ok(())
    }

    fn update(&mut self, id: PageId, page: &Page) -> Result<(), StorageError> {
        self.ensure_open()?;
        check_page_id(id, self.hare.header.pages())?;
        self.append_entry(id, page.as_slice())
    }

    fn allocate(&mut self, page: &Page) -> Result<PageId, StorageError> {
        self.ensure_open()?;
        let id = self.hare.header.pages() + 1;
        self.append_entry(id, page.as_slice())?;
        self.hare.header.set_pages(id);
        Ok(id)
    }

    fn free(&mut self, id: PageId) -> Result<(), StorageError> {
        self.ensure_open()?;
        check_page_id(id, self.hare.header.pages())?;
        self.append_entry(id, &[])?;
        let freed = self.hare.header.freed() + 1;
        self.hare.header.set_freed(freed);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.ensure_open()?;
        if self.entries.is_empty() {
            return Ok(());
        }
        self.append_entry(WAL_COMMIT_MARKER, &[])?;
        self.log.sync_all()?;
        self.apply_log()?;
        self.reset_log()
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.hare.header.set_pages(self.committed_pages);
        self.hare.header.set_freed(self.committed_freed);
        self.reset_log()
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
        if self.is_dirty() {
            self.rollback()?;
        }
        self.closed = true;
        self.hare.seal()
    }
}

impl Drop for WalDiskManager {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                log::warn!("failed to close {:?} on drop: {e}", self.hare.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::DEFAULT_DATA_PAGE_SHIFT as SHIFT;
    use tempfile::tempdir;

    fn page_with(byte: u8) -> Page {
        let mut page = Page::new(SHIFT);
        page.as_mut_slice().fill(byte);
        page
    }

    #[test]
    fn uncommitted_changes_are_invisible_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("col.db");
        {
            let mut dm = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();
            dm.allocate(&page_with(0xAA)).unwrap();
            dm.commit().unwrap();
            dm.allocate(&page_with(0xBB)).unwrap();
            // Dropped without commit: close rolls the log back.
        }
        let mut dm = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();
        assert_eq!(dm.page_count(), 1);
        let mut page = Page::new(SHIFT);
        dm.read(1, &mut page).unwrap();
        assert!(page.as_slice().iter().all(|&b| b == 0xAA));
        dm.close().unwrap();
    }

    #[test]
    fn read_your_writes_before_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("col.db");
        let mut dm = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();

        let id = dm.allocate(&page_with(0x11)).unwrap();
        dm.update(id, &page_with(0x22)).unwrap();

        let mut page = Page::new(SHIFT);
        dm.read(id, &mut page).unwrap();
        assert!(page.as_slice().iter().all(|&b| b == 0x22));
        dm.commit().unwrap();

        dm.read(id, &mut page).unwrap();
        assert!(page.as_slice().iter().all(|&b| b == 0x22));
        dm.close().unwrap();
    }

    #[test]
    fn rollback_restores_counters_and_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("col.db");
        let mut dm = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();

        let id = dm.allocate(&page_with(0x33)).unwrap();
        dm.commit().unwrap();

        dm.update(id, &page_with(0x44)).unwrap();
        dm.allocate(&page_with(0x55)).unwrap();
        assert_eq!(dm.page_count(), 2);
        dm.rollback().unwrap();

        assert_eq!(dm.page_count(), 1);
        let mut page = Page::new(SHIFT);
        dm.read(id, &mut page).unwrap();
        assert!(page.as_slice().iter().all(|&b| b == 0x33));
        dm.close().unwrap();
    }

    #[test]
    fn free_is_accounting_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("col.db");
        let mut dm = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();
        dm.allocate(&page_with(0x01)).unwrap();
        dm.allocate(&page_with(0x02)).unwrap();
        dm.free(1).unwrap();
        dm.commit().unwrap();

        assert_eq!(dm.page_count(), 2);
        let next = dm.allocate(&page_with(0x03)).unwrap();
        assert_eq!(next, 3, "freed pages are never reallocated");
        dm.close().unwrap();
    }

    #[test]
    fn committed_log_replays_after_crash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("col.db");
        {
            let mut dm = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();
            dm.allocate(&page_with(0x77)).unwrap();
            dm.append_entry(WAL_COMMIT_MARKER, &[]).unwrap();
            dm.log.sync_all().unwrap();
            // Simulated crash after the marker but before replay: skip
            // close entirely so neither the main file nor the header moved.
            dm.closed = true;
            let _ = dm.hare.file.unlock();
        }
        let mut dm = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();
        assert_eq!(dm.page_count(), 1);
        let mut page = Page::new(SHIFT);
        dm.read(1, &mut page).unwrap();
        assert!(page.as_slice().iter().all(|&b| b == 0x77));
        dm.close().unwrap();
    }

    #[test]
    fn unterminated_log_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("col.db");
        {
            let mut dm = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();
            dm.allocate(&page_with(0x99)).unwrap();
            dm.log.sync_all().unwrap();
            dm.closed = true;
            let _ = dm.hare.file.unlock();
        }
        let mut dm = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();
        assert_eq!(dm.page_count(), 0);
        dm.close().unwrap();
    }
}
