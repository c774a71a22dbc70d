//! # Column Store
//!
//! A column is an ordered mapping from tuple id to an optional typed value,
//! persisted in its own write-ahead-logged HARE file (`col_<name>.db`).
//!
//! ## On-disk layout
//!
//! Page 1 is reserved for the [`ColumnHeader`] (record 1). User records get
//! tuple ids from 2 upwards and occupy fixed-width slots packed into the
//! following pages:
//!
//! ```text
//! slot = [flag: u8][value bytes: physical_size]
//!        flag 0 = absent (never written, or deleted)
//!        flag 1 = present
//!        flag 2 = null
//!
//! tuple id t  ──►  page 2 + (t-2) / slots_per_page
//!                  offset ((t-2) % slots_per_page) * slot_size
//! ```
//!
//! Tuple ids are allocated monotonically and never reused after a delete; a
//! deleted slot reads as absent and is skipped by iteration. The header's
//! element count always equals the number of live slots.
//!
//! ## Locks
//!
//! Two process-local read-write locks guard a column:
//!
//! - the *global* lock is held in read mode for the entire life of any
//!   transaction and taken in write mode only by `close`/`drop`, so a
//!   column can never disappear under a live transaction;
//! - the *tx* lock is taken in read mode per non-mutating operation and
//!   upgraded via `try_write` on a transaction's first mutation. The upgrade
//!   never waits: contention surfaces immediately as a write-lock error,
//!   which keeps lock acquisition across many columns deadlock-free.

mod header;
mod tx;

pub use header::{ColumnHeader, COLUMN_MAGIC, HEADER_TID, MIN_USER_TID};
pub use tx::{ColumnTx, TxMode, TxStatus};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::config::constants::{COLUMN_HEADER_SIZE, DEFAULT_BUFFER_POOL_SIZE};
use crate::error::{DatabaseError, StorageError, TransactionError};
use crate::storage::{BufferPool, FileType, Page, PageId, WalDiskManager};
use crate::types::{physical_size, ColumnDef, ColumnType};

/// A single column and its backing file.
pub struct Column {
    def: ColumnDef,
    path: PathBuf,
    slot_size: usize,
    slots_per_page: usize,
    store: BufferPool<WalDiskManager>,
    global_lock: RwLock<()>,
    tx_lock: RwLock<()>,
    closed: AtomicBool,
}

impl Column {
    /// File name of a column inside its entity directory.
    pub fn file_name(name: &str) -> String {
        format!("col_{name}.db")
    }

    /// Creates a new column file under `dir` and writes its header record.
    pub fn create(
        dir: &Path,
        def: ColumnDef,
        shift: u32,
        lock_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        let page_size = 1usize << shift;
        let value_size = physical_size(def.column_type, def.logical_size);
        if 1 + value_size > page_size {
            return Err(DatabaseError::InvalidFile {
                path: dir.join(Self::file_name(&def.name)),
                reason: format!(
                    "serialized value of {value_size} bytes does not fit a {page_size}-byte page"
                ),
            });
        }

        let path = dir.join(Self::file_name(&def.name));
        let disk = WalDiskManager::open(&path, FileType::Column, shift, lock_timeout_ms)?;
        let store = BufferPool::new(disk, DEFAULT_BUFFER_POOL_SIZE, shift);

        let header = ColumnHeader::new(
            def.column_type,
            def.logical_size,
            def.nullable,
            crate::storage::now_millis(),
        );
        let mut page = Page::new(shift);
        header.write_to(page.as_mut_slice());
        let id = store.allocate(&page)?;
        debug_assert_eq!(id, 1, "header record must land on page 1");
        store.commit()?;

        Ok(Self::assemble(def, path, store, shift))
    }

    /// Opens an existing column file, reconstructing the definition from the
    /// header record plus the file name.
    pub fn open(
        dir: &Path,
        name: &str,
        shift: u32,
        lock_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        let path = dir.join(Self::file_name(name));
        if !path.exists() {
            return Err(DatabaseError::InvalidFile {
                path,
                reason: "column file does not exist".to_string(),
            });
        }
        let disk = WalDiskManager::open(&path, FileType::Column, shift, lock_timeout_ms)?;
        let store = BufferPool::new(disk, DEFAULT_BUFFER_POOL_SIZE, shift);

        let header = {
            let guard = store.get(1)?;
            let page = guard.read();
            ColumnHeader::from_bytes(page.as_slice())?
        };
        let def = ColumnDef::new(
            name,
            header.column_type().expect("validated by from_bytes"),
            header.logical_size(),
            header.nullable(),
        );
        Ok(Self::assemble(def, path, store, shift))
    }

    fn assemble(def: ColumnDef, path: PathBuf, store: BufferPool<WalDiskManager>, shift: u32) -> Self {
        let page_size = 1usize << shift;
        let slot_size = 1 + physical_size(def.column_type, def.logical_size);
        Self {
            def,
            path,
            slot_size,
            slots_per_page: page_size / slot_size,
            store,
            global_lock: RwLock::new(()),
            tx_lock: RwLock::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &ColumnDef {
        &self.def
    }

    pub fn column_type(&self) -> ColumnType {
        self.def.column_type
    }

    pub fn logical_size(&self) -> usize {
        self.def.logical_size
    }

    pub fn nullable(&self) -> bool {
        self.def.nullable
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn store(&self) -> &BufferPool<WalDiskManager> {
        &self.store
    }

    pub(crate) fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub(crate) fn slots_per_page(&self) -> usize {
        self.slots_per_page
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn global_lock(&self) -> &RwLock<()> {
        &self.global_lock
    }

    pub(crate) fn tx_lock(&self) -> &RwLock<()> {
        &self.tx_lock
    }

    /// Page and byte offset of a user record's slot.
    pub(crate) fn locate(&self, tid: u64) -> (PageId, usize) {
        debug_assert!(tid >= MIN_USER_TID);
        let idx = tid - MIN_USER_TID;
        let page = 2 + idx / self.slots_per_page as u64;
        let offset = (idx % self.slots_per_page as u64) as usize * self.slot_size;
        (page, offset)
    }

    /// Reads the current header record.
    pub(crate) fn read_header(&self) -> Result<ColumnHeader, TransactionError> {
        let guard = self.store.get(1)?;
        let page = guard.read();
        Ok(ColumnHeader::from_bytes(page.as_slice())?)
    }

    /// Writes the header record back to page 1.
    pub(crate) fn write_header(&self, header: &ColumnHeader) -> Result<(), StorageError> {
        let guard = self.store.get(1)?;
        let mut page = guard.write();
        header.write_to(&mut page.as_mut_slice()[..COLUMN_HEADER_SIZE]);
        Ok(())
    }

    /// Begins a transaction on this column.
    pub fn tx(&self, mode: TxMode) -> Result<ColumnTx<'_>, TransactionError> {
        ColumnTx::begin(self, mode)
    }

    /// Closes the column. Blocks until every live transaction has released
    /// its global read guard.
    pub fn close(&self) -> Result<(), DatabaseError> {
        let _exclusive = self.global_lock.write();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.store.close()?;
        Ok(())
    }

    /// Closes the column and deletes its file.
    pub fn drop_store(&self) -> Result<(), DatabaseError> {
        self.close()?;
        std::fs::remove_file(&self.path).map_err(StorageError::from)?;
        let wal = self.path.with_extension("wal");
        if wal.exists() {
            std::fs::remove_file(wal).map_err(StorageError::from)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("def", &self.def)
            .field("path", &self.path)
            .finish()
    }
}
