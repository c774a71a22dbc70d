//! # Entities
//!
//! An entity is a table: N columns sharing one tuple-id space plus M
//! secondary indexes, living together in one directory:
//!
//! ```text
//! entity_<name>/
//! ├── index.db            # entity header store (size, columns, indexes)
//! ├── col_<column>.db     # one WAL-managed file per column
//! └── idx_<type>_<n>.db   # one file per secondary index
//! ```
//!
//! ## Lock discipline
//!
//! Three read-write locks govern an entity, acquired strictly in this
//! order:
//!
//! 1. `close_lock` — read mode for every operation and every open
//!    transaction; write mode only by `close`/`drop`. The entity cannot
//!    disappear under live work.
//! 2. `tx_lock` — read mode for read-only transactions, write mode for
//!    read-write transactions: exactly one writer or many readers.
//! 3. `index_lock` — write mode to add or drop an index, read mode to
//!    enumerate.
//!
//! Inside a transaction each column additionally contributes its own global
//! read guard (see the column module). Release happens in reverse order as
//! guards drop.

mod header;
mod tx;

pub use header::EntityHeader;
pub use tx::EntityTx;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::column::{Column, TxMode};
use crate::config::constants::DEFAULT_BUFFER_POOL_SIZE;
use crate::error::{DatabaseError, StorageError, TransactionError, ValidationError};
use crate::index::{HashIndex, Index, IndexDef, IndexType};
use crate::storage::{read_blob, write_blob, BufferPool, FileType, WalDiskManager};
use crate::types::{ColumnDef, ColumnType};

pub struct Entity {
    name: String,
    path: PathBuf,
    shift: u32,
    lock_timeout_ms: u64,
    header_store: BufferPool<WalDiskManager>,
    /// Committed header state; transactions work on a clone and publish it
    /// back on commit.
    header: RwLock<EntityHeader>,
    columns: Vec<Column>,
    indexes: RwLock<Vec<Arc<dyn Index>>>,
    close_lock: RwLock<()>,
    tx_lock: RwLock<()>,
    closed: AtomicBool,
}

impl Entity {
    /// Directory name of an entity inside its schema directory.
    pub fn dir_name(name: &str) -> String {
        format!("entity_{name}")
    }

    const HEADER_FILE: &'static str = "index.db";

    /// Creates a new entity directory with one file per column.
    pub fn create(
        schema_dir: &Path,
        name: &str,
        columns: Vec<ColumnDef>,
        shift: u32,
        lock_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        let path = schema_dir.join(Self::dir_name(name));
        if path.exists() {
            return Err(DatabaseError::EntityAlreadyExists(name.to_string()));
        }
        if columns.is_empty() {
            return Err(DatabaseError::InvalidFile {
                path,
                reason: "an entity needs at least one column".to_string(),
            });
        }
        std::fs::create_dir_all(&path).map_err(StorageError::from)?;

        let header = EntityHeader::new(columns.clone(), crate::storage::now_millis());
        let disk = WalDiskManager::open(
            &path.join(Self::HEADER_FILE),
            FileType::Entity,
            shift,
            lock_timeout_ms,
        )?;
        let header_store = BufferPool::new(disk, DEFAULT_BUFFER_POOL_SIZE, shift);
        write_blob(&header_store, &header.to_bytes()?)?;
        header_store.commit()?;

        let mut cols = Vec::with_capacity(columns.len());
        for def in columns {
            cols.push(Column::create(&path, def, shift, lock_timeout_ms)?);
        }

        log::info!("created entity '{name}' with {} columns", cols.len());
        Ok(Self {
            name: name.to_string(),
            path,
            shift,
            lock_timeout_ms,
            header_store,
            header: RwLock::new(header),
            columns: cols,
            indexes: RwLock::new(Vec::new()),
            close_lock: RwLock::new(()),
            tx_lock: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Opens an existing entity directory: header, columns, then indexes.
    pub fn open(
        schema_dir: &Path,
        name: &str,
        shift: u32,
        lock_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        let path = schema_dir.join(Self::dir_name(name));
        if !path.is_dir() {
            return Err(DatabaseError::EntityNotFound(name.to_string()));
        }

        let disk = WalDiskManager::open(
            &path.join(Self::HEADER_FILE),
            FileType::Entity,
            shift,
            lock_timeout_ms,
        )?;
        let header_store = BufferPool::new(disk, DEFAULT_BUFFER_POOL_SIZE, shift);
        let bytes = read_blob(&header_store, &path)?.ok_or_else(|| DatabaseError::InvalidFile {
            path: path.clone(),
            reason: "entity header store is empty".to_string(),
        })?;
        let header = EntityHeader::from_bytes(&bytes)?;

        let mut cols = Vec::with_capacity(header.columns.len());
        for def in &header.columns {
            let column = Column::open(&path, &def.name, shift, lock_timeout_ms)?;
            if column.def() != def {
                return Err(DatabaseError::Corruption(format!(
                    "column '{}' disagrees with the entity header: {} vs {}",
                    def.name,
                    column.def(),
                    def
                )));
            }
            cols.push(column);
        }

        let mut indexes: Vec<Arc<dyn Index>> = Vec::with_capacity(header.indexes.len());
        for idef in &header.indexes {
            let indexed = header
                .column(&idef.columns[0])
                .ok_or_else(|| {
                    DatabaseError::Corruption(format!(
                        "index '{}' references unknown column '{}'",
                        idef.name, idef.columns[0]
                    ))
                })?
                .clone();
            indexes.push(Arc::new(HashIndex::open(
                &path,
                idef.clone(),
                indexed,
                shift,
                lock_timeout_ms,
            )?));
        }

        Ok(Self {
            name: name.to_string(),
            path,
            shift,
            lock_timeout_ms,
            header_store,
            header: RwLock::new(header),
            columns: cols,
            indexes: RwLock::new(indexes),
            close_lock: RwLock::new(()),
            tx_lock: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn column_defs(&self) -> Vec<ColumnDef> {
        self.header.read().columns.clone()
    }

    pub(crate) fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn header(&self) -> &RwLock<EntityHeader> {
        &self.header
    }

    pub(crate) fn header_store(&self) -> &BufferPool<WalDiskManager> {
        &self.header_store
    }

    pub(crate) fn close_lock(&self) -> &RwLock<()> {
        &self.close_lock
    }

    pub(crate) fn tx_lock(&self) -> &RwLock<()> {
        &self.tx_lock
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Snapshot of the current index set.
    pub fn all_indexes(&self) -> Vec<Arc<dyn Index>> {
        self.indexes.read().clone()
    }

    /// Begins a transaction covering all columns.
    pub fn tx(&self, mode: TxMode) -> Result<EntityTx<'_>, TransactionError> {
        EntityTx::begin(self, mode, None, true)
    }

    /// Begins a transaction whose reads project onto `columns`.
    pub fn tx_on(&self, mode: TxMode, columns: &[&str]) -> Result<EntityTx<'_>, TransactionError> {
        EntityTx::begin(self, mode, Some(columns), true)
    }

    /// Creates a secondary index: materialises the file, commits the header
    /// entry, then rebuilds the index under a fresh transaction. On any
    /// failure the header entry is rolled back and the index file deleted.
    pub fn create_index(
        &self,
        name: &str,
        index_type: IndexType,
        columns: Vec<String>,
    ) -> Result<(), DatabaseError> {
        let _open = self.close_lock.read();
        if self.is_closed() {
            return Err(DatabaseError::EntityNotFound(self.name.clone()));
        }
        let mut indexes = self.indexes.write();

        if self.header.read().index(name).is_some() {
            return Err(DatabaseError::IndexAlreadyExists(name.to_string()));
        }
        let leading = columns.first().ok_or_else(|| {
            DatabaseError::Validation(ValidationError::IndexUpdate {
                index: name.to_string(),
                reason: "an index needs at least one column".to_string(),
            })
        })?;
        let indexed = self
            .header
            .read()
            .column(leading)
            .ok_or_else(|| DatabaseError::EntityNotFound(format!("{}.{leading}", self.name)))?
            .clone();
        if !hash_keyable(indexed.column_type) {
            return Err(DatabaseError::Validation(ValidationError::IndexUpdate {
                index: name.to_string(),
                reason: format!(
                    "column type {} cannot key a hash index",
                    indexed.column_type
                ),
            }));
        }

        let def = IndexDef::new(name, index_type, columns);
        let index = Arc::new(HashIndex::create(
            &self.path,
            def.clone(),
            indexed,
            self.shift,
            self.lock_timeout_ms,
        )?);

        // Header first: the entry is durable before the rebuild runs.
        self.persist_header_with(|header| header.indexes.push(def.clone()))?;

        let rebuilt = self
            .tx_internal(TxMode::ReadWrite, None, false)
            .map_err(|e| DatabaseError::Corruption(e.to_string()))
            .and_then(|tx| index.rebuild(&tx));

        if let Err(e) = rebuilt {
            log::warn!("index '{name}' rebuild failed, rolling back: {e}");
            self.persist_header_with(|header| header.indexes.retain(|i| i.name != name))?;
            let _ = index.close();
            remove_index_files(&self.path, &def);
            return Err(e);
        }

        indexes.push(index);
        Ok(())
    }

    /// Drops a secondary index: removes the header entry, closes the index
    /// and deletes its files.
    pub fn drop_index(&self, name: &str) -> Result<(), DatabaseError> {
        let _open = self.close_lock.read();
        if self.is_closed() {
            return Err(DatabaseError::EntityNotFound(self.name.clone()));
        }
        let mut indexes = self.indexes.write();

        let pos = indexes
            .iter()
            .position(|i| i.name() == name)
            .ok_or_else(|| DatabaseError::IndexNotFound(name.to_string()))?;
        let def = self
            .header
            .read()
            .index(name)
            .cloned()
            .ok_or_else(|| DatabaseError::IndexNotFound(name.to_string()))?;

        self.persist_header_with(|header| header.indexes.retain(|i| i.name != name))?;

        let index = indexes.remove(pos);
        index.close()?;
        remove_index_files(&self.path, &def);
        log::info!("dropped index '{name}' on entity '{}'", self.name);
        Ok(())
    }

    /// Applies `mutate` to the committed header and persists it.
    fn persist_header_with(
        &self,
        mutate: impl FnOnce(&mut EntityHeader),
    ) -> Result<(), DatabaseError> {
        let mut header = self.header.write();
        mutate(&mut header);
        header.modified = crate::storage::now_millis();
        write_blob(&self.header_store, &header.to_bytes()?)?;
        self.header_store.commit()?;
        Ok(())
    }

    pub(crate) fn tx_internal(
        &self,
        mode: TxMode,
        columns: Option<&[&str]>,
        with_indexes: bool,
    ) -> Result<EntityTx<'_>, TransactionError> {
        EntityTx::begin(self, mode, columns, with_indexes)
    }

    /// Closes the entity. Blocks until every live transaction finishes.
    pub fn close(&self) -> Result<(), DatabaseError> {
        let _exclusive = self.close_lock.write();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for column in &self.columns {
            column.close()?;
        }
        for index in self.indexes.read().iter() {
            index.close()?;
        }
        self.header_store.close()?;
        log::info!("closed entity '{}'", self.name);
        Ok(())
    }

    /// Closes the entity and deletes its directory.
    pub fn drop_entity(&self) -> Result<(), DatabaseError> {
        self.close()?;
        std::fs::remove_dir_all(&self.path).map_err(StorageError::from)?;
        Ok(())
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("columns", &self.columns.len())
            .finish()
    }
}

/// Column types a hash index can key.
fn hash_keyable(ty: ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::Boolean
            | ColumnType::Byte
            | ColumnType::Short
            | ColumnType::Int
            | ColumnType::Long
            | ColumnType::Float
            | ColumnType::Double
            | ColumnType::String
    )
}

fn remove_index_files(dir: &Path, def: &IndexDef) {
    let file = dir.join(def.file_name());
    let wal = file.with_extension("wal");
    for path in [file, wal] {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("could not delete index file {path:?}: {e}");
            }
        }
    }
}
