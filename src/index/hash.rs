//! # Hash Index
//!
//! The reference secondary index: an on-disk hash map from the leading
//! column's value to the tuple ids carrying it. The unique variant stores a
//! single tuple id per key and rejects duplicate inserts with a validation
//! error; the non-unique variant keeps a sorted id list per key.
//!
//! Supported operators are `EQUAL` (one probe) and `IN` (one probe per
//! literal), which is also what the cost model reports.
//!
//! ## Persistence
//!
//! The directory lives in memory as a `hashbrown` map keyed by a hashable
//! projection of the value (floats hash by bit pattern). On commit the
//! whole directory serializes as a JSON entry list into the index's own
//! WAL-managed page store, so index durability rides the same
//! commit/rollback machinery as the columns.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::config::constants::DEFAULT_BUFFER_POOL_SIZE;
use crate::entity::EntityTx;
use crate::error::{DatabaseError, QueryError, StorageError, ValidationError};
use crate::records::{ComparisonOperator, Predicate, Record, Recordset};
use crate::storage::{read_blob, write_blob, BufferPool, FileType, WalDiskManager};
use crate::types::{ColumnDef, Value};

use super::{Cost, DataChangeEvent, Index, IndexDef, IndexType};

/// Hashable projection of an indexable scalar value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum HashKey {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    FloatBits(u32),
    DoubleBits(u64),
    Str(String),
}

impl HashKey {
    fn from_value(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Boolean(v) => HashKey::Boolean(*v),
            Value::Byte(v) => HashKey::Byte(*v),
            Value::Short(v) => HashKey::Short(*v),
            Value::Int(v) => HashKey::Int(*v),
            Value::Long(v) => HashKey::Long(*v),
            Value::Float(v) => HashKey::FloatBits(v.to_bits()),
            Value::Double(v) => HashKey::DoubleBits(v.to_bits()),
            Value::String(v) => HashKey::Str(v.clone()),
            _ => return None,
        })
    }
}

/// True when a column of this value's type can key a hash index.
pub fn hashable(value: &Value) -> bool {
    HashKey::from_value(value).is_some()
}

type Bucket = SmallVec<[u64; 1]>;

struct Directory {
    map: HashMap<HashKey, (Value, Bucket)>,
    dirty: bool,
}

pub struct HashIndex {
    def: IndexDef,
    produces: Vec<ColumnDef>,
    path: PathBuf,
    store: BufferPool<WalDiskManager>,
    directory: RwLock<Directory>,
}

impl HashIndex {
    /// Creates a fresh, empty hash index file under `dir`.
    pub fn create(
        dir: &Path,
        def: IndexDef,
        indexed: ColumnDef,
        shift: u32,
        lock_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        let path = dir.join(def.file_name());
        let disk = WalDiskManager::open(&path, FileType::Index, shift, lock_timeout_ms)?;
        let store = BufferPool::new(disk, DEFAULT_BUFFER_POOL_SIZE, shift);
        let index = Self {
            def,
            produces: vec![indexed],
            path,
            store,
            directory: RwLock::new(Directory {
                map: HashMap::new(),
                dirty: false,
            }),
        };
        index.persist()?;
        index.store.commit()?;
        Ok(index)
    }

    /// Opens an existing hash index file and loads its directory.
    pub fn open(
        dir: &Path,
        def: IndexDef,
        indexed: ColumnDef,
        shift: u32,
        lock_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        let path = dir.join(def.file_name());
        let disk = WalDiskManager::open(&path, FileType::Index, shift, lock_timeout_ms)?;
        let store = BufferPool::new(disk, DEFAULT_BUFFER_POOL_SIZE, shift);
        let index = Self {
            def,
            produces: vec![indexed],
            path,
            store,
            directory: RwLock::new(Directory {
                map: HashMap::new(),
                dirty: false,
            }),
        };
        index.load()?;
        Ok(index)
    }

    fn leading_column(&self) -> &str {
        &self.def.columns[0]
    }

    fn persist(&self) -> Result<(), StorageError> {
        let directory = self.directory.read();
        let entries: Vec<(&Value, &Bucket)> = directory
            .map
            .values()
            .map(|(value, bucket)| (value, bucket))
            .collect();
        let bytes = serde_json::to_vec(&entries)
            .map_err(|e| StorageError::Wal(format!("index directory serialization: {e}")))?;
        write_blob(&self.store, &bytes)
    }

    fn load(&self) -> Result<(), DatabaseError> {
        let mut directory = self.directory.write();
        directory.map.clear();
        directory.dirty = false;

        let Some(bytes) = read_blob(&self.store, &self.path)? else {
            return Ok(());
        };
        let entries: Vec<(Value, Bucket)> = serde_json::from_slice(&bytes).map_err(|e| {
            DatabaseError::Corruption(format!(
                "unreadable hash index directory in {:?}: {e}",
                self.path
            ))
        })?;
        for (value, bucket) in entries {
            let key = HashKey::from_value(&value).ok_or_else(|| {
                DatabaseError::Corruption(format!(
                    "non-hashable key persisted in {:?}",
                    self.path
                ))
            })?;
            directory.map.insert(key, (value, bucket));
        }
        Ok(())
    }

    fn insert_tid(
        directory: &mut Directory,
        unique: bool,
        index_name: &str,
        value: &Value,
        tid: u64,
    ) -> Result<(), ValidationError> {
        let key = match HashKey::from_value(value) {
            Some(key) => key,
            None => {
                return Err(ValidationError::IndexUpdate {
                    index: index_name.to_string(),
                    reason: format!("value of type {} cannot key a hash index", value.column_type()),
                })
            }
        };
        let entry = directory
            .map
            .entry(key)
            .or_insert_with(|| (value.clone(), Bucket::new()));
        if unique && !entry.1.is_empty() {
            return Err(ValidationError::UniqueConstraint {
                index: index_name.to_string(),
            });
        }
        if let Err(pos) = entry.1.binary_search(&tid) {
            entry.1.insert(pos, tid);
        }
        directory.dirty = true;
        Ok(())
    }

    fn remove_tid(directory: &mut Directory, value: &Value, tid: u64) {
        if let Some(key) = HashKey::from_value(value) {
            if let Some(entry) = directory.map.get_mut(&key) {
                if let Ok(pos) = entry.1.binary_search(&tid) {
                    entry.1.remove(pos);
                }
                if entry.1.is_empty() {
                    directory.map.remove(&key);
                }
                directory.dirty = true;
            }
        }
    }

    fn lookup(&self, value: &Value, out: &mut Recordset) {
        let directory = self.directory.read();
        if let Some(key) = HashKey::from_value(value) {
            if let Some((stored, bucket)) = directory.map.get(&key) {
                for &tid in bucket.iter() {
                    out.push(Record::new(tid, vec![Some(stored.clone())]));
                }
            }
        }
    }

    /// Number of distinct keys currently in the directory.
    pub fn key_count(&self) -> usize {
        self.directory.read().map.len()
    }
}

impl Index for HashIndex {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn index_type(&self) -> IndexType {
        self.def.index_type
    }

    fn columns(&self) -> &[String] {
        &self.def.columns
    }

    fn produces(&self) -> &[ColumnDef] {
        &self.produces
    }

    fn can_process(&self, predicate: &Predicate) -> bool {
        let Some(atom) = predicate.as_atomic() else {
            return false;
        };
        atom.column == self.leading_column()
            && !atom.negated
            && matches!(
                atom.operator,
                ComparisonOperator::Equal | ComparisonOperator::In
            )
            && !atom.values.is_empty()
            && atom.values.iter().all(hashable)
    }

    fn cost(&self, predicate: &Predicate) -> Cost {
        if !self.can_process(predicate) {
            return Cost::INVALID;
        }
        let probes = match predicate.as_atomic().map(|a| a.operator) {
            Some(ComparisonOperator::In) => {
                predicate.as_atomic().map_or(1, |a| a.values.len()) as f32
            }
            _ => 1.0,
        };
        Cost::new(probes, probes * 64.0, probes)
    }

    fn filter(&self, predicate: &Predicate) -> Result<Recordset, QueryError> {
        if !self.can_process(predicate) {
            return Err(QueryError::UnsupportedPredicate(format!(
                "hash index '{}' answers EQUAL/IN on column '{}' only",
                self.def.name,
                self.leading_column()
            )));
        }
        let atom = predicate.as_atomic().expect("checked by can_process");
        let mut out = Recordset::new(self.produces.clone());
        for value in &atom.values {
            self.lookup(value, &mut out);
        }
        Ok(out)
    }

    fn rebuild(&self, tx: &EntityTx<'_>) -> Result<(), DatabaseError> {
        log::info!(
            "rebuilding hash index '{}' on column '{}'",
            self.def.name,
            self.leading_column()
        );
        {
            let mut directory = self.directory.write();
            directory.map.clear();
            directory.dirty = true;
        }

        let unique = self.def.index_type.is_unique();
        let mut failure: Option<ValidationError> = None;
        tx.for_each_column(self.leading_column(), |tid, value| {
            if failure.is_some() {
                return;
            }
            if let Some(value) = value {
                let mut directory = self.directory.write();
                if let Err(e) =
                    Self::insert_tid(&mut directory, unique, &self.def.name, &value, tid)
                {
                    failure = Some(e);
                }
            }
        })
        .map_err(|e| DatabaseError::Corruption(format!("index rebuild scan failed: {e}")))?;

        if let Some(e) = failure {
            return Err(e.into());
        }
        self.persist()?;
        self.store.commit()?;
        self.directory.write().dirty = false;
        Ok(())
    }

    fn update(&self, events: &[DataChangeEvent]) -> Result<(), ValidationError> {
        let unique = self.def.index_type.is_unique();
        let mut directory = self.directory.write();
        for event in events {
            match event {
                DataChangeEvent::Insert { tid, new } => {
                    if let Some(value) = new {
                        Self::insert_tid(&mut directory, unique, &self.def.name, value, *tid)?;
                    }
                }
                DataChangeEvent::Delete { tid, old } => {
                    if let Some(value) = old {
                        Self::remove_tid(&mut directory, value, *tid);
                    }
                }
                DataChangeEvent::Update { tid, old, new } => {
                    if old == new {
                        continue;
                    }
                    if let Some(value) = old {
                        Self::remove_tid(&mut directory, value, *tid);
                    }
                    if let Some(value) = new {
                        Self::insert_tid(&mut directory, unique, &self.def.name, value, *tid)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), StorageError> {
        let dirty = self.directory.read().dirty;
        if dirty {
            self.persist()?;
            self.store.commit()?;
            self.directory.write().dirty = false;
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), StorageError> {
        self.store.rollback()?;
        self.load().map_err(|e| match e {
            DatabaseError::Storage(s) => s,
            other => StorageError::Wal(other.to_string()),
        })
    }

    fn close(&self) -> Result<(), DatabaseError> {
        self.store.close()?;
        Ok(())
    }
}

impl std::fmt::Debug for HashIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashIndex")
            .field("def", &self.def)
            .field("keys", &self.key_count())
            .finish()
    }
}
