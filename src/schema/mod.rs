//! # Schemas
//!
//! A schema is a named set of entities living under one directory:
//!
//! ```text
//! <root>/
//! └── schema_<name>/
//!     ├── entity_<a>/ ...
//!     └── entity_<b>/ ...
//! ```
//!
//! The directory tree is the source of truth: opening a schema scans for
//! `entity_*` directories and opens each one. The schema exclusively owns
//! its entities; entity handles are shared out as `Arc` but closing the
//! schema closes all of them (blocking on their live transactions).

mod catalogue;

pub use catalogue::Catalogue;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entity::Entity;
use crate::error::{DatabaseError, StorageError};
use crate::types::ColumnDef;

pub struct Schema {
    name: String,
    path: PathBuf,
    shift: u32,
    lock_timeout_ms: u64,
    entities: RwLock<HashMap<String, Arc<Entity>>>,
    closed: AtomicBool,
}

impl Schema {
    /// Directory name of a schema under the catalogue root.
    pub fn dir_name(name: &str) -> String {
        format!("schema_{name}")
    }

    /// Creates an empty schema directory.
    pub fn create(
        root: &Path,
        name: &str,
        shift: u32,
        lock_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        let path = root.join(Self::dir_name(name));
        if path.exists() {
            return Err(DatabaseError::SchemaAlreadyExists(name.to_string()));
        }
        std::fs::create_dir_all(&path).map_err(StorageError::from)?;
        log::info!("created schema '{name}' at {path:?}");
        Ok(Self {
            name: name.to_string(),
            path,
            shift,
            lock_timeout_ms,
            entities: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Opens an existing schema directory and every entity inside it.
    pub fn open(
        root: &Path,
        name: &str,
        shift: u32,
        lock_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        let path = root.join(Self::dir_name(name));
        if !path.is_dir() {
            return Err(DatabaseError::SchemaNotFound(name.to_string()));
        }

        let mut entities = HashMap::new();
        for entry in std::fs::read_dir(&path).map_err(StorageError::from)? {
            let entry = entry.map_err(StorageError::from)?;
            if !entry.path().is_dir() {
                continue;
            }
            let dir_name = entry.file_name();
            let Some(entity_name) = dir_name.to_string_lossy().strip_prefix("entity_").map(String::from)
            else {
                continue;
            };
            let entity = Entity::open(&path, &entity_name, shift, lock_timeout_ms)?;
            entities.insert(entity_name, Arc::new(entity));
        }

        log::info!("opened schema '{name}' with {} entities", entities.len());
        Ok(Self {
            name: name.to_string(),
            path,
            shift,
            lock_timeout_ms,
            entities: RwLock::new(entities),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatabaseError::SchemaNotFound(self.name.clone()));
        }
        Ok(())
    }

    /// Creates a new entity in this schema.
    pub fn create_entity(
        &self,
        name: &str,
        columns: Vec<ColumnDef>,
    ) -> Result<Arc<Entity>, DatabaseError> {
        self.ensure_open()?;
        let mut entities = self.entities.write();
        if entities.contains_key(name) {
            return Err(DatabaseError::EntityAlreadyExists(name.to_string()));
        }
        let entity = Arc::new(Entity::create(
            &self.path,
            name,
            columns,
            self.shift,
            self.lock_timeout_ms,
        )?);
        entities.insert(name.to_string(), Arc::clone(&entity));
        Ok(entity)
    }

    /// Looks an entity up by name.
    pub fn entity(&self, name: &str) -> Result<Arc<Entity>, DatabaseError> {
        self.ensure_open()?;
        self.entities
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::EntityNotFound(name.to_string()))
    }

    pub fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops an entity: closes it (blocking on live transactions) and
    /// deletes its directory.
    pub fn drop_entity(&self, name: &str) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        let entity = self
            .entities
            .write()
            .remove(name)
            .ok_or_else(|| DatabaseError::EntityNotFound(name.to_string()))?;
        entity.drop_entity()?;
        log::info!("dropped entity '{name}' from schema '{}'", self.name);
        Ok(())
    }

    /// Closes every entity of this schema.
    pub fn close(&self) -> Result<(), DatabaseError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for entity in self.entities.read().values() {
            entity.close()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("entities", &self.entity_names())
            .finish()
    }
}
