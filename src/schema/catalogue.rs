//! # Catalogue
//!
//! The process-wide root of a Cottontail instance. The catalogue owns the
//! configuration, discovers schemas by scanning its root directory for
//! `schema_*` entries, and cascades `close` down the whole ownership chain
//! (catalogue → schema → entity → column).
//!
//! Create it once at startup, close it at shutdown; every other object is
//! reached through it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Config;
use crate::error::{DatabaseError, StorageError};

use super::Schema;

pub struct Catalogue {
    config: Config,
    schemas: RwLock<HashMap<String, Arc<Schema>>>,
    closed: AtomicBool,
}

impl Catalogue {
    /// Opens (or initialises) the catalogue under `config.root`.
    pub fn open(config: Config) -> Result<Self, DatabaseError> {
        let root = config.root.clone();
        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(StorageError::from)?;
        }

        let shift = config.memory_config.data_page_shift;
        let lock_timeout = config.lock_timeout;

        let mut schemas = HashMap::new();
        for entry in std::fs::read_dir(&root).map_err(StorageError::from)? {
            let entry = entry.map_err(StorageError::from)?;
            if !entry.path().is_dir() {
                continue;
            }
            let dir_name = entry.file_name();
            let Some(name) = dir_name.to_string_lossy().strip_prefix("schema_").map(String::from)
            else {
                continue;
            };
            let schema = Schema::open(&root, &name, shift, lock_timeout)?;
            schemas.insert(name, Arc::new(schema));
        }

        log::info!(
            "catalogue open at {root:?} with {} schemas",
            schemas.len()
        );
        Ok(Self {
            config,
            schemas: RwLock::new(schemas),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatabaseError::InvalidFile {
                path: self.config.root.clone(),
                reason: "catalogue is closed".to_string(),
            });
        }
        Ok(())
    }

    /// Creates a new schema.
    pub fn create_schema(&self, name: &str) -> Result<Arc<Schema>, DatabaseError> {
        self.ensure_open()?;
        let mut schemas = self.schemas.write();
        if schemas.contains_key(name) {
            return Err(DatabaseError::SchemaAlreadyExists(name.to_string()));
        }
        let schema = Arc::new(Schema::create(
            &self.config.root,
            name,
            self.config.memory_config.data_page_shift,
            self.config.lock_timeout,
        )?);
        schemas.insert(name.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Looks a schema up by name.
    pub fn schema(&self, name: &str) -> Result<Arc<Schema>, DatabaseError> {
        self.ensure_open()?;
        self.schemas
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::SchemaNotFound(name.to_string()))
    }

    pub fn schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops a schema and everything in it.
    pub fn drop_schema(&self, name: &str) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        let schema = self
            .schemas
            .write()
            .remove(name)
            .ok_or_else(|| DatabaseError::SchemaNotFound(name.to_string()))?;
        schema.close()?;
        std::fs::remove_dir_all(schema.path()).map_err(StorageError::from)?;
        log::info!("dropped schema '{name}'");
        Ok(())
    }

    /// Closes every schema; the catalogue rejects further operations.
    pub fn close(&self) -> Result<(), DatabaseError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for schema in self.schemas.read().values() {
            schema.close()?;
        }
        log::info!("catalogue at {:?} closed", self.config.root);
        Ok(())
    }
}

impl std::fmt::Debug for Catalogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalogue")
            .field("root", &self.config.root)
            .field("schemas", &self.schema_names())
            .finish()
    }
}
