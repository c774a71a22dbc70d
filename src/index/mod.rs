//! # Secondary Indexes
//!
//! An index is a named secondary access path over one or more columns of an
//! entity. The planner asks every index whether it [`can_process`] a
//! predicate and what it would [`cost`], then either drives the query
//! through [`filter`] or falls back to a scan.
//!
//! Index maintenance is transactional: entity transactions stream
//! [`DataChangeEvent`]s into the index as rows change (write-through), and
//! the entity commit/rollback fans out to [`Index::commit`] /
//! [`Index::rollback`] so the index's page store moves in lockstep with the
//! columns. `rebuild` repopulates the index from scratch through a borrowed
//! entity transaction.
//!
//! [`can_process`]: Index::can_process
//! [`cost`]: Index::cost
//! [`filter`]: Index::filter

pub mod hash;

pub use hash::HashIndex;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::EntityTx;
use crate::error::{DatabaseError, QueryError, StorageError, ValidationError};
use crate::records::{Predicate, Recordset};
use crate::types::{ColumnDef, Value};

/// The kinds of secondary index the engine knows how to materialise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    Hash,
    UniqueHash,
}

impl IndexType {
    /// Tag used in the index file name (`idx_<tag>_<name>.db`).
    pub fn file_tag(&self) -> &'static str {
        match self {
            IndexType::Hash => "hash",
            IndexType::UniqueHash => "uq_hash",
        }
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, IndexType::UniqueHash)
    }
}

/// Catalog entry of an index, persisted in the entity header document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    #[serde(rename = "type")]
    pub index_type: IndexType,
    pub columns: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, index_type: IndexType, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            index_type,
            columns,
            params: BTreeMap::new(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("idx_{}_{}.db", self.index_type.file_tag(), self.name)
    }
}

/// Planner-facing cost estimate of answering a predicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cost {
    pub disk: f32,
    pub memory: f32,
    pub compute: f32,
}

impl Cost {
    pub const ZERO: Cost = Cost {
        disk: 0.0,
        memory: 0.0,
        compute: 0.0,
    };

    /// The estimate used for access paths that cannot serve a predicate.
    pub const INVALID: Cost = Cost {
        disk: f32::INFINITY,
        memory: f32::INFINITY,
        compute: f32::INFINITY,
    };

    pub fn new(disk: f32, memory: f32, compute: f32) -> Self {
        Self {
            disk,
            memory,
            compute,
        }
    }

    /// Scalar weight used when comparing access paths.
    pub fn total(&self) -> f32 {
        self.disk + self.memory + self.compute
    }
}

/// One row change as seen by an index: the value is the indexed column's
/// cell at that tuple id.
#[derive(Debug, Clone, PartialEq)]
pub enum DataChangeEvent {
    Insert {
        tid: u64,
        new: Option<Value>,
    },
    Update {
        tid: u64,
        old: Option<Value>,
        new: Option<Value>,
    },
    Delete {
        tid: u64,
        old: Option<Value>,
    },
}

/// Contract every secondary access path implements.
pub trait Index: Send + Sync {
    fn name(&self) -> &str;

    fn index_type(&self) -> IndexType;

    /// Input columns, leading column first.
    fn columns(&self) -> &[String];

    /// Output projection of [`Index::filter`].
    fn produces(&self) -> &[ColumnDef];

    /// Whether this index can answer `predicate` exactly.
    fn can_process(&self, predicate: &Predicate) -> bool;

    /// Cost of answering `predicate`; [`Cost::INVALID`] when it cannot.
    fn cost(&self, predicate: &Predicate) -> Cost;

    /// Answers `predicate` with a recordset of matching rows.
    fn filter(&self, predicate: &Predicate) -> Result<Recordset, QueryError>;

    /// Clears and repopulates the index from the entity via `tx`, then
    /// commits the index store.
    fn rebuild(&self, tx: &EntityTx<'_>) -> Result<(), DatabaseError>;

    /// Applies a batch of row changes (incremental maintenance).
    fn update(&self, events: &[DataChangeEvent]) -> Result<(), ValidationError>;

    /// Persists and commits all pending index modifications.
    fn commit(&self) -> Result<(), StorageError>;

    /// Discards pending modifications, restoring the committed state.
    fn rollback(&self) -> Result<(), StorageError>;

    /// Flushes and closes the index's backing store.
    fn close(&self) -> Result<(), DatabaseError>;
}
