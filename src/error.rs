//! # Error Taxonomy
//!
//! Cottontail surfaces every failure as one of five sum types, matching the
//! layer it originates from:
//!
//! - [`StorageError`] — page store failures: I/O, file locks, page bounds,
//!   buffer pool exhaustion, low-level corruption detected by the disk
//!   manager itself.
//! - [`DatabaseError`] — catalogue-level failures: corruption, invalid files,
//!   already-exists / does-not-exist for schemas, entities and indexes.
//! - [`TransactionError`] — transaction life-cycle violations: operations on
//!   closed or errored transactions, read-only violations, denied write
//!   locks, invalid tuple ids, unknown columns.
//! - [`ValidationError`] — value-level rejections raised before any byte is
//!   written: nulls where not allowed, type mismatches, vector size
//!   mismatches, unique-constraint violations.
//! - [`QueryError`] — execution-time failures: unsupported predicates,
//!   missing columns, index lookups that cannot be served.
//!
//! ## Propagation
//!
//! `#[from]` conversions follow the escalation paths: a `StorageError` inside
//! a mutating transaction becomes `TransactionError::Storage` and flips the
//! transaction into its `ERROR` state; validation failures surface before any
//! column mutates; read errors pass through without touching transaction
//! state. Query-level code wraps both transaction and validation failures.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::PageId;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not acquire exclusive lock on {path:?} within {timeout_ms} ms")]
    LockTimeout { path: PathBuf, timeout_ms: u64 },

    #[error("page id {id} out of bounds (valid range 1..={pages})")]
    PageIdOutOfBounds { id: PageId, pages: u64 },

    #[error("storage corruption in {path:?}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    #[error("buffer pool exhausted: all {capacity} frames are pinned")]
    BufferPoolExhausted { capacity: usize },

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("write-ahead log error: {0}")]
    Wal(String),
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("invalid database file {path:?}: {reason}")]
    InvalidFile { path: PathBuf, reason: String },

    #[error("schema '{0}' already exists")]
    SchemaAlreadyExists(String),

    #[error("schema '{0}' does not exist")]
    SchemaNotFound(String),

    #[error("entity '{0}' already exists")]
    EntityAlreadyExists(String),

    #[error("entity '{0}' does not exist")]
    EntityNotFound(String),

    #[error("index '{0}' already exists")]
    IndexAlreadyExists(String),

    #[error("index '{0}' does not exist")]
    IndexNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("database object '{0}' is closed")]
    ClosedDbo(String),

    #[error("transaction has been closed")]
    ClosedTx,

    #[error("transaction is in an error state and only accepts rollback or close")]
    TxInError,

    #[error("transaction is read-only")]
    ReadOnly,

    #[error("write lock on column '{0}' denied; a concurrent transaction holds it")]
    WriteLockDenied(String),

    #[error("invalid tuple id {0}; user records start at 2")]
    InvalidTupleId(u64),

    #[error("column '{0}' is not part of this transaction")]
    UnknownColumn(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("column '{column}' does not allow null values")]
    NullNotAllowed { column: String },

    #[error("type mismatch for column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("vector size mismatch for column '{column}': expected {expected}, got {actual}")]
    VectorSizeMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("string for column '{column}' exceeds logical size {logical}: {actual} bytes")]
    StringTooLong {
        column: String,
        logical: usize,
        actual: usize,
    },

    #[error("row arity mismatch: expected {expected} values, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("unique index '{index}' already maps the given key")]
    UniqueConstraint { index: String },

    #[error("index '{index}' update failed: {reason}")]
    IndexUpdate { index: String, reason: String },
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("predicate is not supported by this access path: {0}")]
    UnsupportedPredicate(String),

    #[error("column '{0}' does not exist")]
    ColumnNotFound(String),

    #[error("index lookup failed: {0}")]
    IndexLookup(String),

    #[error("distance metric '{metric}' cannot process {reason}")]
    UnsupportedMetric { metric: String, reason: String },

    #[error("execution task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl StorageError {
    /// True for failures that must flip a mutating transaction into its
    /// `ERROR` state (as opposed to rejections that leave state untouched).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StorageError::PageIdOutOfBounds { .. })
    }
}
