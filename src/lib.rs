//! # Cottontail DB
//!
//! Cottontail is a column-oriented database engine for mixed boolean and
//! similarity (k-nearest-neighbour) queries over scalar and
//! high-dimensional vector columns. It persists data in page-oriented,
//! write-ahead-logged files, executes transactional reads and writes, and
//! answers kNN queries with heap-based top-k selection over parallel
//! entity scans.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  Execution (scan / linear kNN / ∥ kNN)     │
//! ├───────────────────────────────────────────┤
//! │  Catalogue │ Schema │ Entity │ Index       │
//! ├───────────────────────────────────────────┤
//! │  Column store (typed values, tuple ids)    │
//! ├───────────────────────────────────────────┤
//! │  Buffer pool (pinned pages, clock evict)   │
//! ├───────────────────────────────────────────┤
//! │  Disk manager (HARE files, WAL, CRC32C)    │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## On-disk layout
//!
//! ```text
//! <root>/
//! └── schema_<schema>/
//!     └── entity_<entity>/
//!         ├── index.db                # entity header store
//!         ├── col_<column>.db         # one WAL-managed file per column
//!         ├── col_<column>.wal
//!         └── idx_<type>_<index>.db   # secondary indexes
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use cottontail::{Catalogue, Config};
//! use cottontail::column::TxMode;
//! use cottontail::types::{ColumnDef, ColumnType, Value};
//!
//! let catalogue = Catalogue::open(Config::default())?;
//! let schema = catalogue.create_schema("main")?;
//! let entity = schema.create_entity(
//!     "features",
//!     vec![
//!         ColumnDef::new("id", ColumnType::String, 36, false),
//!         ColumnDef::new("vec", ColumnType::FloatVector, 128, false),
//!     ],
//! )?;
//!
//! let mut tx = entity.tx(TxMode::ReadWrite)?;
//! tx.insert(vec![
//!     Some(Value::String("a0…".into())),
//!     Some(Value::FloatVector(vec![0.0; 128])),
//! ])?;
//! tx.commit()?;
//! ```
//!
//! ## Concurrency model
//!
//! Many readers or one writer per entity, enforced by a three-level lock
//! hierarchy (close → tx → per-column); the write-ahead log keeps
//! uncommitted changes out of the main files, so readers never observe a
//! writer in flight. The parallel kNN scan fans out over scoped worker
//! threads that share one read transaction and merge their private result
//! heaps after join.
//!
//! ## Module overview
//!
//! - [`config`]: typed configuration and engine constants
//! - [`error`]: the sum-typed error taxonomy
//! - [`storage`]: HARE files, disk managers, WAL, buffer pool
//! - [`types`]: column types, values, fixed-width serialization
//! - [`records`]: records, recordsets and boolean predicates
//! - [`column`]: the column store and its transactions
//! - [`index`]: the index contract and the hash index
//! - [`entity`]: entities and multi-column transactions
//! - [`schema`]: schemas and the catalogue root
//! - [`knn`]: distance kernels and heap selection
//! - [`execution`]: the physical task interface

pub mod column;
pub mod config;
pub mod entity;
pub mod error;
pub mod execution;
pub mod index;
pub mod knn;
pub mod records;
pub mod schema;
pub mod storage;
pub mod types;

pub use config::Config;
pub use entity::Entity;
pub use error::{DatabaseError, QueryError, StorageError, TransactionError, ValidationError};
pub use schema::{Catalogue, Schema};
