//! # Records and Recordsets
//!
//! A [`Record`] maps the columns of a shared schema to optional values at
//! one tuple id; a [`Recordset`] is an ordered sequence of records over that
//! schema. Recordsets are what index scans, filters and kNN tasks hand back
//! to the planner, and what composing tasks pass between each other.
//!
//! The schema is an `Arc<[ColumnDef]>` shared by every record, so rows stay
//! two words plus their values and projection never copies column metadata.

mod predicate;

pub use predicate::{AtomicPredicate, ComparisonOperator, Predicate};

use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::QueryError;
use crate::types::{ColumnDef, Value};

/// One row: a tuple id plus one optional value per schema column.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub tuple_id: u64,
    values: SmallVec<[Option<Value>; 4]>,
}

impl Record {
    pub fn new(tuple_id: u64, values: impl Into<SmallVec<[Option<Value>; 4]>>) -> Self {
        Self {
            tuple_id,
            values: values.into(),
        }
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx).and_then(|v| v.as_ref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An ordered, schema-typed bag of rows.
#[derive(Debug, Clone)]
pub struct Recordset {
    columns: Arc<[ColumnDef]>,
    rows: Vec<Record>,
}

impl Recordset {
    pub fn new(columns: impl Into<Arc<[ColumnDef]>>) -> Self {
        Self {
            columns: columns.into(),
            rows: Vec::new(),
        }
    }

    pub fn with_rows(columns: impl Into<Arc<[ColumnDef]>>, rows: Vec<Record>) -> Self {
        let set = Self {
            columns: columns.into(),
            rows,
        };
        debug_assert!(set.rows.iter().all(|r| r.len() == set.columns.len()));
        set
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn schema(&self) -> Arc<[ColumnDef]> {
        Arc::clone(&self.columns)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, record: Record) {
        debug_assert_eq!(record.len(), self.columns.len());
        self.rows.push(record);
    }

    /// Appends all rows of `other`, which must share this schema.
    pub fn append(&mut self, mut other: Recordset) {
        debug_assert_eq!(self.columns.len(), other.columns.len());
        self.rows.append(&mut other.rows);
    }

    /// Value of `column` in `row`, if present and non-null.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.value(idx)
    }

    /// Restricts every row to the named columns, in the given order.
    pub fn project(&self, names: &[&str]) -> Result<Recordset, QueryError> {
        let indices: Vec<usize> = names
            .iter()
            .map(|n| {
                self.column_index(n)
                    .ok_or_else(|| QueryError::ColumnNotFound((*n).to_string()))
            })
            .collect::<Result<_, _>>()?;

        let columns: Vec<ColumnDef> = indices.iter().map(|&i| self.columns[i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|r| {
                Record::new(
                    r.tuple_id,
                    indices
                        .iter()
                        .map(|&i| r.values()[i].clone())
                        .collect::<SmallVec<[Option<Value>; 4]>>(),
                )
            })
            .collect();
        Ok(Recordset::with_rows(columns, rows))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.rows.iter()
    }
}

impl<'a> IntoIterator for &'a Recordset {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
