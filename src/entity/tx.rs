//! # Entity Transactions
//!
//! An [`EntityTx`] fans one logical transaction out over the entity's
//! columns and indexes. On open it pins the entity (`close_lock` read),
//! takes the `tx_lock` in read or write mode, snapshots the index set and
//! spawns one column transaction per column; everything is released in
//! reverse order when the transaction ends.
//!
//! Reads materialise rows by visiting every selected column at one tuple
//! id, driven by the first selected column's iterator. Writes go to every
//! column in order and must yield the same tuple id everywhere; a drifting
//! id means the files have diverged, which poisons the transaction and
//! surfaces as corruption.
//!
//! Commit order: columns (in definition order), then indexes, then the
//! entity header store. Rollback runs the same fan-out but discarding, and
//! close rolls back anything still dirty before releasing locks.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;

use crate::column::{ColumnTx, TxMode, TxStatus};
use crate::error::{DatabaseError, QueryError, TransactionError, ValidationError};
use crate::index::{DataChangeEvent, Index, IndexType};
use crate::records::{AtomicPredicate, ComparisonOperator, Predicate, Record, Recordset};
use crate::types::{validate, ColumnDef, Value};

use super::{Entity, EntityHeader};

enum ModeGuard<'a> {
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

pub struct EntityTx<'a> {
    entity: &'a Entity,
    _close: RwLockReadGuard<'a, ()>,
    _mode_guard: ModeGuard<'a>,
    mode: TxMode,
    /// One transaction per column, in definition order.
    columns: Vec<ColumnTx<'a>>,
    /// Indices (into `columns`) of the columns reads project onto.
    selected: Vec<usize>,
    indexes: Vec<Arc<dyn Index>>,
    /// Working copy of the entity header; published on commit.
    header: EntityHeader,
    header_dirty: bool,
    status: AtomicU8,
}

impl<'a> EntityTx<'a> {
    pub(super) fn begin(
        entity: &'a Entity,
        mode: TxMode,
        selection: Option<&[&str]>,
        with_indexes: bool,
    ) -> Result<Self, TransactionError> {
        let close = entity.close_lock().read();
        if entity.is_closed() {
            return Err(TransactionError::ClosedDbo(entity.name().to_string()));
        }

        // Index snapshot before the tx lock keeps the global acquisition
        // order (close, index, tx) consistent with index CRUD.
        let indexes = if with_indexes {
            entity.all_indexes()
        } else {
            Vec::new()
        };

        let mode_guard = match mode {
            TxMode::ReadOnly => ModeGuard::Read(entity.tx_lock().read()),
            TxMode::ReadWrite => ModeGuard::Write(entity.tx_lock().write()),
        };

        let mut columns = Vec::with_capacity(entity.columns().len());
        for column in entity.columns() {
            columns.push(column.tx(mode)?);
        }

        let selected = match selection {
            None => (0..columns.len()).collect(),
            Some(names) => {
                let mut selected = Vec::with_capacity(names.len());
                for name in names {
                    let idx = entity
                        .columns()
                        .iter()
                        .position(|c| c.name() == *name)
                        .ok_or_else(|| TransactionError::UnknownColumn((*name).to_string()))?;
                    selected.push(idx);
                }
                selected
            }
        };

        let header = entity.header().read().clone();
        Ok(Self {
            entity,
            _close: close,
            _mode_guard: mode_guard,
            mode,
            columns,
            selected,
            indexes,
            header,
            header_dirty: false,
            status: AtomicU8::new(TxStatus::Clean as u8),
        })
    }

    pub fn entity(&self) -> &Entity {
        self.entity
    }

    pub fn mode(&self) -> TxMode {
        self.mode
    }

    pub fn status(&self) -> TxStatus {
        match self.status.load(Ordering::Acquire) {
            0 => TxStatus::Clean,
            1 => TxStatus::Dirty,
            2 => TxStatus::Error,
            _ => TxStatus::Closed,
        }
    }

    fn set_status(&self, status: TxStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn ensure_live(&self) -> Result<(), TransactionError> {
        match self.status() {
            TxStatus::Closed => Err(TransactionError::ClosedTx),
            TxStatus::Error => Err(TransactionError::TxInError),
            _ => Ok(()),
        }
    }

    /// Column schema the reads of this transaction produce.
    pub fn schema(&self) -> Vec<ColumnDef> {
        self.selected
            .iter()
            .map(|&i| self.columns[i].column().def().clone())
            .collect()
    }

    fn column_position(&self, name: &str) -> Result<usize, TransactionError> {
        self.columns
            .iter()
            .position(|c| c.column().name() == name)
            .ok_or_else(|| TransactionError::UnknownColumn(name.to_string()))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Number of rows in the entity.
    pub fn count(&self) -> Result<u64, TransactionError> {
        self.ensure_live()?;
        Ok(self.header.size)
    }

    /// Highest tuple id ever allocated in the shared tuple-id space.
    pub fn max_tuple_id(&self) -> Result<u64, TransactionError> {
        self.columns[0].max_tuple_id()
    }

    /// Materialises the row at `tid` across the selected columns.
    pub fn read(&self, tid: u64) -> Result<Record, TransactionError> {
        self.ensure_live()?;
        let mut values: SmallVec<[Option<Value>; 4]> = SmallVec::with_capacity(self.selected.len());
        for &idx in &self.selected {
            values.push(self.columns[idx].read(tid)?);
        }
        Ok(Record::new(tid, values))
    }

    /// Bulk point reads.
    pub fn read_many(&self, tids: &[u64]) -> Result<Recordset, TransactionError> {
        let mut out = Recordset::new(self.schema());
        for &tid in tids {
            out.push(self.read(tid)?);
        }
        Ok(out)
    }

    /// Reads every row.
    pub fn read_all(&self) -> Result<Recordset, TransactionError> {
        let mut out = Recordset::new(self.schema());
        self.for_each(|record| out.push(record))?;
        Ok(out)
    }

    /// Iterates all rows in ascending tuple-id order.
    pub fn for_each<F>(&self, action: F) -> Result<(), TransactionError>
    where
        F: FnMut(Record),
    {
        self.for_each_range(2, u64::MAX, action)
    }

    /// Iterates rows with tuple ids in `[from, to]`, driven by the first
    /// selected column's iterator.
    pub fn for_each_range<F>(&self, from: u64, to: u64, mut action: F) -> Result<(), TransactionError>
    where
        F: FnMut(Record),
    {
        self.ensure_live()?;
        let driver = &self.columns[self.selected[0]];
        let mut failure = None;
        driver.for_each_range(from, to, |tid, first| {
            if failure.is_some() {
                return;
            }
            let mut values: SmallVec<[Option<Value>; 4]> =
                SmallVec::with_capacity(self.selected.len());
            values.push(first);
            for &idx in &self.selected[1..] {
                match self.columns[idx].read(tid) {
                    Ok(value) => values.push(value),
                    Err(e) => {
                        failure = Some(e);
                        return;
                    }
                }
            }
            action(Record::new(tid, values));
        })?;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Iteration producing a sequence.
    pub fn map<T, F>(&self, mut action: F) -> Result<Vec<T>, TransactionError>
    where
        F: FnMut(Record) -> T,
    {
        let mut out = Vec::new();
        self.for_each(|record| out.push(action(record)))?;
        Ok(out)
    }

    /// Iterates one column's cells without materialising whole rows. Used
    /// by index rebuilds and vector scans.
    pub fn for_each_column<F>(&self, column: &str, action: F) -> Result<(), TransactionError>
    where
        F: FnMut(u64, Option<Value>),
    {
        self.for_each_column_range(column, 2, u64::MAX, action)
    }

    /// Range variant of [`EntityTx::for_each_column`], inclusive bounds.
    pub fn for_each_column_range<F>(
        &self,
        column: &str,
        from: u64,
        to: u64,
        action: F,
    ) -> Result<(), TransactionError>
    where
        F: FnMut(u64, Option<Value>),
    {
        self.ensure_live()?;
        let idx = self.column_position(column)?;
        self.columns[idx].for_each_range(from, to, action)
    }

    /// One cell by column name, for predicate evaluation during scans.
    /// `None` when the column is unknown or unreadable.
    pub fn column_value(&self, column: &str, tid: u64) -> Option<Option<Value>> {
        let idx = self.column_position(column).ok()?;
        self.columns[idx].read(tid).ok()
    }

    /// Full scan with a predicate. An atomic predicate on a single column
    /// drives the scan from that column and fetches sibling values only for
    /// matching tuple ids; anything else materialises every row.
    pub fn filter(&self, predicate: &Predicate) -> Result<Recordset, QueryError> {
        let mut out = Recordset::new(self.schema());
        self.for_each_filtered(predicate, |record| out.push(record))?;
        Ok(out)
    }

    /// Predicate-driven iteration; see [`EntityTx::filter`].
    pub fn for_each_filtered<F>(&self, predicate: &Predicate, mut action: F) -> Result<(), QueryError>
    where
        F: FnMut(Record),
    {
        self.ensure_live().map_err(QueryError::from)?;

        if let Some(atom) = predicate.as_atomic() {
            let drive_idx = self
                .column_position(&atom.column)
                .map_err(QueryError::from)?;
            let mut failure: Option<TransactionError> = None;
            self.columns[drive_idx].for_each(|tid, value| {
                if failure.is_some() || !atom.matches_value(value.as_ref()) {
                    return;
                }
                match self.read(tid) {
                    Ok(record) => action(record),
                    Err(e) => failure = Some(e),
                }
            })?;
            return match failure {
                Some(e) => Err(e.into()),
                None => Ok(()),
            };
        }

        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.column().name().to_string())
            .collect();
        let mut failure: Option<QueryError> = None;
        self.columns[0].for_each(|tid, _| {
            if failure.is_some() {
                return;
            }
            let mut cells: Vec<Option<Value>> = Vec::with_capacity(columns.len());
            for tx in &self.columns {
                match tx.read(tid) {
                    Ok(v) => cells.push(v),
                    Err(e) => {
                        failure = Some(e.into());
                        return;
                    }
                }
            }
            let lookup = |name: &str| -> Option<Option<Value>> {
                columns
                    .iter()
                    .position(|c| c == name)
                    .map(|i| cells[i].clone())
            };
            match predicate.matches_values(&lookup) {
                Ok(true) => match self.read(tid) {
                    Ok(record) => action(record),
                    Err(e) => failure = Some(e.into()),
                },
                Ok(false) => {}
                Err(e) => failure = Some(e),
            }
        })?;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Index access
    // ------------------------------------------------------------------

    /// All index transactions opened by this transaction.
    pub fn indexes(&self) -> &[Arc<dyn Index>] {
        &self.indexes
    }

    /// Indexes filtered by covered columns and/or type.
    pub fn indexes_for(
        &self,
        columns: Option<&[&str]>,
        index_type: Option<IndexType>,
    ) -> Vec<Arc<dyn Index>> {
        self.indexes
            .iter()
            .filter(|i| {
                index_type.is_none_or(|t| i.index_type() == t)
                    && columns.is_none_or(|cols| {
                        cols.iter().all(|c| i.columns().iter().any(|ic| ic == c))
                    })
            })
            .cloned()
            .collect()
    }

    /// The index named `name`.
    pub fn index(&self, name: &str) -> Result<Arc<dyn Index>, DatabaseError> {
        self.indexes
            .iter()
            .find(|i| i.name() == name)
            .cloned()
            .ok_or_else(|| DatabaseError::IndexNotFound(name.to_string()))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Validates a row against the full column schema before any mutation.
    fn validate_row(&self, values: &[Option<Value>]) -> Result<(), ValidationError> {
        if values.len() != self.columns.len() {
            return Err(ValidationError::Arity {
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        for (tx, value) in self.columns.iter().zip(values) {
            let def = tx.column().def();
            match value {
                None => {
                    if !def.nullable {
                        return Err(ValidationError::NullNotAllowed {
                            column: def.name.clone(),
                        });
                    }
                }
                Some(v) => validate(v, def.column_type, def.logical_size, &def.name)?,
            }
        }
        Ok(())
    }

    /// Value of an index's leading column within a full row.
    fn leading_value(&self, index: &dyn Index, values: &[Option<Value>]) -> Option<Value> {
        let leading = &index.columns()[0];
        self.columns
            .iter()
            .position(|c| c.column().name() == leading.as_str())
            .and_then(|i| values[i].clone())
    }

    /// Probes unique indexes so constraint violations surface before any
    /// column mutates.
    fn check_unique(&self, values: &[Option<Value>]) -> Result<(), TransactionError> {
        for index in &self.indexes {
            if !index.index_type().is_unique() {
                continue;
            }
            if let Some(key) = self.leading_value(index.as_ref(), values) {
                let probe = Predicate::Atomic(AtomicPredicate::new(
                    index.columns()[0].clone(),
                    ComparisonOperator::Equal,
                    vec![key],
                ));
                let hit = index
                    .filter(&probe)
                    .map_err(|e| TransactionError::Validation(ValidationError::IndexUpdate {
                        index: index.name().to_string(),
                        reason: e.to_string(),
                    }))?;
                if !hit.is_empty() {
                    return Err(ValidationError::UniqueConstraint {
                        index: index.name().to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Inserts one row, values ordered by the entity's column definitions.
    /// Returns the allocated tuple id.
    pub fn insert(&mut self, values: Vec<Option<Value>>) -> Result<u64, TransactionError> {
        self.ensure_live()?;
        if self.mode == TxMode::ReadOnly {
            return Err(TransactionError::ReadOnly);
        }
        self.validate_row(&values)?;
        self.check_unique(&values)?;

        let mut tid: Option<u64> = None;
        for (pos, value) in values.iter().enumerate() {
            let allocated = match self.columns[pos].insert(value.clone()) {
                Ok(tid) => tid,
                Err(e) => {
                    // A failure after the first column leaves a torn row;
                    // only rollback or close can repair that.
                    if pos > 0 {
                        self.set_status(TxStatus::Error);
                    }
                    return Err(e);
                }
            };
            match tid {
                None => tid = Some(allocated),
                Some(expected) if expected == allocated => {}
                Some(expected) => {
                    self.set_status(TxStatus::Error);
                    return Err(DatabaseError::Corruption(format!(
                        "tuple id drift on insert into '{}': column '{}' allocated {allocated}, expected {expected}",
                        self.entity.name(),
                        self.columns[pos].column().name()
                    ))
                    .into());
                }
            }
        }
        let tid = tid.expect("entity has at least one column");

        for index in &self.indexes {
            let event = DataChangeEvent::Insert {
                tid,
                new: self.leading_value(index.as_ref(), &values),
            };
            if let Err(e) = index.update(&[event]) {
                self.set_status(TxStatus::Error);
                return Err(e.into());
            }
        }

        self.header.size += 1;
        self.header.modified = crate::storage::now_millis();
        self.header_dirty = true;
        self.set_status(TxStatus::Dirty);
        Ok(tid)
    }

    /// Bulk insert; returns the allocated tuple ids in order.
    pub fn insert_all(&mut self, rows: Vec<Vec<Option<Value>>>) -> Result<Vec<u64>, TransactionError> {
        let mut tids = Vec::with_capacity(rows.len());
        for row in rows {
            tids.push(self.insert(row)?);
        }
        Ok(tids)
    }

    /// Replaces the row at `tid`; `None` cells become null. Returns the
    /// previous row.
    pub fn update(&mut self, tid: u64, values: Vec<Option<Value>>) -> Result<Record, TransactionError> {
        self.ensure_live()?;
        if self.mode == TxMode::ReadOnly {
            return Err(TransactionError::ReadOnly);
        }
        self.validate_row(&values)?;

        let mut old: SmallVec<[Option<Value>; 4]> = SmallVec::with_capacity(self.columns.len());
        for (pos, value) in values.iter().enumerate() {
            match self.columns[pos].update(tid, value.clone()) {
                Ok(previous) => old.push(previous),
                Err(e) => {
                    if pos > 0 {
                        self.set_status(TxStatus::Error);
                    }
                    return Err(e);
                }
            }
        }

        for index in &self.indexes {
            let leading = &index.columns()[0];
            let pos = self
                .columns
                .iter()
                .position(|c| c.column().name() == leading.as_str());
            let Some(pos) = pos else { continue };
            let event = DataChangeEvent::Update {
                tid,
                old: old[pos].clone(),
                new: values[pos].clone(),
            };
            if let Err(e) = index.update(&[event]) {
                self.set_status(TxStatus::Error);
                return Err(e.into());
            }
        }

        self.header.modified = crate::storage::now_millis();
        self.header_dirty = true;
        self.set_status(TxStatus::Dirty);
        Ok(Record::new(tid, old))
    }

    /// Deletes the row at `tid` from every column.
    pub fn delete(&mut self, tid: u64) -> Result<(), TransactionError> {
        self.ensure_live()?;
        if self.mode == TxMode::ReadOnly {
            return Err(TransactionError::ReadOnly);
        }

        // The driver column's count tells whether the row was live at all;
        // all-null rows carry no values but still occupy live slots.
        let live_before = self.columns[0].count()?;
        let mut old: SmallVec<[Option<Value>; 4]> = SmallVec::with_capacity(self.columns.len());
        for (pos, tx) in self.columns.iter_mut().enumerate() {
            match tx.delete(tid) {
                Ok(value) => old.push(value),
                Err(e) => {
                    if pos > 0 {
                        self.set_status(TxStatus::Error);
                    }
                    return Err(e);
                }
            }
        }
        let row_was_live = self.columns[0].count()? < live_before;

        for index in &self.indexes {
            let leading = &index.columns()[0];
            let pos = self
                .columns
                .iter()
                .position(|c| c.column().name() == leading.as_str());
            let Some(pos) = pos else { continue };
            let event = DataChangeEvent::Delete {
                tid,
                old: old[pos].clone(),
            };
            if let Err(e) = index.update(&[event]) {
                self.set_status(TxStatus::Error);
                return Err(e.into());
            }
        }

        if row_was_live {
            self.header.size = self.header.size.saturating_sub(1);
        }
        self.header.modified = crate::storage::now_millis();
        self.header_dirty = true;
        self.set_status(TxStatus::Dirty);
        Ok(())
    }

    /// Bulk delete.
    pub fn delete_all(&mut self, tids: &[u64]) -> Result<(), TransactionError> {
        for &tid in tids {
            self.delete(tid)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Life cycle
    // ------------------------------------------------------------------

    /// Commits each column in order, then the indexes, then the entity
    /// header store.
    pub fn commit(&mut self) -> Result<(), TransactionError> {
        match self.status() {
            TxStatus::Closed => return Err(TransactionError::ClosedTx),
            TxStatus::Error => return Err(TransactionError::TxInError),
            TxStatus::Clean => return Ok(()),
            TxStatus::Dirty => {}
        }

        let result = (|| -> Result<(), TransactionError> {
            for tx in self.columns.iter_mut() {
                tx.commit()?;
            }
            for index in &self.indexes {
                index.commit()?;
            }
            if self.header_dirty {
                crate::storage::write_blob(self.entity.header_store(), &self.header.to_bytes()?)?;
                self.entity.header_store().commit()?;
                *self.entity.header().write() = self.header.clone();
                self.header_dirty = false;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.set_status(TxStatus::Clean);
                Ok(())
            }
            Err(e) => {
                self.set_status(TxStatus::Error);
                Err(e)
            }
        }
    }

    /// Rolls back each column, then the indexes, then restores the header
    /// working copy.
    pub fn rollback(&mut self) -> Result<(), TransactionError> {
        if self.status() == TxStatus::Closed {
            return Err(TransactionError::ClosedTx);
        }
        for tx in self.columns.iter_mut() {
            tx.rollback()?;
        }
        for index in &self.indexes {
            index.rollback()?;
        }
        self.entity.header_store().rollback()?;
        self.header = self.entity.header().read().clone();
        self.header_dirty = false;
        self.set_status(TxStatus::Clean);
        Ok(())
    }

    /// Closes the transaction, rolling back uncommitted work first.
    pub fn close(&mut self) -> Result<(), TransactionError> {
        match self.status() {
            TxStatus::Closed => return Ok(()),
            TxStatus::Dirty | TxStatus::Error => self.rollback()?,
            TxStatus::Clean => {}
        }
        for tx in self.columns.iter_mut() {
            tx.close()?;
        }
        self.set_status(TxStatus::Closed);
        Ok(())
    }
}

impl Drop for EntityTx<'_> {
    fn drop(&mut self) {
        if matches!(self.status(), TxStatus::Dirty | TxStatus::Error) {
            if let Err(e) = self.rollback() {
                log::warn!(
                    "rollback on drop failed for entity '{}': {e}",
                    self.entity.name()
                );
            }
        }
    }
}
