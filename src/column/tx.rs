//! # Column Transactions
//!
//! A [`ColumnTx`] is a borrowed handle into one column: it pins the column
//! open through the global read guard and runs the life cycle
//!
//! ```text
//! CLEAN ──first write──► DIRTY ──commit/rollback──► CLEAN ──close──► CLOSED
//!                          │
//!                          └──storage failure──► ERROR (rollback/close only)
//! ```
//!
//! Non-mutating operations take the column's tx lock in read mode for their
//! duration. The first mutation upgrades to the write side via `try_write`;
//! if another transaction holds any side of the lock the upgrade fails
//! immediately with a write-lock error instead of waiting, so transactions
//! spanning many columns cannot deadlock on acquisition order.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::error::TransactionError;
use crate::storage::Page;
use crate::types::{deserialize, serialize, validate, Value};

use super::header::{ColumnHeader, MIN_USER_TID};
use super::Column;

const FLAG_ABSENT: u8 = 0;
const FLAG_PRESENT: u8 = 1;
const FLAG_NULL: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxStatus {
    Clean = 0,
    Dirty = 1,
    Error = 2,
    Closed = 3,
}

impl TxStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TxStatus::Clean,
            1 => TxStatus::Dirty,
            2 => TxStatus::Error,
            _ => TxStatus::Closed,
        }
    }
}

pub struct ColumnTx<'a> {
    column: &'a Column,
    _global: RwLockReadGuard<'a, ()>,
    write_guard: Option<RwLockWriteGuard<'a, ()>>,
    mode: TxMode,
    status: AtomicU8,
}

impl<'a> ColumnTx<'a> {
    pub(super) fn begin(column: &'a Column, mode: TxMode) -> Result<Self, TransactionError> {
        let global = column.global_lock().read();
        if column.is_closed() {
            return Err(TransactionError::ClosedDbo(column.name().to_string()));
        }
        Ok(Self {
            column,
            _global: global,
            write_guard: None,
            mode,
            status: AtomicU8::new(TxStatus::Clean as u8),
        })
    }

    pub fn mode(&self) -> TxMode {
        self.mode
    }

    pub fn status(&self) -> TxStatus {
        TxStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn column(&self) -> &Column {
        self.column
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

    /// Transient tx read guard for non-mutating operations. Skipped when
    /// this transaction already holds the write side.
    fn read_guard(&self) -> Option<RwLockReadGuard<'a, ()>> {
        if self.write_guard.is_some() {
            None
        } else {
            Some(self.column.tx_lock().read())
        }
    }

    /// Upgrades to the tx write lock on the first mutation.
    fn acquire_write(&mut self) -> Result<(), TransactionError> {
        self.ensure_live()?;
        if self.mode == TxMode::ReadOnly {
            return Err(TransactionError::ReadOnly);
        }
        if self.write_guard.is_none() {
            match self.column.tx_lock().try_write() {
                Some(guard) => self.write_guard = Some(guard),
                None => {
                    return Err(TransactionError::WriteLockDenied(
                        self.column.name().to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Routes a mutation failure: storage-level errors poison the
    /// transaction, validation rejections leave it untouched.
    fn fail<T>(&self, e: TransactionError) -> Result<T, TransactionError> {
        if matches!(
            e,
            TransactionError::Storage(_) | TransactionError::Database(_)
        ) {
            self.set_status(TxStatus::Error);
        }
        Err(e)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Returns the value at `tid`, `None` for null or absent slots.
    pub fn read(&self, tid: u64) -> Result<Option<Value>, TransactionError> {
        self.ensure_live()?;
        let _read = self.read_guard();
        let header = self.column.read_header()?;
        self.check_tid(tid, &header)?;
        self.read_slot(tid)
    }

    /// Number of live records (header record excluded).
    pub fn count(&self) -> Result<u64, TransactionError> {
        self.ensure_live()?;
        let _read = self.read_guard();
        Ok(self.column.read_header()?.count())
    }

    /// Highest tuple id ever allocated.
    pub fn max_tuple_id(&self) -> Result<u64, TransactionError> {
        self.ensure_live()?;
        let _read = self.read_guard();
        Ok(self.column.read_header()?.max_tid())
    }

    /// Iterates all live records in ascending tuple-id order.
    pub fn for_each<F>(&self, action: F) -> Result<(), TransactionError>
    where
        F: FnMut(u64, Option<Value>),
    {
        self.for_each_range(MIN_USER_TID, u64::MAX, action)
    }

    /// Iterates live records with tuple ids in `[from, to]`, ascending. The
    /// transaction status is observed between pages, so a poisoned or
    /// closed transaction stops at the next record boundary.
    pub fn for_each_range<F>(&self, from: u64, to: u64, mut action: F) -> Result<(), TransactionError>
    where
        F: FnMut(u64, Option<Value>),
    {
        self.ensure_live()?;
        let _read = self.read_guard();
        let header = self.column.read_header()?;

        let from = from.max(MIN_USER_TID);
        let to = to.min(header.max_tid());
        let spp = self.column.slots_per_page() as u64;
        let slot_size = self.column.slot_size();
        let ty = self.column.column_type();
        let logical = self.column.logical_size();

        let mut tid = from;
        while tid <= to {
            if matches!(self.status(), TxStatus::Error | TxStatus::Closed) {
                break;
            }
            let (page_id, _) = self.column.locate(tid);
            let page_last = MIN_USER_TID + (page_id - 2 + 1) * spp - 1;
            let last = page_last.min(to);

            let guard = self.column.store().get(page_id)?;
            let page = guard.read();
            let bytes = page.as_slice();

            for t in tid..=last {
                let offset = ((t - MIN_USER_TID) % spp) as usize * slot_size;
                let slot = &bytes[offset..offset + slot_size];
                match slot[0] {
                    FLAG_ABSENT => continue,
                    FLAG_NULL => action(t, None),
                    _ => action(t, Some(deserialize(ty, logical, &slot[1..])?)),
                }
            }
            tid = last + 1;
        }
        Ok(())
    }

    /// Iteration producing a sequence.
    pub fn map<T, F>(&self, mut action: F) -> Result<Vec<T>, TransactionError>
    where
        F: FnMut(u64, Option<Value>) -> T,
    {
        let mut out = Vec::new();
        self.for_each(|tid, value| out.push(action(tid, value)))?;
        Ok(out)
    }

    fn check_tid(&self, tid: u64, header: &ColumnHeader) -> Result<(), TransactionError> {
        if tid < MIN_USER_TID || tid > header.max_tid() {
            return Err(TransactionError::InvalidTupleId(tid));
        }
        Ok(())
    }

    fn read_slot(&self, tid: u64) -> Result<Option<Value>, TransactionError> {
        let (page_id, offset) = self.column.locate(tid);
        let guard = self.column.store().get(page_id)?;
        let page = guard.read();
        let slot = &page.as_slice()[offset..offset + self.column.slot_size()];
        match slot[0] {
            FLAG_ABSENT | FLAG_NULL => Ok(None),
            _ => Ok(Some(deserialize(
                self.column.column_type(),
                self.column.logical_size(),
                &slot[1..],
            )?)),
        }
    }

    fn slot_flag(&self, tid: u64) -> Result<u8, TransactionError> {
        let (page_id, offset) = self.column.locate(tid);
        let guard = self.column.store().get(page_id)?;
        let page = guard.read();
        Ok(page.as_slice()[offset])
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Allocates a new tuple id and stores `value` there. `None`
    /// pre-allocates the slot as null without writing a value.
    pub fn insert(&mut self, value: Option<Value>) -> Result<u64, TransactionError> {
        Ok(self.insert_all(vec![value])?[0])
    }

    /// Bulk insert; returns the allocated tuple ids in order.
    pub fn insert_all(&mut self, values: Vec<Option<Value>>) -> Result<Vec<u64>, TransactionError> {
        for value in values.iter().flatten() {
            validate(
                value,
                self.column.column_type(),
                self.column.logical_size(),
                self.column.name(),
            )?;
        }
        self.acquire_write()?;

        let result = (|| {
            let mut header = self.column.read_header()?;
            let mut tids = Vec::with_capacity(values.len());
            for value in &values {
                let tid = header.max_tid() + 1;
                self.write_slot(tid, value.as_ref())?;
                header.set_max_tid(tid);
                header.set_count(header.count() + 1);
                tids.push(tid);
            }
            header.set_modified(crate::storage::now_millis());
            self.column.write_header(&header)?;
            Ok(tids)
        })();

        match result {
            Ok(tids) => {
                self.set_status(TxStatus::Dirty);
                Ok(tids)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Replaces the value at `tid` in place; returns the previous value.
    pub fn update(&mut self, tid: u64, value: Option<Value>) -> Result<Option<Value>, TransactionError> {
        if let Some(v) = &value {
            validate(
                v,
                self.column.column_type(),
                self.column.logical_size(),
                self.column.name(),
            )?;
        }
        self.acquire_write()?;

        let result = (|| {
            let mut header = self.column.read_header()?;
            self.check_tid(tid, &header)?;
            if self.slot_flag(tid)? == FLAG_ABSENT {
                return Err(TransactionError::InvalidTupleId(tid));
            }
            let old = self.read_slot(tid)?;
            self.write_slot(tid, value.as_ref())?;
            header.set_modified(crate::storage::now_millis());
            self.column.write_header(&header)?;
            Ok(old)
        })();

        match result {
            Ok(old) => {
                self.set_status(TxStatus::Dirty);
                Ok(old)
            }
            Err(e @ TransactionError::InvalidTupleId(_)) => Err(e),
            Err(e) => self.fail(e),
        }
    }

    /// Record-level compare and swap: replaces the value iff the current
    /// value equals `expected`. Returns whether the swap happened.
    pub fn compare_and_update(
        &mut self,
        tid: u64,
        expected: Option<&Value>,
        value: Option<Value>,
    ) -> Result<bool, TransactionError> {
        self.ensure_live()?;
        let current = {
            let header = self.column.read_header()?;
            self.check_tid(tid, &header)?;
            self.read_slot(tid)?
        };
        if current.as_ref() != expected {
            return Ok(false);
        }
        self.update(tid, value)?;
        Ok(true)
    }

    /// Frees the record at `tid`; returns the previous value. Deleting an
    /// already absent slot is a no-op returning `None`.
    pub fn delete(&mut self, tid: u64) -> Result<Option<Value>, TransactionError> {
        self.acquire_write()?;

        let result = (|| {
            let mut header = self.column.read_header()?;
            self.check_tid(tid, &header)?;
            if self.slot_flag(tid)? == FLAG_ABSENT {
                return Ok(None);
            }
            let old = self.read_slot(tid)?;
            self.clear_slot(tid)?;
            header.set_count(header.count() - 1);
            header.set_modified(crate::storage::now_millis());
            self.column.write_header(&header)?;
            Ok(old)
        })();

        match result {
            Ok(old) => {
                self.set_status(TxStatus::Dirty);
                Ok(old)
            }
            Err(e @ TransactionError::InvalidTupleId(_)) => Err(e),
            Err(e) => self.fail(e),
        }
    }

    /// Bulk delete.
    pub fn delete_all(&mut self, tids: &[u64]) -> Result<(), TransactionError> {
        for &tid in tids {
            self.delete(tid)?;
        }
        Ok(())
    }

    fn write_slot(&self, tid: u64, value: Option<&Value>) -> Result<(), TransactionError> {
        let (page_id, offset) = self.column.locate(tid);
        let store = self.column.store();
        while store.page_count() < page_id {
            store.allocate(&Page::new(store.page_shift()))?;
        }
        let guard = self.column.store().get(page_id)?;
        let mut page = guard.write();
        let slot = &mut page.as_mut_slice()[offset..offset + self.column.slot_size()];
        match value {
            Some(v) => {
                slot[0] = FLAG_PRESENT;
                serialize(
                    v,
                    self.column.column_type(),
                    self.column.logical_size(),
                    self.column.name(),
                    &mut slot[1..],
                )?;
            }
            None => {
                slot[0] = FLAG_NULL;
                slot[1..].fill(0);
            }
        }
        Ok(())
    }

    fn clear_slot(&self, tid: u64) -> Result<(), TransactionError> {
        let (page_id, offset) = self.column.locate(tid);
        let guard = self.column.store().get(page_id)?;
        let mut page = guard.write();
        page.as_mut_slice()[offset..offset + self.column.slot_size()].fill(FLAG_ABSENT);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Life cycle
    // ------------------------------------------------------------------

    /// Makes all modifications durable and returns the transaction to
    /// `CLEAN`, releasing the tx write lock.
    pub fn commit(&mut self) -> Result<(), TransactionError> {
        match self.status() {
            TxStatus::Closed => return Err(TransactionError::ClosedTx),
            TxStatus::Error => return Err(TransactionError::TxInError),
            TxStatus::Clean => {
                self.write_guard = None;
                return Ok(());
            }
            TxStatus::Dirty => {}
        }
        match self.column.store().commit() {
            Ok(()) => {
                self.set_status(TxStatus::Clean);
                self.write_guard = None;
                Ok(())
            }
            Err(e) => {
                self.set_status(TxStatus::Error);
                Err(e.into())
            }
        }
    }

    /// Discards all modifications and returns the transaction to `CLEAN`,
    /// releasing the tx write lock. Legal in the `ERROR` state.
    pub fn rollback(&mut self) -> Result<(), TransactionError> {
        if self.status() == TxStatus::Closed {
            return Err(TransactionError::ClosedTx);
        }
        self.column.store().rollback()?;
        self.set_status(TxStatus::Clean);
        self.write_guard = None;
        Ok(())
    }

    /// Closes the transaction, rolling back any uncommitted work first.
    pub fn close(&mut self) -> Result<(), TransactionError> {
        match self.status() {
            TxStatus::Closed => return Ok(()),
            TxStatus::Dirty | TxStatus::Error => self.rollback()?,
            TxStatus::Clean => {}
        }
        self.set_status(TxStatus::Closed);
        self.write_guard = None;
        Ok(())
    }
}

impl Drop for ColumnTx<'_> {
    fn drop(&mut self) {
        if matches!(self.status(), TxStatus::Dirty | TxStatus::Error) {
            if let Err(e) = self.rollback() {
                log::warn!(
                    "rollback on drop failed for column '{}': {e}",
                    self.column.name()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::DEFAULT_DATA_PAGE_SHIFT as SHIFT;
    use crate::types::{ColumnDef, ColumnType};
    use tempfile::tempdir;

    fn int_column(dir: &std::path::Path) -> Column {
        Column::create(
            dir,
            ColumnDef::scalar("c", ColumnType::Int, true),
            SHIFT,
            100,
        )
        .unwrap()
    }

    #[test]
    fn empty_column_counts_zero_then_one() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());
        let mut tx = column.tx(TxMode::ReadWrite).unwrap();

        assert_eq!(tx.count().unwrap(), 0);
        let tid = tx.insert(Some(Value::Int(10))).unwrap();
        assert_eq!(tx.count().unwrap(), 1);
        assert_eq!(tx.read(tid).unwrap(), Some(Value::Int(10)));
        tx.commit().unwrap();
        drop(tx);
        column.close().unwrap();
    }

    #[test]
    fn tuple_ids_are_monotonic_from_two() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());
        let mut tx = column.tx(TxMode::ReadWrite).unwrap();

        let tids: Vec<u64> = (0..5)
            .map(|i| tx.insert(Some(Value::Int(i))).unwrap())
            .collect();
        assert_eq!(tids, vec![2, 3, 4, 5, 6]);
        tx.commit().unwrap();
        drop(tx);
        column.close().unwrap();
    }

    #[test]
    fn delete_skips_slot_in_iteration_and_never_reuses_tid() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());
        let mut tx = column.tx(TxMode::ReadWrite).unwrap();

        let tids = tx
            .insert_all((1..=5).map(|i| Some(Value::Int(i))).collect())
            .unwrap();
        assert_eq!(tids, vec![2, 3, 4, 5, 6]);
        tx.delete(4).unwrap();

        let mut seen = Vec::new();
        tx.for_each(|tid, v| seen.push((tid, v))).unwrap();
        assert_eq!(
            seen,
            vec![
                (2, Some(Value::Int(1))),
                (3, Some(Value::Int(2))),
                (5, Some(Value::Int(4))),
                (6, Some(Value::Int(5))),
            ]
        );
        assert_eq!(tx.count().unwrap(), 4);
        assert_eq!(tx.read(4).unwrap(), None);

        let next = tx.insert(Some(Value::Int(9))).unwrap();
        assert_eq!(next, 7, "deleted tuple ids are not recycled");
        tx.commit().unwrap();
        drop(tx);
        column.close().unwrap();
    }

    #[test]
    fn null_insert_preallocates_live_slot() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());
        let mut tx = column.tx(TxMode::ReadWrite).unwrap();

        let tid = tx.insert(None).unwrap();
        assert_eq!(tx.read(tid).unwrap(), None);
        assert_eq!(tx.count().unwrap(), 1, "null slots are live");

        let mut visited = Vec::new();
        tx.for_each(|t, v| visited.push((t, v))).unwrap();
        assert_eq!(visited, vec![(tid, None)]);
        tx.commit().unwrap();
        drop(tx);
        column.close().unwrap();
    }

    #[test]
    fn read_only_tx_rejects_mutations() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());
        let mut tx = column.tx(TxMode::ReadOnly).unwrap();
        assert!(matches!(
            tx.insert(Some(Value::Int(1))),
            Err(TransactionError::ReadOnly)
        ));
        drop(tx);
        column.close().unwrap();
    }

    #[test]
    fn write_lock_upgrade_fails_fast_under_contention() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());

        let mut writer = column.tx(TxMode::ReadWrite).unwrap();
        writer.insert(Some(Value::Int(1))).unwrap();

        let mut second = column.tx(TxMode::ReadWrite).unwrap();
        assert!(matches!(
            second.insert(Some(Value::Int(2))),
            Err(TransactionError::WriteLockDenied(_))
        ));
        drop(second);

        writer.commit().unwrap();
        drop(writer);

        let mut third = column.tx(TxMode::ReadWrite).unwrap();
        third.insert(Some(Value::Int(3))).unwrap();
        third.commit().unwrap();
        drop(third);
        column.close().unwrap();
    }

    #[test]
    fn rollback_discards_uncommitted_inserts() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());
        {
            let mut tx = column.tx(TxMode::ReadWrite).unwrap();
            tx.insert(Some(Value::Int(1))).unwrap();
            tx.commit().unwrap();
            tx.insert(Some(Value::Int(2))).unwrap();
            tx.rollback().unwrap();
        }
        let tx = column.tx(TxMode::ReadOnly).unwrap();
        assert_eq!(tx.count().unwrap(), 1);
        assert_eq!(tx.max_tuple_id().unwrap(), 2);
        drop(tx);
        column.close().unwrap();
    }

    #[test]
    fn closed_tx_rejects_everything() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());
        let mut tx = column.tx(TxMode::ReadWrite).unwrap();
        tx.insert(Some(Value::Int(1))).unwrap();
        tx.close().unwrap();

        assert!(matches!(tx.read(2), Err(TransactionError::ClosedTx)));
        assert!(matches!(tx.count(), Err(TransactionError::ClosedTx)));
        assert!(matches!(
            tx.insert(Some(Value::Int(2))),
            Err(TransactionError::ClosedTx)
        ));
        assert!(matches!(tx.commit(), Err(TransactionError::ClosedTx)));
        drop(tx);

        let tx = column.tx(TxMode::ReadOnly).unwrap();
        assert_eq!(tx.count().unwrap(), 0, "closed tx rolled its work back");
        drop(tx);
        column.close().unwrap();
    }

    #[test]
    fn compare_and_update_swaps_only_on_match() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());
        let mut tx = column.tx(TxMode::ReadWrite).unwrap();
        let tid = tx.insert(Some(Value::Int(5))).unwrap();

        assert!(!tx
            .compare_and_update(tid, Some(&Value::Int(9)), Some(Value::Int(10)))
            .unwrap());
        assert_eq!(tx.read(tid).unwrap(), Some(Value::Int(5)));

        assert!(tx
            .compare_and_update(tid, Some(&Value::Int(5)), Some(Value::Int(10)))
            .unwrap());
        assert_eq!(tx.read(tid).unwrap(), Some(Value::Int(10)));
        tx.commit().unwrap();
        drop(tx);
        column.close().unwrap();
    }

    #[test]
    fn type_mismatch_rejected_without_dirtying() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());
        let mut tx = column.tx(TxMode::ReadWrite).unwrap();

        assert!(matches!(
            tx.insert(Some(Value::Long(1))),
            Err(TransactionError::Validation(_))
        ));
        assert_eq!(tx.status(), TxStatus::Clean);
        drop(tx);
        column.close().unwrap();
    }

    #[test]
    fn range_iteration_honors_inclusive_bounds() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());
        let mut tx = column.tx(TxMode::ReadWrite).unwrap();
        tx.insert_all((0..10).map(|i| Some(Value::Int(i))).collect())
            .unwrap();

        let mut seen = Vec::new();
        tx.for_each_range(4, 7, |tid, _| seen.push(tid)).unwrap();
        assert_eq!(seen, vec![4, 5, 6, 7]);
        tx.commit().unwrap();
        drop(tx);
        column.close().unwrap();
    }

    #[test]
    fn iteration_spans_many_pages() {
        let dir = tempdir().unwrap();
        let column = int_column(dir.path());
        let mut tx = column.tx(TxMode::ReadWrite).unwrap();
        // 4096 / 5-byte slots = 819 per page; insert past three pages.
        let n = 2000i32;
        tx.insert_all((0..n).map(|i| Some(Value::Int(i))).collect())
            .unwrap();

        let mut count = 0;
        let mut last = 1;
        tx.for_each(|tid, _| {
            assert!(tid > last, "ascending order");
            last = tid;
            count += 1;
        })
        .unwrap();
        assert_eq!(count, n);
        tx.commit().unwrap();
        drop(tx);
        column.close().unwrap();
    }
}
