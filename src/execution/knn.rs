//! # kNN Scan Tasks
//!
//! The two physical operators for k-nearest-neighbour queries over a
//! vector column:
//!
//! - [`LinearEntityScanKnnTask`] — a single-threaded scan feeding one
//!   bounded heap per query vector.
//! - [`ParallelEntityScanKnnTask`] — partitions the tuple-id range
//!   `[2, max_tuple_id]` into equal-width sub-ranges (the last absorbs the
//!   remainder), scans each on its own scoped worker with private heaps,
//!   and merges the per-worker heaps after join.
//!
//! Distances are computed once per `(query, tuple)` pair in both shapes,
//! so the two tasks return identical results for identical inputs; the
//! parallel variant only changes the wall clock.
//!
//! The output recordset carries a single `"<entity>.distance"` column of
//! type DOUBLE and emits the `(tid, distance)` rows in ascending distance
//! per query, queries concatenated in order.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::column::TxMode;
use crate::entity::{Entity, EntityTx};
use crate::error::QueryError;
use crate::knn::{Distance, HeapSelection, Neighbour};
use crate::records::{Predicate, Record, Recordset};
use crate::types::{ColumnDef, ColumnType, Value};

use super::ExecutionTask;

/// One kNN question: which `k` rows of `column` lie closest to each query
/// vector under `distance`?
#[derive(Debug, Clone)]
pub struct KnnQuery {
    pub column: String,
    pub queries: Vec<Value>,
    /// Optional per-query weight vectors, parallel to `queries`.
    pub weights: Option<Vec<Value>>,
    pub k: usize,
    pub distance: Distance,
}

impl KnnQuery {
    pub fn new(column: impl Into<String>, query: Value, k: usize, distance: Distance) -> Self {
        Self {
            column: column.into(),
            queries: vec![query],
            weights: None,
            k,
            distance,
        }
    }

    fn distance_to(&self, query_idx: usize, candidate: &Value) -> Result<f64, QueryError> {
        let query = &self.queries[query_idx];
        match &self.weights {
            Some(weights) => self
                .distance
                .compute_weighted(query, candidate, &weights[query_idx]),
            None => self.distance.compute(query, candidate),
        }
    }
}

/// Output schema of both kNN tasks.
fn distance_schema(entity: &Entity) -> Vec<ColumnDef> {
    vec![ColumnDef::scalar(
        format!("{}.distance", entity.name()),
        ColumnType::Double,
        false,
    )]
}

/// Turns per-query heaps into the final recordset.
fn emit(entity: &Entity, heaps: Vec<HeapSelection>) -> Recordset {
    let mut out = Recordset::new(distance_schema(entity));
    for heap in heaps {
        for neighbour in heap.into_sorted_vec() {
            out.push(Record::new(
                neighbour.tuple_id,
                vec![Some(Value::Double(neighbour.distance))],
            ));
        }
    }
    out
}

/// Scans `[from, to]` of the vector column, feeding every query's heap.
/// The cancel flag is observed between records so a failing sibling worker
/// stops the whole group promptly.
fn scan_range(
    tx: &EntityTx<'_>,
    query: &KnnQuery,
    predicate: Option<&Predicate>,
    from: u64,
    to: u64,
    cancelled: &AtomicBool,
) -> Result<Vec<HeapSelection>, QueryError> {
    let mut heaps: Vec<HeapSelection> = query
        .queries
        .iter()
        .map(|_| HeapSelection::new(query.k))
        .collect();

    let mut failure: Option<QueryError> = None;
    tx.for_each_column_range(&query.column, from, to, |tid, value| {
        if failure.is_some() || cancelled.load(Ordering::Relaxed) {
            return;
        }
        let Some(candidate) = value else {
            return;
        };
        if let Some(predicate) = predicate {
            let lookup = |name: &str| -> Option<Option<Value>> {
                if name == query.column {
                    return Some(Some(candidate.clone()));
                }
                tx.column_value(name, tid)
            };
            match predicate.matches_values(&lookup) {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    failure = Some(e);
                    return;
                }
            }
        }
        for (qi, heap) in heaps.iter_mut().enumerate() {
            match query.distance_to(qi, &candidate) {
                Ok(distance) => heap.add(Neighbour::new(tid, distance)),
                Err(e) => {
                    failure = Some(e);
                    return;
                }
            }
        }
    })?;

    match failure {
        Some(e) => Err(e),
        None => Ok(heaps),
    }
}

/// Single-threaded kNN scan over the whole entity.
pub struct LinearEntityScanKnnTask<'a> {
    entity: &'a Entity,
    query: KnnQuery,
    predicate: Option<Predicate>,
}

impl<'a> LinearEntityScanKnnTask<'a> {
    pub fn new(entity: &'a Entity, query: KnnQuery) -> Self {
        Self {
            entity,
            query,
            predicate: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

impl ExecutionTask for LinearEntityScanKnnTask<'_> {
    fn name(&self) -> String {
        format!(
            "knn-linear({}.{}, k={})",
            self.entity.name(),
            self.query.column,
            self.query.k
        )
    }

    fn execute(&self) -> Result<Recordset, QueryError> {
        let tx = self.entity.tx(TxMode::ReadOnly)?;
        let max = tx.max_tuple_id()?;
        let cancelled = AtomicBool::new(false);
        let heaps = scan_range(&tx, &self.query, self.predicate.as_ref(), 2, max, &cancelled)?;
        Ok(emit(self.entity, heaps))
    }
}

/// Parallel kNN scan: partition, scan on scoped workers, merge after join.
pub struct ParallelEntityScanKnnTask<'a> {
    entity: &'a Entity,
    query: KnnQuery,
    predicate: Option<Predicate>,
    parallelism: usize,
}

impl<'a> ParallelEntityScanKnnTask<'a> {
    pub fn new(entity: &'a Entity, query: KnnQuery, parallelism: usize) -> Self {
        Self {
            entity,
            query,
            predicate: None,
            parallelism: parallelism.max(1),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

}

/// Disjoint, equal-width sub-ranges of `[2, max]`; the last absorbs the
/// remainder.
fn partition_range(max: u64, parallelism: usize) -> Vec<(u64, u64)> {
    if max < 2 {
        return Vec::new();
    }
    let total = max - 1;
    let workers = (parallelism as u64).min(total).max(1);
    let width = total / workers;

    (0..workers)
        .map(|i| {
            let start = 2 + i * width;
            let end = if i == workers - 1 {
                max
            } else {
                start + width - 1
            };
            (start, end)
        })
        .collect()
}

impl ExecutionTask for ParallelEntityScanKnnTask<'_> {
    fn name(&self) -> String {
        format!(
            "knn-parallel({}.{}, k={}, p={})",
            self.entity.name(),
            self.query.column,
            self.query.k,
            self.parallelism
        )
    }

    fn execute(&self) -> Result<Recordset, QueryError> {
        let tx = self.entity.tx(TxMode::ReadOnly)?;
        let max = tx.max_tuple_id()?;
        let ranges = partition_range(max, self.parallelism);
        if ranges.is_empty() {
            return Ok(emit(self.entity, Vec::new()));
        }

        let cancelled = AtomicBool::new(false);
        let results: Vec<Result<Vec<HeapSelection>, QueryError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ranges
                .iter()
                .map(|&(from, to)| {
                    let tx = &tx;
                    let query = &self.query;
                    let predicate = self.predicate.as_ref();
                    let cancelled = &cancelled;
                    scope.spawn(move || {
                        let result = scan_range(tx, query, predicate, from, to, cancelled);
                        if result.is_err() {
                            cancelled.store(true, Ordering::Relaxed);
                        }
                        result
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(QueryError::TaskFailed("knn scan worker panicked".into()))
                    })
                })
                .collect()
        });

        let mut merged: Vec<HeapSelection> = self
            .query
            .queries
            .iter()
            .map(|_| HeapSelection::new(self.query.k))
            .collect();
        for result in results {
            let heaps = result?;
            for (qi, heap) in heaps.into_iter().enumerate() {
                merged[qi].merge(heap);
            }
        }
        Ok(emit(self.entity, merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_range_without_gaps() {
        let ranges = partition_range(101, 4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0].0, 2);
        assert_eq!(ranges[3].1, 101);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0, "contiguous");
        }
        let total: u64 = ranges.iter().map(|(a, b)| b - a + 1).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn partition_degrades_gracefully() {
        // More workers than tuples: one tuple per worker.
        let tiny = partition_range(4, 8);
        assert_eq!(tiny.len(), 3);
        assert_eq!(tiny.first().unwrap().0, 2);
        assert_eq!(tiny.last().unwrap().1, 4);

        // An empty entity produces no ranges.
        assert!(partition_range(1, 4).is_empty());
    }
}
