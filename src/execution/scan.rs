//! # Boolean Scan Task
//!
//! [`EntityScanTask`] answers boolean queries over one entity: project a
//! set of columns, optionally restrict by a predicate and/or a tuple-id
//! range. When a secondary index can answer the predicate exactly and its
//! estimated cost undercuts a full scan, the task drives the index and
//! joins the matching tuple ids back to the table; otherwise it scans.
//!
//! This local, cost-based index-vs-scan decision is the only planning the
//! engine does itself; everything else is the external planner's business.

use crate::column::TxMode;
use crate::entity::Entity;
use crate::error::QueryError;
use crate::index::Cost;
use crate::records::{Predicate, Recordset};

use super::ExecutionTask;

pub struct EntityScanTask<'a> {
    entity: &'a Entity,
    /// Projection; empty means all columns.
    columns: Vec<String>,
    predicate: Option<Predicate>,
    range: Option<(u64, u64)>,
}

impl<'a> EntityScanTask<'a> {
    pub fn new(entity: &'a Entity) -> Self {
        Self {
            entity,
            columns: Vec::new(),
            predicate: None,
            range: None,
        }
    }

    pub fn project(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.range = Some((from, to));
        self
    }

    /// Estimated cost of answering `predicate` by full scan.
    fn scan_cost(&self, rows: u64) -> Cost {
        let rows = rows as f32;
        Cost::new(rows, 0.0, rows)
    }
}

impl ExecutionTask for EntityScanTask<'_> {
    fn name(&self) -> String {
        format!("scan({})", self.entity.name())
    }

    fn execute(&self) -> Result<Recordset, QueryError> {
        let selection: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        let tx = if selection.is_empty() {
            self.entity.tx(TxMode::ReadOnly)
        } else {
            self.entity.tx_on(TxMode::ReadOnly, &selection)
        }?;

        let Some(predicate) = &self.predicate else {
            let mut out = Recordset::new(tx.schema());
            match self.range {
                Some((from, to)) => tx.for_each_range(from, to, |r| out.push(r))?,
                None => tx.for_each(|r| out.push(r))?,
            }
            return Ok(out);
        };

        // Local cost-based index selection: the cheapest index that can
        // answer the predicate exactly, if it beats a full scan.
        let rows = tx.count()?;
        let scan_cost = self.scan_cost(rows).total();
        let best = tx
            .indexes()
            .iter()
            .filter(|i| i.can_process(predicate))
            .min_by(|a, b| {
                a.cost(predicate)
                    .total()
                    .partial_cmp(&b.cost(predicate).total())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned();

        if let Some(index) = best {
            if index.cost(predicate).total() < scan_cost {
                log::debug!(
                    "scan({}): serving predicate through index '{}'",
                    self.entity.name(),
                    index.name()
                );
                let hits = index.filter(predicate)?;
                let mut tids: Vec<u64> = hits.iter().map(|r| r.tuple_id).collect();
                if let Some((from, to)) = self.range {
                    tids.retain(|t| (from..=to).contains(t));
                }
                return Ok(tx.read_many(&tids)?);
            }
        }

        let mut out = Recordset::new(tx.schema());
        tx.for_each_filtered(predicate, |r| {
            if let Some((from, to)) = self.range {
                if !(from..=to).contains(&r.tuple_id) {
                    return;
                }
            }
            out.push(r);
        })?;
        Ok(out)
    }
}
