//! # Execution Layer
//!
//! The physical task interface an external query planner drives. A planner
//! emits a tree of [`ExecutionTask`]s; each task opens an entity
//! transaction, iterates rows and produces a [`Recordset`]; tasks compose
//! by passing recordsets.
//!
//! The [`ExecutionEngine`] owns the worker-pool sizing derived from
//! [`ExecutionConfig`]: parallel tasks ask it how many scoped workers they
//! may spawn. Workers run as a scoped thread group — spawn, fill private
//! result heaps, join, merge — and coordinate only through the shared
//! transaction's status flag.

pub mod knn;
pub mod scan;

pub use knn::{KnnQuery, LinearEntityScanKnnTask, ParallelEntityScanKnnTask};
pub use scan::EntityScanTask;

use crate::config::ExecutionConfig;
use crate::error::QueryError;
use crate::records::Recordset;

/// Sizes parallel work from the configured thread bounds.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Clamps a requested degree of parallelism to `[1, max_threads]`.
    pub fn parallelism(&self, requested: usize) -> usize {
        requested.clamp(1, self.config.max_threads.max(1))
    }

    /// Default degree of parallelism for tasks that do not request one.
    pub fn default_parallelism(&self) -> usize {
        self.parallelism(self.config.core_threads)
    }
}

/// A physical operator producing one recordset.
pub trait ExecutionTask {
    /// Human-readable operator name for plans and logs.
    fn name(&self) -> String;

    /// Runs the task to completion.
    fn execute(&self) -> Result<Recordset, QueryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;

    #[test]
    fn parallelism_is_clamped_to_configured_bounds() {
        let engine = ExecutionEngine::new(ExecutionConfig {
            core_threads: 2,
            max_threads: 4,
            keep_alive_time: 500,
            queue_size: 10,
        });
        assert_eq!(engine.parallelism(0), 1);
        assert_eq!(engine.parallelism(3), 3);
        assert_eq!(engine.parallelism(100), 4);
        assert_eq!(engine.default_parallelism(), 2);
    }
}
