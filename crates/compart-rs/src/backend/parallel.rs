//! Data-parallel backend on rayon.

use dendrite_core::{BackendKind, DendriteError, Result, StateVector};
use ndarray::Zip;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;

use super::{ExecutionBackend, PairKernel};

/// Splits each kernel sweep across rayon workers.
///
/// Uses the global rayon pool unless built with [`ParallelBackend::with_threads`].
#[derive(Default)]
pub struct ParallelBackend {
    pool: Option<ThreadPool>,
}

impl fmt::Debug for ParallelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelBackend")
            .field("threads", &self.threads())
            .finish()
    }
}

impl ParallelBackend {
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Backend with its own pool of `threads` workers
    pub fn with_threads(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(DendriteError::config("parallel backend needs at least one thread"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("dendrite-worker-{}", i))
            .build()
            .map_err(|e| DendriteError::config(format!("cannot start thread pool: {}", e)))?;
        Ok(Self { pool: Some(pool) })
    }
}

impl ExecutionBackend for ParallelBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Parallel
    }

    fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    fn map_pairs(&self, first: &mut StateVector, second: &mut StateVector, kernel: &PairKernel<'_>) {
        let sweep = || {
            Zip::indexed(first).and(second).par_for_each(|i, a, b| {
                let (x, y) = kernel(i);
                *a = x;
                *b = y;
            })
        };
        match &self.pool {
            Some(pool) => pool.install(sweep),
            None => sweep(),
        }
    }
}
