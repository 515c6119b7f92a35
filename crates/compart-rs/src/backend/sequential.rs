//! Single-threaded reference backend.

use dendrite_core::{BackendKind, StateVector};
use ndarray::Zip;

use super::{ExecutionBackend, PairKernel};

/// Visits neurons in ascending index order on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialBackend;

impl SequentialBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionBackend for SequentialBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sequential
    }

    fn map_pairs(&self, first: &mut StateVector, second: &mut StateVector, kernel: &PairKernel<'_>) {
        Zip::indexed(first).and(second).for_each(|i, a, b| {
            let (x, y) = kernel(i);
            *a = x;
            *b = y;
        });
    }
}
