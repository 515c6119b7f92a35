//! # Execution Backends
//!
//! The integrator expresses every population-wide update as a per-neuron
//! kernel `i -> (a, b)` written into two state columns. A backend decides
//! how those kernels are scheduled:
//!
//! - [`SequentialBackend`]: one thread, ascending neuron index
//! - [`ParallelBackend`]: rayon work-stealing over neuron chunks
//!
//! Kernels only read frozen inputs and write their own slot, so both
//! backends produce bit-identical columns.

mod parallel;
mod sequential;

pub use parallel::ParallelBackend;
pub use sequential::SequentialBackend;

use dendrite_core::{BackendKind, StateVector};

/// Per-neuron kernel returning the new values of two state columns
pub type PairKernel<'a> = dyn Fn(usize) -> (f64, f64) + Sync + 'a;

/// Strategy that applies a kernel to every neuron of a population
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Worker threads used by [`map_pairs`](Self::map_pairs)
    fn threads(&self) -> usize {
        1
    }

    /// Overwrite `first[i]` and `second[i]` with `kernel(i)` for every `i`.
    ///
    /// `first` and `second` must have equal length. The kernel must not
    /// observe either output column.
    fn map_pairs(&self, first: &mut StateVector, second: &mut StateVector, kernel: &PairKernel<'_>);
}

/// Default backend for a [`BackendKind`]
pub fn create_backend(kind: BackendKind) -> Box<dyn ExecutionBackend> {
    match kind {
        BackendKind::Sequential => Box::new(SequentialBackend::new()),
        BackendKind::Parallel => Box::new(ParallelBackend::new()),
    }
}
