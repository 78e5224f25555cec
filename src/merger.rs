// Thread-safe reduction of per-chunk results and the phase barrier.

use crate::bounds::DoubleHeapVector;
use ndarray::Array1;
use std::sync::{Condvar, Mutex};

/// Masked accumulation result for one chunk: per-dimension sum of the
/// sign-aligned coordinates that fell inside the trimming bounds, and the
/// number of samples that contributed to each dimension.
#[derive(Clone, Debug)]
pub struct TrimmedAccumulator {
    pub sum: Array1<f64>,
    pub count: Array1<usize>,
}

impl TrimmedAccumulator {
    pub fn zeros(dimension: usize) -> Self {
        Self {
            sum: Array1::zeros(dimension),
            count: Array1::zeros(dimension),
        }
    }

    pub fn dimension(&self) -> usize {
        self.sum.len()
    }

    /// Element-wise reduction of another chunk's partial result into this one.
    pub fn merge_from(&mut self, other: &Self) {
        debug_assert_eq!(self.dimension(), other.dimension());
        self.sum += &other.sum;
        self.count += &other.count;
    }
}

#[derive(Debug)]
struct MergedState {
    accumulator: TrimmedAccumulator,
    bounds: DoubleHeapVector<f64>,
}

/// Collects the partial results posted by chunk workers and implements the
/// barrier the driver waits on between phases.
///
/// Result reduction (`update`, `update_bounds`) and completion signalling
/// (`notify`) are deliberately separate: every dispatched task ticks the
/// counter exactly once, whether or not it posted a partial result, and the
/// driver waits for as many ticks as it dispatched tasks before reading any
/// merged state. Accumulator reduction happens under the state lock in task
/// arrival order, so cross-run floating point reproducibility is only
/// guaranteed with a single worker thread.
#[derive(Debug)]
pub struct ResultsMerger {
    dimension: usize,
    state: Mutex<MergedState>,
    notifications: Mutex<usize>,
    completion: Condvar,
}

impl ResultsMerger {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: Mutex::new(MergedState {
                accumulator: TrimmedAccumulator::zeros(dimension),
                bounds: DoubleHeapVector::new(dimension),
            }),
            notifications: Mutex::new(0),
            completion: Condvar::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Resets the merged accumulator, the merged bounds, and the completion
    /// counter. Called once per inner iteration, before the bounds phase.
    pub fn init(&self) {
        let mut state = self.state.lock().expect("results merger state poisoned");
        state.accumulator = TrimmedAccumulator::zeros(self.dimension);
        state.bounds = DoubleHeapVector::new(self.dimension);
        drop(state);
        self.init_notifications();
    }

    /// Resets only the completion counter, between the two phases of one
    /// inner iteration and before the projection phase.
    pub fn init_notifications(&self) {
        let mut count = self
            .notifications
            .lock()
            .expect("results merger counter poisoned");
        *count = 0;
    }

    /// Reduces one chunk's accumulator into the running total. Does not tick
    /// the completion counter.
    pub fn update(&self, partial: &TrimmedAccumulator) {
        let mut state = self.state.lock().expect("results merger state poisoned");
        state.accumulator.merge_from(partial);
    }

    /// Merges one chunk's bound heaps into the running global bounds. Does
    /// not tick the completion counter.
    pub fn update_bounds(&self, partial: &DoubleHeapVector<f64>) {
        let mut state = self.state.lock().expect("results merger state poisoned");
        state.bounds.merge(partial);
    }

    /// Releases the heap storage once the per-iteration bounds have been
    /// extracted.
    pub fn clear_bounds(&self) {
        let mut state = self.state.lock().expect("results merger state poisoned");
        state.bounds = DoubleHeapVector::new(self.dimension);
    }

    /// One completion tick. Each dispatched task calls this exactly once.
    pub fn notify(&self) {
        let mut count = self
            .notifications
            .lock()
            .expect("results merger counter poisoned");
        *count += 1;
        self.completion.notify_all();
    }

    /// Blocks the caller until `expected` completion ticks have arrived since
    /// the last counter reset.
    pub fn wait_notifications(&self, expected: usize) {
        let mut count = self
            .notifications
            .lock()
            .expect("results merger counter poisoned");
        while *count < expected {
            count = self
                .completion
                .wait(count)
                .expect("results merger counter poisoned");
        }
    }

    /// Snapshot of the merged accumulator. Only meaningful after a
    /// [`wait_notifications`](Self::wait_notifications) barrier.
    pub fn merged_result(&self) -> TrimmedAccumulator {
        let state = self.state.lock().expect("results merger state poisoned");
        state.accumulator.clone()
    }

    /// Per-dimension trimming thresholds extracted from the merged bound
    /// heaps. Only meaningful after a barrier; `(-inf, +inf)` per dimension
    /// when no bounds were posted (K = 0).
    pub fn computed_bounds(&self) -> (Array1<f64>, Array1<f64>) {
        let state = self.state.lock().expect("results merger state poisoned");
        state.bounds.extract_bounds()
    }
}
