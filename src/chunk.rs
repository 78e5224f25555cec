// Per-chunk phase work: trimming bounds, masked accumulation, deflation.

use crate::bounds::DoubleHeapVector;
use crate::merger::{ResultsMerger, TrimmedAccumulator};
use ndarray::Array1;

/// Owns one contiguous slice of the working data set and runs the three
/// per-iteration phases on it.
///
/// Chunks partition the data, so each worker mutates only rows it owns;
/// the merger is the sole shared sink. Every phase method ends with exactly
/// one completion tick, whether or not a partial result was posted.
#[derive(Debug)]
pub struct ChunkWorker {
    rows: Vec<Array1<f64>>,
    /// Sign of `<x_s, mu>` recorded by the bounds phase, so the accumulation
    /// phase aligns each sample exactly the way the bounds were computed.
    sign_cache: Vec<bool>,
    /// Per-side trim count K. Zero disables the bounds phase entirely.
    keep_count: usize,
}

impl ChunkWorker {
    pub fn new(rows: Vec<Array1<f64>>, keep_count: usize) -> Self {
        let sign_cache = vec![false; rows.len()];
        Self {
            rows,
            sign_cache,
            keep_count,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Releases the chunk's rows for reassembly of the projected data set.
    pub fn into_rows(self) -> Vec<Array1<f64>> {
        self.rows
    }

    /// Bounds phase. Seeds the first `min(K, len)` sign-aligned samples
    /// unconditionally so the conditional comparator always has a top to look
    /// at, then applies the pop-push rule, and posts the chunk-local heaps to
    /// the merger. With K = 0 only the completion tick is emitted.
    pub fn compute_bounds(&mut self, mu: &Array1<f64>, merger: &ResultsMerger) {
        if self.keep_count > 0 {
            let mut bounds_op = DoubleHeapVector::new(mu.len());
            for (index, row) in self.rows.iter().enumerate() {
                let sign = row.dot(mu) >= 0.0;
                self.sign_cache[index] = sign;
                if index < self.keep_count {
                    bounds_op.push(row.view(), sign);
                } else {
                    bounds_op.push_or_ignore(row.view(), sign);
                }
            }
            merger.update_bounds(&bounds_op);
        }
        merger.notify();
    }

    /// Accumulation phase. Re-scans the chunk with the globally merged
    /// bounds, summing and counting the sign-aligned coordinates that fall
    /// inside `[min_bounds[d], max_bounds[d]]`. Signs come from the cache
    /// written by the bounds phase; with K = 0 there was no bounds pass, so
    /// the inner products are recomputed here.
    pub fn accumulate(
        &self,
        mu: &Array1<f64>,
        min_bounds: &Array1<f64>,
        max_bounds: &Array1<f64>,
        merger: &ResultsMerger,
    ) {
        let mut accumulator = TrimmedAccumulator::zeros(mu.len());
        for (index, row) in self.rows.iter().enumerate() {
            let sign = if self.keep_count == 0 {
                row.dot(mu) >= 0.0
            } else {
                self.sign_cache[index]
            };
            accumulate_in_range(row, sign, min_bounds, max_bounds, &mut accumulator);
        }
        merger.update(&accumulator);
        merger.notify();
    }

    /// Projection phase: removes the component of every owned row along the
    /// unit vector `w`, in place.
    pub fn project_onto_orthogonal_subspace(&mut self, w: &Array1<f64>, merger: &ResultsMerger) {
        for row in &mut self.rows {
            let coefficient = row.dot(w);
            row.scaled_add(-coefficient, w);
        }
        merger.notify();
    }
}

/// Adds the in-range coordinates of one sign-aligned sample to the
/// accumulator.
fn accumulate_in_range(
    row: &Array1<f64>,
    sign: bool,
    min_bounds: &Array1<f64>,
    max_bounds: &Array1<f64>,
    accumulator: &mut TrimmedAccumulator,
) {
    for (d, &x) in row.iter().enumerate() {
        let v = if sign { x } else { -x };
        if v < min_bounds[d] || v > max_bounds[d] {
            continue;
        }
        accumulator.sum[d] += v;
        accumulator.count[d] += 1;
    }
}
