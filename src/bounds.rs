// Symmetric trimming bounds via paired bounded heaps.

use ndarray::{Array1, ArrayView1};
use num_traits::Float;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Total-order adapter for floating point heap entries. NaN never enters the
/// heaps (inputs are finite data coordinates), so ties-on-incomparable is an
/// acceptable resolution.
#[derive(Clone, Copy, Debug, PartialEq)]
struct HeapScalar<T: Float>(T);

impl<T: Float> Eq for HeapScalar<T> {}

impl<T: Float> PartialOrd for HeapScalar<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Float> Ord for HeapScalar<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// Maintains the K smallest and K largest values of a scalar stream.
///
/// `lo` is a max-heap over the smallest values seen, so its top is the K-th
/// smallest overall; `hi` is a min-heap over the largest values, so its top
/// is the K-th largest. K itself is managed by the caller: the first K items
/// of a stream go through [`push`](Self::push), everything after through
/// [`push_or_ignore`](Self::push_or_ignore).
///
/// `lo.max` is monotonically non-increasing over a stream and `hi.min`
/// monotonically non-decreasing; the two tops are the symmetric trimming
/// thresholds extracted by [`extract_bounds`](Self::extract_bounds).
#[derive(Clone, Debug, Default)]
pub struct BoundedDoubleHeap<T: Float> {
    lo: BinaryHeap<HeapScalar<T>>,
    hi: BinaryHeap<Reverse<HeapScalar<T>>>,
}

impl<T: Float> BoundedDoubleHeap<T> {
    pub fn new() -> Self {
        Self {
            lo: BinaryHeap::new(),
            hi: BinaryHeap::new(),
        }
    }

    /// Number of values currently retained on each side.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.lo.len(), self.hi.len());
        self.lo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lo.is_empty()
    }

    /// Unconditional push used to seed the first K items of a stream. Both
    /// sides grow by one.
    pub fn push(&mut self, value: T) {
        self.lo.push(HeapScalar(value));
        self.hi.push(Reverse(HeapScalar(value)));
    }

    /// Conditional push used after the K-fill phase. If `value` is below the
    /// current K-th smallest it replaces it; symmetrically for the K-th
    /// largest. Otherwise the value is dropped. Sizes are unchanged.
    ///
    /// Must not be called on an empty heap side: the comparison needs a top
    /// to look at, which the K-fill phase establishes.
    pub fn push_or_ignore(&mut self, value: T) {
        debug_assert!(
            !self.lo.is_empty(),
            "push_or_ignore called before the K-fill phase seeded the low heap"
        );
        debug_assert!(
            !self.hi.is_empty(),
            "push_or_ignore called before the K-fill phase seeded the high heap"
        );
        if let Some(&HeapScalar(lo_max)) = self.lo.peek() {
            if value < lo_max {
                self.lo.push(HeapScalar(value));
                self.lo.pop();
            }
        }
        if let Some(&Reverse(HeapScalar(hi_min))) = self.hi.peek() {
            if value > hi_min {
                self.hi.push(Reverse(HeapScalar(value)));
                self.hi.pop();
            }
        }
    }

    /// Combines the retained values of two heaps built over disjoint streams.
    ///
    /// The result holds the K smallest of `lo ∪ other.lo` and the K largest
    /// of `hi ∪ other.hi`, where K is the larger of the two sides' sizes. A
    /// side that absorbed fewer than K items (a chunk smaller than K) is
    /// topped up from the other heap before the conditional rule applies, so
    /// merging never loses candidates.
    pub fn merge(&mut self, other: &Self) {
        let target = self.lo.len().max(other.lo.len());
        debug_assert_eq!(self.hi.len().max(other.hi.len()), target);

        for &HeapScalar(value) in other.lo.iter() {
            if self.lo.len() < target {
                self.lo.push(HeapScalar(value));
            } else if let Some(&HeapScalar(lo_max)) = self.lo.peek() {
                if value < lo_max {
                    self.lo.push(HeapScalar(value));
                    self.lo.pop();
                }
            }
        }

        for &Reverse(HeapScalar(value)) in other.hi.iter() {
            if self.hi.len() < target {
                self.hi.push(Reverse(HeapScalar(value)));
            } else if let Some(&Reverse(HeapScalar(hi_min))) = self.hi.peek() {
                if value > hi_min {
                    self.hi.push(Reverse(HeapScalar(value)));
                    self.hi.pop();
                }
            }
        }
    }

    /// Lower and upper trimming thresholds, `(-inf, +inf)` when nothing has
    /// been retained (K = 0).
    pub fn extract_bounds(&self) -> (T, T) {
        let min_bound = self
            .lo
            .peek()
            .map_or_else(T::neg_infinity, |&HeapScalar(v)| v);
        let max_bound = self
            .hi
            .peek()
            .map_or_else(T::infinity, |&Reverse(HeapScalar(v))| v);
        (min_bound, max_bound)
    }

    /// Empties both sides; allocated capacity is retained.
    pub fn clear(&mut self) {
        self.lo.clear();
        self.hi.clear();
    }
}

/// One [`BoundedDoubleHeap`] per data dimension, advanced in lockstep.
///
/// The bulk operations apply the sign-aligned projection: when `sign` is
/// false every coordinate is negated before it reaches its heap, so the
/// trimming thresholds are computed over `sign(<x, mu>) * x`.
#[derive(Clone, Debug)]
pub struct DoubleHeapVector<T: Float> {
    heaps: Vec<BoundedDoubleHeap<T>>,
}

impl<T: Float> DoubleHeapVector<T> {
    pub fn new(dimension: usize) -> Self {
        Self {
            heaps: vec![BoundedDoubleHeap::new(); dimension],
        }
    }

    pub fn dimension(&self) -> usize {
        self.heaps.len()
    }

    /// True when no value has been retained in any component heap.
    pub fn is_empty(&self) -> bool {
        self.heaps.iter().all(BoundedDoubleHeap::is_empty)
    }

    pub fn push(&mut self, data: ArrayView1<T>, sign: bool) {
        debug_assert_eq!(data.len(), self.heaps.len());
        for (heap, &x) in self.heaps.iter_mut().zip(data.iter()) {
            heap.push(if sign { x } else { -x });
        }
    }

    pub fn push_or_ignore(&mut self, data: ArrayView1<T>, sign: bool) {
        debug_assert_eq!(data.len(), self.heaps.len());
        for (heap, &x) in self.heaps.iter_mut().zip(data.iter()) {
            heap.push_or_ignore(if sign { x } else { -x });
        }
    }

    /// Pairwise merge of the component heaps. Dimensions must match.
    pub fn merge(&mut self, other: &Self) {
        assert_eq!(
            self.heaps.len(),
            other.heaps.len(),
            "cannot merge double-heap vectors of dimensions {} and {}",
            self.heaps.len(),
            other.heaps.len()
        );
        for (heap, other_heap) in self.heaps.iter_mut().zip(other.heaps.iter()) {
            heap.merge(other_heap);
        }
    }

    /// Per-dimension `(min_bound, max_bound)` trimming thresholds.
    pub fn extract_bounds(&self) -> (Array1<T>, Array1<T>) {
        let mut min_bounds = Vec::with_capacity(self.heaps.len());
        let mut max_bounds = Vec::with_capacity(self.heaps.len());
        for heap in &self.heaps {
            let (lo, hi) = heap.extract_bounds();
            min_bounds.push(lo);
            max_bounds.push(hi);
        }
        (Array1::from(min_bounds), Array1::from(max_bounds))
    }

    pub fn clear(&mut self) {
        for heap in &mut self.heaps {
            heap.clear();
        }
    }
}
