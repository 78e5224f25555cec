// Orthonormalization, convergence checking, and candidate initialization.

use crate::error::{GrassmannPcaError, Result};
use ndarray::Array1;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

/// Residual norms at or below this are treated as linear dependence.
pub const MINIMAL_NORM: f64 = 1e-12;

/// Bracket of the bounded uniform initializer: entries are drawn from
/// [very small but still computable, very big but still computable].
const UNIFORM_INIT_LOWER_BOUND: f64 = 1e-10;
const UNIFORM_INIT_UPPER_BOUND: f64 = 1e10;

pub fn norm2(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

/// Orthonormalizes `vectors[fixed_prefix..]` against the (already
/// orthonormal) prefix and against each other, in order.
///
/// A candidate that collapses to a (numerically) zero residual was linearly
/// dependent on the vectors before it; with `fixed_prefix == 0` that is a
/// degenerate initial basis
/// ([`LinearDependenceOnInit`](GrassmannPcaError::LinearDependenceOnInit)),
/// otherwise a failed re-orthonormalization against settled eigenvectors
/// ([`DegenerateDeflation`](GrassmannPcaError::DegenerateDeflation)). The
/// prefix itself is never modified.
pub fn gram_schmidt_orthonormalize(vectors: &mut [Array1<f64>], fixed_prefix: usize) -> Result<()> {
    for target in fixed_prefix..vectors.len() {
        let (settled, remainder) = vectors.split_at_mut(target);
        let candidate = &mut remainder[0];
        for previous in settled.iter() {
            let coefficient = candidate.dot(previous);
            candidate.scaled_add(-coefficient, previous);
        }
        let norm = norm2(candidate);
        if norm <= MINIMAL_NORM {
            return Err(if fixed_prefix == 0 {
                GrassmannPcaError::LinearDependenceOnInit(format!(
                    "candidate {} collapsed to a zero residual",
                    target
                ))
            } else {
                GrassmannPcaError::DegenerateDeflation(format!(
                    "candidate {} collapsed to a zero residual against the {} settled vectors",
                    target, fixed_prefix
                ))
            });
        }
        candidate.mapv_inplace(|x| x / norm);
    }
    Ok(())
}

/// Compares successive iterates of the running estimate against a tolerance.
///
/// Each call replaces the stored previous iterate, so the check always
/// measures one step of the fixed point.
#[derive(Debug)]
pub struct ConvergenceCheck {
    previous: Array1<f64>,
    tolerance: f64,
}

impl ConvergenceCheck {
    pub fn new(initial: &Array1<f64>, tolerance: f64) -> Self {
        Self {
            previous: initial.clone(),
            tolerance,
        }
    }

    /// True when the l2 distance between `current` and the previous iterate
    /// is within the tolerance.
    pub fn converged(&mut self, current: &Array1<f64>) -> bool {
        let difference = &self.previous - current;
        let distance = norm2(&difference);
        self.previous.assign(current);
        distance <= self.tolerance
    }
}

/// Draws a candidate vector with entries from the bounded uniform
/// distribution, to be orthonormalized before use. The RNG is threaded
/// through explicitly so runs are reproducible from a seed.
pub fn random_candidate<R: Rng + ?Sized>(dimension: usize, rng: &mut R) -> Array1<f64> {
    Array1::random_using(
        dimension,
        Uniform::new(UNIFORM_INIT_LOWER_BOUND, UNIFORM_INIT_UPPER_BOUND),
        rng,
    )
}
