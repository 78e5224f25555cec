// Trimmed Grassmann average PCA: outer deflation loop and inner fixed point.

use crate::chunk::ChunkWorker;
use crate::error::{GrassmannPcaError, Result};
use crate::merger::ResultsMerger;
use crate::ortho::{self, ConvergenceCheck};
use crate::pool::WorkerPool;
use log::{debug, info, trace, warn};
use ndarray::{Array1, Array2, ArrayView2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex};

/// Tuning knobs of the trimmed averaging engine.
#[derive(Clone, Debug)]
pub struct TrimmedGrassmannConfig {
    /// Fraction of the data trimmed per axis per iteration, in [0, 1]. The
    /// trimming is symmetric: alpha/2 is discarded from each tail of the
    /// sign-aligned distribution.
    pub trimming_fraction: f64,
    /// Number of OS threads in the worker pool.
    pub worker_count: usize,
    /// Upper limit on the number of samples per chunk. Smaller chunks give
    /// finer scheduling granularity at a small synchronization cost.
    pub max_chunk_size: usize,
    /// l2 distance between successive estimates below which the inner fixed
    /// point is considered converged.
    pub convergence_tolerance: f64,
    /// Seed for the candidate initializer when no initial guess is supplied.
    pub random_seed: u64,
}

impl Default for TrimmedGrassmannConfig {
    fn default() -> Self {
        Self {
            trimming_fraction: 0.0,
            worker_count: 1,
            max_chunk_size: usize::MAX,
            convergence_tolerance: 1e-9,
            random_seed: 2014,
        }
    }
}

impl TrimmedGrassmannConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.trimming_fraction) {
            return Err(GrassmannPcaError::InvalidConfig(format!(
                "trimming fraction must lie in [0, 1], got {}",
                self.trimming_fraction
            )));
        }
        if self.worker_count == 0 {
            return Err(GrassmannPcaError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.max_chunk_size == 0 {
            return Err(GrassmannPcaError::InvalidConfig(
                "maximum chunk size must be at least 1".to_string(),
            ));
        }
        if self.convergence_tolerance.is_nan() || self.convergence_tolerance < 0.0 {
            return Err(GrassmannPcaError::InvalidConfig(format!(
                "convergence tolerance must be non-negative, got {}",
                self.convergence_tolerance
            )));
        }
        Ok(())
    }
}

/// Result of one `batch_process` run.
#[derive(Debug)]
pub struct TrimmedPcaOutput {
    /// Extracted orthonormal eigenvectors as columns, shape
    /// `(dimension, components)`.
    pub eigenvectors: Array2<f64>,
    /// The working copy of the data after all deflations, shape
    /// `(samples, dimension)`. Useful for diagnostics; callers that only
    /// need the basis can discard it.
    pub projected_data: Array2<f64>,
    pub num_samples_used: usize,
    pub num_dimensions: usize,
    pub num_components_computed: usize,
}

/// Robust PCA via Grassmann averaging with symmetric trimming
/// (Hauberg et al.).
///
/// Per extracted component the engine iterates a fixed point in two
/// barrier-separated phases: every chunk worker first computes per-dimension
/// trimming thresholds over the sign-aligned samples with a pair of bounded
/// heaps, the merged global thresholds are then published, and a second pass
/// sums and counts only the in-range coordinates. The normalized masked mean
/// becomes the next estimate. After convergence the data is deflated against
/// the accepted eigenvector and the next candidate is prepared while the
/// deflation is still in flight.
#[derive(Clone, Debug)]
pub struct TrimmedGrassmannPca {
    config: TrimmedGrassmannConfig,
}

impl TrimmedGrassmannPca {
    /// Creates an engine with the given trimming fraction and default
    /// configuration otherwise.
    pub fn new(trimming_fraction: f64) -> Result<Self> {
        Self::with_config(TrimmedGrassmannConfig {
            trimming_fraction,
            ..TrimmedGrassmannConfig::default()
        })
    }

    /// Creates an engine from a full configuration.
    pub fn with_config(config: TrimmedGrassmannConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrimmedGrassmannConfig {
        &self.config
    }

    /// Sets the number of pool threads. Rejects 0.
    pub fn set_worker_count(&mut self, worker_count: usize) -> Result<()> {
        if worker_count == 0 {
            return Err(GrassmannPcaError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        self.config.worker_count = worker_count;
        Ok(())
    }

    /// Sets the maximum chunk size. Rejects 0.
    pub fn set_max_chunk_size(&mut self, max_chunk_size: usize) -> Result<()> {
        if max_chunk_size == 0 {
            return Err(GrassmannPcaError::InvalidConfig(
                "maximum chunk size must be at least 1".to_string(),
            ));
        }
        self.config.max_chunk_size = max_chunk_size;
        Ok(())
    }

    pub fn set_convergence_tolerance(&mut self, tolerance: f64) -> Result<()> {
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(GrassmannPcaError::InvalidConfig(format!(
                "convergence tolerance must be non-negative, got {}",
                tolerance
            )));
        }
        self.config.convergence_tolerance = tolerance;
        Ok(())
    }

    pub fn set_random_seed(&mut self, seed: u64) {
        self.config.random_seed = seed;
    }

    /// Computes up to `num_components` robust principal directions of `data`
    /// (samples are rows).
    ///
    /// The input is copied into a working set that is deflated in place as
    /// components are extracted; the residual is returned alongside the
    /// basis. `num_components` is clamped to the data dimension. The inner
    /// fixed point runs at least once and at most `max_iterations` times per
    /// component. When `initial_guess` is given it must provide one vector of
    /// matching dimension per requested component; otherwise candidates are
    /// drawn from the seeded bounded uniform initializer.
    ///
    /// # Errors
    ///
    /// [`EmptyInput`](GrassmannPcaError::EmptyInput) for an empty data set,
    /// [`InvalidConfig`](GrassmannPcaError::InvalidConfig) for a malformed
    /// guess or full trimming of more than one sample,
    /// [`LinearDependenceOnInit`](GrassmannPcaError::LinearDependenceOnInit)
    /// / [`DegenerateDeflation`](GrassmannPcaError::DegenerateDeflation) for
    /// Gram-Schmidt failures, and
    /// [`EmptyBin`](GrassmannPcaError::EmptyBin) when trimming leaves an
    /// axis without samples.
    pub fn batch_process(
        &self,
        max_iterations: usize,
        num_components: usize,
        data: ArrayView2<'_, f64>,
        initial_guess: Option<&[Array1<f64>]>,
    ) -> Result<TrimmedPcaOutput> {
        let num_samples = data.nrows();
        let dimension = data.ncols();
        if num_samples == 0 || dimension == 0 {
            return Err(GrassmannPcaError::EmptyInput);
        }

        let num_components_clamped = num_components.min(dimension);
        if num_components_clamped < num_components {
            warn!(
                "requested {} components, clamped to the data dimension {}",
                num_components, dimension
            );
        }
        if num_components_clamped == 0 {
            return Ok(TrimmedPcaOutput {
                eigenvectors: Array2::zeros((dimension, 0)),
                projected_data: data.to_owned(),
                num_samples_used: num_samples,
                num_dimensions: dimension,
                num_components_computed: 0,
            });
        }

        if self.config.trimming_fraction >= 1.0 && num_samples > 1 {
            // The central band is empty by construction; the N >= 1/(1-alpha)
            // precondition cannot hold.
            return Err(GrassmannPcaError::InvalidConfig(
                "a trimming fraction of 1 leaves no samples to average".to_string(),
            ));
        }

        let keep_count =
            ((self.config.trimming_fraction * num_samples as f64) / 2.0).ceil() as usize;

        let worker_count = self.config.worker_count;
        let mut chunk_size = self
            .config
            .max_chunk_size
            .min((num_samples + worker_count - 1) / worker_count)
            .max(1);
        if chunk_size < keep_count {
            // The merge rule can top up undersized heaps, but a chunk at
            // least K wide keeps the K-fill invariant local.
            chunk_size = keep_count.min(num_samples);
            debug!(
                "chunk size raised to the per-side trim count {}",
                chunk_size
            );
        }
        let num_chunks = (num_samples + chunk_size - 1) / chunk_size;

        info!(
            "trimmed Grassmann PCA: {} samples x {} dimensions, {} components, \
             alpha={}, K={}, {} workers, {} chunks of <= {}",
            num_samples,
            dimension,
            num_components_clamped,
            self.config.trimming_fraction,
            keep_count,
            worker_count,
            num_chunks,
            chunk_size
        );
        let start_time = std::time::Instant::now();

        // Working copy of the input, split into disjointly owned chunks.
        let mut chunk_workers = Vec::with_capacity(num_chunks);
        let mut begin = 0;
        while begin < num_samples {
            let end = (begin + chunk_size).min(num_samples);
            let rows: Vec<Array1<f64>> = (begin..end).map(|i| data.row(i).to_owned()).collect();
            chunk_workers.push(Mutex::new(ChunkWorker::new(rows, keep_count)));
            begin = end;
        }
        let chunks = Arc::new(chunk_workers);

        let mut basis = self.initialize_basis(num_components_clamped, dimension, initial_guess)?;
        ortho::gram_schmidt_orthonormalize(&mut basis, 0)?;
        let mut mu = basis[0].clone();

        let merger = Arc::new(ResultsMerger::new(dimension));
        let pool = WorkerPool::new(worker_count)?;

        for current_component in 0..num_components_clamped {
            let mut convergence =
                ConvergenceCheck::new(&mu, self.config.convergence_tolerance);
            let mut iterations = 0usize;
            loop {
                merger.init();
                let mu_shared = Arc::new(mu.clone());
                dispatch_bounds(&pool, &chunks, &merger, &mu_shared);
                merger.wait_notifications(num_chunks);

                let (min_bounds, max_bounds) = merger.computed_bounds();
                merger.clear_bounds();
                merger.init_notifications();

                let min_bounds = Arc::new(min_bounds);
                let max_bounds = Arc::new(max_bounds);
                dispatch_accumulation(&pool, &chunks, &merger, &mu_shared, &min_bounds, &max_bounds);
                merger.wait_notifications(num_chunks);

                let accumulated = merger.merged_result();
                for d in 0..dimension {
                    if accumulated.count[d] == 0 {
                        return Err(GrassmannPcaError::EmptyBin { axis: d });
                    }
                    mu[d] = accumulated.sum[d] / accumulated.count[d] as f64;
                }
                let norm = ortho::norm2(&mu);
                if norm <= ortho::MINIMAL_NORM {
                    return Err(GrassmannPcaError::DegenerateDeflation(
                        "trimmed mean collapsed to the zero vector".to_string(),
                    ));
                }
                mu.mapv_inplace(|x| x / norm);

                iterations += 1;
                if convergence.converged(&mu) || iterations >= max_iterations {
                    break;
                }
            }
            trace!(
                "component {} fixed point finished after {} iterations",
                current_component,
                iterations
            );

            // Orthogonalize the converged estimate against the settled
            // prefix. This runs after the fixed point, matching the
            // reference behavior.
            for previous in &basis[..current_component] {
                let coefficient = mu.dot(previous);
                mu.scaled_add(-coefficient, previous);
            }
            let norm = ortho::norm2(&mu);
            if norm <= ortho::MINIMAL_NORM {
                return Err(GrassmannPcaError::DegenerateDeflation(format!(
                    "component {} is linearly dependent on the settled basis",
                    current_component
                )));
            }
            mu.mapv_inplace(|x| x / norm);
            basis[current_component].assign(&mu);
            debug!(
                "extracted component {} after {} iterations",
                current_component, iterations
            );

            if current_component + 1 < num_components_clamped {
                // Deflate the data against the accepted eigenvector while the
                // driver prepares the next candidate; the wait below must
                // precede any read of the projected data.
                merger.init_notifications();
                let w = Arc::new(basis[current_component].clone());
                dispatch_projection(&pool, &chunks, &merger, &w);

                ortho::gram_schmidt_orthonormalize(&mut basis, current_component + 1)?;
                mu = basis[current_component + 1].clone();

                merger.wait_notifications(num_chunks);
            }
        }

        drop(pool);
        let chunk_workers =
            Arc::try_unwrap(chunks).expect("worker pool released its chunk references");

        let mut projected_data = Array2::zeros((num_samples, dimension));
        let mut row_index = 0;
        for worker in chunk_workers {
            let worker = worker.into_inner().expect("chunk worker mutex poisoned");
            for row in worker.into_rows() {
                projected_data.row_mut(row_index).assign(&row);
                row_index += 1;
            }
        }

        let mut eigenvectors = Array2::zeros((dimension, num_components_clamped));
        for (index, vector) in basis.iter().enumerate() {
            eigenvectors.column_mut(index).assign(vector);
        }

        info!(
            "trimmed Grassmann PCA finished: {} components in {:?}",
            num_components_clamped,
            start_time.elapsed()
        );

        Ok(TrimmedPcaOutput {
            eigenvectors,
            projected_data,
            num_samples_used: num_samples,
            num_dimensions: dimension,
            num_components_computed: num_components_clamped,
        })
    }

    fn initialize_basis(
        &self,
        num_components: usize,
        dimension: usize,
        initial_guess: Option<&[Array1<f64>]>,
    ) -> Result<Vec<Array1<f64>>> {
        match initial_guess {
            Some(guess) => {
                if guess.len() < num_components {
                    return Err(GrassmannPcaError::InvalidConfig(format!(
                        "initial guess provides {} vectors but {} components were requested",
                        guess.len(),
                        num_components
                    )));
                }
                if let Some(bad) = guess[..num_components]
                    .iter()
                    .find(|v| v.len() != dimension)
                {
                    return Err(GrassmannPcaError::InvalidConfig(format!(
                        "initial guess vector of dimension {} does not match the data dimension {}",
                        bad.len(),
                        dimension
                    )));
                }
                Ok(guess[..num_components].to_vec())
            }
            None => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.config.random_seed);
                Ok((0..num_components)
                    .map(|_| ortho::random_candidate(dimension, &mut rng))
                    .collect())
            }
        }
    }
}

fn dispatch_bounds(
    pool: &WorkerPool,
    chunks: &Arc<Vec<Mutex<ChunkWorker>>>,
    merger: &Arc<ResultsMerger>,
    mu: &Arc<Array1<f64>>,
) {
    for chunk_index in 0..chunks.len() {
        let chunks = Arc::clone(chunks);
        let merger = Arc::clone(merger);
        let mu = Arc::clone(mu);
        pool.execute(move || {
            let mut chunk = chunks[chunk_index]
                .lock()
                .expect("chunk worker mutex poisoned");
            chunk.compute_bounds(&mu, &merger);
        });
    }
}

fn dispatch_accumulation(
    pool: &WorkerPool,
    chunks: &Arc<Vec<Mutex<ChunkWorker>>>,
    merger: &Arc<ResultsMerger>,
    mu: &Arc<Array1<f64>>,
    min_bounds: &Arc<Array1<f64>>,
    max_bounds: &Arc<Array1<f64>>,
) {
    for chunk_index in 0..chunks.len() {
        let chunks = Arc::clone(chunks);
        let merger = Arc::clone(merger);
        let mu = Arc::clone(mu);
        let min_bounds = Arc::clone(min_bounds);
        let max_bounds = Arc::clone(max_bounds);
        pool.execute(move || {
            let chunk = chunks[chunk_index]
                .lock()
                .expect("chunk worker mutex poisoned");
            chunk.accumulate(&mu, &min_bounds, &max_bounds, &merger);
        });
    }
}

fn dispatch_projection(
    pool: &WorkerPool,
    chunks: &Arc<Vec<Mutex<ChunkWorker>>>,
    merger: &Arc<ResultsMerger>,
    w: &Arc<Array1<f64>>,
) {
    for chunk_index in 0..chunks.len() {
        let chunks = Arc::clone(chunks);
        let merger = Arc::clone(merger);
        let w = Arc::clone(w);
        pool.execute(move || {
            let mut chunk = chunks[chunk_index]
                .lock()
                .expect("chunk worker mutex poisoned");
            chunk.project_onto_orthogonal_subspace(&w, &merger);
        });
    }
}
