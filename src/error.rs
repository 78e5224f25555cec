use thiserror::Error;

/// Result type for grassmann-pca operations.
pub type Result<T> = std::result::Result<T, GrassmannPcaError>;

/// Errors surfaced by the trimmed Grassmann averaging engine.
#[derive(Debug, Error)]
pub enum GrassmannPcaError {
    /// The input data set contains no vectors.
    #[error("input data set is empty")]
    EmptyInput,

    /// A configuration value was rejected (trimming fraction outside [0, 1],
    /// zero worker count, zero chunk size, mismatched initial guess, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Gram-Schmidt of the initial basis produced a zero vector. The caller
    /// may retry with a different guess or seed.
    #[error("Gram-Schmidt orthonormalization of the initial basis failed: {0}")]
    LinearDependenceOnInit(String),

    /// Gram-Schmidt against the fixed prefix failed while preparing the next
    /// candidate during deflation.
    #[error("degenerate deflation: {0}")]
    DegenerateDeflation(String),

    /// Every sample was trimmed away on one axis during accumulation, so no
    /// mean can be formed there. With a trimming fraction below 1 and
    /// N >= 1/(1 - alpha) samples this cannot happen.
    #[error("every sample was trimmed on axis {axis}; lower the trimming fraction or provide more data")]
    EmptyBin { axis: usize },

    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}
