//! Error types for t-SNE fitting.

/// Failures raised by [`TSNE`](super::TSNE).
///
/// Public operations return `anyhow::Result`; the concrete kind can be recovered with
/// `err.downcast_ref::<TsneError>()`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TsneError {
    #[error("t-SNE needs at least two observations, got {0}")]
    TooFewObservations(usize),

    #[error("perplexity must be positive and below n_obs / 3 (n_obs = {n_obs}), got {perplexity}")]
    InvalidPerplexity { perplexity: f64, n_obs: usize },

    #[error("number of iterations must be at least 1")]
    InvalidIterations,

    #[error("output dimensionality must be at least 1")]
    InvalidOutputDimensions,

    #[error("learning rate must be positive and finite, got {0}")]
    InvalidLearningRate(f64),

    #[error("initial embedding has shape {got:?}, expected {expected_rows} rows and at least one column")]
    InitialEmbeddingShape {
        expected_rows: usize,
        got: (usize, usize),
    },

    #[error("parameter `{name}` has invalid value {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("pairwise squared distances overflow the element type; rescale the input")]
    DistanceOverflow,

    #[error("input contains non-finite values")]
    NonFiniteInput,

    #[error("embedding diverged: non-finite values at iteration {iteration}")]
    NumericalInstability { iteration: usize },
}

impl TsneError {
    /// Whether the error was raised by argument validation, before any computation began.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, TsneError::NumericalInstability { .. })
    }
}
