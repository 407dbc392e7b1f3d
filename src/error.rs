//! Error types for the MIS pipeline

use thiserror::Error;

/// Errors raised while generating or scoring psychophysics tasks.
///
/// All variants are structural (bad sizes, shapes or names). Nothing here is
/// transient, so callers should propagate rather than retry.
#[derive(Debug, Error)]
pub enum MisError {
    /// The quantile pool cannot supply `K+1` distinct samples per task.
    #[error(
        "quantile pool of {pool} samples cannot supply {required} distinct draws \
         (n_samples={n_samples}, quantile={quantile})"
    )]
    InsufficientPoolSize {
        pool: usize,
        required: usize,
        n_samples: usize,
        quantile: f64,
    },

    /// Tensor dimensions disagree at a stage boundary.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Unknown similarity backend name.
    #[error("unknown similarity metric '{name}' (expected one of: lpips, dreamsim)")]
    InvalidMetric { name: String },

    /// Out-of-range K, N, quantile or alpha.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MisError {
    pub(crate) fn shape(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, MisError>;
