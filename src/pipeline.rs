//! Task generation and scoring entry points
//!
//! ```text
//! activations -> sample_subsets -> rank_subsets -> materialize -> score_all
//! ```

use candle_core::Tensor;
use rand::Rng;
use tracing::info;

use crate::error::{MisError, Result};
use crate::experiment::MisConfig;
use crate::materialize::{materialize, ExplanationSet, QuerySet};
use crate::ranker::rank_subsets;
use crate::sampler::sample_subsets;
use crate::scorer::score_all;
use crate::similarity::Similarity;

/// Generate queries and explanation sets for every psychophysics task.
///
/// # Arguments
/// * `representations` - preprocessed sample pool, `(n_samples, *I_dim)`
/// * `activations` - `(n_units, n_samples)`
/// * `k` - explanation set size
/// * `n_tasks` - tasks per unit (`N`)
/// * `quantile` - pool fraction in `(0, 1]`
/// * `sort_order` - optional precomputed ascending activation order
/// * `rng` - random source for subset draws
///
/// # Returns
/// `(query_set, explanation_set)`: sides of shape `(n_units, N, *I_dim)` and
/// `(n_units, N, K, *I_dim)`
pub fn generate_tasks<R: Rng + ?Sized>(
    representations: &Tensor,
    activations: &Tensor,
    k: usize,
    n_tasks: usize,
    quantile: f64,
    sort_order: Option<&Tensor>,
    rng: &mut R,
) -> Result<(QuerySet, ExplanationSet)> {
    let (_, n_samples) = activations.dims2()?;
    let n_repr = representations.dim(0)?;
    if n_repr != n_samples {
        return Err(MisError::shape(
            "representations vs activations sample axis",
            &[n_samples],
            &[n_repr],
        ));
    }

    let sampled = sample_subsets(activations, k, n_tasks, quantile, sort_order, rng)?;
    let ranked = rank_subsets(&sampled, activations)?;
    materialize(representations, &ranked, k)
}

/// Generate tasks and score every unit with the given configuration.
pub fn run<S, R>(
    representations: &Tensor,
    activations: &Tensor,
    similarity: &S,
    config: &MisConfig,
    rng: &mut R,
) -> Result<Vec<f64>>
where
    S: Similarity + ?Sized,
    R: Rng + ?Sized,
{
    run_with_order(representations, activations, None, similarity, config, rng)
}

/// [`run`] with an optional precomputed sort order.
pub fn run_with_order<S, R>(
    representations: &Tensor,
    activations: &Tensor,
    sort_order: Option<&Tensor>,
    similarity: &S,
    config: &MisConfig,
    rng: &mut R,
) -> Result<Vec<f64>>
where
    S: Similarity + ?Sized,
    R: Rng + ?Sized,
{
    config.validate()?;
    let (n_units, n_samples) = activations.dims2()?;
    info!(
        "Generating {} tasks for {} units over {} samples (K={}, quantile={})",
        config.n_tasks, n_units, n_samples, config.k, config.quantile
    );

    let (query_set, explanation_set) = generate_tasks(
        representations,
        activations,
        config.k,
        config.n_tasks,
        config.quantile,
        sort_order,
        rng,
    )?;

    score_all(&query_set, &explanation_set, similarity, config.alpha)
}
