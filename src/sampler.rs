//! Quantile-restricted subset sampling
//!
//! Draws, for every unit and every task, `K+1` distinct sample indices from
//! the unit's top (highest-activation) and bottom (lowest-activation) pools.
//!
//! ## Pools
//!
//! With `subset_length = ceil(n_samples * quantile)`:
//! - bottom pool: the first `subset_length` entries of the ascending sort order
//! - top pool: the last `subset_length` entries, reversed (descending activation)
//!
//! With `quantile == 1` both pools are the whole dataset and no sort is done.
//!
//! ## Randomness
//!
//! The generator is supplied by the caller. Draw order is fixed: every top
//! task of every unit, then every bottom task, one
//! [`rand::seq::index::sample`] call per task. Seeding the generator once
//! therefore reproduces the whole run.

use candle_core::{DType, Tensor};
use rand::seq::index;
use rand::Rng;
use tracing::info;

use crate::error::{MisError, Result};

/// Sampled (or ranked) task indices for both polarities.
///
/// `top` and `bottom` are `U32` tensors of shape `(n_units, N, K+1)`.
#[derive(Debug, Clone)]
pub struct TaskIndices {
    pub top: Tensor,
    pub bottom: Tensor,
}

impl TaskIndices {
    pub fn n_units(&self) -> usize {
        self.top.dims()[0]
    }

    pub fn n_tasks(&self) -> usize {
        self.top.dims()[1]
    }

    /// Size of the explanation set (one less than the subset length)
    pub fn k(&self) -> usize {
        self.top.dims()[2] - 1
    }
}

/// Number of candidates in a quantile pool: `ceil(n_samples * quantile)`
pub fn pool_size(n_samples: usize, quantile: f64) -> usize {
    (n_samples as f64 * quantile).ceil() as usize
}

/// Ascending per-unit sort order of an `(n_units, n_samples)` activation matrix.
///
/// Returns `U32` indices of the same shape. Equal activations keep index order
/// (stable sort), so the order is reproducible across backends. Values are
/// compared in F64 so F64 inputs keep their full precision.
pub fn activation_sort_order(activations: &Tensor) -> Result<Tensor> {
    let (n_units, n_samples) = activations.dims2()?;
    let rows: Vec<Vec<f64>> = activations.to_dtype(DType::F64)?.to_vec2()?;

    let mut order = Vec::with_capacity(n_units * n_samples);
    for row in &rows {
        let mut idx: Vec<u32> = (0..n_samples as u32).collect();
        idx.sort_by(|&a, &b| row[a as usize].total_cmp(&row[b as usize]));
        order.extend(idx);
    }

    Ok(Tensor::from_vec(
        order,
        (n_units, n_samples),
        activations.device(),
    )?)
}

/// Check that every row of a precomputed order is a permutation of `0..n_samples`.
fn validate_sort_order(order: &Tensor, n_samples: usize) -> Result<()> {
    let rows: Vec<Vec<u32>> = order.to_vec2()?;
    let mut seen = vec![false; n_samples];
    for (unit, row) in rows.iter().enumerate() {
        seen.fill(false);
        for &i in row {
            let i = i as usize;
            if i >= n_samples {
                return Err(MisError::InvalidParameter(format!(
                    "sort order of unit {unit} holds index {i}, expected < {n_samples}"
                )));
            }
            if seen[i] {
                return Err(MisError::InvalidParameter(format!(
                    "sort order of unit {unit} repeats index {i}"
                )));
            }
            seen[i] = true;
        }
    }
    Ok(())
}

pub(crate) fn validate_params(k: usize, n_tasks: usize, quantile: f64) -> Result<()> {
    if k == 0 {
        return Err(MisError::InvalidParameter(
            "K must be at least 1".to_string(),
        ));
    }
    if n_tasks == 0 {
        return Err(MisError::InvalidParameter(
            "N must be at least 1".to_string(),
        ));
    }
    if !(quantile > 0.0 && quantile <= 1.0) {
        return Err(MisError::InvalidParameter(format!(
            "quantile must lie in (0, 1], got {quantile}"
        )));
    }
    Ok(())
}

/// Draw `K+1` distinct positions in `0..pool_len` for each of `n_draws` tasks.
fn draw_positions<R: Rng + ?Sized>(
    rng: &mut R,
    n_draws: usize,
    pool_len: usize,
    amount: usize,
) -> Vec<u32> {
    let mut positions = Vec::with_capacity(n_draws * amount);
    for _ in 0..n_draws {
        positions.extend(
            index::sample(rng, pool_len, amount)
                .into_iter()
                .map(|i| i as u32),
        );
    }
    positions
}

/// Sample top and bottom task subsets for every unit.
///
/// # Arguments
/// * `activations` - `(n_units, n_samples)` activation matrix
/// * `k` - explanation set size; each task draws `k + 1` indices
/// * `n_tasks` - tasks per unit and polarity (`N`)
/// * `quantile` - pool fraction in `(0, 1]`
/// * `sort_order` - optional precomputed ascending order, `(n_units, n_samples)`
/// * `rng` - random source
///
/// # Returns
/// [`TaskIndices`] with `top`/`bottom` of shape `(n_units, N, K+1)`
pub fn sample_subsets<R: Rng + ?Sized>(
    activations: &Tensor,
    k: usize,
    n_tasks: usize,
    quantile: f64,
    sort_order: Option<&Tensor>,
    rng: &mut R,
) -> Result<TaskIndices> {
    validate_params(k, n_tasks, quantile)?;
    let (n_units, n_samples) = activations.dims2()?;
    let device = activations.device();

    let subset_length = pool_size(n_samples, quantile);
    let required = k + 1;
    if subset_length < required {
        return Err(MisError::InsufficientPoolSize {
            pool: subset_length,
            required,
            n_samples,
            quantile,
        });
    }
    info!(
        "Sampling {} units x {} tasks x {} from pools of {}",
        n_units, n_tasks, required, subset_length
    );

    let shape = (n_units, n_tasks, required);

    if quantile >= 1.0 {
        let top = draw_positions(rng, n_units * n_tasks, n_samples, required);
        let bottom = draw_positions(rng, n_units * n_tasks, n_samples, required);
        return Ok(TaskIndices {
            top: Tensor::from_vec(top, shape, device)?,
            bottom: Tensor::from_vec(bottom, shape, device)?,
        });
    }

    let order = match sort_order {
        Some(order) => {
            if order.dims() != [n_units, n_samples] {
                return Err(MisError::shape(
                    "precomputed sort order",
                    &[n_units, n_samples],
                    order.dims(),
                ));
            }
            let order = order.to_dtype(DType::U32)?.contiguous()?;
            validate_sort_order(&order, n_samples)?;
            order
        }
        None => activation_sort_order(activations)?,
    };

    let bottom_pool = order.narrow(1, 0, subset_length)?.contiguous()?;
    let tail: Vec<u32> = (n_samples - subset_length..n_samples)
        .rev()
        .map(|i| i as u32)
        .collect();
    let tail = Tensor::from_vec(tail, subset_length, device)?;
    let top_pool = order.index_select(&tail, 1)?.contiguous()?;

    let flat = (n_units, n_tasks * required);
    let top_pos = draw_positions(rng, n_units * n_tasks, subset_length, required);
    let bottom_pos = draw_positions(rng, n_units * n_tasks, subset_length, required);
    let top_pos = Tensor::from_vec(top_pos, flat, device)?;
    let bottom_pos = Tensor::from_vec(bottom_pos, flat, device)?;

    Ok(TaskIndices {
        top: top_pool.gather(&top_pos, 1)?.reshape(shape)?,
        bottom: bottom_pool.gather(&bottom_pos, 1)?.reshape(shape)?,
    })
}
