//! Within-task ranking of sampled subsets
//!
//! Each task's `K+1` indices are re-sorted by the unit's activation: top tasks
//! descending, bottom tasks ascending. The last slot then holds the least
//! extreme member of the subset (the query), and slots `0..K` hold the
//! explanation set from most to least extreme.

use candle_core::Tensor;
use tracing::debug;

use crate::error::{MisError, Result};
use crate::sampler::TaskIndices;

/// Gather `activations[u, idx[u, n, j]]` for an `(n_units, N, L)` index tensor.
///
/// Values keep the activation dtype, so F64 inputs rank at full precision.
fn gather_activations(activations: &Tensor, idx: &Tensor) -> Result<Tensor> {
    let (n_units, n_tasks, len) = idx.dims3()?;
    let flat = idx.contiguous()?.reshape((n_units, n_tasks * len))?;
    let values = activations.contiguous()?.gather(&flat, 1)?;
    Ok(values.reshape((n_units, n_tasks, len))?)
}

/// Reorder one polarity's indices by activation along the last axis.
/// Ties keep their sampled order.
fn sort_by_activation(activations: &Tensor, idx: &Tensor, ascending: bool) -> Result<Tensor> {
    let values = gather_activations(activations, idx)?;
    let perm = values.contiguous()?.arg_sort_last_dim(ascending)?;
    Ok(idx.contiguous()?.gather(&perm, 2)?)
}

/// Rank sampled task subsets by activation.
///
/// # Arguments
/// * `indices` - sampled `(n_units, N, K+1)` top/bottom indices
/// * `activations` - `(n_units, n_samples)` activation matrix
///
/// # Returns
/// [`TaskIndices`] of the same shape, top sorted descending and bottom
/// ascending by activation. Position `K` is the query slot.
pub fn rank_subsets(indices: &TaskIndices, activations: &Tensor) -> Result<TaskIndices> {
    if indices.top.dims() != indices.bottom.dims() {
        return Err(MisError::shape(
            "rank_subsets (bottom indices)",
            indices.top.dims(),
            indices.bottom.dims(),
        ));
    }
    let (n_units, _) = activations.dims2()?;
    if indices.n_units() != n_units {
        return Err(MisError::shape(
            "rank_subsets (unit axis)",
            &[n_units],
            &[indices.n_units()],
        ));
    }
    debug!("Ranking task subsets {:?}", indices.top.dims());

    Ok(TaskIndices {
        top: sort_by_activation(activations, &indices.top, false)?,
        bottom: sort_by_activation(activations, &indices.bottom, true)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::sample_subsets;
    use candle_core::{DType, Device};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rank_small() {
        let device = Device::Cpu;
        // activation of sample i is 10 - i
        let acts = Tensor::new(&[[10f32, 9., 8., 7., 6., 5.]], &device).unwrap();
        let top = Tensor::new(&[[[5u32, 0, 3]]], &device).unwrap();
        let bottom = Tensor::new(&[[[1u32, 4, 2]]], &device).unwrap();

        let ranked = rank_subsets(&TaskIndices { top, bottom }, &acts).unwrap();
        let top: Vec<Vec<Vec<u32>>> = ranked.top.to_vec3().unwrap();
        let bottom: Vec<Vec<Vec<u32>>> = ranked.bottom.to_vec3().unwrap();

        // descending activation -> ascending sample index
        assert_eq!(top, vec![vec![vec![0, 3, 5]]]);
        // ascending activation -> descending sample index
        assert_eq!(bottom, vec![vec![vec![4, 2, 1]]]);
    }

    #[test]
    fn test_query_is_least_extreme() {
        let device = Device::Cpu;
        let data: Vec<f32> = (0..2)
            .flat_map(|u| (0..40).map(move |i| ((i * 7 + u * 3) % 40) as f32))
            .collect();
        let acts = Tensor::from_vec(data, (2, 40), &device).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let sampled = sample_subsets(&acts, 4, 10, 0.5, None, &mut rng).unwrap();
        let ranked = rank_subsets(&sampled, &acts).unwrap();

        let rows: Vec<Vec<f32>> = acts.to_vec2().unwrap();
        let top: Vec<Vec<Vec<u32>>> = ranked.top.to_vec3().unwrap();
        let bottom: Vec<Vec<Vec<u32>>> = ranked.bottom.to_vec3().unwrap();

        for u in 0..2 {
            for task in &top[u] {
                let vals: Vec<f32> = task.iter().map(|&i| rows[u][i as usize]).collect();
                assert!(vals.windows(2).all(|w| w[0] >= w[1]));
                assert!(vals[..4].iter().all(|&v| vals[4] <= v));
            }
            for task in &bottom[u] {
                let vals: Vec<f32> = task.iter().map(|&i| rows[u][i as usize]).collect();
                assert!(vals.windows(2).all(|w| w[0] <= w[1]));
                assert!(vals[..4].iter().all(|&v| vals[4] >= v));
            }
        }

        // ranking permutes, never replaces
        let mut before: Vec<u32> = sampled.top.flatten_all().unwrap().to_vec1().unwrap();
        let mut after: Vec<u32> = ranked.top.flatten_all().unwrap().to_vec1().unwrap();
        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after);
    }

    #[test]
    fn test_rank_ties_keep_sampled_order() {
        let device = Device::Cpu;
        let acts = Tensor::new(&[[5f32, 5., 5., 1., 1., 1.]], &device).unwrap();
        // ties straddle the query slot on both sides
        let top = Tensor::new(&[[[1u32, 3, 0, 5]]], &device).unwrap();
        let bottom = Tensor::new(&[[[4u32, 0, 3, 2]]], &device).unwrap();

        let ranked = rank_subsets(&TaskIndices { top, bottom }, &acts).unwrap();
        let top: Vec<Vec<Vec<u32>>> = ranked.top.to_vec3().unwrap();
        let bottom: Vec<Vec<Vec<u32>>> = ranked.bottom.to_vec3().unwrap();
        assert_eq!(top, vec![vec![vec![1, 0, 3, 5]]]);
        assert_eq!(bottom, vec![vec![vec![4, 3, 0, 2]]]);
    }

    #[test]
    fn test_rank_f64_precision() {
        let device = Device::Cpu;
        // gaps below F32 resolution near 1.0
        let data: Vec<f64> = (0..4).map(|i| 1.0 - i as f64 * 1e-12).collect();
        let acts = Tensor::from_vec(data, (1, 4), &device).unwrap();
        let top = Tensor::new(&[[[3u32, 1, 2, 0]]], &device).unwrap();
        let bottom = Tensor::new(&[[[0u32, 2, 1, 3]]], &device).unwrap();

        let ranked = rank_subsets(&TaskIndices { top, bottom }, &acts).unwrap();
        let top: Vec<Vec<Vec<u32>>> = ranked.top.to_vec3().unwrap();
        let bottom: Vec<Vec<Vec<u32>>> = ranked.bottom.to_vec3().unwrap();
        assert_eq!(top, vec![vec![vec![0, 1, 2, 3]]]);
        assert_eq!(bottom, vec![vec![vec![3, 2, 1, 0]]]);
    }

    #[test]
    fn test_rank_unit_mismatch() {
        let device = Device::Cpu;
        let acts = Tensor::zeros((3, 5), DType::F32, &device).unwrap();
        let idx = Tensor::zeros((2, 1, 2), DType::U32, &device).unwrap();
        let err = rank_subsets(
            &TaskIndices {
                top: idx.clone(),
                bottom: idx,
            },
            &acts,
        )
        .unwrap_err();
        assert!(matches!(err, MisError::ShapeMismatch { .. }));
    }
}
