//! Gather sample representations for ranked tasks

use candle_core::{IndexOp, Tensor};
use tracing::debug;

use crate::error::{MisError, Result};
use crate::sampler::TaskIndices;

/// A plus (top) / minus (bottom) pair of batched tensors
#[derive(Debug, Clone)]
pub struct PolarPair {
    pub plus: Tensor,
    pub minus: Tensor,
}

/// Queries for all tasks: each side `(n_units, N, *I_dim)`
pub type QuerySet = PolarPair;

/// Explanation sets for all tasks: each side `(n_units, N, K, *I_dim)`
pub type ExplanationSet = PolarPair;

impl PolarPair {
    pub fn new(plus: Tensor, minus: Tensor) -> Self {
        Self { plus, minus }
    }

    /// Select one unit along the leading axis
    pub fn unit(&self, unit: usize) -> Result<PolarPair> {
        Ok(PolarPair {
            plus: self.plus.i(unit)?,
            minus: self.minus.i(unit)?,
        })
    }

    /// Length of the leading axis (must agree between sides)
    pub fn len(&self) -> Result<usize> {
        let plus = self.plus.dim(0)?;
        let minus = self.minus.dim(0)?;
        if plus != minus {
            return Err(MisError::shape("polar pair leading axis", &[plus], &[minus]));
        }
        Ok(plus)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// `representations[idx]` for an index tensor of any shape.
///
/// Output shape is `idx.dims() ++ representations.dims()[1..]`.
pub fn gather_samples(representations: &Tensor, idx: &Tensor) -> Result<Tensor> {
    let mut shape = idx.dims().to_vec();
    shape.extend_from_slice(&representations.dims()[1..]);

    let flat = idx.contiguous()?.flatten_all()?;
    let picked = representations.contiguous()?.index_select(&flat, 0)?;
    Ok(picked.reshape(shape)?)
}

/// Build query and explanation batches for every unit and task.
///
/// Slot `K` of each ranked task becomes the query, slots `0..K` the
/// explanation set. No reordering happens here.
pub fn materialize(
    representations: &Tensor,
    ranked: &TaskIndices,
    k: usize,
) -> Result<(QuerySet, ExplanationSet)> {
    let expected = [ranked.n_units(), ranked.n_tasks(), k + 1];
    for (side, idx) in [("top", &ranked.top), ("bottom", &ranked.bottom)] {
        if idx.dims() != expected {
            return Err(MisError::shape(
                format!("materialize ({side} indices)"),
                &expected,
                idx.dims(),
            ));
        }
    }

    let query_idx = |idx: &Tensor| -> Result<Tensor> { Ok(idx.narrow(2, k, 1)?.squeeze(2)?) };
    let explanation_idx = |idx: &Tensor| -> Result<Tensor> { Ok(idx.narrow(2, 0, k)?) };

    let query = PolarPair {
        plus: gather_samples(representations, &query_idx(&ranked.top)?)?,
        minus: gather_samples(representations, &query_idx(&ranked.bottom)?)?,
    };
    let explanation = PolarPair {
        plus: gather_samples(representations, &explanation_idx(&ranked.top)?)?,
        minus: gather_samples(representations, &explanation_idx(&ranked.bottom)?)?,
    };

    debug!(
        "Materialized queries {:?}, explanations {:?}",
        query.plus.dims(),
        explanation.plus.dims()
    );

    Ok((query, explanation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    /// Sample i is a 2x2 image filled with i
    fn pool(n: usize) -> Tensor {
        let data: Vec<f32> = (0..n).flat_map(|i| [i as f32; 4]).collect();
        Tensor::from_vec(data, (n, 2, 2), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_materialize_shapes_and_values() {
        let device = Device::Cpu;
        let top = Tensor::new(&[[[7u32, 6, 5], [9, 8, 2]]], &device).unwrap();
        let bottom = Tensor::new(&[[[0u32, 1, 4], [3, 2, 1]]], &device).unwrap();
        let ranked = TaskIndices { top, bottom };

        let (query, explanation) = materialize(&pool(10), &ranked, 2).unwrap();
        assert_eq!(query.plus.dims(), &[1, 2, 2, 2]);
        assert_eq!(query.minus.dims(), &[1, 2, 2, 2]);
        assert_eq!(explanation.plus.dims(), &[1, 2, 2, 2, 2]);
        assert_eq!(explanation.minus.dims(), &[1, 2, 2, 2, 2]);

        // first pixel of each gathered sample identifies it
        let q_plus: Vec<f32> = query
            .plus
            .flatten_from(2)
            .unwrap()
            .i((0, .., 0))
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(q_plus, vec![5.0, 2.0]);

        let q_minus: Vec<f32> = query
            .minus
            .flatten_from(2)
            .unwrap()
            .i((0, .., 0))
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(q_minus, vec![4.0, 1.0]);

        let e_plus: Vec<Vec<f32>> = explanation
            .plus
            .flatten_from(3)
            .unwrap()
            .i((0, .., .., 0))
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(e_plus, vec![vec![7.0, 6.0], vec![9.0, 8.0]]);
    }

    #[test]
    fn test_materialize_matches_direct_gather() {
        let device = Device::Cpu;
        let repr = Tensor::randn(0f32, 1.0, (12, 3), &device).unwrap();
        let top = Tensor::new(&[[[3u32, 11, 0, 4]], [[1, 2, 5, 6]]], &device).unwrap();
        let bottom = Tensor::new(&[[[8u32, 9, 10, 7]], [[6, 5, 2, 1]]], &device).unwrap();
        let ranked = TaskIndices { top, bottom };

        let (query, explanation) = materialize(&repr, &ranked, 3).unwrap();
        let rows: Vec<Vec<f32>> = repr.to_vec2().unwrap();

        let q: Vec<Vec<Vec<f32>>> = query.plus.to_vec3().unwrap();
        assert_eq!(q[0][0], rows[4]);
        assert_eq!(q[1][0], rows[6]);

        let e = explanation.minus.i((1, 0)).unwrap();
        let e: Vec<Vec<f32>> = e.to_vec2().unwrap();
        assert_eq!(e, vec![rows[6].clone(), rows[5].clone(), rows[2].clone()]);
    }

    #[test]
    fn test_materialize_rejects_wrong_k() {
        let idx = Tensor::zeros((1, 2, 3), DType::U32, &Device::Cpu).unwrap();
        let ranked = TaskIndices {
            top: idx.clone(),
            bottom: idx,
        };
        assert!(materialize(&pool(4), &ranked, 3).is_err());
    }

    #[test]
    fn test_polar_pair_unit() {
        let device = Device::Cpu;
        let pair = PolarPair::new(
            Tensor::zeros((3, 4, 2), DType::F32, &device).unwrap(),
            Tensor::ones((3, 4, 2), DType::F32, &device).unwrap(),
        );
        assert_eq!(pair.len().unwrap(), 3);
        let unit = pair.unit(1).unwrap();
        assert_eq!(unit.plus.dims(), &[4, 2]);
        assert_eq!(unit.len().unwrap(), 4);
    }
}
