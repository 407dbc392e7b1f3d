//! Similarity backends
//!
//! Every backend maps two batches of representations to a similarity matrix,
//! vectorized over a leading batch axis:
//!
//! ```text
//! a: (B, n_a, *I_dim)    b: (B, n_b, *I_dim)    ->    (B, n_a, n_b)
//! ```
//!
//! Higher values mean more similar. Distance-based backends return the
//! negated distance.
//!
//! Backends are selected by name once, at configuration time, through
//! [`MetricKind`]. Learned perceptual models plug in by implementing
//! [`Similarity`] directly.

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Tensor, D};
use serde::{Deserialize, Serialize};

use crate::error::{MisError, Result};

/// Pairwise similarity over batched sample representations
pub trait Similarity {
    /// Similarity of every item of `a` to every item of `b`, per batch entry.
    fn similarity(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
}

impl<T: Similarity + ?Sized> Similarity for &T {
    fn similarity(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        (**self).similarity(a, b)
    }
}

impl<T: Similarity + ?Sized> Similarity for Box<T> {
    fn similarity(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        (**self).similarity(a, b)
    }
}

/// Check the batch contract and flatten both sides to `(B, n, d)` F32.
fn flatten_pair(a: &Tensor, b: &Tensor) -> Result<(Tensor, Tensor)> {
    let (a_dims, b_dims) = (a.dims(), b.dims());
    if a_dims.len() < 2 || b_dims.len() < 2 {
        return Err(MisError::shape(
            "similarity input rank (need at least (B, n))",
            &[2],
            &[a_dims.len().min(b_dims.len())],
        ));
    }
    if a_dims[0] != b_dims[0] {
        return Err(MisError::shape(
            "similarity batch axis",
            &a_dims[..1],
            &b_dims[..1],
        ));
    }
    if a_dims[2..] != b_dims[2..] {
        return Err(MisError::shape(
            "similarity sample shape",
            &a_dims[2..],
            &b_dims[2..],
        ));
    }

    let flat = |t: &Tensor| -> Result<Tensor> {
        let t = if t.rank() == 2 { t.unsqueeze(2)? } else { t.flatten_from(2)? };
        Ok(t.to_dtype(DType::F32)?)
    };
    Ok((flat(a)?, flat(b)?))
}

/// Norm used by [`DistanceSimilarity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceNorm {
    /// Sum of absolute differences
    L1,
    /// Euclidean distance
    L2,
}

/// Distance-to-similarity adapter over fixed-size sample tensors.
///
/// Returns `-distance(a_i, b_j)` over the flattened per-sample tensors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceSimilarity {
    pub norm: DistanceNorm,
}

impl DistanceSimilarity {
    pub fn l1() -> Self {
        Self {
            norm: DistanceNorm::L1,
        }
    }

    pub fn l2() -> Self {
        Self {
            norm: DistanceNorm::L2,
        }
    }
}

impl Similarity for DistanceSimilarity {
    fn similarity(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let (a, b) = flatten_pair(a, b)?;
        // (B, n_a, 1, d) - (B, 1, n_b, d) -> (B, n_a, n_b, d)
        let diff = a.unsqueeze(2)?.broadcast_sub(&b.unsqueeze(1)?)?;
        let dist = match self.norm {
            DistanceNorm::L1 => diff.abs()?.sum(D::Minus1)?,
            DistanceNorm::L2 => diff.sqr()?.sum(D::Minus1)?.sqrt()?,
        };
        Ok(dist.neg()?)
    }
}

/// Cosine similarity over fixed-length embeddings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosineSimilarity {
    /// Lower clamp on vector norms
    pub eps: f64,
}

impl Default for CosineSimilarity {
    fn default() -> Self {
        Self { eps: 1e-8 }
    }
}

impl CosineSimilarity {
    fn normalize(&self, t: &Tensor) -> Result<Tensor> {
        let norms = t.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?;
        let floor = (norms.ones_like()? * self.eps)?;
        let safe = norms.maximum(&floor)?;
        Ok(t.broadcast_div(&safe)?)
    }
}

impl Similarity for CosineSimilarity {
    fn similarity(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let (a, b) = flatten_pair(a, b)?;
        let a = self.normalize(&a)?;
        let b = self.normalize(&b)?;
        // (B, n_a, d) x (B, d, n_b)
        Ok(a.matmul(&b.t()?.contiguous()?)?)
    }
}

/// Named similarity metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Perceptual distance over preprocessed image tensors
    Lpips,
    /// Cosine similarity over image embeddings
    DreamSim,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Lpips, MetricKind::DreamSim];

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Lpips => "lpips",
            MetricKind::DreamSim => "dreamsim",
        }
    }

    /// Resolve the backend implementing this metric
    pub fn backend(&self) -> SimilarityBackend {
        match self {
            MetricKind::Lpips => SimilarityBackend::PerceptualDistance(DistanceSimilarity::l2()),
            MetricKind::DreamSim => {
                SimilarityBackend::EmbeddingCosine(CosineSimilarity::default())
            }
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = MisError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        MetricKind::ALL
            .into_iter()
            .find(|m| m.name() == lower)
            .ok_or_else(|| MisError::InvalidMetric {
                name: s.to_string(),
            })
    }
}

/// Closed set of built-in backends
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimilarityBackend {
    PerceptualDistance(DistanceSimilarity),
    EmbeddingCosine(CosineSimilarity),
}

impl Similarity for SimilarityBackend {
    fn similarity(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        match self {
            SimilarityBackend::PerceptualDistance(inner) => inner.similarity(a, b),
            SimilarityBackend::EmbeddingCosine(inner) => inner.similarity(a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_metric_from_str() {
        assert_eq!("lpips".parse::<MetricKind>().unwrap(), MetricKind::Lpips);
        assert_eq!("DreamSim".parse::<MetricKind>().unwrap(), MetricKind::DreamSim);
        let err = "clip".parse::<MetricKind>().unwrap_err();
        assert!(matches!(err, MisError::InvalidMetric { ref name } if name == "clip"));
    }

    #[test]
    fn test_metrics_resolve_to_distinct_backends() {
        assert!(matches!(
            MetricKind::Lpips.backend(),
            SimilarityBackend::PerceptualDistance(_)
        ));
        assert!(matches!(
            MetricKind::DreamSim.backend(),
            SimilarityBackend::EmbeddingCosine(_)
        ));
    }

    #[test]
    fn test_negative_l1() {
        let device = Device::Cpu;
        // batch of 1: queries [2, 5], explanations [0, 4, 9]
        let a = Tensor::new(&[[[2f32], [5.]]], &device).unwrap();
        let b = Tensor::new(&[[[0f32], [4.], [9.]]], &device).unwrap();
        let sim = DistanceSimilarity::l1().similarity(&a, &b).unwrap();
        assert_eq!(sim.dims(), &[1, 2, 3]);
        let sim: Vec<Vec<Vec<f32>>> = sim.to_vec3().unwrap();
        assert_eq!(sim[0], vec![vec![-2.0, -2.0, -7.0], vec![-5.0, -1.0, -4.0]]);
    }

    #[test]
    fn test_l2_on_images() {
        let device = Device::Cpu;
        let a = Tensor::zeros((2, 1, 3, 2, 2), DType::F32, &device).unwrap();
        let b = Tensor::ones((2, 4, 3, 2, 2), DType::F32, &device).unwrap();
        let sim = DistanceSimilarity::l2().similarity(&a, &b).unwrap();
        assert_eq!(sim.dims(), &[2, 1, 4]);
        let vals: Vec<f32> = sim.flatten_all().unwrap().to_vec1().unwrap();
        // sqrt(12) per pair
        assert!(vals.iter().all(|v| (v + 12f32.sqrt()).abs() < 1e-5));
    }

    #[test]
    fn test_cosine() {
        let device = Device::Cpu;
        let a = Tensor::new(&[[[1f32, 0.], [0., 2.]]], &device).unwrap();
        let b = Tensor::new(&[[[3f32, 0.], [1., 1.], [0., 0.]]], &device).unwrap();
        let sim = CosineSimilarity::default().similarity(&a, &b).unwrap();
        let sim: Vec<Vec<Vec<f32>>> = sim.to_vec3().unwrap();
        let r = std::f32::consts::FRAC_1_SQRT_2;
        let expected = [[1.0, r, 0.0], [0.0, r, 0.0]];
        for (row, exp) in sim[0].iter().zip(expected.iter()) {
            for (v, e) in row.iter().zip(exp.iter()) {
                assert!((v - e).abs() < 1e-5, "{v} vs {e}");
            }
        }
    }

    #[test]
    fn test_batch_mismatch() {
        let device = Device::Cpu;
        let a = Tensor::zeros((2, 1, 4), DType::F32, &device).unwrap();
        let b = Tensor::zeros((3, 2, 4), DType::F32, &device).unwrap();
        assert!(CosineSimilarity::default().similarity(&a, &b).is_err());
        let b = Tensor::zeros((2, 2, 5), DType::F32, &device).unwrap();
        assert!(DistanceSimilarity::l1().similarity(&a, &b).is_err());
    }
}
