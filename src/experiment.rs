//! Experiment runner for MIS scoring
//!
//! Coordinates configuration, representation lookup, task generation and
//! scoring, and summarizes the per-unit scores.

use std::path::Path;

use candle_core::{IndexOp, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{Preprocess, RepresentationCache};
use crate::error::{MisError, Result};
use crate::pipeline::run_with_order;
use crate::sampler::{activation_sort_order, validate_params};
use crate::similarity::MetricKind;

/// Configuration for an MIS run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MisConfig {
    /// Explanation set size per task
    pub k: usize,
    /// Tasks per unit and polarity
    pub n_tasks: usize,
    /// Fraction of the dataset forming each quantile pool
    pub quantile: f64,
    /// Sigmoid sharpness; `None` scores the binary decision rate
    pub alpha: Option<f64>,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for MisConfig {
    fn default() -> Self {
        Self {
            k: 9,
            n_tasks: 20,
            quantile: 0.2,
            alpha: Some(0.16),
            seed: 42,
        }
    }
}

impl MisConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MisConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_params(self.k, self.n_tasks, self.quantile)?;
        if let Some(alpha) = self.alpha {
            if !(alpha.is_finite() && alpha > 0.0) {
                return Err(MisError::InvalidParameter(format!(
                    "alpha must be positive and finite, got {alpha}"
                )));
            }
        }
        Ok(())
    }

    /// Generator seeded from `seed`
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }
}

/// Summary of one MIS run
#[derive(Debug, Clone, Serialize)]
pub struct MisReport {
    pub metric: MetricKind,
    pub config: MisConfig,
    /// Per-unit scores, indexed by unit
    pub scores: Vec<f64>,
    pub mean_score: f64,
    pub best_unit: usize,
    pub best_score: f64,
}

impl MisReport {
    pub fn new(metric: MetricKind, config: MisConfig, scores: Vec<f64>) -> Self {
        let mean_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        // first unit wins ties
        let (best_unit, best_score) = scores
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (u, s)| match best {
                Some((_, b)) if b >= s => best,
                _ => Some((u, s)),
            })
            .unwrap_or((0, 0.0));

        Self {
            metric,
            config,
            scores,
            mean_score,
            best_unit,
            best_score,
        }
    }

    /// Units ordered from highest to lowest score
    pub fn ranking(&self) -> Vec<(usize, f64)> {
        let mut ranked: Vec<(usize, f64)> = self.scores.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// Write the report as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Raw samples with their activations and a sort order computed once.
///
/// Representations are not held here: they live in a caller-owned
/// [`RepresentationCache`] passed to [`TaskData::representations`].
#[derive(Debug, Clone)]
pub struct TaskData<S> {
    samples: Vec<S>,
    activations: Tensor,
    sort_order: Tensor,
}

impl<S> TaskData<S> {
    /// Build from unit-major activations, `(n_units, n_samples)`
    pub fn new(samples: Vec<S>, activations: Tensor) -> Result<Self> {
        let (_, n_samples) = activations.dims2()?;
        if n_samples != samples.len() {
            return Err(MisError::shape(
                "activations sample axis vs samples",
                &[samples.len()],
                &[n_samples],
            ));
        }
        let sort_order = activation_sort_order(&activations)?;
        Ok(Self {
            samples,
            activations,
            sort_order,
        })
    }

    /// Build from sample-major activations, `(n_samples, n_units)`
    pub fn from_sample_major(samples: Vec<S>, activations: Tensor) -> Result<Self> {
        Self::new(samples, activations.t()?.contiguous()?)
    }

    pub fn n_units(&self) -> usize {
        self.activations.dims()[0]
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[S] {
        &self.samples
    }

    /// Raw sample at `index` with its activation under every unit, `(n_units,)`
    pub fn sample(&self, index: usize) -> Result<(&S, Tensor)> {
        let sample = self.samples.get(index).ok_or_else(|| {
            MisError::InvalidParameter(format!(
                "sample index {index} out of range for {} samples",
                self.samples.len()
            ))
        })?;
        Ok((sample, self.activations.i((.., index))?))
    }

    /// Activation matrix, `(n_units, n_samples)`
    pub fn activations(&self) -> &Tensor {
        &self.activations
    }

    /// Ascending activation order per unit, `(n_units, n_samples)`
    pub fn sort_order(&self) -> &Tensor {
        &self.sort_order
    }

    /// Preprocessed representations for `metric`, computed on first use
    pub fn representations<P>(
        &self,
        metric: MetricKind,
        preprocess: &P,
        cache: &mut RepresentationCache,
    ) -> Result<Tensor>
    where
        P: Preprocess<S> + ?Sized,
    {
        let representations = cache.get_or_preprocess(metric, &self.samples, preprocess)?;
        let n_repr = representations.dim(0)?;
        if n_repr != self.n_samples() {
            return Err(MisError::shape(
                format!("{metric} representations"),
                &[self.n_samples()],
                &[n_repr],
            ));
        }
        Ok(representations)
    }

    /// Score every unit with the backend named by `metric`.
    pub fn score<P, R>(
        &self,
        metric: MetricKind,
        preprocess: &P,
        cache: &mut RepresentationCache,
        config: &MisConfig,
        rng: &mut R,
    ) -> Result<Vec<f64>>
    where
        P: Preprocess<S> + ?Sized,
        R: Rng + ?Sized,
    {
        let representations = self.representations(metric, preprocess, cache)?;
        run_with_order(
            &representations,
            &self.activations,
            Some(&self.sort_order),
            &metric.backend(),
            config,
            rng,
        )
    }
}

/// Main experiment runner
pub struct MisExperiment {
    metric: MetricKind,
    config: MisConfig,
}

impl MisExperiment {
    /// Create a new experiment
    pub fn new(metric: MetricKind, config: MisConfig) -> Self {
        Self { metric, config }
    }

    pub fn config(&self) -> &MisConfig {
        &self.config
    }

    /// Score preprocessed representations against `(n_units, n_samples)` activations
    pub fn run(&self, representations: &Tensor, activations: &Tensor) -> Result<MisReport> {
        info!("Starting MIS experiment");
        info!("Metric: {}, config: {:?}", self.metric, self.config);

        let mut rng = self.config.rng();
        let scores = run_with_order(
            representations,
            activations,
            None,
            &self.metric.backend(),
            &self.config,
            &mut rng,
        )?;

        let report = MisReport::new(self.metric, self.config.clone(), scores);
        info!(
            "Mean MIS over {} units: {:.3}",
            report.scores.len(),
            report.mean_score
        );
        info!(
            "Best unit: {} with MIS {:.3}",
            report.best_unit, report.best_score
        );

        Ok(report)
    }
}
