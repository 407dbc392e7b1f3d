//! Representation cache for preprocessed sample pools

use std::collections::HashMap;

use candle_core::Tensor;
use tracing::info;

use crate::error::Result;
use crate::similarity::MetricKind;

/// Bulk preprocessing of raw samples into a `(n_samples, *I_dim)` tensor
pub trait Preprocess<S> {
    fn preprocess(&self, samples: &[S]) -> Result<Tensor>;
}

impl<S, F> Preprocess<S> for F
where
    F: Fn(&[S]) -> Result<Tensor>,
{
    fn preprocess(&self, samples: &[S]) -> Result<Tensor> {
        self(samples)
    }
}

/// Preprocessed representations keyed by metric.
///
/// Owned by the caller and passed explicitly; each metric's representations
/// are computed once, on first use.
#[derive(Debug, Default)]
pub struct RepresentationCache {
    entries: HashMap<MetricKind, Tensor>,
}

impl RepresentationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store representations for a metric, replacing any previous entry
    pub fn insert(&mut self, metric: MetricKind, representations: Tensor) {
        self.entries.insert(metric, representations);
    }

    /// Get cached representations for a metric
    pub fn get(&self, metric: MetricKind) -> Option<&Tensor> {
        self.entries.get(&metric)
    }

    /// Return cached representations, running `preprocess` on a miss.
    ///
    /// The returned tensor is a shallow clone (Arc bump, no data copy).
    pub fn get_or_preprocess<S, P>(
        &mut self,
        metric: MetricKind,
        samples: &[S],
        preprocess: &P,
    ) -> Result<Tensor>
    where
        P: Preprocess<S> + ?Sized,
    {
        if let Some(cached) = self.entries.get(&metric) {
            return Ok(cached.clone());
        }

        info!("Preprocessing {} samples for {}", samples.len(), metric);
        let representations = preprocess.preprocess(samples)?;
        self.entries.insert(metric, representations.clone());
        Ok(representations)
    }

    pub fn contains(&self, metric: MetricKind) -> bool {
        self.entries.contains_key(&metric)
    }

    /// Number of cached metrics
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
