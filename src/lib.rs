// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f64/f32 intentional in ML
#![allow(clippy::cast_possible_truncation)] // usize→u32 in tensor indexing
#![allow(clippy::cast_sign_loss)] // f64→usize when value is known positive
#![allow(clippy::many_single_char_names)] // q, e, k, n standard in the scoring algebra
#![allow(clippy::similar_names)] // s_pp / s_pm / s_mp / s_mm
#![allow(clippy::module_name_repetitions)] // MisConfig in experiment.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::trivially_copy_pass_by_ref)] // &MetricKind for API consistency
#![allow(clippy::needless_pass_by_value)] // value params for API flexibility

//! MIS-rs: Mechanistic Interpretability Score
//!
//! Scores how well a unit's high and low activations line up with a
//! similarity-detectable concept, by building randomized two-alternative
//! psychophysics tasks from the unit's activations and checking whether
//! queries sit closer to their own polarity's explanation set.
//!
//! ## Architecture
//!
//! - `sampler`: quantile-restricted subset sampling without replacement
//! - `ranker`: within-task activation ranking (query / explanation split)
//! - `materialize`: gather sample representations for ranked tasks
//! - `similarity`: similarity contract and the named backends
//! - `scorer`: the MIS rule, per unit and for a whole unit set
//! - `pipeline`: `generate_tasks` / `run` entry points
//! - `cache`: caller-owned representation cache keyed by metric
//! - `experiment`: configuration, task data holder and experiment runner
//! - `error`: error types

pub mod cache;
pub mod error;
pub mod experiment;
pub mod materialize;
pub mod pipeline;
pub mod ranker;
pub mod sampler;
pub mod scorer;
pub mod similarity;

pub use cache::{Preprocess, RepresentationCache};
pub use error::{MisError, Result};
pub use experiment::{MisConfig, MisExperiment, MisReport, TaskData};
pub use materialize::{gather_samples, materialize, ExplanationSet, PolarPair, QuerySet};
pub use pipeline::{generate_tasks, run, run_with_order};
pub use ranker::rank_subsets;
pub use sampler::{activation_sort_order, pool_size, sample_subsets, TaskIndices};
pub use scorer::{aggregate, score_all, score_unit};
pub use similarity::{
    CosineSimilarity, DistanceNorm, DistanceSimilarity, MetricKind, Similarity,
    SimilarityBackend,
};
