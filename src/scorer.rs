//! MIS scoring
//!
//! For each task the plus query and the minus query are compared against both
//! explanation sets:
//!
//! ```text
//! s(q, E)          = mean_k sim(q, E_k)
//! delta_plus       = s(q+, E+) - s(q+, E-)
//! delta_minus      = s(q-, E+) - s(q-, E-)
//! delta_difference = delta_plus - delta_minus
//! ```
//!
//! A unit's score is the fraction of tasks with `delta_difference > 0`
//! (`alpha = None`), or the mean of `sigmoid(alpha * delta_difference)`.

use candle_core::{DType, Tensor, D};
use tracing::debug;

use crate::error::{MisError, Result};
use crate::materialize::{ExplanationSet, PolarPair, QuerySet};
use crate::similarity::Similarity;

/// Average a similarity matrix over its last (explanation) axis.
///
/// A singleton query axis is squeezed, so a `(1, K)` matrix reduces to a
/// scalar and a batched `(B, 1, K)` tensor to `(B,)`.
pub fn aggregate(similarity: &Tensor) -> Result<Tensor> {
    let reduced = similarity.mean(D::Minus1)?;
    if reduced.dims().last() == Some(&1) {
        return Ok(reduced.squeeze(D::Minus1)?);
    }
    Ok(reduced)
}

/// Mean similarity of each query to its explanation set.
///
/// `query` is `(B, *I_dim)`, `explanation` is `(B, K, *I_dim)`; returns `(B,)`.
fn mean_similarity<S: Similarity + ?Sized>(
    query: &Tensor,
    explanation: &Tensor,
    similarity: &S,
) -> Result<Tensor> {
    let sim = similarity.similarity(&query.unsqueeze(1)?, explanation)?;
    aggregate(&sim.to_dtype(DType::F64)?)
}

/// `delta_plus - delta_minus` per task for flattened `(B, ..)` batches.
fn delta_difference<S: Similarity + ?Sized>(
    query: &PolarPair,
    explanation: &PolarPair,
    similarity: &S,
) -> Result<Tensor> {
    let s_pp = mean_similarity(&query.plus, &explanation.plus, similarity)?;
    let s_pm = mean_similarity(&query.plus, &explanation.minus, similarity)?;
    let s_mp = mean_similarity(&query.minus, &explanation.plus, similarity)?;
    let s_mm = mean_similarity(&query.minus, &explanation.minus, similarity)?;

    let delta_plus = (s_pp - s_pm)?;
    let delta_minus = (s_mp - s_mm)?;
    Ok((delta_plus - delta_minus)?)
}

/// Reduce per-task contrasts over the last axis into scores.
///
/// Runs in F64 so `sigmoid(alpha * delta)` stays inside (0, 1) for the
/// contrast magnitudes pixel-space distances produce.
fn reduce_decisions(delta: &Tensor, alpha: Option<f64>) -> Result<Tensor> {
    let delta = delta.to_dtype(DType::F64)?;
    match alpha {
        None => {
            let wins = delta.gt(&delta.zeros_like()?)?.to_dtype(DType::F64)?;
            Ok(wins.mean(D::Minus1)?)
        }
        Some(alpha) => {
            let probs = candle_nn::ops::sigmoid(&(&delta * alpha)?)?;
            Ok(probs.mean(D::Minus1)?)
        }
    }
}

fn check_alpha(alpha: Option<f64>) -> Result<()> {
    match alpha {
        Some(a) if !(a.is_finite() && a > 0.0) => Err(MisError::InvalidParameter(format!(
            "alpha must be positive and finite, got {a}"
        ))),
        _ => Ok(()),
    }
}

/// Validate that both sides agree on the first `lead` axes and on the
/// per-sample shape.
fn check_shapes(query: &PolarPair, explanation: &PolarPair, lead: usize) -> Result<()> {
    let q_plus = query.plus.dims();
    let q_minus = query.minus.dims();
    let e_plus = explanation.plus.dims();
    let e_minus = explanation.minus.dims();

    if q_plus.len() < lead || q_minus.len() < lead {
        return Err(MisError::shape("query rank", &[lead], &[q_plus.len().min(q_minus.len())]));
    }
    if e_plus.len() < lead + 1 || e_minus.len() < lead + 1 {
        return Err(MisError::shape(
            "explanation rank",
            &[lead + 1],
            &[e_plus.len().min(e_minus.len())],
        ));
    }

    let batch = &q_plus[..lead];
    for (context, other) in [
        ("query minus", &q_minus[..lead]),
        ("explanation plus", &e_plus[..lead]),
        ("explanation minus", &e_minus[..lead]),
    ] {
        if other != batch {
            return Err(MisError::shape(context, batch, other));
        }
    }

    let sample = &q_plus[lead..];
    for (context, other) in [
        ("query minus sample shape", &q_minus[lead..]),
        ("explanation plus sample shape", &e_plus[lead + 1..]),
        ("explanation minus sample shape", &e_minus[lead + 1..]),
    ] {
        if other != sample {
            return Err(MisError::shape(context, sample, other));
        }
    }
    Ok(())
}

/// MIS of a single unit.
///
/// # Arguments
/// * `query` - `(q_plus, q_minus)`, each `(N, *I_dim)`
/// * `explanation` - `(E_plus, E_minus)`, each `(N, K, *I_dim)`
/// * `similarity` - backend, higher = more similar
/// * `alpha` - sigmoid sharpness; `None` gives the binary decision rate
pub fn score_unit<S: Similarity + ?Sized>(
    query: &PolarPair,
    explanation: &PolarPair,
    similarity: &S,
    alpha: Option<f64>,
) -> Result<f64> {
    check_alpha(alpha)?;
    check_shapes(query, explanation, 1)?;

    let delta = delta_difference(query, explanation, similarity)?;
    Ok(reduce_decisions(&delta, alpha)?.to_scalar::<f64>()?)
}

/// MIS of every unit.
///
/// `query_set` sides are `(n_units, N, *I_dim)`, `explanation_set` sides
/// `(n_units, N, K, *I_dim)`. Units are scored independently; the unit and
/// task axes are folded into one batch so the backend sees four calls in total.
pub fn score_all<S: Similarity + ?Sized>(
    query_set: &QuerySet,
    explanation_set: &ExplanationSet,
    similarity: &S,
    alpha: Option<f64>,
) -> Result<Vec<f64>> {
    check_alpha(alpha)?;
    check_shapes(query_set, explanation_set, 2)?;

    let dims = query_set.plus.dims();
    let (n_units, n_tasks) = (dims[0], dims[1]);
    debug!(
        "Scoring {} units x {} tasks (alpha={:?})",
        n_units, n_tasks, alpha
    );

    let flat = |pair: &PolarPair| -> Result<PolarPair> {
        Ok(PolarPair {
            plus: pair.plus.flatten_to(1)?,
            minus: pair.minus.flatten_to(1)?,
        })
    };
    let delta = delta_difference(&flat(query_set)?, &flat(explanation_set)?, similarity)?
        .reshape((n_units, n_tasks))?;

    Ok(reduce_decisions(&delta, alpha)?.to_vec1::<f64>()?)
}
