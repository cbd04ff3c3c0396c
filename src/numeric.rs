//! Small numeric helpers over one row of logits.
//!
//! All helpers treat `-inf` as "masked".  A row where every entry is masked
//! produces `NaN` log-probabilities, matching what a tensor library's
//! `log_softmax` would return.

use std::cmp::Ordering;

use ndarray::{Array1, ArrayView1};

/// Index of the first maximum value (`0` for an empty slice).
///
/// `NaN` entries never win a comparison.
pub(crate) fn argmax(row: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    let mut found = false;
    for (i, &v) in row.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if !found || v > best_value {
            best = i;
            best_value = v;
            found = true;
        }
    }
    best
}

/// `log(sum(exp(x)))`, stable for large magnitudes.
pub(crate) fn logsumexp(row: ArrayView1<'_, f32>) -> f32 {
    let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
    if max == f32::NEG_INFINITY {
        return f32::NEG_INFINITY;
    }
    let sum: f32 = row.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Log-softmax of a row.
pub(crate) fn log_softmax(row: ArrayView1<'_, f32>) -> Array1<f32> {
    let lse = logsumexp(row);
    if lse == f32::NEG_INFINITY {
        return Array1::from_elem(row.len(), f32::NAN);
    }
    row.mapv(|v| v - lse)
}

/// Softmax of a row.
pub(crate) fn softmax(row: ArrayView1<'_, f32>) -> Array1<f32> {
    log_softmax(row).mapv(f32::exp)
}

/// The `k` highest entries as `(index, value)`, highest first.
///
/// Ties keep ascending index order, so the result is deterministic.
pub(crate) fn top_k(row: ArrayView1<'_, f32>, k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = row.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| descending(a.1, b.1));
    indexed.truncate(k);
    indexed
}

/// Comparator for a stable descending sort on `f32` scores.
///
/// `NaN` sorts last.
pub(crate) fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
