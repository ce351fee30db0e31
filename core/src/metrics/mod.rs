//! Metric Probe (spec §4.2): runs VMAF/SSIM against a reference pipe and
//! parses the tool's own log format rather than re-implementing the metric.

pub mod ssim;
pub mod vmaf;

pub use ssim::SsimResult;
pub use vmaf::{ReferenceDisplay, VmafOptions, VmafResult};

/// Extracts the requested percentile from `scores` in O(n) via
/// `select_nth_unstable_by`, following the teacher's `vmaf::get_percentile`.
/// `percentile` is in `[0, 1]`. Mutates `scores`' order; callers that need
/// several percentiles should call this once per percentile and expect the
/// slice to be partially reordered between calls (cheaper than a full sort
/// only when a handful of percentiles are needed, which is the common case
/// here).
pub fn percentile(scores: &mut [f64], percentile: f64) -> f64 {
  assert!(!scores.is_empty(), "percentile of an empty score set");
  let k = ((scores.len() - 1) as f64 * percentile) as usize;
  let (_, kth, _) =
    scores.select_nth_unstable_by(k, |a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Less));
  *kth
}

pub fn mean(scores: &[f64]) -> f64 {
  scores.iter().sum::<f64>() / scores.len() as f64
}

pub fn harmonic_mean(scores: &[f64]) -> f64 {
  let n = scores.len() as f64;
  n / scores.iter().map(|s| 1.0 / s.max(f64::EPSILON)).sum::<f64>()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn percentile_matches_sorted_index() {
    let mut scores = vec![10.0, 20.0, 30.0, 40.0, 50.0];
    assert_eq!(percentile(&mut scores.clone(), 0.0), 10.0);
    assert_eq!(percentile(&mut scores, 1.0), 50.0);
  }

  #[test]
  fn harmonic_mean_never_exceeds_mean() {
    let scores = vec![60.0, 95.0, 98.0, 40.0, 99.9];
    assert!(harmonic_mean(&scores) <= mean(&scores));
  }
}
