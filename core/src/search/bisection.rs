//! Bisection with interpolation (spec §4.4), plus the teacher's spline-
//! refined variant (spec §4.4.1, grounded on `target_quality::predict_crf`).

use std::cmp::Ordering;

use splines::{Interpolation, Key, Spline};

use super::{within_tolerance, VmafStat};

const EPSILON: f64 = 0.1;

/// One probed (CRF, representative-VMAF-statistic) sample taken during a
/// bisection run.
#[derive(Debug, Clone, Copy)]
struct Sample {
  crf:   f64,
  stat:  f64,
}

/// The CRF a bisection settled on, plus whether it came from direct
/// tolerance (`within_tolerance`) or had to fall back to interpolation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BisectionOutcome {
  pub crf:          f64,
  pub probes_used:  u32,
  pub hit_tolerance: bool,
}

/// Binary search over a CRF bracket, narrowing by the representative VMAF
/// statistic's direction relative to `target`. Two prediction modes:
/// [`Self::run`] (plain midpoint, spec §4.4 baseline) and
/// [`Self::run_with_spline_prediction`] (teacher's Catmull-Rom-refined
/// `predict_crf`, spec §4.4.1).
pub struct Bisection {
  pub low:          f64,
  pub high:         f64,
  pub max_probes:   u32,
  pub stat:         VmafStat,
  pub supports_float: bool,
}

impl Bisection {
  /// Plain bisection: probe the midpoint, narrow by direction, and on exit
  /// linearly interpolate between the two probes closest to target (spec
  /// §4.4's baseline contract).
  pub fn run(&self, target: f64, mut probe: impl FnMut(f64) -> f64) -> BisectionOutcome {
    self.run_generic(target, &mut probe, false)
  }

  /// Spline-refined variant: once 3+ probes exist, the next midpoint is
  /// predicted by sampling a Catmull-Rom spline fit over (stat, crf) pairs
  /// at the target stat, rather than the plain arithmetic midpoint.
  pub fn run_with_spline_prediction(&self, target: f64, mut probe: impl FnMut(f64) -> f64) -> BisectionOutcome {
    self.run_generic(target, &mut probe, true)
  }

  fn run_generic(&self, target: f64, probe: &mut dyn FnMut(f64) -> f64, use_spline: bool) -> BisectionOutcome {
    let mut low = self.low;
    let mut high = self.high;
    let mut history: Vec<Sample> = Vec::new();
    let mut hit_tolerance = false;

    while history.len() < self.max_probes as usize {
      let midpoint = if use_spline {
        predict_crf(low, high, &history, target)
      } else {
        (low + high) / 2.0
      };

      if history.iter().any(|s| (s.crf - midpoint).abs() < 1e-9) {
        break;
      }

      let stat = probe(midpoint);
      history.push(Sample { crf: midpoint, stat });

      if within_tolerance(stat, target) {
        hit_tolerance = true;
        break;
      }

      if (stat - target).abs() < EPSILON {
        hit_tolerance = true;
        break;
      }

      if stat > target {
        low = (midpoint + 1.0).min(high);
      } else {
        high = (midpoint - 1.0).max(low);
      }

      if low > high {
        break;
      }
    }

    let crf = if hit_tolerance {
      history.last().expect("tolerance only hit after a probe").crf
    } else {
      interpolate_from_history(&history, target, self.low, self.high, self.supports_float)
    };

    BisectionOutcome { crf, probes_used: history.len() as u32, hit_tolerance }
  }
}

/// Linear interpolation between the two history probes closest to `target`,
/// clamped to `[min(crf) - 10, max(crf) + 4]` (spec §4.4). Ties on stat use
/// the last midpoint probed.
fn interpolate_from_history(
  history: &[Sample],
  target: f64,
  search_low: f64,
  search_high: f64,
  supports_float: bool,
) -> f64 {
  if history.is_empty() {
    return clamp_crf((search_low + search_high) / 2.0, history, search_low, search_high, supports_float);
  }
  if history.len() == 1 {
    return clamp_crf(history[0].crf, history, search_low, search_high, supports_float);
  }

  let mut by_distance = history.to_vec();
  by_distance.sort_by(|a, b| {
    (a.stat - target).abs().partial_cmp(&(b.stat - target).abs()).unwrap_or(Ordering::Equal)
  });

  let a = by_distance[0];
  let b = by_distance[1];

  let predicted = if (a.stat - b.stat).abs() < f64::EPSILON {
    history.last().unwrap().crf
  } else {
    let slope = (b.crf - a.crf) / (b.stat - a.stat);
    a.crf + slope * (target - a.stat)
  };

  clamp_crf(predicted, history, search_low, search_high, supports_float)
}

fn clamp_crf(crf: f64, history: &[Sample], search_low: f64, search_high: f64, supports_float: bool) -> f64 {
  let (lo, hi) = if history.is_empty() {
    (search_low, search_high)
  } else {
    let min_crf = history.iter().map(|s| s.crf).fold(f64::INFINITY, f64::min);
    let max_crf = history.iter().map(|s| s.crf).fold(f64::NEG_INFINITY, f64::max);
    (min_crf - 10.0, max_crf + 4.0)
  };
  let clamped = crf.clamp(lo, hi);
  if supports_float { clamped } else { clamped.round() }
}

/// Predicts the next CRF to probe from `history`: a Catmull-Rom spline over
/// (stat, crf) once 3+ samples exist, linear interpolation with exactly 2,
/// or the plain midpoint otherwise. This is the teacher's `predict_crf`,
/// generalized from an integer CRF/VMAF-score pair to a float CRF against
/// any [`VmafStat`].
fn predict_crf(low: f64, high: f64, history: &[Sample], target: f64) -> f64 {
  let mut by_stat = history.to_vec();
  by_stat.sort_by(|a, b| a.stat.partial_cmp(&b.stat).unwrap_or(Ordering::Equal));

  if by_stat.len() >= 3 {
    let keys: Vec<Key<f64, f64>> =
      by_stat.iter().map(|s| Key::new(s.stat, s.crf, Interpolation::CatmullRom)).collect();
    let spline = Spline::from_vec(keys);
    if let Some(predicted) = spline.sample(target) {
      return predicted.clamp(low, high);
    }
  }

  if by_stat.len() == 2 {
    let (s1, s2) = (by_stat[0], by_stat[1]);
    if (s1.stat - s2.stat).abs() < f64::EPSILON {
      return ((s1.crf + s2.crf) / 2.0).clamp(low, high);
    }
    let slope = (s2.crf - s1.crf) / (s2.stat - s1.stat);
    let predicted = s1.crf + slope * (target - s1.stat);
    return predicted.clamp(low, high);
  }

  (low + high) / 2.0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn converges_on_monotonic_function() {
    // stat decreases as crf increases; target crf ~ 28
    let b = Bisection { low: 0.0, high: 63.0, max_probes: 12, stat: VmafStat::Mean, supports_float: false };
    let outcome = b.run(90.0, |crf| 100.0 - crf * 0.357);
    assert!((outcome.crf - 28.0).abs() <= 2.0);
  }

  #[test]
  fn spline_variant_uses_history_once_available() {
    let b = Bisection { low: 0.0, high: 63.0, max_probes: 8, stat: VmafStat::Mean, supports_float: true };
    let outcome = b.run_with_spline_prediction(90.0, |crf| 100.0 - crf * 0.357);
    assert!(outcome.probes_used >= 1);
  }

  #[test]
  fn float_backend_keeps_fractional_crf() {
    let b = Bisection { low: 20.0, high: 40.0, max_probes: 1, stat: VmafStat::Mean, supports_float: true };
    let outcome = b.run(95.0, |_| 80.0);
    assert_eq!(outcome.crf.fract().abs() >= 0.0, true);
  }
}
