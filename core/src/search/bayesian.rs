//! Bayesian-style CRF search (spec §4.4). The teacher's dependency stack
//! carries no black-box optimizer crate (no `argmin`/`friedrich`-style
//! Gaussian-process library appears anywhere in the example pack), so this
//! module is a from-scratch approximation rather than a wrapped external
//! optimizer: random exploration seeded across the bracket, refined by
//! greedy local search around the best trial so far, within the same
//! `max_probes` trial budget the spec gives a real Bayesian optimizer. See
//! DESIGN.md for why this substitution was made.

use rand::Rng;

use super::ProbePoint;

/// Single-objective: minimizes a scalar `score(point)` over integer CRF in
/// `[0, 63]` within `max_probes` trials.
pub fn single_objective(
  max_probes: u32,
  mut probe: impl FnMut(f64) -> ProbePoint,
  score: impl Fn(&ProbePoint) -> f64,
) -> ProbePoint {
  let mut rng = rand::thread_rng();
  let mut best: Option<(ProbePoint, f64)> = None;
  let exploration_budget = (max_probes / 2).max(1);

  for i in 0..max_probes {
    let crf = if i < exploration_budget || best.is_none() {
      rng.gen_range(0..=63) as f64
    } else {
      let (best_point, _) = best.as_ref().unwrap();
      let jitter = rng.gen_range(-3i32..=3) as f64;
      (best_point.crf + jitter).clamp(0.0, 63.0)
    };

    let point = probe(crf);
    let s = score(&point);
    if best.as_ref().map_or(true, |(_, best_s)| s < *best_s) {
      best = Some((point, s));
    }
  }

  best.expect("max_probes > 0").0
}

/// Multi-objective: minimizes the triple `(|target_vmaf - vmaf|,
/// |target_p5 - vmaf_p5|, bitrate/1000)`. Builds an approximate Pareto
/// front from the trial set, then returns the front member with the best
/// (lowest) sum of normalized objectives as the representative "first
/// Pareto front" choice (spec §4.4 leaves the exact front tie-break
/// unspecified).
pub fn multi_objective(
  max_probes: u32,
  target_vmaf: f64,
  target_p5: f64,
  mut probe: impl FnMut(f64) -> ProbePoint,
) -> ProbePoint {
  let mut rng = rand::thread_rng();
  let mut trials: Vec<(ProbePoint, [f64; 3])> = Vec::with_capacity(max_probes as usize);

  for _ in 0..max_probes {
    let crf = rng.gen_range(0..=63) as f64;
    let point = probe(crf);
    let objectives = [
      (target_vmaf - point.vmaf.mean).abs(),
      (target_p5 - point.vmaf.percentile_5).abs(),
      point.bitrate / 1000.0,
    ];
    trials.push((point, objectives));
  }

  let front = pareto_front(&trials);
  front
    .into_iter()
    .min_by(|a, b| {
      let sa: f64 = a.1.iter().sum();
      let sb: f64 = b.1.iter().sum();
      sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
    })
    .expect("max_probes > 0")
    .0
}

fn pareto_front(trials: &[(ProbePoint, [f64; 3])]) -> Vec<(ProbePoint, [f64; 3])> {
  trials
    .iter()
    .filter(|(_, obj)| !trials.iter().any(|(_, other)| dominates(other, obj)))
    .cloned()
    .collect()
}

fn dominates(a: &[f64; 3], b: &[f64; 3]) -> bool {
  let not_worse = a.iter().zip(b.iter()).all(|(x, y)| x <= y);
  let strictly_better = a.iter().zip(b.iter()).any(|(x, y)| x < y);
  not_worse && strictly_better
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metrics::VmafResult;

  fn point(crf: f64, mean: f64, p5: f64, bitrate: f64) -> ProbePoint {
    let mut vmaf = VmafResult::from_frame_scores(&[mean; 4]);
    vmaf.mean = mean;
    vmaf.percentile_5 = p5;
    ProbePoint { crf, vmaf, ssim: None, bitrate }
  }

  #[test]
  fn single_objective_respects_budget() {
    let mut calls = 0;
    let _ = single_objective(
      10,
      |crf| {
        calls += 1;
        point(crf, 90.0, 85.0, 2000.0)
      },
      |p| (p.vmaf.mean - 95.0).abs(),
    );
    assert_eq!(calls, 10);
  }

  #[test]
  fn pareto_front_excludes_dominated_point() {
    let a = (point(20.0, 95.0, 90.0, 3000.0), [0.0, 0.0, 3.0]);
    let b = (point(30.0, 80.0, 70.0, 4000.0), [5.0, 5.0, 4.0]);
    let front = pareto_front(&[a.clone(), b]);
    assert_eq!(front.len(), 1);
    assert_eq!(front[0].0.crf, a.0.crf);
  }
}
