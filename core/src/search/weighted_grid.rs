//! Weighted-score grid search (spec §4.4): probe a fixed CRF set and pick
//! the point minimizing a weighted sum of five penalties.

use super::ProbePoint;

/// The five weights from `crf_model_weights` (spec §4.8), in the order the
/// spec lists the penalties: below-target, above-target, bitrate,
/// average-distance, percentile-5.
#[derive(Debug, Clone, Copy)]
pub struct GridWeights {
  pub below:   f64,
  pub above:   f64,
  pub bitrate: f64,
  pub avg:     f64,
  pub p5:      f64,
}

impl GridWeights {
  /// Parses the `crf_model_weights` CSV config value: 5 comma-separated
  /// floats in `below,above,bitrate,avg,p5` order.
  pub fn parse(csv: &str) -> Result<Self, crate::error::ConfigError> {
    let parts: Vec<f64> = csv.split(',').filter_map(|s| s.trim().parse().ok()).collect();
    if parts.len() != 5 {
      return Err(crate::error::ConfigError::InvalidWeightVector(csv.to_string()));
    }
    Ok(Self { below: parts[0], above: parts[1], bitrate: parts[2], avg: parts[3], p5: parts[4] })
  }
}

impl Default for GridWeights {
  fn default() -> Self {
    Self { below: 1.0, above: 1.0, bitrate: 0.5, avg: 0.5, p5: 1.0 }
  }
}

/// CRF values probed by the default weighted-grid search (spec §4.4).
pub const DEFAULT_GRID: &[f64] = &[18.0, 20.0, 22.0, 24.0, 28.0, 30.0, 32.0, 34.0, 36.0, 38.0, 40.0, 44.0, 54.0];

fn score(point: &ProbePoint, target_vmaf: f64, vmaf_avg: f64, bad_offset: f64, w: GridWeights) -> f64 {
  let vmaf = point.vmaf.mean;
  w.below * (target_vmaf - vmaf).max(0.0)
    + w.above * (vmaf - target_vmaf).max(0.0)
    + w.avg * (vmaf_avg - vmaf).abs()
    + w.p5 * ((target_vmaf - bad_offset) - point.vmaf.percentile_5).max(0.0)
    + w.bitrate * (point.bitrate / 100.0).max(1.0)
}

/// Probes every CRF in `grid` via `probe`, scores each with the five-penalty
/// formula (spec §4.4), and returns the lowest-scoring point. Ties break
/// toward the lower CRF (higher quality), per spec's tie-break rule.
pub fn weighted_grid_search(
  grid: &[f64],
  target_vmaf: f64,
  bad_offset: f64,
  weights: GridWeights,
  mut probe: impl FnMut(f64) -> ProbePoint,
) -> ProbePoint {
  assert!(!grid.is_empty(), "weighted grid search requires at least one CRF candidate");

  let points: Vec<ProbePoint> = grid.iter().map(|&crf| probe(crf)).collect();
  let vmaf_avg = crate::metrics::mean(&points.iter().map(|p| p.vmaf.mean).collect::<Vec<_>>());

  let mut best = points[0];
  let mut best_score = score(&best, target_vmaf, vmaf_avg, bad_offset, weights);

  for point in &points[1..] {
    let s = score(point, target_vmaf, vmaf_avg, bad_offset, weights);
    if s < best_score || (s == best_score && point.crf < best.crf) {
      best = *point;
      best_score = s;
    }
  }

  best
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metrics::VmafResult;

  fn point(crf: f64, vmaf_mean: f64, bitrate: f64) -> ProbePoint {
    let mut vmaf = VmafResult::from_frame_scores(&[vmaf_mean; 4]);
    vmaf.mean = vmaf_mean;
    ProbePoint { crf, vmaf, ssim: None, bitrate }
  }

  #[test]
  fn picks_point_closest_to_target() {
    let grid = [20.0, 28.0, 36.0];
    let result = weighted_grid_search(&grid, 90.0, 6.0, GridWeights::default(), |crf| match crf {
      20.0 => point(20.0, 97.0, 4000.0),
      28.0 => point(28.0, 90.5, 1500.0),
      _ => point(36.0, 70.0, 500.0),
    });
    assert_eq!(result.crf, 28.0);
  }

  #[test]
  fn parses_five_weight_csv() {
    let w = GridWeights::parse("1.0,2.0,0.5,0.3,1.2").unwrap();
    assert_eq!(w.above, 2.0);
    assert_eq!(w.p5, 1.2);
  }

  #[test]
  fn rejects_wrong_arity_csv() {
    assert!(GridWeights::parse("1.0,2.0").is_err());
  }
}
