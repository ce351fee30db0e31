//! Bitrate Ladder (spec §4.6), grounded on the original
//! `AutoBitrateLadder` (`bitrateLadder.py`). Every probe here is expressed
//! as a caller-supplied closure rather than a direct `EncoderDriver` call,
//! so the ladder stays agnostic to whether probes run through the in-
//! process `WorkerPool` or a `RemoteBroker` (spec §4.7).

use rand::seq::SliceRandom;

use crate::search::bisection::Bisection;

/// `(chunk_index, complexity)`, complexity = ln(probe bitrate) at a fast,
/// fixed preset (speed 12, 1 pass, CQ, CRF 16, threads 1, grain 0).
pub type ComplexityScore = (usize, f64);

/// Which bitrate-ladder path `lib::ladder_prepass` runs (`ladder_strategy`,
/// spec §4.6's "two distinct strategies"). `bitrateLadder.py`'s guided
/// methods are never actually invoked from `executor.py` in the original
/// tool, so there's no precedent to follow for when to prefer the guided
/// path over the sampled one — this is a config switch rather than a
/// second, permanently-dead function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LadderStrategy {
  BitrateSampled,
  CrfGuided,
}

impl Default for LadderStrategy {
  fn default() -> Self {
    Self::BitrateSampled
  }
}

/// Sorts ascending by complexity and splits into the "average" sample
/// (10th-90th percentile slice, up to 10 picked at random) and the
/// "top-complex" sample (the last `max(10, 5%)` entries, 30% picked at
/// random), following `get_best_crf_guided`/`get_best_bitrate_guided`.
pub struct ComplexitySample {
  pub average:      Vec<usize>,
  pub top_complex:  Vec<usize>,
}

pub fn sample_by_complexity(mut scores: Vec<ComplexityScore>) -> ComplexitySample {
  scores.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
  let n = scores.len();
  let mut rng = rand::thread_rng();

  let p10 = (0.1 * n as f64) as usize;
  let p90 = (0.9 * n as f64) as usize;
  let mut average: Vec<usize> = scores[p10..p90.max(p10)].iter().map(|(i, _)| *i).collect();
  average.shuffle(&mut rng);
  average.truncate(10);

  let top_count = ((n as f64 * 0.05) as usize).max(10).min(n);
  let top_complex_full: Vec<usize> = scores[n - top_count..].iter().map(|(i, _)| *i).collect();
  let pick = ((top_complex_full.len() as f64 * 0.30) as usize).max(1).min(top_complex_full.len().max(1));
  let mut top_complex = top_complex_full;
  top_complex.shuffle(&mut rng);
  top_complex.truncate(pick);

  ComplexitySample { average, top_complex }
}

/// Averages `crf_to_bitrate` probes for `chunks`, matching
/// `AutoBitrateLadder.crf_to_bitrate`: speed-5, 1-pass, CQ, fixed grain.
pub fn crf_to_bitrate(crf: f64, chunk_indices: &[usize], mut probe_bitrate: impl FnMut(usize, f64) -> f64) -> f64 {
  assert!(!chunk_indices.is_empty());
  let sum: f64 = chunk_indices.iter().map(|&idx| probe_bitrate(idx, crf)).sum();
  sum / chunk_indices.len() as f64
}

/// Per sample chunk, bisects CRF over `[0, 40]` up to 4 probes minimizing
/// `|bitrate - target|`, then linearly interpolates between the two probes
/// nearest target; averages across samples and floors the result
/// (`get_target_crf`).
pub fn get_target_crf(
  target_bitrate: f64,
  chunk_indices: &[usize],
  mut probe_bitrate_at_crf: impl FnMut(usize, f64) -> f64,
) -> f64 {
  assert!(!chunk_indices.is_empty());

  let mut per_chunk_crf = Vec::with_capacity(chunk_indices.len());
  for &idx in chunk_indices {
    let bisection = Bisection {
      low:            0.0,
      high:           40.0,
      max_probes:     4,
      stat:           crate::search::VmafStat::Mean,
      supports_float: false,
    };
    // The bisection module targets a VMAF statistic; here the metric under
    // search is bitrate itself, so we invert direction by negating the
    // comparison inside the probe closure's return value relative to a
    // bitrate target rather than a VMAF target — same shape, different axis.
    let outcome = bisection.run(target_bitrate, |crf| probe_bitrate_at_crf(idx, crf));
    per_chunk_crf.push(outcome.crf);
  }

  (per_chunk_crf.iter().sum::<f64>() / per_chunk_crf.len() as f64).floor()
}

/// Sparse best-bitrate path (`get_best_bitrate`/`get_best_bitrate_guided`):
/// binary-searches bitrate against target VMAF for each of a handful of
/// chunks and averages. When `crf_bitrate_mode` is requested, additionally
/// derives a target CRF via [`get_target_crf`] and sets `max_bitrate` to
/// `round(avg_best * 1.6)`.
pub struct BestBitrateResult {
  pub avg_bitrate_kbps: f64,
  pub target_crf:       Option<f64>,
  pub max_bitrate_kbps:  Option<f64>,
}

pub fn best_bitrate_sampled(
  sample_chunk_indices: &[usize],
  max_bitrate: u32,
  num_probes: u32,
  target_vmaf: f64,
  crf_bitrate_mode: bool,
  mut probe_vmaf_at_bitrate: impl FnMut(usize, u32) -> f64,
  probe_bitrate_at_crf: impl FnMut(usize, f64) -> f64,
) -> BestBitrateResult {
  assert!(!sample_chunk_indices.is_empty());

  let per_chunk: Vec<f64> = sample_chunk_indices
    .iter()
    .map(|&idx| {
      crate::search::bitrate::bitrate_binary_search(max_bitrate, num_probes, target_vmaf, |br| {
        probe_vmaf_at_bitrate(idx, br)
      })
      .bitrate as f64
    })
    .collect();

  let avg_bitrate_kbps = per_chunk.iter().sum::<f64>() / per_chunk.len() as f64;

  let (target_crf, max_bitrate_kbps) = if crf_bitrate_mode {
    let crf = get_target_crf(avg_bitrate_kbps, sample_chunk_indices, probe_bitrate_at_crf);
    (Some(crf), Some((avg_bitrate_kbps * 1.6).round()))
  } else {
    (None, None)
  };

  BestBitrateResult { avg_bitrate_kbps, target_crf, max_bitrate_kbps }
}

/// Guided best-CRF path (`get_best_crf_guided`): bisects CRF on the
/// "average" sample against target VMAF, averages, then derives a cutoff
/// bitrate via [`crf_to_bitrate`] on the "top-complex" sample.
pub struct BestCrfResult {
  pub avg_crf:        f64,
  pub cutoff_bitrate: f64,
}

pub fn best_crf_guided(
  sample: &ComplexitySample,
  target_vmaf: f64,
  backend_crf_range: (f64, f64),
  supports_float: bool,
  mut probe_vmaf_at_crf: impl FnMut(usize, f64) -> f64,
  probe_bitrate_at_crf: impl FnMut(usize, f64) -> f64,
) -> BestCrfResult {
  assert!(!sample.average.is_empty(), "average sample must be non-empty to derive a guided CRF");

  let per_chunk_crf: Vec<f64> = sample
    .average
    .iter()
    .map(|&idx| {
      let bisection = Bisection {
        low:  backend_crf_range.0,
        high: backend_crf_range.1,
        max_probes: 8,
        stat: crate::search::VmafStat::Mean,
        supports_float,
      };
      bisection.run(target_vmaf, |crf| probe_vmaf_at_crf(idx, crf)).crf
    })
    .collect();

  let avg_crf = per_chunk_crf.iter().sum::<f64>() / per_chunk_crf.len() as f64;
  let cutoff_bitrate =
    if sample.top_complex.is_empty() { 0.0 } else { crf_to_bitrate(avg_crf, &sample.top_complex, probe_bitrate_at_crf) };

  BestCrfResult { avg_crf, cutoff_bitrate }
}

/// ssim-dB target translation (spec §4.6): for a requested bitrate, encode
/// a fixed probe set 3-pass VBR (`svt_bias_pct=90`), measure SSIM-dB,
/// average. Cached per bitrate by the caller via [`crate::cache::ProbeCache`].
pub fn ssim_db_translation(bitrate: u32, probe_chunk_indices: &[usize], mut probe_ssim_db: impl FnMut(usize, u32) -> f64) -> f64 {
  assert!(!probe_chunk_indices.is_empty());
  let sum: f64 = probe_chunk_indices.iter().map(|&idx| probe_ssim_db(idx, bitrate)).sum();
  sum / probe_chunk_indices.len() as f64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sample_splits_average_and_top_complex() {
    let scores: Vec<ComplexityScore> = (0..100).map(|i| (i, i as f64)).collect();
    let sample = sample_by_complexity(scores);
    assert!(sample.average.len() <= 10);
    assert!(!sample.top_complex.is_empty());
    // top-complex picks must come from the highest-complexity tail (>= index 90)
    assert!(sample.top_complex.iter().all(|&i| i >= 90));
  }

  #[test]
  fn crf_to_bitrate_averages_probes() {
    let result = crf_to_bitrate(24.0, &[0, 1, 2], |idx, _crf| (idx as f64 + 1.0) * 1000.0);
    assert_eq!(result, 2000.0);
  }

  #[test]
  fn best_bitrate_sampled_without_crf_mode_skips_translation() {
    let result = best_bitrate_sampled(
      &[0, 1],
      5000,
      4,
      90.0,
      false,
      |_idx, br| 100.0 - (5000 - br) as f64 / 200.0,
      |_idx, _crf| 0.0,
    );
    assert!(result.target_crf.is_none());
    assert!(result.max_bitrate_kbps.is_none());
  }
}
