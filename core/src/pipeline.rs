//! Per-Chunk Pipeline (spec §4.5): `Created -> Analyzing -> Finalizing ->
//! (Succeeded | Failed)`. Grounded on the original `executor.py`
//! (`analyzer_factory`/`finalencode_factory`/`AdaptiveCommand.run`) and the
//! teacher's `broker::encode_chunk` (timing, retry isolation, JSONL append).

use std::{
  io::Write,
  path::Path,
  time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{
  chunk::Chunk,
  config::Config,
  encoder::{params::EncoderParams, EncodeStats},
  search::{
    bayesian, bisection::Bisection, ternary::ternary_search,
    weighted_grid::{self, GridWeights},
    CrfSearchStrategy, ProbePoint,
  },
};

pub const FINAL_ENCODE_TIMEOUT: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Created,
  Analyzing,
  Finalizing,
  Succeeded,
  Failed,
}

/// Which analyzer step runs after the always-first `BaseAnalyzer` (spec
/// §4.5 step 2). Selection priority: test-flag -> VMAF-targeting ->
/// capped-CRF -> plain-CRF -> per-chunk-VBR -> plain-VBR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerKind {
  PlainCrf,
  PlainVbr,
  CappedCrf,
  VbrPerChunk,
  TargetVmaf,
  TargetX264,
}

pub fn select_analyzer(config: &Config) -> AnalyzerKind {
  if config.test_flag {
    AnalyzerKind::PlainCrf
  } else if config.crf_based_vmaf_targeting {
    if config.target_x264_tuning {
      AnalyzerKind::TargetX264
    } else {
      AnalyzerKind::TargetVmaf
    }
  } else if config.crf_bitrate_mode {
    AnalyzerKind::CappedCrf
  } else if config.crf >= 0.0 {
    AnalyzerKind::PlainCrf
  } else if config.bitrate_adjust_mode_is_chunk() {
    AnalyzerKind::VbrPerChunk
  } else {
    AnalyzerKind::PlainVbr
  }
}

/// Finalizer selection (spec §4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerKind {
  Plain,
  WeirdCappedCrf,
}

pub fn select_finalizer(config: &Config) -> FinalizerKind {
  if config.test_flag { FinalizerKind::WeirdCappedCrf } else { FinalizerKind::Plain }
}

/// The *BaseAnalyzer* step: always runs first, stages grain-synth/speed/CQ/
/// CRF/1-pass/quantization-matrix defaults onto a fresh parameter set.
pub fn base_analyzer(params: &mut EncoderParams, config: &Config) {
  params.grain_synth = config.grain_synth;
  params.speed = config.speed;
  params.rate_distribution = crate::encoder::RateDistribution::Cq;
  params.crf = config.crf;
  params.passes = 1;
  params.qm_enabled = true;
  params.qm_min = 0;
  params.qm_max = 8;
}

/// Bundles the probes an analyzer step needs, so [`apply_analyzer`] stays
/// agnostic to how a probe is actually run (through [`crate::worker::WorkerPool`]
/// or a `RemoteBroker`).
pub struct AnalyzerProbes<'a> {
  /// Probes a full (CRF, VMAF, bitrate) point at a given CRF, shared by
  /// every CRF search strategy so none of them has to special-case how a
  /// probe encode is actually run.
  pub probe_at_crf:   &'a mut dyn FnMut(f64) -> ProbePoint,
  /// Looks up this chunk's ladder-assigned bitrate (VbrPerChunk step).
  pub ladder_bitrate: Option<f64>,
}

/// Applies the selected analyzer step on top of [`base_analyzer`]'s
/// defaults, following each step's shape in `executor.py`.
pub fn apply_analyzer(kind: AnalyzerKind, config: &Config, params: &mut EncoderParams, probes: &mut AnalyzerProbes) {
  match kind {
    AnalyzerKind::PlainCrf => {
      params.rate_distribution = crate::encoder::RateDistribution::Cq;
      params.crf = config.crf;
      params.passes = 1;
    },
    AnalyzerKind::CappedCrf => {
      params.rate_distribution = crate::encoder::RateDistribution::CqVbv;
      params.max_bitrate = Some(config.max_bitrate.unwrap_or(0.0) as u32);
      params.crf = config.crf;
      params.passes = 1;
    },
    AnalyzerKind::PlainVbr => {
      params.rate_distribution = crate::encoder::RateDistribution::Vbr;
      params.bitrate = config.bitrate.unwrap_or(0.0) as u32;
      params.passes = 3;
    },
    AnalyzerKind::VbrPerChunk => {
      params.rate_distribution = crate::encoder::RateDistribution::Vbr;
      params.bitrate = probes.ladder_bitrate.unwrap_or(config.bitrate.unwrap_or(0.0)) as u32;
      params.passes = 3;
    },
    AnalyzerKind::TargetVmaf | AnalyzerKind::TargetX264 => {
      const BAD_OFFSET: f64 = 1.0;
      let target_vmaf = config.vmaf - BAD_OFFSET;
      let target_p5_vmaf = target_vmaf - BAD_OFFSET;
      let (low, high) = params.backend.crf_range();
      let stat = config.vmaf_target_representation;

      let crf = match config.crf_search_strategy {
        CrfSearchStrategy::Bisection => {
          let bisection = Bisection {
            low,
            high,
            max_probes: config.vmaf_probe_count,
            stat,
            supports_float: params.backend.supports_float_crf(),
          };
          bisection.run(target_vmaf, |crf| stat.extract(&(probes.probe_at_crf)(crf).vmaf)).crf
        },
        CrfSearchStrategy::WeightedGrid => {
          let weights = GridWeights::parse(&config.crf_model_weights).unwrap_or_default();
          weighted_grid::weighted_grid_search(weighted_grid::DEFAULT_GRID, target_vmaf, BAD_OFFSET, weights, |crf| {
            (probes.probe_at_crf)(crf)
          })
          .crf
        },
        CrfSearchStrategy::Ternary => ternary_search(low, high, (config.vmaf_probe_count / 2).max(1), |crf| {
          (stat.extract(&(probes.probe_at_crf)(crf).vmaf) - target_vmaf).abs()
        }),
        CrfSearchStrategy::Bayesian => {
          bayesian::single_objective(
            config.vmaf_probe_count,
            |crf| (probes.probe_at_crf)(crf),
            |p| (stat.extract(&p.vmaf) - target_vmaf).abs(),
          )
          .crf
        },
        CrfSearchStrategy::BayesianMultiObjective => {
          bayesian::multi_objective(config.vmaf_probe_count, target_vmaf, target_p5_vmaf, |crf| (probes.probe_at_crf)(crf)).crf
        },
      };

      params.rate_distribution = crate::encoder::RateDistribution::Cq;
      params.crf = crf;
      params.passes = 1;

      if kind == AnalyzerKind::TargetX264 {
        // TargetX264 follows up with a three-pass VBR pass at the bitrate
        // discovered during the CRF probe (the last analyzer-stage probe's
        // measured bitrate becomes the finalizer's VBR target).
        params.passes = 3;
        params.rate_distribution = crate::encoder::RateDistribution::Vbr;
      }
    },
  }
}

/// Runs the selected finalizer against an already-analyzed driver.
/// [`FinalizerKind::WeirdCappedCrf`] re-encodes as 3-pass VBR when the
/// CRF pass's measured bitrate exceeds the sequence cutoff (spec §4.5 step
/// 3), matching `WeridCapedCrfFinalEncode.run`.
pub async fn run_finalizer<'a>(
  kind: FinalizerKind,
  driver: &mut crate::encoder::EncoderDriver<'a>,
  cutoff_bitrate_kbps: f64,
  metrics: crate::encoder::driver::MetricRequest,
  resolution: &str,
) -> Result<EncodeStats, crate::error::EncodeFailure> {
  let first = driver.run(true, Some(FINAL_ENCODE_TIMEOUT), metrics, resolution).await?;

  if kind == FinalizerKind::Plain {
    return Ok(first);
  }

  if first.bitrate_kbps <= cutoff_bitrate_kbps {
    return Ok(first);
  }

  let encode_bitrate = first.bitrate_kbps.min(cutoff_bitrate_kbps).round() as u32;
  let _ = std::fs::remove_file(&driver.params().output_path);
  driver.update(|p| {
    p.passes = 3;
    p.update_bitrate(encode_bitrate);
  });

  driver.run(true, Some(FINAL_ENCODE_TIMEOUT), metrics, resolution).await
}

/// One line of `chunks.log` (spec §4.5 step 4): appended best-effort, never
/// fatal if the write fails.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkLogEntry {
  pub chunk_index:      usize,
  pub status:            String,
  pub total_fps:         f64,
  pub target_miss_pct:   f64,
  pub rate_search_secs:  f64,
  pub final_secs:        f64,
  pub bitrate_kbps:      f64,
  pub vmaf_mean:         Option<f64>,
}

pub fn append_chunk_log(temp_dir: &Path, entry: &ChunkLogEntry) {
  let path = temp_dir.join("chunks.log");
  let line = match serde_json::to_string(entry) {
    Ok(l) => l,
    Err(e) => {
      tracing::warn!("failed to serialize chunk log entry: {e}");
      return;
    },
  };
  if let Err(e) = std::fs::OpenOptions::new().create(true).append(true).open(&path).and_then(|mut f| {
    writeln!(f, "{line}")
  }) {
    tracing::warn!("failed to append to chunks.log: {e}");
  }
}

/// Runs the full per-chunk state machine for one chunk: analyzer chain,
/// then finalizer, recording timing/miss-percentage stats. A failure during
/// finalization is logged with the chunk index and reported as
/// [`PipelineState::Failed`] without aborting sibling chunks — that
/// isolation lives one layer up, in [`crate::worker::WorkerPool`].
pub async fn run_chunk_pipeline<'a>(
  chunk: &'a Chunk,
  config: &Config,
  mut params: EncoderParams,
  mut probes: AnalyzerProbes<'_>,
  cutoff_bitrate_kbps: f64,
  metrics: crate::encoder::driver::MetricRequest,
  resolution: &str,
  temp_dir: &Path,
  dry_run: bool,
) -> (PipelineState, Option<EncodeStats>) {
  let total_start = Instant::now();

  base_analyzer(&mut params, config);
  let analyzer = select_analyzer(config);
  let analyze_start = Instant::now();
  apply_analyzer(analyzer, config, &mut params, &mut probes);
  let rate_search_secs = analyze_start.elapsed().as_secs_f64();

  let requested_bitrate = if params.rate_distribution == crate::encoder::RateDistribution::Vbr
    || params.rate_distribution == crate::encoder::RateDistribution::VbrVbv
  {
    params.bitrate as f64
  } else {
    0.0
  };

  let mut driver = crate::encoder::EncoderDriver::new(chunk, params);

  if dry_run {
    for line in driver.dry_run() {
      println!("{line}");
    }
    return (PipelineState::Created, None);
  }

  let finalizer = select_finalizer(config);
  let finalize_start = Instant::now();
  let result = run_finalizer(finalizer, &mut driver, cutoff_bitrate_kbps, metrics, resolution).await;
  let final_secs = finalize_start.elapsed().as_secs_f64();

  match result {
    Ok(stats) => {
      let total_fps = chunk.frame_count() as f64 / total_start.elapsed().as_secs_f64().max(1.0);
      let target_miss_pct = if requested_bitrate > 0.0 {
        (stats.bitrate_kbps - requested_bitrate) / requested_bitrate * 100.0
      } else {
        0.0
      };

      append_chunk_log(
        temp_dir,
        &ChunkLogEntry {
          chunk_index: chunk.index,
          status: "succeeded".to_string(),
          total_fps,
          target_miss_pct,
          rate_search_secs,
          final_secs,
          bitrate_kbps: stats.bitrate_kbps,
          vmaf_mean: stats.vmaf.map(|v| v.mean),
        },
      );

      (PipelineState::Succeeded, Some(stats))
    },
    Err(e) => {
      tracing::error!(chunk = chunk.index, "finalization failed: {e}");
      append_chunk_log(
        temp_dir,
        &ChunkLogEntry {
          chunk_index: chunk.index,
          status: "failed".to_string(),
          total_fps: 0.0,
          target_miss_pct: 0.0,
          rate_search_secs,
          final_secs,
          bitrate_kbps: 0.0,
          vmaf_mean: None,
        },
      );
      (PipelineState::Failed, None)
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base_config() -> Config {
    Config::default()
  }

  #[test]
  fn priority_prefers_test_flag_over_everything() {
    let mut config = base_config();
    config.test_flag = true;
    config.crf_based_vmaf_targeting = true;
    assert_eq!(select_analyzer(&config), AnalyzerKind::PlainCrf);
  }

  #[test]
  fn priority_prefers_vmaf_targeting_over_capped_crf() {
    let mut config = base_config();
    config.crf_based_vmaf_targeting = true;
    config.crf_bitrate_mode = true;
    assert_eq!(select_analyzer(&config), AnalyzerKind::TargetVmaf);
  }

  #[test]
  fn priority_falls_back_to_plain_vbr() {
    let mut config = base_config();
    config.crf = -1.0;
    assert_eq!(select_analyzer(&config), AnalyzerKind::PlainVbr);
  }

  #[test]
  fn test_flag_selects_weird_capped_crf_finalizer() {
    let mut config = base_config();
    config.test_flag = true;
    assert_eq!(select_finalizer(&config), FinalizerKind::WeirdCappedCrf);
  }
}
