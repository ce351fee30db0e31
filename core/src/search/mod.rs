//! Search Strategies (spec §4.4): every strategy operates on a probing
//! closure `crf/bitrate -> ProbePoint` supplied by the pipeline, and returns
//! the chosen point. None of these strategies spawn an encoder themselves —
//! that stays the pipeline's job, via [`crate::encoder::EncoderDriver`].

pub mod bayesian;
pub mod bisection;
pub mod bitrate;
pub mod ternary;
pub mod weighted_grid;

pub use bisection::{Bisection, BisectionOutcome};
pub use ternary::ternary_search;
pub use weighted_grid::{GridWeights, weighted_grid_search};

/// One probed (CRF or bitrate, quality, size) sample (spec §3 `ProbePoint`).
/// Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProbePoint {
  pub crf:     f64,
  pub vmaf:    crate::metrics::VmafResult,
  pub ssim:    Option<f64>,
  pub bitrate: f64,
}

/// Which VMAF aggregate a bisection targets (`vmaf_target_representation`,
/// spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VmafStat {
  Mean,
  HarmonicMean,
  Min,
  Max,
  Median,
  Percentile1,
  Percentile5,
  Percentile10,
  Percentile25,
  Percentile50,
}

impl VmafStat {
  pub fn extract(self, vmaf: &crate::metrics::VmafResult) -> f64 {
    match self {
      Self::Mean => vmaf.mean,
      Self::HarmonicMean => vmaf.harmonic_mean,
      Self::Min => vmaf.min,
      Self::Max => vmaf.max,
      Self::Median | Self::Percentile50 => vmaf.percentile_50,
      Self::Percentile1 => vmaf.percentile_1,
      Self::Percentile5 => vmaf.percentile_5,
      Self::Percentile10 => vmaf.percentile_10,
      Self::Percentile25 => vmaf.percentile_25,
    }
  }
}

/// `(score - target).abs() / target < 0.01`, exactly the teacher's
/// `within_tolerance`.
pub fn within_tolerance(score: f64, target: f64) -> bool {
  (score - target).abs() / target < 0.01
}

/// Which CRF search strategy a VMAF-targeting analyzer step runs
/// (`crf_search_strategy`, spec §4.4). The original tool only ever wired one
/// of these at a time by commenting/uncommenting a call in `executor.py`
/// (`opt_primitive`, `optimisation_tenary`, `opt_optuna`,
/// `opt_optuna_modelless`); this exposes the same choice as a config value
/// instead of a source edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CrfSearchStrategy {
  Bisection,
  WeightedGrid,
  Ternary,
  Bayesian,
  BayesianMultiObjective,
}

impl Default for CrfSearchStrategy {
  fn default() -> Self {
    Self::Bisection
  }
}
