//! Run configuration (spec §4.8), grounded on the teacher's
//! `settings::EncodeArgs` shape: one flat struct covering rate-control
//! targets, search/ladder knobs, VMAF scoring options and worker-pool
//! sizing. Read-only once built — tasks clone the parts they mutate (spec
//! §5 "the prototype encoder in config is read-only").

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
  encoder::Backend,
  error::ConfigError,
  ladder::LadderStrategy,
  metrics::ReferenceDisplay,
  search::{CrfSearchStrategy, VmafStat},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateAdjustMode {
  None,
  Chunk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
  pub backend:                     Backend,
  /// Negative = "unset"; `crf >= 0.0` is what selects `PlainCrf` over the
  /// VBR fallback in the analyzer-chain priority order (spec §4.5).
  pub crf:                         f64,
  pub bitrate:                     Option<f64>,
  pub vmaf:                        f64,
  pub crf_based_vmaf_targeting:    bool,
  pub target_x264_tuning:          bool,
  pub crf_bitrate_mode:            bool,
  #[serde(skip, default)]
  pub bitrate_adjust_mode:         BitrateAdjustModeConfig,
  pub cutoff_bitrate:              Option<f64>,
  pub max_bitrate:                 Option<f64>,
  pub crf_model_weights:           String,
  pub crf_search_strategy:         CrfSearchStrategy,
  pub ladder_strategy:             LadderStrategy,
  pub vmaf_probe_count:            u32,
  pub vmaf_target_representation:  VmafStat,
  pub vmaf_4k_model:               bool,
  pub vmaf_phone_model:            bool,
  pub vmaf_no_motion:              bool,
  pub vmaf_reference_display:      Option<ReferenceDisplay>,
  pub multiprocess_workers:        usize,
  pub use_celery:                  bool,
  pub dry_run:                     bool,
  pub temp_folder:                 PathBuf,
  /// Scale target handed to the Metric Probe's filtergraph (e.g.
  /// `"1920x1080"`). Determining a source's native resolution is an
  /// external collaborator's job, same as scene splitting; this is the
  /// value that collaborator is expected to have already resolved.
  pub resolution:                  String,
  pub override_flags:              Option<String>,
  pub grain_synth:                 i32,
  pub speed:                       u8,
  pub test_flag:                   bool,
  pub resume:                      bool,
}

/// `BitrateAdjustMode` doesn't derive (De)Serialize since it's never part
/// of an on-disk config payload in this crate's CLI (it's always re-derived
/// from the `--bitrate-adjust-mode` flag); kept as a thin newtype so
/// `Config` can still derive `Serialize`/`Deserialize` for its other
/// fields without hand-rolling impls for this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitrateAdjustModeConfig(pub BitrateAdjustMode);

impl Default for BitrateAdjustMode {
  fn default() -> Self {
    Self::None
  }
}

impl Config {
  pub fn bitrate_adjust_mode_is_chunk(&self) -> bool {
    self.bitrate_adjust_mode.0 == BitrateAdjustMode::Chunk
  }

  /// Validates cross-field invariants that aren't expressible in the type
  /// system alone (spec §7 `ConfigError`, fatal).
  pub fn validate(&self) -> Result<(), ConfigError> {
    if let Some(max) = self.max_bitrate {
      if max <= 0.0 {
        return Err(ConfigError::InvalidMaxBitrate(max));
      }
    }
    GridWeightsCheck::parse(&self.crf_model_weights)?;
    Ok(())
  }
}

/// Thin re-validation hook so `Config::validate` can check
/// `crf_model_weights` without the config module depending on the concrete
/// `GridWeights` struct's constructor semantics beyond "does it parse".
struct GridWeightsCheck;
impl GridWeightsCheck {
  fn parse(csv: &str) -> Result<(), ConfigError> {
    crate::search::weighted_grid::GridWeights::parse(csv).map(|_| ())
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      backend: Backend::SvtAv1,
      crf: 28.0,
      bitrate: None,
      vmaf: 95.0,
      crf_based_vmaf_targeting: false,
      target_x264_tuning: false,
      crf_bitrate_mode: false,
      bitrate_adjust_mode: BitrateAdjustModeConfig::default(),
      cutoff_bitrate: None,
      max_bitrate: None,
      crf_model_weights: "1.0,1.0,0.5,0.5,1.0".to_string(),
      crf_search_strategy: CrfSearchStrategy::default(),
      ladder_strategy: LadderStrategy::default(),
      vmaf_probe_count: 8,
      vmaf_target_representation: VmafStat::Mean,
      vmaf_4k_model: false,
      vmaf_phone_model: false,
      vmaf_no_motion: false,
      vmaf_reference_display: None,
      multiprocess_workers: 4,
      use_celery: false,
      dry_run: false,
      temp_folder: PathBuf::from("./adapt_temp"),
      resolution: "1920x1080".to_string(),
      override_flags: None,
      grain_synth: 0,
      speed: 6,
      test_flag: false,
      resume: false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validate_rejects_bad_weight_vector() {
    let mut config = Config::default();
    config.crf_model_weights = "1,2,3".to_string();
    assert!(config.validate().is_err());
  }

  #[test]
  fn validate_accepts_defaults() {
    assert!(Config::default().validate().is_ok());
  }

  #[test]
  fn bitrate_adjust_mode_defaults_to_none() {
    assert!(!Config::default().bitrate_adjust_mode_is_chunk());
  }
}
