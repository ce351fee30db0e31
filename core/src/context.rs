//! `RunContext`: owns the temp-folder subtree and the set of probe caches
//! scoped under it (spec §6 temp folder layout), grounded on the teacher's
//! `context::Av1anContext::initialize` (directory setup, resume checks).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};

use crate::{cache::ProbeCache, config::Config};

/// Every cache the ladder and pipeline read/write, each scoped to its own
/// subdirectory under the temp folder (spec §6's layout table).
#[derive(Clone)]
pub struct Caches {
  pub bitrate:         ProbeCache,
  pub complexity:      ProbeCache,
  pub crf:             ProbeCache,
  pub crf_to_bitrate:  ProbeCache,
  pub ssim_translate:  ProbeCache,
}

pub struct RunContext {
  pub config:    Config,
  pub caches:    Caches,
  pub chunk_log: PathBuf,
}

impl RunContext {
  /// Creates (or, with `resume = true`, reuses) the temp-folder subtree and
  /// returns a ready-to-use context. Mirrors the teacher's resume-flag
  /// cross-check (`done.json`/`chunks.json` must both exist or both be
  /// absent) by requiring an existing `chunks.log` whenever `resume` is
  /// set, rather than silently starting fresh.
  pub fn initialize(config: Config) -> anyhow::Result<Self> {
    config.validate().context("invalid configuration")?;

    let temp = &config.temp_folder;
    let chunk_log = temp.join("chunks.log");

    if config.resume && !chunk_log.exists() {
      bail!("resume was set but {chunk_log:?} does not exist in the temp folder");
    }

    for sub in [
      "adapt/bitrate",
      "adapt/bitrate/complexity",
      "adapt/crf",
      "adapt/crf_to_bitrate",
      "adapt/bitrate/ssim_translate",
    ] {
      std::fs::create_dir_all(temp.join(sub))
        .with_context(|| format!("failed to create temp subdirectory {sub}"))?;
    }

    let caches = Caches {
      bitrate:        ProbeCache::new(temp.join("adapt/bitrate")),
      complexity:     ProbeCache::new(temp.join("adapt/bitrate/complexity")),
      crf:            ProbeCache::new(temp.join("adapt/crf")),
      crf_to_bitrate: ProbeCache::new(temp.join("adapt/crf_to_bitrate")),
      ssim_translate: ProbeCache::new(temp.join("adapt/bitrate/ssim_translate")),
    };

    Ok(Self { config, caches, chunk_log })
  }

  pub fn chunk_output_path(&self, chunk_index: usize, ext: &str) -> PathBuf {
    self.config.temp_folder.join(format!("{chunk_index:05}.{ext}"))
  }

  pub fn temp_folder(&self) -> &Path {
    &self.config.temp_folder
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn initialize_creates_expected_subtree() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.temp_folder = dir.path().to_path_buf();
    let ctx = RunContext::initialize(config).unwrap();
    assert!(ctx.temp_folder().join("adapt/bitrate/complexity").is_dir());
    assert!(ctx.temp_folder().join("adapt/bitrate/ssim_translate").is_dir());
  }

  #[test]
  fn resume_without_chunk_log_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.temp_folder = dir.path().to_path_buf();
    config.resume = true;
    assert!(RunContext::initialize(config).is_err());
  }
}
