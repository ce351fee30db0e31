//! VMAF computation via an `ffmpeg`/`libvmaf` filtergraph, grounded on the
//! teacher's `vmaf::run_vmaf`/`read_vmaf_file`/`get_percentile`.

use std::{
  path::{Path, PathBuf},
  process::Stdio,
};

use serde::{de::Error as _, Deserialize};

use crate::error::MetricFailure;

use super::percentile;

/// One of the three viewing-condition-adapted VMAF model variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReferenceDisplay {
  Hd,
  Uhd,
  Phone,
}

/// Options enumerated in spec §4.2's Metric Probe contract.
#[derive(Clone, Debug)]
pub struct VmafOptions {
  pub uhd_model:         bool,
  pub phone_model:       bool,
  pub no_motion:         bool,
  pub neg_model:         bool,
  pub reference_display: Option<ReferenceDisplay>,
  pub threads:           usize,
  pub log_path:          PathBuf,
  pub sample_rate:       usize,
  pub extra_filter:      Option<String>,
}

impl VmafOptions {
  pub fn new(log_path: PathBuf) -> Self {
    Self {
      uhd_model: false,
      phone_model: false,
      no_motion: false,
      neg_model: false,
      reference_display: None,
      threads: 1,
      log_path,
      sample_rate: 1,
      extra_filter: None,
    }
  }

  fn model_path(&self) -> Option<&'static str> {
    if self.uhd_model && self.neg_model {
      Some("vmaf_4k_v0.6.1neg.json")
    } else if self.uhd_model {
      Some("vmaf_4k_v0.6.1.json")
    } else if self.neg_model {
      Some("vmaf_v0.6.1neg.json")
    } else {
      None
    }
  }
}

/// Aggregate VMAF statistics for one encoded chunk (spec §3 `VmafResult`).
/// Always satisfies `min <= pN <= max` and `harmonic_mean <= mean`.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VmafResult {
  pub mean:           f64,
  pub harmonic_mean:  f64,
  pub min:            f64,
  pub max:            f64,
  pub percentile_1:   f64,
  pub percentile_5:   f64,
  pub percentile_10:  f64,
  pub percentile_25:  f64,
  pub percentile_50:  f64,
}

impl VmafResult {
  /// Reduces a per-frame score list to the aggregate form. Panics on an
  /// empty slice; callers always have at least one decoded frame.
  pub fn from_frame_scores(scores: &[f64]) -> Self {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Self {
      mean:          super::mean(scores),
      harmonic_mean: super::harmonic_mean(scores),
      min:           sorted[0],
      max:           sorted[sorted.len() - 1],
      percentile_1:  percentile(&mut sorted.clone(), 0.01),
      percentile_5:  percentile(&mut sorted.clone(), 0.05),
      percentile_10: percentile(&mut sorted.clone(), 0.10),
      percentile_25: percentile(&mut sorted.clone(), 0.25),
      percentile_50: percentile(&mut sorted, 0.50),
    }
  }
}

#[derive(Deserialize)]
struct VmafFrameMetrics {
  vmaf: f64,
}

#[derive(Deserialize)]
struct VmafFrame {
  metrics: VmafFrameMetrics,
}

#[derive(Deserialize)]
struct VmafLog {
  frames: Vec<VmafFrame>,
}

/// Builds the `[distorted][ref]libvmaf=...` filter expression for one probe.
fn filter_expr(resolution: &str, opts: &VmafOptions) -> String {
  let mut pre_ref = String::new();
  if opts.sample_rate > 1 {
    pre_ref.push_str(&format!(
      "select=not(mod(n\\,{})),setpts={:.6}*PTS,",
      opts.sample_rate,
      1.0 / opts.sample_rate as f64
    ));
  }
  if opts.no_motion {
    pre_ref.push_str("motion=0,");
  }
  if let Some(extra) = &opts.extra_filter {
    pre_ref.push_str(extra);
    pre_ref.push(',');
  }

  let distorted = format!(
    "[0:v]scale={resolution}:flags=bicubic:force_original_aspect_ratio=decrease,setpts=PTS-STARTPTS[distorted];"
  );
  let reference = format!(
    "[1:v]{pre_ref}scale={resolution}:flags=bicubic:force_original_aspect_ratio=decrease,setpts=PTS-STARTPTS[ref];"
  );

  let model_arg = opts
    .model_path()
    .map(|p| format!(":model_path={p}"))
    .unwrap_or_default();

  let vmaf = format!(
    "[distorted][ref]libvmaf=log_fmt='json':eof_action=endall:log_path={}:n_threads={}{model_arg}",
    escape_path(&opts.log_path),
    opts.threads,
  );

  format!("{distorted}{reference}{vmaf}")
}

fn escape_path(p: &Path) -> String {
  p.display().to_string().replace('\\', "/").replace(':', "\\:")
}

/// Runs libvmaf over `encoded` against `reference_pipe_cmd` (a decode
/// command producing raw frames on stdout), then parses the resulting log.
/// Mirrors the teacher's two-stage `run_vmaf` + `read_vmaf_file` split, fused
/// into one call since every caller here wants the parsed aggregate, never
/// the raw log path alone.
pub fn probe(
  encoded: &Path,
  reference_pipe_cmd: &[String],
  resolution: &str,
  opts: &VmafOptions,
) -> Result<VmafResult, MetricFailure> {
  let [decoder, decoder_args @ ..] = reference_pipe_cmd else {
    return Err(MetricFailure::Launch(std::io::Error::new(
      std::io::ErrorKind::InvalidInput,
      "empty reference pipe command",
    )));
  };

  let mut source = std::process::Command::new(decoder)
    .args(decoder_args)
    .stdout(Stdio::piped())
    .stderr(Stdio::null())
    .spawn()?;

  let source_stdout = source.stdout.take().expect("piped stdout");

  let mut cmd = std::process::Command::new("ffmpeg");
  cmd.args(["-loglevel", "error", "-hide_banner", "-y", "-thread_queue_size", "1024", "-i"]);
  cmd.arg(encoded);
  cmd.args(["-i", "-", "-filter_complex", &filter_expr(resolution, opts), "-f", "null", "-"]);
  cmd.stdin(source_stdout);
  cmd.stdout(Stdio::null());
  cmd.stderr(Stdio::piped());

  let output = cmd.spawn()?.wait_with_output()?;
  let _ = source.wait();

  if !output.status.success() {
    return Err(MetricFailure::ToolFailed(output.status));
  }

  let raw = std::fs::read_to_string(&opts.log_path).map_err(MetricFailure::Launch)?;
  let log: VmafLog = serde_json::from_str(&raw)?;
  let scores: Vec<f64> = log.frames.into_iter().map(|f| f.metrics.vmaf).collect();

  if scores.is_empty() {
    return Err(MetricFailure::Parse(serde_json::Error::custom("vmaf log had zero frames")));
  }

  Ok(VmafResult::from_frame_scores(&scores))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn aggregate_respects_min_max_ordering() {
    let scores = vec![60.0, 70.0, 80.0, 90.0, 100.0];
    let agg = VmafResult::from_frame_scores(&scores);
    assert!(agg.min <= agg.percentile_50 && agg.percentile_50 <= agg.max);
    assert!(agg.harmonic_mean <= agg.mean);
  }

  #[test]
  fn model_path_prefers_uhd_neg_combo() {
    let mut opts = VmafOptions::new(PathBuf::from("/tmp/log.json"));
    opts.uhd_model = true;
    opts.neg_model = true;
    assert_eq!(opts.model_path(), Some("vmaf_4k_v0.6.1neg.json"));
  }

  #[test]
  fn filter_expr_includes_sample_rate_select() {
    let mut opts = VmafOptions::new(PathBuf::from("/tmp/log.json"));
    opts.sample_rate = 4;
    let expr = filter_expr("1920x1080", &opts);
    assert!(expr.contains("mod(n\\,4)"));
  }
}
