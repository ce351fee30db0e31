//! SSIM computation via `ffmpeg`'s `ssim` filter, plus the SSIM-dB
//! translation used by the bitrate ladder's average-bitrate sampling (spec
//! §4.2, §4.7.1).

use std::{path::Path, process::Stdio};

use crate::error::MetricFailure;

/// Mean SSIM plus its dB transform, `-10 * log10(1 - ssim)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SsimResult {
  pub mean: f64,
  pub db:   f64,
}

impl SsimResult {
  pub fn from_mean(mean: f64) -> Self {
    let clamped = mean.min(1.0 - f64::EPSILON);
    Self { mean, db: -10.0 * (1.0 - clamped).log10() }
  }
}

/// Runs `ffmpeg`'s `ssim` filter, parsing the `All:` summary line it prints
/// to the stats file rather than per-frame values (the ladder only ever
/// needs the aggregate).
pub fn probe(
  encoded: &Path,
  reference_pipe_cmd: &[String],
  resolution: &str,
  stats_path: &Path,
  threads: usize,
) -> Result<SsimResult, MetricFailure> {
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

  let filter = format!(
    "[0:v]scale={resolution}:flags=bicubic:force_original_aspect_ratio=decrease,setpts=PTS-STARTPTS[distorted];\
     [1:v]scale={resolution}:flags=bicubic:force_original_aspect_ratio=decrease,setpts=PTS-STARTPTS[ref];\
     [distorted][ref]ssim=stats_file={}",
    stats_path.display()
  );

  let mut cmd = std::process::Command::new("ffmpeg");
  cmd.args(["-loglevel", "info", "-hide_banner", "-y", "-threads", &threads.to_string(), "-i"]);
  cmd.arg(encoded);
  cmd.args(["-i", "-", "-filter_complex", &filter, "-f", "null", "-"]);
  cmd.stdin(source_stdout);
  cmd.stdout(Stdio::null());
  cmd.stderr(Stdio::piped());

  let output = cmd.spawn()?.wait_with_output()?;
  let _ = source.wait();

  if !output.status.success() {
    return Err(MetricFailure::ToolFailed(output.status));
  }

  let stderr = String::from_utf8_lossy(&output.stderr);
  let mean = parse_all_line(&stderr).ok_or_else(|| {
    MetricFailure::Parse(<serde_json::Error as serde::de::Error>::custom("no SSIM All: line found"))
  })?;

  Ok(SsimResult::from_mean(mean))
}

/// Extracts the mean from an ffmpeg `ssim` filter summary line, e.g.
/// `... All:0.987654 (18.873210)`.
fn parse_all_line(stderr: &str) -> Option<f64> {
  let line = stderr.lines().rev().find(|l| l.contains("All:"))?;
  let after = line.split("All:").nth(1)?;
  let token = after.split_whitespace().next()?;
  token.parse().ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn db_form_increases_with_mean() {
    let low = SsimResult::from_mean(0.90);
    let high = SsimResult::from_mean(0.99);
    assert!(high.db > low.db);
  }

  #[test]
  fn parses_all_token_from_summary_line() {
    let stderr = "frame=  100 fps=0\n[Parsed_ssim_2 @ 0x1] SSIM Y:0.991234 U:0.995 V:0.995 All:0.987654 (18.87)\n";
    assert!((parse_all_line(stderr).unwrap() - 0.987654).abs() < 1e-9);
  }

  #[test]
  fn parse_all_line_returns_none_without_summary() {
    assert_eq!(parse_all_line("frame=1\n"), None);
  }
}
