//! The Encoder Driver (spec §4.1): pipes a chunk's source command through the
//! configured back-end and, optionally, through the Metric Probe. Grounded
//! on the teacher's `settings::EncodeArgs::create_pipes` (subprocess piping)
//! and `broker::Broker::encode_chunk` (retry loop, timing, frame check).

use std::{path::PathBuf, process::Stdio, time::{Duration, Instant}};

use tokio::{
  io::{AsyncBufReadExt, BufReader},
  process::Command,
};

use crate::{
  chunk::Chunk,
  error::{EncodeFailure, MetricFailure, StringOrBytes},
  metrics::{ssim::SsimResult, vmaf::{VmafOptions, VmafResult}},
};

use super::params::EncoderParams;

const MAX_TRIES: u8 = 3;

/// Status + measurements produced by one chunk's encode (spec §3
/// `EncodeStats`). Immutable once returned.
#[derive(Debug, Clone)]
pub struct EncodeStats {
  pub status:            EncodeStatus,
  pub chunk_index:       usize,
  pub elapsed_seconds:   f64,
  pub output_size_bytes: u64,
  pub bitrate_kbps:      f64,
  pub vmaf:              Option<VmafResult>,
  pub ssim:              Option<SsimResult>,
  pub ssim_db:           Option<f64>,
  pub target_miss_pct:   Option<f64>,
  pub rate_search_time:  Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStatus {
  Done,
  Failed,
}

/// Which metrics [`EncoderDriver::run`] should compute against the source.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricRequest {
  pub vmaf: bool,
  pub ssim: bool,
}

/// A handle over one chunk's encoder invocation. Not `Clone`: a driver owns
/// the chunk it was built for and the parameter set currently staged against
/// it, mutated in place by [`Self::update`] as search strategies probe.
pub struct EncoderDriver<'a> {
  chunk:  &'a Chunk,
  params: EncoderParams,
}

impl<'a> EncoderDriver<'a> {
  pub fn new(chunk: &'a Chunk, params: EncoderParams) -> Self {
    Self { chunk, params }
  }

  pub fn params(&self) -> &EncoderParams {
    &self.params
  }

  /// Typed partial update, e.g. a bisection step narrowing the CRF. Kept
  /// cheap by design: see [`EncoderParams::update_crf`].
  pub fn update(&mut self, f: impl FnOnce(&mut EncoderParams)) {
    f(&mut self.params);
  }

  pub fn extension(&self) -> &'static str {
    self.params.extension()
  }

  pub fn required_binaries(&self) -> Vec<&'static str> {
    self.params.required_binaries()
  }

  /// Prints the shell command(s) this driver would run, without running
  /// them (spec §4.8 `dry_run`).
  pub fn dry_run(&self) -> Vec<String> {
    let mut lines = vec![self.chunk.source_cmd.iter().map(|s| s.to_string_lossy().into_owned()).collect::<Vec<_>>().join(" ")];
    for pass in 1..=self.effective_passes() {
      lines.push(self.params.build_command(pass, &self.stats_stem()).join(" "));
    }
    lines
  }

  fn effective_passes(&self) -> u8 {
    if self.params.passes < 0 { 1 } else { self.params.passes as u8 }
  }

  fn stats_stem(&self) -> String {
    self.chunk.output_path.with_extension("").display().to_string()
  }

  /// Runs every configured pass, retrying a crashed pass up to
  /// [`MAX_TRIES`] times before giving up (teacher's `encode_chunk` retry
  /// loop), then optionally probes VMAF/SSIM against the chunk's own source
  /// command. `override_if_exists = false` skips re-encoding when the
  /// output already exists and matches the expected frame count.
  pub async fn run(
    &mut self,
    override_if_exists: bool,
    timeout: Option<Duration>,
    metrics: MetricRequest,
    resolution: &str,
  ) -> Result<EncodeStats, EncodeFailure> {
    let start = Instant::now();

    if !override_if_exists && self.params.output_path.exists() {
      return self.finish_from_existing(start, metrics, resolution).await;
    }

    for pass in 1..=self.effective_passes() {
      self.run_pass_with_retries(pass, timeout).await?;
    }

    self.finish_from_existing(start, metrics, resolution).await
  }

  async fn run_pass_with_retries(
    &mut self,
    pass: u8,
    timeout: Option<Duration>,
  ) -> Result<(), EncodeFailure> {
    let mut last_err = None;
    for attempt in 1..=MAX_TRIES {
      match self.run_pass_once(pass, timeout).await {
        Ok(()) => return Ok(()),
        Err(e) => {
          tracing::warn!(chunk = self.chunk.index, attempt, "encoder pass failed: {e}");
          last_err = Some(e);
        },
      }
    }
    Err(last_err.expect("loop runs at least once"))
  }

  async fn run_pass_once(&self, pass: u8, timeout: Option<Duration>) -> Result<(), EncodeFailure> {
    let fut = self.pipe_and_encode(pass);
    let result = match timeout {
      Some(t) => tokio::time::timeout(t, fut).await.map_err(|_| EncodeFailure::Timeout {
        chunk_index:   self.chunk.index,
        timeout_secs:  timeout.unwrap().as_secs(),
      })?,
      None => fut.await,
    };
    result
  }

  /// The actual decode-pipe-encode chain, following the teacher's
  /// `create_pipes`: spawn the chunk's source command, pipe its stdout into
  /// the encoder's stdin, drain the encoder's stderr for frame-progress
  /// lines, then check its exit status.
  async fn pipe_and_encode(&self, pass: u8) -> Result<(), EncodeFailure> {
    let [source, source_args @ ..] = &*self.chunk.source_cmd else {
      return Err(EncodeFailure::UndersizedOutput(self.chunk.output_path.clone()));
    };

    let mut source_pipe = Command::new(source)
      .args(source_args)
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .spawn()
      .map_err(EncodeFailure::Launch)?;

    let source_stdout: Stdio = source_pipe
      .stdout
      .take()
      .expect("piped stdout")
      .try_into()
      .expect("stdio conversion");

    let argv = self.params.build_command(pass, &self.stats_stem());
    let [encoder, encoder_args @ ..] = argv.as_slice() else {
      unreachable!("build_command always returns at least the program name")
    };

    let mut enc_pipe = Command::new(encoder)
      .args(encoder_args)
      .stdin(source_stdout)
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(EncodeFailure::Launch)?;

    let mut stderr_lines = BufReader::new(enc_pipe.stderr.take().expect("piped stderr")).lines();
    let mut stderr_buf = String::new();
    while let Ok(Some(line)) = stderr_lines.next_line().await {
      stderr_buf.push_str(&line);
      stderr_buf.push('\n');
    }

    let output = enc_pipe.wait_with_output().await.map_err(EncodeFailure::Launch)?;
    let _ = source_pipe.wait().await;

    if !output.status.success() {
      return Err(EncodeFailure::Crashed {
        exit_status: output.status,
        stdout:      StringOrBytes::from(output.stdout),
        stderr:      StringOrBytes::from(stderr_buf),
      });
    }

    Ok(())
  }

  async fn finish_from_existing(
    &self,
    start: Instant,
    metrics: MetricRequest,
    resolution: &str,
  ) -> Result<EncodeStats, EncodeFailure> {
    let meta = std::fs::metadata(&self.params.output_path)
      .map_err(|_| EncodeFailure::UndersizedOutput(self.params.output_path.clone()))?;
    let output_size_bytes = meta.len();
    if output_size_bytes < 100 {
      return Err(EncodeFailure::UndersizedOutput(self.params.output_path.clone()));
    }

    let bitrate_kbps = if self.chunk.duration_secs() > 0.0 {
      (output_size_bytes as f64 * 8.0 / 1000.0) / self.chunk.duration_secs()
    } else {
      0.0
    };

    let (vmaf, ssim, ssim_db) = self.probe_metrics(metrics, resolution);

    Ok(EncodeStats {
      status: EncodeStatus::Done,
      chunk_index: self.chunk.index,
      elapsed_seconds: start.elapsed().as_secs_f64().max(1.0),
      output_size_bytes,
      bitrate_kbps,
      vmaf,
      ssim,
      ssim_db,
      target_miss_pct: None,
      rate_search_time: None,
    })
  }

  /// Failures to probe VMAF/SSIM are logged and degrade to `None` rather
  /// than failing the whole encode (spec §7 `MetricFailure` non-fatal
  /// contract).
  fn probe_metrics(
    &self,
    request: MetricRequest,
    resolution: &str,
  ) -> (Option<VmafResult>, Option<SsimResult>, Option<f64>) {
    let reference_cmd: Vec<String> =
      self.chunk.source_cmd.iter().map(|s| s.to_string_lossy().into_owned()).collect();

    let vmaf = request.vmaf.then(|| {
      let log_path = self.params.output_path.with_extension("vmaf.json");
      let opts = VmafOptions::new(log_path);
      match crate::metrics::vmaf::probe(&self.params.output_path, &reference_cmd, resolution, &opts) {
        Ok(r) => Some(r),
        Err(e) => {
          tracing::warn!(chunk = self.chunk.index, "vmaf probe failed: {e}");
          None
        },
      }
    }).flatten();

    let ssim = request.ssim.then(|| {
      let stats_path = self.params.output_path.with_extension("ssim.log");
      match crate::metrics::ssim::probe(&self.params.output_path, &reference_cmd, resolution, &stats_path, self.params.threads) {
        Ok(r) => Some(r),
        Err(e) => {
          tracing::warn!(chunk = self.chunk.index, "ssim probe failed: {e}");
          None
        },
      }
    }).flatten();

    let ssim_db = ssim.map(|s| s.db);
    (vmaf, ssim, ssim_db)
  }
}

pub fn driver_output_path(output_dir: &std::path::Path, chunk: &Chunk, ext: &str) -> PathBuf {
  output_dir.join(format!("{}.{}", chunk.name(), ext))
}

#[cfg(test)]
mod tests {
  use std::ffi::OsString;

  use super::*;
  use crate::encoder::params::Backend;

  fn sample_chunk() -> Chunk {
    Chunk::new(
      0,
      PathBuf::from("in.mkv"),
      0,
      240,
      24.0,
      vec![OsString::from("ffmpeg"), OsString::from("-i"), OsString::from("in.mkv")],
      PathBuf::from("00000.ivf"),
    )
  }

  #[test]
  fn dry_run_lists_source_then_passes() {
    let chunk = sample_chunk();
    let params = EncoderParams::new(Backend::SvtAv1, chunk.output_path.clone());
    let driver = EncoderDriver::new(&chunk, params);
    let lines = driver.dry_run();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("ffmpeg"));
    assert!(lines[1].contains("SvtAv1EncApp"));
  }

  #[test]
  fn update_mutates_staged_params_only() {
    let chunk = sample_chunk();
    let params = EncoderParams::new(Backend::SvtAv1, chunk.output_path.clone());
    let mut driver = EncoderDriver::new(&chunk, params);
    driver.update(|p| p.update_crf(30.0));
    assert_eq!(driver.params().crf, 30.0);
  }
}
