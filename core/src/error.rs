//! Error types shared across the encoder driver, metric probe, search
//! strategies and worker pool.

use std::{fmt, path::PathBuf, process::ExitStatus};

use thiserror::Error;

/// Fatal, run-aborting configuration problems.
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("required binary not found on PATH: {0}")]
  MissingBinary(String),
  #[error("invalid temp folder {0:?}: {1}")]
  InvalidTempFolder(PathBuf, String),
  #[error("invalid crf_model_weights, expected 5 comma-separated floats, got {0:?}")]
  InvalidWeightVector(String),
  #[error("unrecognized vmaf target representation: {0:?}")]
  UnrecognizedRepresentation(String),
  #[error("back-end {backend:?} does not support rate-distribution mode {mode:?}")]
  UnsupportedRateDistribution { backend: String, mode: String },
  #[error("chunk sequence is empty")]
  EmptyChunkSequence,
  #[error("max_bitrate must be positive when set, got {0}")]
  InvalidMaxBitrate(f64),
}

/// Output produced by a crashed/failing subprocess. Kept as raw text or
/// bytes so non-UTF8 encoder output is never silently mangled.
#[derive(Clone)]
pub enum StringOrBytes {
  String(String),
  Bytes(Vec<u8>),
}

impl fmt::Debug for StringOrBytes {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::String(s) => f.write_str(s),
      Self::Bytes(b) => write!(f, "raw bytes: {b:?}"),
    }
  }
}

impl From<Vec<u8>> for StringOrBytes {
  fn from(bytes: Vec<u8>) -> Self {
    match String::from_utf8(bytes) {
      Ok(s) => Self::String(s),
      Err(e) => Self::Bytes(e.into_bytes()),
    }
  }
}

impl From<String> for StringOrBytes {
  fn from(s: String) -> Self {
    Self::String(s)
  }
}

/// A per-chunk, non-fatal failure: the pool logs it and keeps going.
#[derive(Error, Debug)]
pub enum EncodeFailure {
  #[error("encoder crashed: {exit_status}\nstdout:\n{stdout:?}\nstderr:\n{stderr:?}")]
  Crashed {
    exit_status: ExitStatus,
    stdout:      StringOrBytes,
    stderr:      StringOrBytes,
  },
  #[error("failed to launch subprocess: {0}")]
  Launch(#[from] std::io::Error),
  #[error("output file missing or undersized: {0:?}")]
  UndersizedOutput(PathBuf),
  #[error("chunk {chunk_index} timed out after {timeout_secs}s")]
  Timeout { chunk_index: usize, timeout_secs: u64 },
}

/// VMAF/SSIM invocation or parse failure. Always non-fatal: callers degrade
/// to a `ProbePoint` with missing metrics rather than aborting.
#[derive(Error, Debug)]
pub enum MetricFailure {
  #[error("metric tool failed to launch: {0}")]
  Launch(#[from] std::io::Error),
  #[error("metric tool exited with failure: {0}")]
  ToolFailed(ExitStatus),
  #[error("failed to parse metric log: {0}")]
  Parse(#[from] serde_json::Error),
}

/// Cache corruption/miss is never surfaced to callers; this exists purely so
/// `ProbeCache` has a typed internal error to log.
#[derive(Error, Debug)]
pub(crate) enum CacheError {
  #[error("cache io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("cache deserialize error: {0}")]
  Deserialize(#[from] serde_json::Error),
  #[error("cache schema version mismatch: expected {expected}, found {found}")]
  VersionMismatch { expected: u32, found: u32 },
}
