//! Content-addressed Probe Cache (spec §4.3). Values are versioned,
//! self-describing JSON envelopes, following the teacher's general practice
//! of JSON-based persisted state (`done.json`/`chunks.json` in
//! `context.rs`) rather than the unversioned `bincode` format seen in the
//! teacher's older `vmaf.rs` — that fragility is exactly what the envelope
//! avoids.

use std::{
  fs,
  path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CacheError;

const SCHEMA_VERSION: u32 = 1;

#[derive(serde::Serialize, serde::Deserialize)]
struct Envelope<T> {
  version: u32,
  value:   T,
}

/// A directory-backed cache, one file per key. Keys are caller-supplied
/// strings (already content-addressed: chunk fingerprint + params digest +
/// metric-options digest, per spec §4.3) rather than computed here, since
/// digest composition is a policy decision made by each cache's owner
/// (ladder, pipeline, metric probe).
#[derive(Clone)]
pub struct ProbeCache {
  root: PathBuf,
}

impl ProbeCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn path_for(&self, key: &str) -> PathBuf {
    self.root.join(format!("{key}.json"))
  }

  /// Returns the cached value for `key`, or `None` on any miss — including
  /// corruption, a version mismatch, or a read error. Never propagates an
  /// error: a cache is an optimization, not a source of truth.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    match self.try_get(key) {
      Ok(v) => v,
      Err(e) => {
        tracing::warn!(key, "probe cache read failed, treating as miss: {e}");
        None
      },
    }
  }

  fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
    let path = self.path_for(key);
    if !path.exists() {
      return Ok(None);
    }
    let raw = fs::read_to_string(&path)?;
    let envelope: Envelope<T> = serde_json::from_str(&raw)?;
    if envelope.version != SCHEMA_VERSION {
      return Err(CacheError::VersionMismatch { expected: SCHEMA_VERSION, found: envelope.version });
    }
    Ok(Some(envelope.value))
  }

  /// Writes `value` under `key`. Best-effort: a write failure is logged and
  /// swallowed, never propagated (spec §4.3: "cache failures must not abort
  /// the pipeline").
  pub fn put<T: Serialize>(&self, key: &str, value: &T) {
    if let Err(e) = self.try_put(key, value) {
      tracing::warn!(key, "probe cache write failed: {e}");
    }
  }

  fn try_put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
    fs::create_dir_all(&self.root)?;
    let envelope = Envelope { version: SCHEMA_VERSION, value };
    let raw = serde_json::to_string(&envelope)?;
    fs::write(self.path_for(key), raw)?;
    Ok(())
  }

  /// Runs `compute` and caches its result only on a miss, matching the
  /// common "reuse probe output if present" contract (spec §4.3: "per-probe
  /// encode output files reused if present").
  pub fn get_or_compute<T, E>(
    &self,
    key: &str,
    compute: impl FnOnce() -> Result<T, E>,
  ) -> Result<T, E>
  where
    T: Serialize + DeserializeOwned + Clone,
  {
    if let Some(cached) = self.get(key) {
      return Ok(cached);
    }
    let value = compute()?;
    self.put(key, &value);
    Ok(value)
  }
}

pub fn key_for_chunk(chunk_fingerprint: &str, params_digest: &str, metric_digest: &str) -> String {
  format!("{chunk_fingerprint}_{params_digest}_{metric_digest}")
}

/// Stable digest of a byte slice, used to build cache keys from serialized
/// params/options without pulling in a cryptographic hash crate the rest of
/// the stack never needs.
pub fn digest(bytes: &[u8]) -> String {
  use std::hash::Hasher;
  let mut hasher = std::collections::hash_map::DefaultHasher::new();
  hasher.write(bytes);
  format!("{:016x}", hasher.finish())
}

pub fn cache_dir_for(root: &Path, subdir: &str) -> PathBuf {
  root.join(subdir)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ProbeCache::new(dir.path());
    cache.put("k1", &42i64);
    let got: Option<i64> = cache.get("k1");
    assert_eq!(got, Some(42));
  }

  #[test]
  fn missing_key_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ProbeCache::new(dir.path());
    let got: Option<i64> = cache.get("absent");
    assert_eq!(got, None);
  }

  #[test]
  fn corrupt_file_is_treated_as_miss() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ProbeCache::new(dir.path());
    fs::create_dir_all(dir.path()).unwrap();
    fs::write(dir.path().join("bad.json"), "{not json").unwrap();
    let got: Option<i64> = cache.get("bad");
    assert_eq!(got, None);
  }

  #[test]
  fn version_mismatch_is_treated_as_miss() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ProbeCache::new(dir.path());
    fs::write(dir.path().join("old.json"), r#"{"version":99,"value":1}"#).unwrap();
    let got: Option<i64> = cache.get("old");
    assert_eq!(got, None);
  }

  #[test]
  fn get_or_compute_caches_after_first_call() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ProbeCache::new(dir.path());
    let calls = std::cell::Cell::new(0);
    let compute = || -> Result<i64, std::convert::Infallible> {
      calls.set(calls.get() + 1);
      Ok(7)
    };
    assert_eq!(cache.get_or_compute("x", compute).unwrap(), 7);
    assert_eq!(cache.get_or_compute("x", compute).unwrap(), 7);
    assert_eq!(calls.get(), 1);
  }
}
