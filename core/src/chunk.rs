//! The [`Chunk`]/[`ChunkSequence`] data model (spec §3). Scene detection and
//! splitting themselves are out of scope; a `ChunkSequence` is loaded from
//! whatever a splitter collaborator already produced.

#[cfg(test)]
mod tests;

use std::{ffi::OsString, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};

/// One scene-aligned frame range of the source video, encoded independently.
///
/// Identity is `(source, start_frame, end_frame, index)` and is fixed at
/// construction; `output_path` and `complexity` are the only mutable fields,
/// set later by the pipeline and the bitrate ladder respectively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
  pub index:       usize,
  pub source:      PathBuf,
  pub start_frame: usize,
  /// Exclusive: the frame range is `start_frame..end_frame`.
  pub end_frame:   usize,
  pub frame_rate:  f64,
  /// Shell-split command producing a raw-video pipe over this chunk's frame
  /// range (e.g. an `ffmpeg`/`vspipe` invocation). Supplied by the chunk
  /// producer collaborator.
  pub source_cmd:  Vec<OsString>,
  pub output_path: PathBuf,
  /// Assigned by the bitrate ladder's complexity scoring pass; absent until
  /// that pass runs.
  pub complexity:  Option<f64>,
}

impl Chunk {
  pub fn new(
    index: usize,
    source: PathBuf,
    start_frame: usize,
    end_frame: usize,
    frame_rate: f64,
    source_cmd: Vec<OsString>,
    output_path: PathBuf,
  ) -> Self {
    Self {
      index,
      source,
      start_frame,
      end_frame,
      frame_rate,
      source_cmd,
      output_path,
      complexity: None,
    }
  }

  /// Zero-padded chunk name, used for on-disk artifact naming (`00001`).
  pub fn name(&self) -> String {
    format!("{:05}", self.index)
  }

  pub const fn frame_count(&self) -> usize {
    self.end_frame - self.start_frame
  }

  pub fn duration_secs(&self) -> f64 {
    if self.frame_rate <= 0.0 {
      0.0
    } else {
      self.frame_count() as f64 / self.frame_rate
    }
  }
}

/// An ordered collection of chunks plus the source input path. Indexing is
/// deterministic: `sequence[i]` is always the chunk with `chunk.index == i`
/// within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSequence {
  pub input:  PathBuf,
  pub chunks: Vec<Chunk>,
}

impl ChunkSequence {
  pub fn new(input: PathBuf, chunks: Vec<Chunk>) -> Self {
    Self { input, chunks }
  }

  /// Loads a chunk manifest as emitted by an external scene-splitter.
  pub fn load(manifest_path: &Path) -> anyhow::Result<Self> {
    let contents = std::fs::read_to_string(manifest_path)?;
    Ok(serde_json::from_str(&contents)?)
  }

  pub fn len(&self) -> usize {
    self.chunks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.chunks.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&Chunk> {
    self.chunks.get(index)
  }
}
