use std::path::PathBuf;

use super::*;

fn sample_chunk(index: usize) -> Chunk {
  Chunk::new(
    index,
    PathBuf::from("input.mkv"),
    index * 100,
    index * 100 + 100,
    24.0,
    vec!["ffmpeg".into()],
    PathBuf::from(format!("{index:05}.ivf")),
  )
}

#[test]
fn name_is_zero_padded() {
  assert_eq!(sample_chunk(7).name(), "00007");
}

#[test]
fn frame_count_is_exclusive_range() {
  let c = sample_chunk(2);
  assert_eq!(c.frame_count(), 100);
}

#[test]
fn duration_divides_by_frame_rate() {
  let c = sample_chunk(0);
  assert!((c.duration_secs() - 100.0 / 24.0).abs() < 1e-9);
}

#[test]
fn duration_guards_zero_frame_rate() {
  let mut c = sample_chunk(0);
  c.frame_rate = 0.0;
  assert_eq!(c.duration_secs(), 0.0);
}

#[test]
fn sequence_round_trips_through_json() {
  let seq = ChunkSequence::new(PathBuf::from("in.mkv"), vec![sample_chunk(0), sample_chunk(1)]);
  let json = serde_json::to_string(&seq).unwrap();
  let back: ChunkSequence = serde_json::from_str(&json).unwrap();
  assert_eq!(back.len(), 2);
  assert_eq!(back.get(1).unwrap().index, 1);
}

#[test]
fn empty_sequence_reports_is_empty() {
  let seq = ChunkSequence::new(PathBuf::from("in.mkv"), vec![]);
  assert!(seq.is_empty());
}
