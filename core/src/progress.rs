//! Per-worker progress bars. Kept as process-wide singletons the way the
//! teacher's `progress_bar` module does it, since every worker thread needs
//! to reach the same draw target without threading a handle through every
//! pipeline call.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::logging::Verbosity;

const BAR_TEMPLATE: &str = "{spinner} [{elapsed_precise}] [{wide_bar}] {percent:>3}% {pos}/{len} chunks (eta {eta})";

static MULTI: Lazy<(MultiProgress, Mutex<Vec<ProgressBar>>)> = Lazy::new(|| {
  let mp = MultiProgress::new();
  mp.set_draw_target(ProgressDrawTarget::stderr());
  (mp, Mutex::new(Vec::new()))
});

/// Sets up one status line per worker plus an overall bar. No-op under
/// [`Verbosity::Quiet`].
pub fn init(total_chunks: u64, workers: usize, verbosity: Verbosity) {
  if verbosity == Verbosity::Quiet {
    return;
  }

  let mut bars = MULTI.1.lock();
  bars.clear();

  if verbosity == Verbosity::Verbose {
    for i in 0..workers {
      let pb = ProgressBar::hidden()
        .with_style(ProgressStyle::default_spinner().template("[{prefix}] {msg}").unwrap());
      pb.set_prefix(format!("worker {:02}", i + 1));
      bars.push(MULTI.0.add(pb));
    }
  }

  let overall = ProgressBar::hidden();
  overall.set_style(ProgressStyle::default_bar().template(BAR_TEMPLATE).unwrap().progress_chars("#>-"));
  overall.enable_steady_tick(std::time::Duration::from_millis(100));
  overall.set_length(total_chunks);
  bars.push(MULTI.0.add(overall));
}

/// Updates the status line for `worker_id` (ignored when progress wasn't
/// initialized verbosely).
pub fn set_worker_message(worker_id: usize, msg: impl Into<String>) {
  let bars = MULTI.1.lock();
  if let Some(bar) = bars.get(worker_id) {
    bar.set_message(msg.into());
  }
}

/// Advances the overall bar by one completed chunk.
pub fn inc_overall() {
  let bars = MULTI.1.lock();
  if let Some(bar) = bars.last() {
    bar.inc(1);
  }
}

pub fn finish() {
  let bars = MULTI.1.lock();
  for bar in bars.iter() {
    bar.finish();
  }
}
