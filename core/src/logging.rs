//! Structured logging setup. Mirrors the split used throughout the teacher
//! project: a compact console layer for humans, a verbose rolling file layer
//! for postmortems, both driven off the same [`tracing`] subscriber.

use std::{io::IsTerminal, path::Path};

use once_cell::sync::OnceCell;
use tracing_appender::{non_blocking::WorkerGuard, rolling::RollingFileAppender};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

static WORKER_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

pub const DEFAULT_CONSOLE_LEVEL: LevelFilter = LevelFilter::INFO;
pub const DEFAULT_FILE_LEVEL: LevelFilter = LevelFilter::DEBUG;

/// Verbosity tri-state surfaced on the config/CLI. `Quiet` disables the
/// progress bar entirely; `Verbose` switches it to the per-worker multi-bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
  Quiet,
  #[default]
  Normal,
  Verbose,
}

/// Initialize the global tracing subscriber. Safe to call at most once per
/// process; a second call is a logic error in the caller (the CLI calls this
/// exactly once at startup).
pub fn init_logging(console_level: LevelFilter, log_path: &Path, file_level: LevelFilter) {
  let console_filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));
  let file_filter = EnvFilter::new(file_level.to_string());

  let dir = log_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
  let file_name = log_path.file_name().map(|n| n.to_owned()).unwrap_or_else(|| "av1an-adapt.log".into());
  let file_appender = RollingFileAppender::new(tracing_appender::rolling::Rotation::NEVER, dir, file_name);
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
  let _ = WORKER_GUARD.set(guard);

  let subscriber = tracing_subscriber::registry()
    .with(
      fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(non_blocking)
        .with_filter(file_filter),
    )
    .with(
      fmt::layer()
        .compact()
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(console_filter),
    );

  if tracing::subscriber::set_global_default(subscriber).is_err() {
    tracing::debug!("global tracing subscriber already set, skipping re-init");
  }
}
