//! Command-line front-end for the per-chunk adaptive rate-control
//! controller, grounded on the teacher's `av1an`/`av1an-cli` binaries:
//! parse args, build a `Config`, stand up logging, run, map the outcome to
//! an exit code.

use std::{path::PathBuf, process::ExitCode};

use av1an_adapt_core::{
  chunk::ChunkSequence,
  config::Config,
  context::RunContext,
  error::ConfigError,
  logging, progress,
};
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

/// Per-chunk adaptive CRF/bitrate controller.
#[derive(Parser, Debug)]
#[command(name = "av1an-adapt", version, about)]
struct CliOpts {
  /// Source video passed through to the chunk producer's commands.
  #[arg(long)]
  input: PathBuf,

  /// Chunk manifest produced by an external scene-splitter.
  #[arg(long)]
  chunks: PathBuf,

  /// Scratch directory for probe outputs, caches and chunks.log.
  #[arg(long, default_value = "./adapt_temp")]
  temp: PathBuf,

  /// Concurrent chunk-encode workers. `1` forces strict in-order execution.
  #[arg(long, default_value_t = 4)]
  workers: usize,

  /// Constant rate factor. Negative disables CQ in favor of VBR.
  #[arg(long, allow_negative_numbers = true)]
  crf: Option<f64>,

  /// Target bitrate in kbps (VBR/per-chunk-VBR path).
  #[arg(long)]
  bitrate: Option<f64>,

  /// Target VMAF for CRF/bitrate search-based analyzers.
  #[arg(long)]
  vmaf: Option<f64>,

  /// Print the commands that would run without encoding anything.
  #[arg(long)]
  dry_run: bool,

  /// Resume a prior run: requires an existing chunks.log under `--temp`.
  #[arg(long)]
  resume: bool,

  #[arg(short, long)]
  quiet: bool,

  #[arg(long)]
  verbose: bool,
}

impl CliOpts {
  fn verbosity(&self) -> logging::Verbosity {
    if self.quiet {
      logging::Verbosity::Quiet
    } else if self.verbose {
      logging::Verbosity::Verbose
    } else {
      logging::Verbosity::Normal
    }
  }

  fn into_config(self) -> Config {
    let mut config = Config::default();
    if let Some(crf) = self.crf {
      config.crf = crf;
    }
    config.bitrate = self.bitrate;
    if let Some(vmaf) = self.vmaf {
      config.vmaf = vmaf;
    }
    config.multiprocess_workers = self.workers;
    config.dry_run = self.dry_run;
    config.resume = self.resume;
    config.temp_folder = self.temp;
    config
  }
}

fn main() -> ExitCode {
  let opts = CliOpts::parse();
  let verbosity = opts.verbosity();
  let chunks_manifest = opts.chunks.clone();
  let input = opts.input.clone();
  let temp_folder = opts.temp.clone();

  let console_level = match verbosity {
    logging::Verbosity::Quiet => LevelFilter::WARN,
    logging::Verbosity::Normal => logging::DEFAULT_CONSOLE_LEVEL,
    logging::Verbosity::Verbose => LevelFilter::DEBUG,
  };
  logging::init_logging(console_level, &temp_folder.join("av1an-adapt.log"), logging::DEFAULT_FILE_LEVEL);

  let config = opts.into_config();

  let ctx = match RunContext::initialize(config) {
    Ok(ctx) => ctx,
    Err(e) => {
      tracing::error!("{e:#}");
      return exit_for(&e);
    },
  };

  let sequence = match ChunkSequence::load(&chunks_manifest) {
    Ok(mut seq) => {
      seq.input = input;
      seq
    },
    Err(e) => {
      tracing::error!("failed to load chunk manifest {chunks_manifest:?}: {e:#}");
      return ExitCode::from(2);
    },
  };

  progress::init(sequence.len() as u64, ctx.config.multiprocess_workers, verbosity);

  let result = av1an_adapt_core::run(&ctx, &sequence);
  progress::finish();

  match result {
    Ok(summary) => {
      tracing::info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "run complete"
      );
      if summary.failed > 0 {
        ExitCode::from(1)
      } else {
        ExitCode::SUCCESS
      }
    },
    Err(e) => {
      tracing::error!("{e:#}");
      exit_for(&e)
    },
  }
}

/// A propagated `ConfigError` exits `2`; anything else is an unexpected
/// run-time failure and exits `1`, matching spec §6.1's exit-code table.
fn exit_for(err: &anyhow::Error) -> ExitCode {
  if err.downcast_ref::<ConfigError>().is_some() {
    ExitCode::from(2)
  } else {
    ExitCode::from(1)
  }
}
