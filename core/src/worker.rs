//! Worker Pool (spec §4.7): bounded-concurrency execution over a list of
//! commands, grounded on the teacher's `broker::Broker::encoding_loop`
//! (`crossbeam_channel::bounded` + `crossbeam_utils::thread::scope`).
//!
//! The optional remote-dispatch path (spec §4.7.1) is modeled as the
//! [`RemoteBroker`] trait rather than the teacher's full TCP node/server
//! protocol — see DESIGN.md for why that's an intentionally smaller reading
//! of the teacher's distributed-worker subsystem.

use crossbeam_channel::bounded;
use crossbeam_utils::thread as cb_thread;

/// One unit of work submitted to the pool. Side effects (writing an
/// `EncodeStats`, a ladder probe result, …) are expected to land on the
/// command itself via interior mutability or a channel captured in the
/// closure — the pool only cares that `run` executed exactly once.
pub trait Command: Send {
  fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send> Command for F {
  fn run(self: Box<Self>) {
    (*self)()
  }
}

/// Bounded-concurrency executor over a batch of [`Command`]s. `concurrency
/// = 1` (`override_sequential`) runs every command on the calling thread in
/// submission order; otherwise commands are fanned out across
/// `concurrency` worker threads with no ordering guarantee between them.
pub struct WorkerPool {
  concurrency: usize,
}

impl WorkerPool {
  pub fn new(concurrency: usize) -> Self {
    Self { concurrency: concurrency.max(1) }
  }

  /// Forces single-threaded, in-order execution (spec §4.7
  /// `override_sequential`).
  pub fn sequential() -> Self {
    Self { concurrency: 1 }
  }

  /// Runs every command to completion. Each command runs exactly once;
  /// there is no ordering guarantee across commands when `concurrency > 1`.
  /// A command that panics is caught and logged so sibling commands keep
  /// running (failure isolation, spec §4.7).
  pub fn execute(&self, commands: Vec<Box<dyn Command>>) {
    if commands.is_empty() {
      return;
    }

    if self.concurrency == 1 {
      for cmd in commands {
        run_isolated(cmd);
      }
      return;
    }

    let (tx, rx) = bounded::<Box<dyn Command>>(commands.len());
    for cmd in commands {
      tx.send(cmd).expect("bounded channel sized to command count");
    }
    drop(tx);

    cb_thread::scope(|scope| {
      for _ in 0..self.concurrency {
        let rx = rx.clone();
        scope.spawn(move |_| {
          while let Ok(cmd) = rx.recv() {
            run_isolated(cmd);
          }
        });
      }
    })
    .expect("worker threads do not panic across the scope boundary");
  }
}

fn run_isolated(cmd: Box<dyn Command>) {
  if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cmd.run())) {
    let msg = panic
      .downcast_ref::<&str>()
      .map(|s| s.to_string())
      .or_else(|| panic.downcast_ref::<String>().cloned())
      .unwrap_or_else(|| "worker command panicked".to_string());
    tracing::error!("worker command failed: {msg}");
  }
}

/// A unique handle to a job submitted to a [`RemoteBroker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(pub u64);

/// Hook for dispatching commands to an external task broker instead of the
/// in-process [`WorkerPool`] (spec §4.7.1). The core only ever depends on
/// this trait — `WorkerPool` itself implements it so callers can treat both
/// execution modes interchangeably behind one `execute` entry point.
pub trait RemoteBroker {
  fn submit(&self, command: Box<dyn Command>) -> JobHandle;
  fn join(&self, handle: JobHandle) -> Result<(), crate::error::EncodeFailure>;
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  use super::*;

  #[test]
  fn sequential_pool_runs_every_command() {
    let counter = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::sequential();
    let commands: Vec<Box<dyn Command>> = (0..5)
      .map(|_| {
        let counter = Arc::clone(&counter);
        Box::new(move || {
          counter.fetch_add(1, Ordering::SeqCst);
        }) as Box<dyn Command>
      })
      .collect();
    pool.execute(commands);
    assert_eq!(counter.load(Ordering::SeqCst), 5);
  }

  #[test]
  fn concurrent_pool_runs_every_command() {
    let counter = Arc::new(AtomicUsize::new(0));
    let pool = WorkerPool::new(4);
    let commands: Vec<Box<dyn Command>> = (0..20)
      .map(|_| {
        let counter = Arc::clone(&counter);
        Box::new(move || {
          counter.fetch_add(1, Ordering::SeqCst);
        }) as Box<dyn Command>
      })
      .collect();
    pool.execute(commands);
    assert_eq!(counter.load(Ordering::SeqCst), 20);
  }

  #[test]
  fn a_panicking_command_does_not_stop_siblings() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut commands: Vec<Box<dyn Command>> = Vec::new();
    commands.push(Box::new(|| panic!("boom")));
    for _ in 0..4 {
      let counter = Arc::clone(&counter);
      commands.push(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
      }));
    }
    WorkerPool::new(2).execute(commands);
    assert_eq!(counter.load(Ordering::SeqCst), 4);
  }
}
