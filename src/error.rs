use std::fmt;

use thiserror::Error;

/// Errors raised by the runner itself, before or outside of any task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
  #[error("Task count must be greater than zero")]
  InvalidTaskCount,

  #[error("Concurrency limit must be greater than zero")]
  InvalidConcurrencyLimit,

  #[error("Concurrency limit {limit} exceeds the maximum supported permit count {max}")]
  ConcurrencyLimitTooLarge { limit: usize, max: usize },

  #[error("No Tokio runtime is available to spawn tasks on")]
  NoRuntime,
}

/// The admission gate was closed while a permit was being awaited.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Admission gate was closed")]
pub struct GateClosed;

/// Why a single task did not produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError<E> {
  #[error("Task work body failed: {0}")]
  Failed(E),

  #[error("Task work body panicked: {0}")]
  Panicked(String),

  #[error("Task was cancelled before it was admitted")]
  Cancelled,

  #[error("Task was interrupted while waiting for a permit")]
  Interrupted,

  #[error("Task was lost by the runtime: {0}")]
  Lost(String),
}

impl<E> TaskError<E> {
  /// Returns `true` when the task never entered its work body.
  pub fn is_admission_failure(&self) -> bool {
    matches!(self, TaskError::Cancelled | TaskError::Interrupted)
  }
}

/// Aggregated per-task failures of a run, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailures<E> {
  pub task_count: usize,
  pub failures: Vec<(usize, TaskError<E>)>,
}

impl<E> RunFailures<E> {
  pub fn len(&self) -> usize {
    self.failures.len()
  }

  pub fn is_empty(&self) -> bool {
    self.failures.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &(usize, TaskError<E>)> {
    self.failures.iter()
  }
}

impl<E: fmt::Display> fmt::Display for RunFailures<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} of {} tasks failed", self.failures.len(), self.task_count)?;
    if let Some((index, first)) = self.failures.first() {
      write!(f, " (first: task {}: {})", index, first)?;
    }
    Ok(())
  }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RunFailures<E> {}
