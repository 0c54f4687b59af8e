use crate::error::RunnerError;
use crate::gate::AdmissionGate;

use std::time::Duration;

/// Shape of a bounded run: how many tasks, and how many may execute at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
  pub name: String,
  pub task_count: usize,
  pub concurrency_limit: usize,
}

impl Default for RunnerConfig {
  fn default() -> Self {
    Self {
      name: "bounded_runner".to_string(),
      task_count: 1_000,
      concurrency_limit: 10,
    }
  }
}

impl RunnerConfig {
  pub fn new(task_count: usize, concurrency_limit: usize) -> Self {
    Self {
      task_count,
      concurrency_limit,
      ..Default::default()
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_task_count(mut self, task_count: usize) -> Self {
    self.task_count = task_count;
    self
  }

  pub fn with_concurrency_limit(mut self, concurrency_limit: usize) -> Self {
    self.concurrency_limit = concurrency_limit;
    self
  }

  /// `true` when every task can be admitted at once.
  pub fn is_unconstrained(&self) -> bool {
    self.concurrency_limit >= self.task_count
  }

  pub fn validate(&self) -> Result<(), RunnerError> {
    if self.task_count == 0 {
      return Err(RunnerError::InvalidTaskCount);
    }
    validate_concurrency_limit(self.concurrency_limit)
  }
}

/// A limit must admit at least one task and fit in the gate's semaphore.
pub(crate) fn validate_concurrency_limit(limit: usize) -> Result<(), RunnerError> {
  if limit == 0 {
    return Err(RunnerError::InvalidConcurrencyLimit);
  }
  if limit > AdmissionGate::MAX_CAPACITY {
    return Err(RunnerError::ConcurrencyLimitTooLarge {
      limit,
      max: AdmissionGate::MAX_CAPACITY,
    });
  }
  Ok(())
}

/// Parameters of the simulated workload used by the demo binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoConfig {
  /// How long each task pretends to work.
  pub work: Duration,
  /// Fail every N-th task (by 1-based position). `0` disables fault injection.
  pub fail_every: usize,
}

impl Default for DemoConfig {
  fn default() -> Self {
    Self {
      work: Duration::from_millis(10),
      fail_every: 0,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    let config = RunnerConfig::default();
    assert_eq!(config.task_count, 1_000);
    assert_eq!(config.concurrency_limit, 10);
    assert!(config.validate().is_ok());
    assert!(!config.is_unconstrained());
  }

  #[test]
  fn test_zero_values_are_rejected() {
    assert_eq!(RunnerConfig::new(0, 4).validate(), Err(RunnerError::InvalidTaskCount));
    assert_eq!(RunnerConfig::new(4, 0).validate(), Err(RunnerError::InvalidConcurrencyLimit));
  }

  #[test]
  fn test_oversized_limit_is_rejected() {
    let config = RunnerConfig::new(1, usize::MAX);
    assert!(matches!(
      config.validate(),
      Err(RunnerError::ConcurrencyLimitTooLarge { .. })
    ));
  }

  #[test]
  fn test_builder_methods() {
    let config = RunnerConfig::default()
      .with_name("custom")
      .with_task_count(5)
      .with_concurrency_limit(5);
    assert_eq!(config.name, "custom");
    assert!(config.is_unconstrained());
  }
}
