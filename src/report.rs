use crate::error::{RunFailures, TaskError};
use crate::notifier::TaskCompletionStatus;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// What happened to one task of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport<T, E> {
  pub index: usize,
  pub outcome: Result<T, TaskError<E>>,
  /// Whether the task ever held a gate permit.
  pub acquired_gate: bool,
  /// Time between spawn and admission (or abandonment).
  pub waited: Duration,
  /// Time spent in the work body.
  pub executed: Option<Duration>,
  /// When the task started waiting for a permit.
  pub started_at: Instant,
  /// When the task was granted a permit, `None` if it never was.
  pub admitted_at: Option<Instant>,
  /// When the task reached its final phase.
  pub completed_at: Instant,
}

impl<T, E> TaskReport<T, E> {
  pub fn status(&self) -> TaskCompletionStatus {
    TaskCompletionStatus::from(&self.outcome)
  }

  pub fn is_success(&self) -> bool {
    self.outcome.is_ok()
  }

  /// Wall time from the start of the wait to completion.
  pub fn turnaround(&self) -> Duration {
    self.completed_at.saturating_duration_since(self.started_at)
  }
}

/// Result of a whole run. `tasks` is in submission order.
#[derive(Debug, Clone)]
pub struct RunReport<T, E> {
  pub runner_name: Arc<String>,
  pub run_id: u64,
  pub concurrency_limit: usize,
  pub tasks: Vec<TaskReport<T, E>>,
  pub elapsed: Duration,
  /// Highest number of tasks that held the gate at the same time.
  pub peak_in_flight: usize,
}

impl<T, E> RunReport<T, E> {
  pub fn task_count(&self) -> usize {
    self.tasks.len()
  }

  pub fn succeeded(&self) -> usize {
    self.tasks.iter().filter(|task| task.is_success()).count()
  }

  pub fn failed(&self) -> usize {
    self.task_count() - self.succeeded()
  }

  pub fn count_with_status(&self, status: TaskCompletionStatus) -> usize {
    self.tasks.iter().filter(|task| task.status() == status).count()
  }

  pub fn failures(&self) -> impl Iterator<Item = (usize, &TaskError<E>)> {
    self
      .tasks
      .iter()
      .filter_map(|task| task.outcome.as_ref().err().map(|error| (task.index, error)))
  }

  pub fn results(&self) -> impl Iterator<Item = &Result<T, TaskError<E>>> {
    self.tasks.iter().map(|task| &task.outcome)
  }

  /// Completed tasks per second over the whole run.
  pub fn throughput(&self) -> f64 {
    let seconds = self.elapsed.as_secs_f64();
    if seconds > 0.0 {
      self.task_count() as f64 / seconds
    } else {
      0.0
    }
  }

  /// All values in submission order, or every failure if any task failed.
  pub fn into_results(self) -> Result<Vec<T>, RunFailures<E>> {
    let task_count = self.tasks.len();
    let mut values = Vec::with_capacity(task_count);
    let mut failures = Vec::new();
    for task in self.tasks {
      match task.outcome {
        Ok(value) => values.push(value),
        Err(error) => failures.push((task.index, error)),
      }
    }
    if failures.is_empty() {
      Ok(values)
    } else {
      Err(RunFailures { task_count, failures })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn task(index: usize, outcome: Result<u32, TaskError<String>>) -> TaskReport<u32, String> {
    let now = Instant::now();
    TaskReport {
      index,
      acquired_gate: !matches!(outcome, Err(TaskError::Cancelled)),
      outcome,
      waited: Duration::ZERO,
      executed: None,
      started_at: now,
      admitted_at: None,
      completed_at: now,
    }
  }

  fn report(tasks: Vec<TaskReport<u32, String>>) -> RunReport<u32, String> {
    RunReport {
      runner_name: Arc::new("report_unit".to_string()),
      run_id: 0,
      concurrency_limit: 2,
      tasks,
      elapsed: Duration::from_millis(500),
      peak_in_flight: 2,
    }
  }

  #[test]
  fn test_into_results_keeps_submission_order() {
    let run = report(vec![task(0, Ok(10)), task(1, Ok(11)), task(2, Ok(12))]);
    assert_eq!(run.throughput(), 6.0);
    assert_eq!(run.into_results(), Ok(vec![10, 11, 12]));
  }

  #[test]
  fn test_turnaround_spans_start_to_completion() {
    let mut entry = task(0, Ok(1));
    entry.completed_at = entry.started_at + Duration::from_millis(250);
    assert_eq!(entry.turnaround(), Duration::from_millis(250));
  }

  #[test]
  fn test_into_results_aggregates_every_failure() {
    let run = report(vec![
      task(0, Ok(10)),
      task(1, Err(TaskError::Failed("bad input".to_string()))),
      task(2, Err(TaskError::Cancelled)),
    ]);
    assert_eq!(run.succeeded(), 1);
    assert_eq!(run.failed(), 2);
    assert_eq!(run.count_with_status(TaskCompletionStatus::Cancelled), 1);

    let failures = run.into_results().unwrap_err();
    assert_eq!(failures.task_count, 3);
    assert_eq!(
      failures.failures,
      vec![(1, TaskError::Failed("bad input".to_string())), (2, TaskError::Cancelled)]
    );
    assert_eq!(
      failures.to_string(),
      "2 of 3 tasks failed (first: task 1: Task work body failed: bad input)"
    );
  }
}
