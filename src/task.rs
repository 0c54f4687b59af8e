use crate::notifier::TaskCompletionStatus;

use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Lifecycle of a single task inside a run.
///
/// `Created → AwaitingPermit → Admitted → Executing → Completed`. A task that
/// abandons its wait goes straight from `AwaitingPermit` to `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPhase {
  Created,
  AwaitingPermit,
  Admitted,
  Executing,
  Completed(TaskCompletionStatus),
}

impl TaskPhase {
  /// Whether moving from `self` to `next` is a legal step of the lifecycle.
  pub fn can_advance_to(&self, next: &TaskPhase) -> bool {
    match (self, next) {
      (TaskPhase::Created, TaskPhase::AwaitingPermit) => true,
      (TaskPhase::AwaitingPermit, TaskPhase::Admitted) => true,
      (TaskPhase::AwaitingPermit, TaskPhase::Completed(status)) => status.is_admission_failure(),
      (TaskPhase::Admitted, TaskPhase::Executing) => true,
      (TaskPhase::Executing, TaskPhase::Completed(status)) => !status.is_admission_failure(),
      _ => false,
    }
  }

  pub fn is_completed(&self) -> bool {
    matches!(self, TaskPhase::Completed(_))
  }
}

/// Handed to the work body of every admitted task.
#[derive(Debug, Clone)]
pub struct TaskContext {
  pub(crate) index: usize,
  pub(crate) runner_name: Arc<String>,
  pub(crate) token: CancellationToken,
  pub(crate) in_flight_at_admission: usize,
}

impl TaskContext {
  /// Submission index of this task, starting at zero.
  pub fn index(&self) -> usize {
    self.index
  }

  pub fn runner_name(&self) -> &str {
    &self.runner_name
  }

  /// Number of tasks holding the gate right after this one was admitted.
  pub fn in_flight_at_admission(&self) -> usize {
    self.in_flight_at_admission
  }

  /// Whether the run was asked to stop. Admitted tasks are never interrupted by
  /// the runner; the work body may check this and finish early.
  pub fn is_cancellation_requested(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Resolves once the run is cancelled.
  pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
    self.token.cancelled()
  }
}
