use crate::notifier::TaskCompletionStatus;
use crate::task::TaskPhase;

use dashmap::DashMap;
use thiserror::Error;

/// A phase change that the task lifecycle does not allow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Task {index} cannot move from {from:?} to {to:?}")]
pub struct IllegalTransition {
  pub index: usize,
  pub from: TaskPhase,
  pub to: TaskPhase,
}

/// How many tasks of a run sit in each phase at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseCounts {
  pub created: usize,
  pub awaiting_permit: usize,
  pub admitted: usize,
  pub executing: usize,
  pub completed: usize,
}

impl PhaseCounts {
  pub fn total(&self) -> usize {
    self.created + self.awaiting_permit + self.admitted + self.executing + self.completed
  }

  /// Tasks currently holding a gate permit.
  pub fn holding_permit(&self) -> usize {
    self.admitted + self.executing
  }
}

/// Tracks the current phase of every task in a run.
#[derive(Debug)]
pub struct StateBoard {
  phases: DashMap<usize, TaskPhase>,
}

impl StateBoard {
  pub(crate) fn new(task_count: usize) -> Self {
    let phases = DashMap::with_capacity(task_count);
    for index in 0..task_count {
      phases.insert(index, TaskPhase::Created);
    }
    Self { phases }
  }

  pub fn task_count(&self) -> usize {
    self.phases.len()
  }

  pub fn phase(&self, index: usize) -> Option<TaskPhase> {
    self.phases.get(&index).map(|entry| *entry.value())
  }

  pub(crate) fn advance(&self, index: usize, to: TaskPhase) -> Result<(), IllegalTransition> {
    let Some(mut entry) = self.phases.get_mut(&index) else {
      return Err(IllegalTransition { index, from: TaskPhase::Created, to });
    };
    let from = *entry.value();
    if !from.can_advance_to(&to) {
      return Err(IllegalTransition { index, from, to });
    }
    *entry.value_mut() = to;
    Ok(())
  }

  /// Marks a task whose execution unit disappeared. Skips lifecycle checks
  /// since the last observed phase is arbitrary.
  pub(crate) fn mark_lost(&self, index: usize) {
    self.phases.insert(index, TaskPhase::Completed(TaskCompletionStatus::Lost));
  }

  pub fn snapshot(&self) -> PhaseCounts {
    let mut counts = PhaseCounts::default();
    for entry in self.phases.iter() {
      match entry.value() {
        TaskPhase::Created => counts.created += 1,
        TaskPhase::AwaitingPermit => counts.awaiting_permit += 1,
        TaskPhase::Admitted => counts.admitted += 1,
        TaskPhase::Executing => counts.executing += 1,
        TaskPhase::Completed(_) => counts.completed += 1,
      }
    }
    counts
  }

  pub fn all_completed(&self) -> bool {
    self.phases.iter().all(|entry| entry.value().is_completed())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_new_board_starts_in_created() {
    let board = StateBoard::new(4);
    assert_eq!(board.snapshot(), PhaseCounts { created: 4, ..Default::default() });
    assert!(!board.all_completed());
  }

  #[test]
  fn test_advance_follows_lifecycle() {
    let board = StateBoard::new(2);
    board.advance(0, TaskPhase::AwaitingPermit).unwrap();
    board.advance(0, TaskPhase::Admitted).unwrap();
    board.advance(0, TaskPhase::Executing).unwrap();

    let counts = board.snapshot();
    assert_eq!(counts.executing, 1);
    assert_eq!(counts.created, 1);
    assert_eq!(counts.holding_permit(), 1);

    board
      .advance(0, TaskPhase::Completed(TaskCompletionStatus::Success))
      .unwrap();
    assert_eq!(board.phase(0), Some(TaskPhase::Completed(TaskCompletionStatus::Success)));
  }

  #[test]
  fn test_illegal_transition_is_rejected_and_state_kept() {
    let board = StateBoard::new(1);
    let err = board.advance(0, TaskPhase::Executing).unwrap_err();
    assert_eq!(err.from, TaskPhase::Created);
    assert_eq!(board.phase(0), Some(TaskPhase::Created));
  }

  #[test]
  fn test_unknown_index_is_rejected() {
    let board = StateBoard::new(1);
    assert!(board.advance(7, TaskPhase::AwaitingPermit).is_err());
    assert_eq!(board.task_count(), 1);
  }

  #[test]
  fn test_mark_lost_completes_from_any_phase() {
    let board = StateBoard::new(1);
    board.advance(0, TaskPhase::AwaitingPermit).unwrap();
    board.mark_lost(0);
    assert!(board.all_completed());
  }
}
