use crate::board::{PhaseCounts, StateBoard};
use crate::error::TaskError;
use crate::gate::AdmissionGate;
use crate::notifier::NotificationDispatch;
use crate::report::{RunReport, TaskReport};

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A handle to a run started with [`BoundedRunner::start`](crate::BoundedRunner::start).
///
/// Allows observing progress, requesting cancellation and awaiting the report.
/// Dropping the handle without joining cancels the run: tasks still waiting for
/// a permit give up, admitted tasks finish on their own.
#[derive(Debug)]
pub struct RunHandle<T: Send + 'static, E: Send + 'static> {
  pub(crate) run_id: u64,
  pub(crate) runner_name: Arc<String>,
  pub(crate) gate: Arc<AdmissionGate>,
  pub(crate) board: Arc<StateBoard>,
  pub(crate) cancellation_token: CancellationToken,
  pub(crate) join_handles: Vec<JoinHandle<TaskReport<T, E>>>,
  pub(crate) dispatch: Option<NotificationDispatch>,
  pub(crate) started_at: Instant,
  pub(crate) joined: bool,
}

impl<T: Send + 'static, E: Send + 'static> RunHandle<T, E> {
  pub fn id(&self) -> u64 {
    self.run_id
  }

  pub fn runner_name(&self) -> &str {
    &self.runner_name
  }

  /// The gate bounding this run.
  pub fn gate(&self) -> &AdmissionGate {
    &self.gate
  }

  pub fn board(&self) -> &StateBoard {
    &self.board
  }

  /// Phase counts of all tasks right now.
  pub fn progress(&self) -> PhaseCounts {
    self.board.snapshot()
  }

  pub fn is_cancellation_requested(&self) -> bool {
    self.cancellation_token.is_cancelled()
  }

  /// Requests cooperative cancellation. Tasks not yet admitted complete with
  /// [`TaskError::Cancelled`]; admitted tasks run to completion.
  pub fn cancel(&self) {
    info!(runner = %*self.runner_name, run_id = self.run_id, "Run cancellation requested.");
    self.cancellation_token.cancel();
  }

  /// Closes the gate. Tasks still waiting for a permit complete with
  /// [`TaskError::Interrupted`].
  pub fn interrupt(&self) {
    warn!(runner = %*self.runner_name, run_id = self.run_id, "Admission gate closed, waiting tasks will be interrupted.");
    self.gate.close();
  }

  /// Waits for every task and returns their reports in submission order.
  ///
  /// Dropping the returned future before it resolves drops the handle with it,
  /// which cancels the tasks still waiting for a permit.
  pub async fn join(mut self) -> RunReport<T, E> {
    let join_handles = std::mem::take(&mut self.join_handles);
    let mut tasks = Vec::with_capacity(join_handles.len());

    for (index, join_handle) in join_handles.into_iter().enumerate() {
      let report = match join_handle.await {
        Ok(report) => report,
        Err(join_error) => {
          warn!(
            runner = %*self.runner_name,
            task = index,
            "Task execution unit was lost: {:?}",
            join_error
          );
          self.board.mark_lost(index);
          TaskReport {
            index,
            outcome: Err(TaskError::Lost(join_error.to_string())),
            acquired_gate: false,
            waited: Duration::ZERO,
            executed: None,
            started_at: self.started_at,
            admitted_at: None,
            completed_at: Instant::now(),
          }
        }
      };
      tasks.push(report);
    }
    // Only a fully awaited join may skip the cancel in Drop.
    self.joined = true;
    let elapsed = self.started_at.elapsed();

    if let Some(dispatch) = self.dispatch.take() {
      dispatch.finish().await;
      debug!(runner = %*self.runner_name, "All completion notifications dispatched.");
    }

    let report = RunReport {
      runner_name: self.runner_name.clone(),
      run_id: self.run_id,
      concurrency_limit: self.gate.capacity(),
      tasks,
      elapsed,
      peak_in_flight: self.gate.peak_in_flight(),
    };
    info!(
      runner = %*self.runner_name,
      run_id = self.run_id,
      "Completed {} tasks with max {} concurrent tasks in {} ms (peak observed {}, {} failed).",
      report.task_count(),
      report.concurrency_limit,
      report.elapsed.as_millis(),
      report.peak_in_flight,
      report.failed()
    );
    report
  }
}

impl<T: Send + 'static, E: Send + 'static> Drop for RunHandle<T, E> {
  fn drop(&mut self) {
    if !self.joined && !self.cancellation_token.is_cancelled() {
      info!(
        runner = %*self.runner_name,
        run_id = self.run_id,
        "RunHandle dropped without join. Cancelling tasks still waiting for a permit."
      );
      self.cancellation_token.cancel();
    }
  }
}
