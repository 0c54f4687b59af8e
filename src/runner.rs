use crate::board::StateBoard;
use crate::config::RunnerConfig;
use crate::error::{RunnerError, TaskError};
use crate::gate::{AdmissionGate, GatePermit};
use crate::handle::RunHandle;
use crate::notifier::{CompletionNotifier, TaskCompletionInfo, TaskCompletionStatus};
use crate::report::{RunReport, TaskReport};
use crate::task::{TaskContext, TaskPhase};

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use futures::FutureExt;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_RUN_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Runs a fixed number of lightweight tasks while letting at most
/// `concurrency_limit` of them execute their work body at once.
///
/// Every task is its own Tokio task. Before running the work body it waits on
/// the run's [`AdmissionGate`]; waiting suspends the task without holding a
/// runtime worker thread. The permit is released when the work body returns,
/// fails or panics.
#[derive(Debug, Clone)]
pub struct BoundedRunner {
  runner_name: Arc<String>,
  config: Arc<RunnerConfig>,
  tokio_handle: TokioHandle,
  notifier: CompletionNotifier,
}

impl BoundedRunner {
  /// Validates `config` and builds a runner. Nothing is spawned yet.
  pub fn new(config: RunnerConfig, tokio_handle: TokioHandle) -> Result<Self, RunnerError> {
    if let Err(config_error) = config.validate() {
      warn!(runner = %config.name, "Rejected runner configuration: {}", config_error);
      return Err(config_error);
    }
    Ok(Self {
      runner_name: Arc::new(config.name.clone()),
      config: Arc::new(config),
      tokio_handle,
      notifier: CompletionNotifier::default(),
    })
  }

  pub fn name(&self) -> &str {
    &self.runner_name
  }

  pub fn config(&self) -> &RunnerConfig {
    &self.config
  }

  /// Registers a callback invoked once per completed task. Handlers added
  /// after a run started are picked up from the next completion onward.
  pub fn add_completion_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.notifier.add_handler(handler);
  }

  /// Spawns every task and returns immediately.
  pub fn start<T, E, F, Fut>(&self, work: F) -> RunHandle<T, E>
  where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let run_id = NEXT_RUN_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let task_count = self.config.task_count;
    let gate = Arc::new(AdmissionGate::with_valid_capacity(self.config.concurrency_limit));
    let board = Arc::new(StateBoard::new(task_count));
    let cancellation_token = CancellationToken::new();
    let dispatch = self.notifier.start_dispatch(&self.tokio_handle, &self.runner_name);
    let work = Arc::new(work);

    info!(
      runner = %*self.runner_name,
      run_id,
      task_count,
      concurrency_limit = gate.capacity(),
      "Starting bounded run{}.",
      if self.config.is_unconstrained() { " (unconstrained)" } else { "" }
    );

    let started_at = Instant::now();
    let mut join_handles = Vec::with_capacity(task_count);
    for index in 0..task_count {
      let unit = GatedTask {
        index,
        runner_name: self.runner_name.clone(),
        gate: gate.clone(),
        board: board.clone(),
        token: cancellation_token.clone(),
        work: work.clone(),
        notifications: dispatch.as_ref().map(|dispatch| dispatch.sender()),
        _outcome: PhantomData,
      };
      join_handles.push(self.tokio_handle.spawn(
        unit
          .execute()
          .instrument(info_span!("gated_task", runner = %*self.runner_name, run_id, task = index)),
      ));
    }
    trace!(runner = %*self.runner_name, run_id, "All {} tasks spawned.", task_count);

    RunHandle {
      run_id,
      runner_name: self.runner_name.clone(),
      gate,
      board,
      cancellation_token,
      join_handles,
      dispatch,
      started_at,
      joined: false,
    }
  }

  /// Spawns every task and waits for all of them.
  pub async fn run<T, E, F, Fut>(&self, work: F) -> RunReport<T, E>
  where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self
      .start(work)
      .join()
      .instrument(info_span!("bounded_run", runner = %*self.runner_name))
      .await
  }
}

/// Runs `task_count` tasks on the current Tokio runtime with at most
/// `concurrency_limit` executing at once.
///
/// Fails before spawning anything if either count is zero.
pub async fn run<T, E, F, Fut>(task_count: usize, concurrency_limit: usize, work: F) -> Result<RunReport<T, E>, RunnerError>
where
  T: Send + 'static,
  E: Send + 'static,
  F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
{
  let tokio_handle = TokioHandle::try_current().map_err(|_| RunnerError::NoRuntime)?;
  let runner = BoundedRunner::new(RunnerConfig::new(task_count, concurrency_limit), tokio_handle)?;
  Ok(runner.run(work).await)
}

/// One task of a run together with everything it shares with its siblings.
struct GatedTask<T, E, F> {
  index: usize,
  runner_name: Arc<String>,
  gate: Arc<AdmissionGate>,
  board: Arc<StateBoard>,
  token: CancellationToken,
  work: Arc<F>,
  notifications: Option<mpsc::UnboundedSender<TaskCompletionInfo>>,
  _outcome: PhantomData<fn() -> (T, E)>,
}

impl<T, E, F, Fut> GatedTask<T, E, F>
where
  T: Send + 'static,
  E: Send + 'static,
  F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
{
  async fn execute(self) -> TaskReport<T, E> {
    let spawned_at = Instant::now();
    self.advance(TaskPhase::AwaitingPermit);

    let admission: Result<GatePermit, TaskError<E>> = tokio::select! {
      biased;
      _ = self.token.cancelled() => Err(TaskError::Cancelled),
      acquired = self.gate.acquire() => acquired.map_err(|_| TaskError::Interrupted),
    };
    let admitted_at = Instant::now();

    let permit = match admission {
      Ok(permit) => permit,
      Err(admission_error) => {
        debug!(
          task = self.index,
          cancelled = matches!(admission_error, TaskError::Cancelled),
          "Task abandoned its wait for a permit."
        );
        return self.complete(Err(admission_error), None, spawned_at, None);
      }
    };

    self.advance(TaskPhase::Admitted);
    let context = TaskContext {
      index: self.index,
      runner_name: self.runner_name.clone(),
      token: self.token.clone(),
      in_flight_at_admission: permit.in_flight_at_admission(),
    };
    debug!(
      task = self.index,
      in_flight = context.in_flight_at_admission,
      "Task admitted after {:?}.",
      admitted_at.saturating_duration_since(spawned_at)
    );

    self.advance(TaskPhase::Executing);
    let work = self.work.clone();
    let outcome = match AssertUnwindSafe(async move { (*work)(context).await }).catch_unwind().await {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(work_error)) => Err(TaskError::Failed(work_error)),
      Err(panic_payload) => {
        let message = panic_message(panic_payload.as_ref());
        error!(task = self.index, "Task panicked during execution: {}", message);
        Err(TaskError::Panicked(message))
      }
    };

    self.complete(outcome, Some(permit), spawned_at, Some(admitted_at))
  }

  fn advance(&self, to: TaskPhase) {
    if let Err(transition_error) = self.board.advance(self.index, to) {
      warn!(task = self.index, "{}", transition_error);
    }
  }

  /// Records the final phase, then gives the permit back. Recording first keeps
  /// the board's permit holders within the gate capacity.
  fn complete(
    self,
    outcome: Result<T, TaskError<E>>,
    permit: Option<GatePermit>,
    started_at: Instant,
    admitted_at: Option<Instant>,
  ) -> TaskReport<T, E> {
    let completed_at = Instant::now();
    let waited = admitted_at.unwrap_or(completed_at).saturating_duration_since(started_at);
    let executed = admitted_at.map(|admitted| completed_at.saturating_duration_since(admitted));
    let status = TaskCompletionStatus::from(&outcome);
    self.advance(TaskPhase::Completed(status));

    let acquired_gate = permit.is_some();
    drop(permit);
    match status {
      TaskCompletionStatus::Success => trace!(task = self.index, "Task completed successfully."),
      _ => debug!(task = self.index, ?status, "Task completed with a failure."),
    }

    if let Some(tx) = &self.notifications {
      let info = TaskCompletionInfo {
        runner_name: self.runner_name.clone(),
        task_index: self.index,
        status,
        waited,
        executed,
        completion_time: SystemTime::now(),
      };
      if tx.send(info).is_err() {
        warn!(task = self.index, "Notification worker is gone. Completion notification was lost.");
      }
    }

    TaskReport {
      index: self.index,
      outcome,
      acquired_gate,
      waited,
      executed,
      started_at,
      admitted_at,
      completed_at,
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
