use crate::error::TaskError;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCompletionStatus {
  Success,
  Failed,
  Panicked,
  Cancelled,
  Interrupted,
  Lost,
}

impl TaskCompletionStatus {
  pub fn is_success(&self) -> bool {
    matches!(self, TaskCompletionStatus::Success)
  }

  /// The task finished without ever holding a permit.
  pub fn is_admission_failure(&self) -> bool {
    matches!(self, TaskCompletionStatus::Cancelled | TaskCompletionStatus::Interrupted)
  }
}

impl<E> From<&TaskError<E>> for TaskCompletionStatus {
  fn from(error: &TaskError<E>) -> Self {
    match error {
      TaskError::Failed(_) => TaskCompletionStatus::Failed,
      TaskError::Panicked(_) => TaskCompletionStatus::Panicked,
      TaskError::Cancelled => TaskCompletionStatus::Cancelled,
      TaskError::Interrupted => TaskCompletionStatus::Interrupted,
      TaskError::Lost(_) => TaskCompletionStatus::Lost,
    }
  }
}

impl<T, E> From<&Result<T, TaskError<E>>> for TaskCompletionStatus {
  fn from(result: &Result<T, TaskError<E>>) -> Self {
    match result {
      Ok(_) => TaskCompletionStatus::Success,
      Err(error) => error.into(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
  pub runner_name: Arc<String>,
  pub task_index: usize,
  pub status: TaskCompletionStatus,
  /// Time spent between spawn and admission (or abandonment).
  pub waited: Duration,
  /// Time spent in the work body, `None` if never admitted.
  pub executed: Option<Duration>,
  pub completion_time: SystemTime,
}

type CompletionHandler = Arc<dyn Fn(TaskCompletionInfo) + Send + Sync + 'static>;

/// Registry of completion handlers shared by every run of a runner.
#[derive(Clone, Default)]
pub(crate) struct CompletionNotifier {
  handlers: Arc<RwLock<Vec<CompletionHandler>>>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionNotifier")
      .field("handler_count", &self.handler_count())
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn add_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    let mut handlers = self.handlers.write();
    handlers.push(Arc::new(handler));
    info!("Notifier: Added new completion handler. Total handlers: {}", handlers.len());
  }

  pub(crate) fn handler_count(&self) -> usize {
    self.handlers.read().len()
  }

  /// Starts the dispatch worker for one run. Returns `None` when nobody listens.
  pub(crate) fn start_dispatch(&self, tokio_handle: &TokioHandle, runner_name: &Arc<String>) -> Option<NotificationDispatch> {
    if self.handler_count() == 0 {
      trace!(runner = %**runner_name, "No completion handlers registered, notifications disabled for this run.");
      return None;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let worker = tokio_handle.spawn(
      Self::run_dispatch_loop(rx, self.handlers.clone())
        .instrument(info_span!("notification_worker_loop", runner = %**runner_name)),
    );
    Some(NotificationDispatch { tx, worker })
  }

  async fn run_dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<TaskCompletionInfo>,
    handlers: Arc<RwLock<Vec<CompletionHandler>>>,
  ) {
    debug!("Notification worker started.");
    while let Some(info) = rx.recv().await {
      // Clone the list so handlers run without the lock held.
      let current: Vec<CompletionHandler> = handlers.read().clone();
      trace!(task = info.task_index, "Dispatching notification to {} handlers.", current.len());
      for handler in current {
        let info_for_handler = info.clone();
        if catch_unwind(AssertUnwindSafe(|| handler(info_for_handler))).is_err() {
          error!(task = info.task_index, "A completion handler panicked during execution.");
        }
      }
    }
    debug!("Notification worker stopped (input queue closed and drained).");
  }
}

/// Sending half of a run's notification worker.
#[derive(Debug)]
pub(crate) struct NotificationDispatch {
  tx: mpsc::UnboundedSender<TaskCompletionInfo>,
  worker: JoinHandle<()>,
}

impl NotificationDispatch {
  pub(crate) fn sender(&self) -> mpsc::UnboundedSender<TaskCompletionInfo> {
    self.tx.clone()
  }

  /// Closes the channel and waits until every queued notification was handled.
  pub(crate) async fn finish(self) {
    let NotificationDispatch { tx, worker } = self;
    drop(tx);
    if let Err(join_error) = worker.await {
      error!("Error joining notification worker: {:?}", join_error);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn info(task_index: usize, status: TaskCompletionStatus) -> TaskCompletionInfo {
    TaskCompletionInfo {
      runner_name: Arc::new("notifier_unit".to_string()),
      task_index,
      status,
      waited: Duration::ZERO,
      executed: None,
      completion_time: SystemTime::now(),
    }
  }

  #[test]
  fn test_status_from_result() {
    let ok: Result<u8, TaskError<String>> = Ok(1);
    let failed: Result<u8, TaskError<String>> = Err(TaskError::Failed("boom".into()));
    let cancelled: Result<u8, TaskError<String>> = Err(TaskError::Cancelled);
    assert_eq!(TaskCompletionStatus::from(&ok), TaskCompletionStatus::Success);
    assert_eq!(TaskCompletionStatus::from(&failed), TaskCompletionStatus::Failed);
    assert_eq!(TaskCompletionStatus::from(&cancelled), TaskCompletionStatus::Cancelled);
    assert!(TaskCompletionStatus::Cancelled.is_admission_failure());
    assert!(!TaskCompletionStatus::Panicked.is_admission_failure());
  }

  #[tokio::test]
  async fn test_no_handlers_means_no_dispatch() {
    let notifier = CompletionNotifier::default();
    let name = Arc::new("empty".to_string());
    assert!(notifier.start_dispatch(&TokioHandle::current(), &name).is_none());
  }

  #[tokio::test]
  async fn test_finish_drains_all_messages() {
    let notifier = CompletionNotifier::default();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    notifier.add_handler(move |_| {
      seen_clone.fetch_add(1, Ordering::SeqCst);
    });

    let name = Arc::new("drain".to_string());
    let dispatch = notifier.start_dispatch(&TokioHandle::current(), &name).unwrap();
    let tx = dispatch.sender();
    for i in 0..10 {
      tx.send(info(i, TaskCompletionStatus::Success)).unwrap();
    }
    drop(tx);
    dispatch.finish().await;
    assert_eq!(seen.load(Ordering::SeqCst), 10);
  }

  #[tokio::test]
  async fn test_panicking_handler_does_not_stop_others() {
    let notifier = CompletionNotifier::default();
    let seen = Arc::new(AtomicUsize::new(0));
    notifier.add_handler(|_| panic!("handler failure"));
    let seen_clone = seen.clone();
    notifier.add_handler(move |_| {
      seen_clone.fetch_add(1, Ordering::SeqCst);
    });

    let name = Arc::new("panicky".to_string());
    let dispatch = notifier.start_dispatch(&TokioHandle::current(), &name).unwrap();
    let tx = dispatch.sender();
    tx.send(info(0, TaskCompletionStatus::Failed)).unwrap();
    tx.send(info(1, TaskCompletionStatus::Success)).unwrap();
    drop(tx);
    dispatch.finish().await;
    assert_eq!(seen.load(Ordering::SeqCst), 2);
  }
}
