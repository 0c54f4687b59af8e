//! Simulated workloads for the demo binary.
//!
//! Three scenarios are available:
//! - many sleepy tasks behind one admission gate ([`run_scenario`], [`compare_scenarios`]),
//! - a fixed-size pool against one task per request for I/O-bound calls ([`compare_throughput`]),
//! - requests that fan out to four backends through a second, shared gate ([`compare_fanout`]).

use crate::config::{DemoConfig, RunnerConfig};
use crate::error::RunnerError;
use crate::gate::AdmissionGate;
use crate::report::RunReport;
use crate::runner::BoundedRunner;
use crate::task::TaskContext;

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle as TokioHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Requests issued by the throughput comparison.
pub const THROUGHPUT_REQUESTS: usize = 1_000;
/// Latency of one simulated API call.
pub const API_LATENCY: Duration = Duration::from_millis(200);
/// Only every n-th request logs its own completion.
pub const REQUEST_LOG_INTERVAL: usize = 200;

/// Requests issued by the fan-out comparison.
pub const FANOUT_REQUESTS: usize = 100;
/// Capacity of the shared backend gate in the pooled fan-out scenario.
pub const FANOUT_POOL_SIZE: usize = 200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DemoError {
  #[error("Injected fault in task {index}")]
  InjectedFault { index: usize },
  #[error("{backend} backend unavailable for {user}")]
  BackendUnavailable { backend: Backend, user: String },
}

/// Size of a "fixed pool": twice the available parallelism.
pub fn fixed_pool_size() -> usize {
  std::thread::available_parallelism().map_or(1, NonZeroUsize::get) * 2
}

fn current_thread_label() -> String {
  let thread = std::thread::current();
  thread.name().map_or_else(|| format!("{:?}", thread.id()), str::to_string)
}

/// Pretends to do I/O for `demo.work`, then returns the task index.
///
/// With `demo.fail_every = n > 0`, every n-th task (1-based) fails after its
/// work, which exercises permit release on the failure path.
pub async fn simulated_work(context: TaskContext, demo: DemoConfig) -> Result<usize, DemoError> {
  let index = context.index();
  info!(
    "Task {} running on {} (in-flight={})",
    index,
    current_thread_label(),
    context.in_flight_at_admission()
  );

  tokio::time::sleep(demo.work).await;

  if demo.fail_every > 0 && (index + 1) % demo.fail_every == 0 {
    return Err(DemoError::InjectedFault { index });
  }
  Ok(index)
}

/// Runs the simulated workload once with `config` and logs its throughput.
pub async fn run_scenario(
  label: &str,
  config: RunnerConfig,
  demo: DemoConfig,
  tokio_handle: TokioHandle,
) -> Result<RunReport<usize, DemoError>, RunnerError> {
  let runner = BoundedRunner::new(config.with_name(label), tokio_handle)?;
  info!(
    "[{}] Simulating {} tasks with ~{} ms of work each, at most {} at once.",
    label,
    runner.config().task_count,
    demo.work.as_millis(),
    runner.config().concurrency_limit
  );

  let report = runner.run(move |context| simulated_work(context, demo)).await;
  info!(
    "[{}] Completed in {} ms ({:.2} tasks/sec, peak in-flight {}).",
    label,
    report.elapsed.as_millis(),
    report.throughput(),
    report.peak_in_flight
  );
  Ok(report)
}

/// Runs the bounded configuration and then the same workload unconstrained.
pub async fn compare_scenarios(
  config: RunnerConfig,
  demo: DemoConfig,
  tokio_handle: TokioHandle,
) -> Result<(RunReport<usize, DemoError>, RunReport<usize, DemoError>), RunnerError> {
  let unconstrained = config.clone().with_concurrency_limit(config.task_count);
  let bounded = run_scenario("bounded", config, demo, tokio_handle.clone()).await?;
  let unbounded = run_scenario("unconstrained", unconstrained, demo, tokio_handle).await?;
  Ok((bounded, unbounded))
}

/// One simulated API call: waits `latency` and returns the request index.
/// Every [`REQUEST_LOG_INTERVAL`]-th request logs how long it took.
pub async fn simulated_api_call(context: TaskContext, latency: Duration) -> Result<usize, DemoError> {
  let started = Instant::now();
  tokio::time::sleep(latency).await;
  let index = context.index();
  if index % REQUEST_LOG_INTERVAL == 0 {
    info!(
      "[{}] Request {} finished in {} ms on {}",
      context.runner_name(),
      index,
      started.elapsed().as_millis(),
      current_thread_label()
    );
  }
  Ok(index)
}

async fn run_api_scenario(
  label: &str,
  requests: usize,
  concurrency_limit: usize,
  latency: Duration,
  tokio_handle: TokioHandle,
) -> Result<RunReport<usize, DemoError>, RunnerError> {
  let runner = BoundedRunner::new(RunnerConfig::new(requests, concurrency_limit).with_name(label), tokio_handle)?;
  let report = runner.run(move |context| simulated_api_call(context, latency)).await;
  info!(
    "{} completed in {} ms ({:.2} requests/sec)",
    label,
    report.elapsed.as_millis(),
    report.throughput()
  );
  Ok(report)
}

/// Issues `requests` calls of `latency` each, first through a fixed pool of
/// [`fixed_pool_size`] slots and then with one unconstrained task per request.
pub async fn compare_throughput(
  requests: usize,
  latency: Duration,
  tokio_handle: TokioHandle,
) -> Result<(RunReport<usize, DemoError>, RunReport<usize, DemoError>), RunnerError> {
  info!("Simulating {} API calls with ~{} ms latency.", requests, latency.as_millis());
  let pooled = run_api_scenario("fixed pool", requests, fixed_pool_size(), latency, tokio_handle.clone()).await?;
  let per_task = run_api_scenario("task per request", requests, requests, latency, tokio_handle).await?;
  Ok((pooled, per_task))
}

/// A downstream service a fan-out request calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
  Profile,
  Orders,
  Recommendations,
  Notifications,
}

impl Backend {
  pub const ALL: [Backend; 4] = [
    Backend::Profile,
    Backend::Orders,
    Backend::Recommendations,
    Backend::Notifications,
  ];

  pub fn latency(&self) -> Duration {
    match self {
      Backend::Profile => Duration::from_millis(200),
      Backend::Orders => Duration::from_millis(300),
      Backend::Recommendations => Duration::from_millis(250),
      Backend::Notifications => Duration::from_millis(150),
    }
  }

  /// Waits for a slot on `gate`, then pretends to fetch this backend's data for `user`.
  pub async fn fetch(self, user: &str, gate: &AdmissionGate) -> Result<String, DemoError> {
    let _permit = gate.acquire().await.map_err(|_| DemoError::BackendUnavailable {
      backend: self,
      user: user.to_string(),
    })?;
    debug!("Fetching {} for {} on {}", self, user, current_thread_label());
    tokio::time::sleep(self.latency()).await;
    Ok(format!("{:?}({})", self, user))
  }
}

impl fmt::Display for Backend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Backend::Profile => "user profile",
      Backend::Orders => "orders",
      Backend::Recommendations => "recommendations",
      Backend::Notifications => "notifications",
    };
    f.write_str(name)
  }
}

/// Calls every [`Backend`] concurrently for one user and aggregates the replies
/// as `{Profile(..), Orders(..), Recommendations(..), Notifications(..)}`.
///
/// The first and the last request (`last_index`) log their latency.
pub async fn handle_fanout_request(
  context: TaskContext,
  backend_gate: Arc<AdmissionGate>,
  last_index: usize,
) -> Result<String, DemoError> {
  let index = context.index();
  let user = format!("User{}", index);
  let started = Instant::now();

  let fetched = tokio::try_join!(
    Backend::Profile.fetch(&user, &backend_gate),
    Backend::Orders.fetch(&user, &backend_gate),
    Backend::Recommendations.fetch(&user, &backend_gate),
    Backend::Notifications.fetch(&user, &backend_gate),
  );
  let (profile, orders, recommendations, notifications) = match fetched {
    Ok(replies) => replies,
    Err(fetch_error) => {
      error!("[{}] Request for {} failed: {}", context.runner_name(), user, fetch_error);
      return Err(fetch_error);
    }
  };

  if index == 0 || index == last_index {
    info!(
      "[{}] Request for {} completed in {} ms on {}",
      context.runner_name(),
      user,
      started.elapsed().as_millis(),
      current_thread_label()
    );
  }
  Ok(format!("{{{}, {}, {}, {}}}", profile, orders, recommendations, notifications))
}

/// Outcome of one fan-out scenario.
#[derive(Debug, Clone)]
pub struct FanoutReport {
  pub requests: RunReport<String, DemoError>,
  /// Capacity of the gate shared by all backend calls.
  pub backend_limit: usize,
  /// Most backend calls that were in flight at once.
  pub backend_peak: usize,
}

impl FanoutReport {
  pub fn backend_calls(&self) -> usize {
    self.requests.task_count() * Backend::ALL.len()
  }
}

/// Serves `requests` fan-out requests, at most `request_limit` at once, with
/// every backend call passing through one gate of `backend_limit` slots.
pub async fn run_fanout_scenario(
  label: &str,
  requests: usize,
  request_limit: usize,
  backend_limit: usize,
  tokio_handle: TokioHandle,
) -> Result<FanoutReport, RunnerError> {
  let runner = BoundedRunner::new(RunnerConfig::new(requests, request_limit).with_name(label), tokio_handle)?;
  let backend_gate = Arc::new(AdmissionGate::new(backend_limit)?);
  let last_index = requests - 1;

  let gate = backend_gate.clone();
  let report = runner
    .run(move |context| handle_fanout_request(context, gate.clone(), last_index))
    .await;
  let fanout = FanoutReport {
    requests: report,
    backend_limit,
    backend_peak: backend_gate.peak_in_flight(),
  };
  info!(
    "--- [{}] Total time: {} ms ({:.2} requests/sec, {} total operations)",
    label,
    fanout.requests.elapsed.as_millis(),
    fanout.requests.throughput(),
    fanout.backend_calls()
  );
  Ok(fanout)
}

/// Runs the fan-out workload with fixed pools ([`fixed_pool_size`] requests,
/// [`FANOUT_POOL_SIZE`] backend calls) and then with nothing constrained.
pub async fn compare_fanout(requests: usize, tokio_handle: TokioHandle) -> Result<(FanoutReport, FanoutReport), RunnerError> {
  info!("Starting fanout pattern comparison...");
  info!(
    "Processing {} requests, each fanning out to {} services ({} total concurrent operations)",
    requests,
    Backend::ALL.len(),
    requests * Backend::ALL.len()
  );
  let pooled = run_fanout_scenario(
    "fixed pools",
    requests,
    fixed_pool_size(),
    FANOUT_POOL_SIZE,
    tokio_handle.clone(),
  )
  .await?;
  let per_task = run_fanout_scenario(
    "task per call",
    requests,
    requests,
    requests * Backend::ALL.len(),
    tokio_handle,
  )
  .await?;
  info!("Fanout pattern comparison completed.");
  Ok((pooled, per_task))
}
