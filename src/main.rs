//! futures-gate: run many lightweight tasks behind a counting admission gate.

use anyhow::{Context, Result};
use clap::Parser;
use futures_gate::demo::{
  compare_fanout, compare_scenarios, compare_throughput, run_scenario, API_LATENCY, FANOUT_REQUESTS,
  THROUGHPUT_REQUESTS,
};
use futures_gate::RunReport;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Args, Scenario};

fn log_summary<T, E: std::fmt::Display>(report: RunReport<T, E>) {
  let label = report.runner_name.clone();
  info!(
    "[{}] Completed {} tasks with max {} concurrent tasks in {} ms (peak observed {}).",
    label,
    report.task_count(),
    report.concurrency_limit,
    report.elapsed.as_millis(),
    report.peak_in_flight
  );
  if let Err(failures) = report.into_results() {
    warn!("[{}] {}", label, failures);
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_thread_names(true)
    .init();

  info!("Starting futures-gate v{}", env!("CARGO_PKG_VERSION"));

  match args.scenario {
    Scenario::Gate => {
      let config = args.runner_config();
      let demo = args.demo_config();
      if args.compare {
        let (bounded, unconstrained) = compare_scenarios(config, demo, Handle::current())
          .await
          .context("Invalid run configuration")?;
        log_summary(bounded);
        log_summary(unconstrained);
      } else {
        let bounded = run_scenario("bounded", config, demo, Handle::current())
          .await
          .context("Invalid run configuration")?;
        log_summary(bounded);
      }
    }
    Scenario::Throughput => {
      let (pooled, per_task) = compare_throughput(THROUGHPUT_REQUESTS, API_LATENCY, Handle::current())
        .await
        .context("Throughput comparison failed to start")?;
      log_summary(pooled);
      log_summary(per_task);
    }
    Scenario::Fanout => {
      let (pooled, per_task) = compare_fanout(FANOUT_REQUESTS, Handle::current())
        .await
        .context("Fan-out comparison failed to start")?;
      for fanout in [pooled, per_task] {
        info!(
          "[{}] Backend calls peaked at {} of {} slots.",
          fanout.requests.runner_name, fanout.backend_peak, fanout.backend_limit
        );
        log_summary(fanout.requests);
      }
    }
  }

  Ok(())
}
