//! Command-line interface definitions

use clap::{Parser, ValueEnum};
use futures_gate::{DemoConfig, RunnerConfig};
use std::time::Duration;

/// Which demo workload to run
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
  /// `--tasks` sleepy tasks behind one gate of `--limit` permits
  Gate,
  /// 1000 API calls of 200 ms: fixed pool against one task per request
  Throughput,
  /// 100 requests fanning out to four backends: fixed pools against none
  Fanout,
}

/// Launches many lightweight tasks while bounding how many run at once
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// Workload to run
  #[arg(long, value_enum, default_value_t = Scenario::Gate)]
  pub scenario: Scenario,

  /// Number of tasks to launch
  #[arg(long, default_value = "1000")]
  pub tasks: usize,

  /// Maximum number of tasks executing their work at the same time
  #[arg(long, default_value = "10")]
  pub limit: usize,

  /// Simulated work per task, in milliseconds
  #[arg(long, default_value = "10")]
  pub work_ms: u64,

  /// Fail every N-th task to exercise the failure path (0 = never)
  #[arg(long, default_value = "0")]
  pub fail_every: usize,

  /// Also run the gate workload without a concurrency limit and compare
  #[arg(long)]
  pub compare: bool,

  /// Verbose output (-v for admissions and backend calls, -vv for permit tracing)
  #[arg(short, long, action = clap::ArgAction::Count)]
  pub verbose: u8,

  /// Only print errors
  #[arg(short, long, conflicts_with = "verbose")]
  pub quiet: bool,
}

impl Args {
  pub fn runner_config(&self) -> RunnerConfig {
    RunnerConfig::new(self.tasks, self.limit)
  }

  pub fn demo_config(&self) -> DemoConfig {
    DemoConfig {
      work: Duration::from_millis(self.work_ms),
      fail_every: self.fail_every,
    }
  }

  /// Default log filter when `RUST_LOG` is not set.
  pub fn log_filter(&self) -> &'static str {
    if self.quiet {
      return "error";
    }
    match self.verbose {
      0 => "info",
      1 => "info,futures_gate=debug",
      _ => "info,futures_gate=trace",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_runner_defaults() {
    let args = Args::parse_from(["futures-gate"]);
    assert_eq!(args.runner_config(), RunnerConfig::default());
    assert_eq!(args.demo_config(), DemoConfig::default());
    assert_eq!(args.log_filter(), "info");
    assert_eq!(args.scenario, Scenario::Gate);
  }

  #[test]
  fn test_scenario_is_parsed() {
    let args = Args::parse_from(["futures-gate", "--scenario", "fanout"]);
    assert_eq!(args.scenario, Scenario::Fanout);
    let args = Args::parse_from(["futures-gate", "--scenario", "throughput"]);
    assert_eq!(args.scenario, Scenario::Throughput);
    assert!(Args::try_parse_from(["futures-gate", "--scenario", "unknown"]).is_err());
  }

  #[test]
  fn test_flags_are_parsed() {
    let args = Args::parse_from(["futures-gate", "--tasks", "100", "--limit", "0", "--fail-every", "7", "-vv"]);
    assert_eq!(args.runner_config().task_count, 100);
    assert_eq!(args.runner_config().concurrency_limit, 0);
    assert_eq!(args.demo_config().fail_every, 7);
    assert_eq!(args.log_filter(), "info,futures_gate=trace");
  }

  #[test]
  fn test_quiet_conflicts_with_verbose() {
    assert!(Args::try_parse_from(["futures-gate", "-q", "-v"]).is_err());
  }
}
