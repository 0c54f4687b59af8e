//! A Tokio-based runner that launches many lightweight tasks while bounding
//! how many of them execute at once through a counting admission gate.

mod board;
mod config;
pub mod demo;
mod error;
mod gate;
mod handle;
mod notifier;
mod report;
mod runner;
mod task;

pub use board::{IllegalTransition, PhaseCounts, StateBoard};
pub use config::{DemoConfig, RunnerConfig};
pub use error::{GateClosed, RunFailures, RunnerError, TaskError};
pub use gate::{AdmissionGate, GatePermit};
pub use handle::RunHandle;
pub use notifier::{TaskCompletionInfo, TaskCompletionStatus};
pub use report::{RunReport, TaskReport};
pub use runner::{run, BoundedRunner};
pub use task::{TaskContext, TaskPhase};
