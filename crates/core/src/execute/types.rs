//! Types for project execution.
//!
//! This module defines the error type, per-unit outcomes and configuration
//! used when running a [`ProjectGraph`](crate::ProjectGraph).

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while running a step.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// Command exited unsuccessfully.
  #[error("command failed with exit code {code:?}: {cmd}")]
  CmdFailed { cmd: String, code: Option<i32> },

  /// I/O error while spawning or talking to a command.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A runner rejected the step for a reason of its own.
  #[error("step {step} failed: {message}")]
  StepFailed { step: String, message: String },

  /// The task driving a unit panicked or was cancelled.
  #[error("unit task failed: {0}")]
  TaskFailed(String),
}

/// Why a unit did not run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "unit", rename_all = "snake_case")]
pub enum SkipReason {
  /// A unit this one depends on failed or was skipped.
  UpstreamFailed(String),
  /// Another unit failed and the build runs fail-fast.
  Aborted,
  /// The build was interrupted.
  Interrupted,
}

impl std::fmt::Display for SkipReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SkipReason::UpstreamFailed(unit) => write!(f, "upstream unit '{}' failed", unit),
      SkipReason::Aborted => f.write_str("build aborted"),
      SkipReason::Interrupted => f.write_str("build interrupted"),
    }
  }
}

/// Output of one successfully executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutput {
  /// Display form of the action, e.g. `org.example:compiler:compile (default)`.
  pub step: String,
  pub phase: String,
  pub output: String,
}

/// Result of a unit whose steps all ran.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnitResult {
  pub steps: Vec<StepOutput>,
}

/// Final state of one unit.
#[derive(Debug)]
pub enum UnitOutcome {
  Succeeded(UnitResult),
  Failed(ExecuteError),
  Skipped(SkipReason),
}

/// Result of executing a whole project.
#[derive(Debug, Default)]
pub struct ExecutionResult {
  /// Units whose steps all ran successfully.
  pub succeeded: HashMap<String, UnitResult>,

  /// Units in which a step failed.
  pub failed: HashMap<String, ExecuteError>,

  /// Units that did not run to completion, and why.
  pub skipped: HashMap<String, SkipReason>,
}

impl ExecutionResult {
  /// Returns true if every unit succeeded.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  /// Returns the total number of units processed.
  pub fn total(&self) -> usize {
    self.succeeded.len() + self.failed.len() + self.skipped.len()
  }

  pub(crate) fn record(&mut self, unit: String, outcome: UnitOutcome) {
    match outcome {
      UnitOutcome::Succeeded(result) => {
        self.succeeded.insert(unit, result);
      }
      UnitOutcome::Failed(err) => {
        self.failed.insert(unit, err);
      }
      UnitOutcome::Skipped(reason) => {
        self.skipped.insert(unit, reason);
      }
    }
  }
}

/// Configuration for project execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of units executing steps at the same time.
  pub parallelism: usize,

  /// Stop every unit as soon as one step fails.
  pub fail_fast: bool,

  /// Shell used by the command runner.
  /// If None, uses /bin/sh (Unix) or powershell.exe (Windows).
  pub shell: Option<String>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      fail_fast: true,
      shell: None,
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
