//! Error types for plan construction and step synchronization.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while assembling lifecycles, plans, and build-unit graphs.
///
/// These are programmer or configuration errors: they are reported once, at
/// construction time, and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
  /// A lifecycle definition is malformed.
  #[error("invalid lifecycle '{lifecycle}': {message}")]
  InvalidLifecycle { lifecycle: String, message: String },

  /// Two build units share a name.
  #[error("duplicate build unit: {0}")]
  DuplicateUnit(String),

  /// A build unit depends on a unit that is not part of the project.
  #[error("build unit '{unit}' depends on unknown unit '{dependency}'")]
  UnknownDependency { unit: String, dependency: String },

  /// The build-unit graph contains a cycle.
  #[error("dependency cycle detected involving build unit '{0}'")]
  CycleDetected(String),
}

/// Outcome of a wait that returned before the awaited step reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
  /// The waiting thread was interrupted through its [`WaitInterrupt`](crate::WaitInterrupt).
  #[error("wait interrupted")]
  Interrupted,

  /// The wait deadline elapsed.
  #[error("wait timed out after {0:?}")]
  TimedOut(Duration),
}
