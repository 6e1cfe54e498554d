//! The build-step payload scheduled by an execution plan.
//!
//! The plan does not interpret an action beyond the few properties exposed by
//! the [`Action`] trait. [`GoalExecution`] is the concrete action used by build
//! files: one plugin goal bound to one phase.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of the plugin that owns an action, usually `group:artifact`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(pub String);

impl PluginId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for PluginId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for PluginId {
  fn from(value: &str) -> Self {
    Self(value.to_string())
  }
}

/// Properties of a build step that the plan needs to know about.
pub trait Action {
  /// The plugin providing this step.
  fn plugin(&self) -> &PluginId;

  /// Whether the plugin tolerates concurrent invocation.
  fn is_thread_safe(&self) -> bool;

  /// The lifecycle phase this step is bound to.
  fn phase(&self) -> &str;

  /// Dependency scope that must be resolved before this step runs.
  fn required_resolution_scope(&self) -> Option<&str> {
    None
  }

  /// Dependency scope that must be collected (but not resolved) before this step runs.
  fn required_collection_scope(&self) -> Option<&str> {
    None
  }
}

/// A plugin goal bound to a phase, as declared in a build file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalExecution {
  pub plugin: PluginId,
  pub goal: String,
  #[serde(default = "default_execution_id")]
  pub execution_id: String,
  pub phase: String,
  #[serde(default = "default_thread_safe")]
  pub thread_safe: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub requires_resolution: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub requires_collection: Option<String>,
  /// Shell command run by the command runner. Goals without one are bookkeeping only.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub run: Option<String>,
}

fn default_execution_id() -> String {
  "default".to_string()
}

fn default_thread_safe() -> bool {
  true
}

impl GoalExecution {
  pub fn new(plugin: impl Into<String>, goal: impl Into<String>, phase: impl Into<String>) -> Self {
    Self {
      plugin: PluginId::new(plugin),
      goal: goal.into(),
      execution_id: default_execution_id(),
      phase: phase.into(),
      thread_safe: true,
      requires_resolution: None,
      requires_collection: None,
      run: None,
    }
  }

  pub fn not_thread_safe(mut self) -> Self {
    self.thread_safe = false;
    self
  }

  pub fn with_run(mut self, cmd: impl Into<String>) -> Self {
    self.run = Some(cmd.into());
    self
  }

  pub fn with_resolution(mut self, scope: impl Into<String>) -> Self {
    self.requires_resolution = Some(scope.into());
    self
  }

  pub fn with_collection(mut self, scope: impl Into<String>) -> Self {
    self.requires_collection = Some(scope.into());
    self
  }
}

impl fmt::Display for GoalExecution {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{} ({})", self.plugin, self.goal, self.execution_id)
  }
}

impl Action for GoalExecution {
  fn plugin(&self) -> &PluginId {
    &self.plugin
  }

  fn is_thread_safe(&self) -> bool {
    self.thread_safe
  }

  fn phase(&self) -> &str {
    &self.phase
  }

  fn required_resolution_scope(&self) -> Option<&str> {
    self.requires_resolution.as_deref()
  }

  fn required_collection_scope(&self) -> Option<&str> {
    self.requires_collection.as_deref()
  }
}

/// Aggregate the resolution and collection scopes required by `actions`.
///
/// Returns `(resolution_scopes, collection_scopes)`.
pub fn required_scopes<'a, A, I>(actions: I) -> (BTreeSet<String>, BTreeSet<String>)
where
  A: Action + 'a,
  I: IntoIterator<Item = &'a A>,
{
  let mut resolution = BTreeSet::new();
  let mut collection = BTreeSet::new();

  for action in actions {
    if let Some(scope) = action.required_resolution_scope() {
      resolution.insert(scope.to_string());
    }
    if let Some(scope) = action.required_collection_scope() {
      collection.insert(scope.to_string());
    }
  }

  (resolution, collection)
}
