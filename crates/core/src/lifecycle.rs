//! Lifecycle definitions and the phase registry consulted during plan construction.
//!
//! A lifecycle is a named, ordered list of phases. The registry answers two
//! questions: "what phases does lifecycle X have" and "which lifecycle owns
//! phase P". Plan construction only needs the second one, to expand every
//! referenced phase into the full phase list of its lifecycle.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::PlanError;

/// A named, ordered list of phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
  pub name: String,
  pub phases: Vec<String>,
}

impl Lifecycle {
  pub fn new<N, I, P>(name: N, phases: I) -> Self
  where
    N: Into<String>,
    I: IntoIterator<Item = P>,
    P: Into<String>,
  {
    Self {
      name: name.into(),
      phases: phases.into_iter().map(Into::into).collect(),
    }
  }

  pub fn contains(&self, phase: &str) -> bool {
    self.phases.iter().any(|p| p == phase)
  }
}

/// Lookup interface for lifecycles.
///
/// Implementations are pure lookups; the plan never mutates a registry.
pub trait PhaseRegistry {
  /// Returns the lifecycle with the given name.
  fn lookup(&self, name: &str) -> Option<&Lifecycle>;

  /// Returns the lifecycle that declares `phase`, if any.
  fn lifecycle_for_phase(&self, phase: &str) -> Option<&Lifecycle>;
}

/// The standard registry: a validated set of lifecycles indexed by name and by phase.
#[derive(Debug, Clone)]
pub struct Lifecycles {
  lifecycles: Vec<Lifecycle>,
  by_name: HashMap<String, usize>,
  by_phase: HashMap<String, usize>,
}

impl Lifecycles {
  /// Index the given lifecycles.
  ///
  /// # Errors
  ///
  /// Returns `InvalidLifecycle` when a lifecycle has an empty name, a name is
  /// used twice, a phase repeats inside one lifecycle, or two lifecycles claim
  /// the same phase. Phase ownership must be unambiguous or the phase closure
  /// of a plan would depend on registry order.
  pub fn new(lifecycles: Vec<Lifecycle>) -> Result<Self, PlanError> {
    validate(&lifecycles)?;
    Ok(Self::index(lifecycles))
  }

  /// The conventional `clean`, `default` and `site` lifecycles.
  pub fn standard() -> Self {
    let lifecycles = vec![
      Lifecycle::new("clean", ["pre-clean", "clean", "post-clean"]),
      Lifecycle::new(
        "default",
        [
          "validate",
          "initialize",
          "generate-sources",
          "process-sources",
          "generate-resources",
          "process-resources",
          "compile",
          "process-classes",
          "generate-test-sources",
          "process-test-sources",
          "generate-test-resources",
          "process-test-resources",
          "test-compile",
          "process-test-classes",
          "test",
          "prepare-package",
          "package",
          "pre-integration-test",
          "integration-test",
          "post-integration-test",
          "verify",
          "install",
          "deploy",
        ],
      ),
      Lifecycle::new("site", ["pre-site", "site", "post-site", "site-deploy"]),
    ];

    Self::index(lifecycles)
  }

  fn index(lifecycles: Vec<Lifecycle>) -> Self {
    let mut by_name = HashMap::new();
    let mut by_phase = HashMap::new();
    for (idx, lifecycle) in lifecycles.iter().enumerate() {
      by_name.insert(lifecycle.name.clone(), idx);
      for phase in &lifecycle.phases {
        by_phase.insert(phase.clone(), idx);
      }
    }

    Self {
      lifecycles,
      by_name,
      by_phase,
    }
  }

  /// Lifecycles in declaration order.
  pub fn iter(&self) -> impl Iterator<Item = &Lifecycle> {
    self.lifecycles.iter()
  }

  pub fn len(&self) -> usize {
    self.lifecycles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lifecycles.is_empty()
  }
}

impl PhaseRegistry for Lifecycles {
  fn lookup(&self, name: &str) -> Option<&Lifecycle> {
    self.by_name.get(name).map(|&idx| &self.lifecycles[idx])
  }

  fn lifecycle_for_phase(&self, phase: &str) -> Option<&Lifecycle> {
    self.by_phase.get(phase).map(|&idx| &self.lifecycles[idx])
  }
}

fn validate(lifecycles: &[Lifecycle]) -> Result<(), PlanError> {
  let mut names = HashSet::new();
  let mut owners: HashMap<&str, &str> = HashMap::new();

  for lifecycle in lifecycles {
    if lifecycle.name.trim().is_empty() {
      return Err(invalid(&lifecycle.name, "lifecycle name is empty"));
    }
    if !names.insert(lifecycle.name.as_str()) {
      return Err(invalid(&lifecycle.name, "lifecycle is declared more than once"));
    }

    let mut seen = HashSet::new();
    for phase in &lifecycle.phases {
      if !seen.insert(phase.as_str()) {
        return Err(invalid(&lifecycle.name, &format!("phase '{}' appears twice", phase)));
      }
      if let Some(owner) = owners.insert(phase.as_str(), lifecycle.name.as_str()) {
        return Err(invalid(
          &lifecycle.name,
          &format!("phase '{}' is already owned by lifecycle '{}'", phase, owner),
        ));
      }
    }
  }

  Ok(())
}

fn invalid(lifecycle: &str, message: &str) -> PlanError {
  PlanError::InvalidLifecycle {
    lifecycle: lifecycle.to_string(),
    message: message.to_string(),
  }
}
