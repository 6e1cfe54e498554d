//! Build file loading.
//!
//! A build file is TOML. It may declare its own lifecycles; when it does not,
//! the standard lifecycles are used.
//!
//! ```toml
//! [[lifecycle]]
//! name = "default"
//! phases = ["validate", "compile", "test", "package", "install"]
//!
//! [[unit]]
//! name = "core"
//!
//! [[unit.step]]
//! plugin = "org.example:compiler"
//! goal = "compile"
//! phase = "compile"
//! run = "echo compiling"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::action::GoalExecution;
use crate::error::PlanError;
use crate::lifecycle::{Lifecycle, Lifecycles, PhaseRegistry};
use crate::plan::ExecutionPlan;
use crate::project::{BuildUnit, ProjectGraph};

/// Errors that can occur while loading a build file.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read build file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse build file: {0}")]
  Parse(#[from] toml::de::Error),

  #[error(transparent)]
  Plan(#[from] PlanError),
}

/// Parsed contents of a build file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildFile {
  #[serde(default, rename = "lifecycle")]
  pub lifecycles: Vec<Lifecycle>,

  #[serde(default, rename = "unit")]
  pub units: Vec<UnitDef>,
}

/// One build unit as declared in a build file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitDef {
  pub name: String,

  #[serde(default)]
  pub depends_on: Vec<String>,

  #[serde(default, rename = "step")]
  pub steps: Vec<GoalExecution>,
}

impl BuildFile {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    info!(path = %path.display(), "loading build file");
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content)
  }

  pub fn parse(content: &str) -> Result<Self, ConfigError> {
    let file: BuildFile = toml::from_str(content)?;
    debug!(
      lifecycles = file.lifecycles.len(),
      units = file.units.len(),
      "parsed build file"
    );
    Ok(file)
  }

  /// The registry declared by the file, or the standard lifecycles.
  pub fn lifecycles(&self) -> Result<Lifecycles, PlanError> {
    if self.lifecycles.is_empty() {
      Ok(Lifecycles::standard())
    } else {
      Lifecycles::new(self.lifecycles.clone())
    }
  }

  /// Build one plan per unit and the graph connecting them.
  pub fn into_project(self) -> Result<(Lifecycles, ProjectGraph), ConfigError> {
    let registry = self.lifecycles()?;

    let units = self
      .units
      .into_iter()
      .map(|unit| {
        let plan = ExecutionPlan::from_actions(unit.steps, Some(&registry as &dyn PhaseRegistry));
        BuildUnit::new(unit.name, unit.depends_on, plan)
      })
      .collect();

    let graph = ProjectGraph::new(units)?;
    Ok((registry, graph))
  }
}
