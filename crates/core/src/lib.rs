//! lifecycle-core: build-lifecycle execution planning
//!
//! This crate provides the types used to schedule build steps:
//! - `ExecutionPlan`: immutable ordered steps with phase-level lookups
//! - `ExecutionStep`: one step and its blocking completion state machine
//! - `Lifecycles`: the phase registry used to compute a plan's phase closure
//! - `ProjectGraph`: build units and the dependencies between their plans
//! - `execute`: a concurrent executor driving plans to completion

pub mod action;
pub mod config;
pub mod error;
pub mod execute;
pub mod lifecycle;
pub mod plan;
pub mod project;
pub mod step;

pub use action::{Action, GoalExecution, PluginId, required_scopes};
pub use config::{BuildFile, ConfigError, UnitDef};
pub use error::{PlanError, WaitError};
pub use lifecycle::{Lifecycle, Lifecycles, PhaseRegistry};
pub use plan::{ExecutionPlan, PhaseSummary, PlanSummary, StepSummary};
pub use project::{BuildUnit, ProjectGraph};
pub use step::{ExecutionStep, StepState, WaitInterrupt};
