//! Implementation of the `lifecycle plan` command.
//!
//! Loads a build file and prints the execution plan of each unit: the steps in
//! order, the phase closure with the step carried forward into each phase, the
//! required dependency scopes and the plugins that must not run concurrently.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use lifecycle_core::{BuildFile, BuildUnit, PlanSummary, StepSummary};

use crate::output::{OutputFormat, print_json, state_symbol, symbols};

#[derive(Serialize)]
struct UnitPlan<'a> {
  unit: &'a str,
  depends_on: &'a [String],
  plan: PlanSummary,
}

#[derive(Serialize)]
struct PhaseLookup<'a> {
  unit: &'a str,
  phase: &'a str,
  in_plan: bool,
  last_step: Option<StepSummary>,
}

pub fn cmd_plan(file: &Path, unit: Option<&str>, phase: Option<&str>, format: OutputFormat) -> Result<()> {
  let build_file = BuildFile::load(file).with_context(|| format!("Failed to load build file: {}", file.display()))?;
  let (_, graph) = build_file.into_project().context("Failed to assemble execution plans")?;

  let units: Vec<&BuildUnit> = match unit {
    Some(name) => match graph.unit(name) {
      Some(unit) => vec![unit],
      None => bail!("Unknown build unit: {}", name),
    },
    None => graph.build_order().collect(),
  };

  if let Some(phase) = phase {
    return print_phase_lookups(&units, phase, format);
  }

  if format.is_json() {
    let plans: Vec<_> = units
      .iter()
      .map(|unit| UnitPlan {
        unit: &unit.name,
        depends_on: &unit.depends_on,
        plan: unit.plan.summary(),
      })
      .collect();
    return print_json(&plans);
  }

  for (idx, unit) in units.iter().enumerate() {
    if idx > 0 {
      println!();
    }
    print_unit_plan(unit);
  }

  Ok(())
}

fn print_phase_lookups(units: &[&BuildUnit], phase: &str, format: OutputFormat) -> Result<()> {
  let lookups: Vec<_> = units.iter().map(|unit| phase_lookup(unit, phase)).collect();

  if format.is_json() {
    return print_json(&lookups);
  }

  for lookup in &lookups {
    let answer = match (&lookup.last_step, lookup.in_plan) {
      (Some(step), _) => format!("{} [{}]", step.action, step.phase),
      (None, true) => "no step has run yet".to_string(),
      (None, false) => "phase not in plan".to_string(),
    };
    println!(
      "{}: {} {} {}",
      lookup.unit.if_supports_color(Stream::Stdout, |s| s.bold()),
      lookup.phase,
      symbols::ARROW,
      answer
    );
  }

  Ok(())
}

fn phase_lookup<'a>(unit: &'a BuildUnit, phase: &'a str) -> PhaseLookup<'a> {
  let last_step = unit.plan.find_last_in_phase(phase).and_then(|step| {
    let index = unit.plan.steps().iter().position(|s| std::ptr::eq(s, step))?;
    unit.plan.summary().steps.into_iter().nth(index)
  });

  PhaseLookup {
    unit: &unit.name,
    phase,
    in_plan: unit.plan.contains_phase(phase),
    last_step,
  }
}

fn print_unit_plan(unit: &BuildUnit) {
  let summary = unit.plan.summary();

  let deps = if unit.depends_on.is_empty() {
    String::new()
  } else {
    format!(" (depends on {})", unit.depends_on.join(", "))
  };
  println!(
    "Unit: {}{}",
    unit.name.if_supports_color(Stream::Stdout, |s| s.bold()),
    deps
  );

  println!("  Steps: {}", summary.steps.len());
  for step in &summary.steps {
    let marker = if step.thread_safe { "" } else { " (not thread-safe)" };
    println!(
      "    {} {}. {} [{}]{}",
      state_symbol(step.state),
      step.index,
      step.action,
      step.phase,
      marker
    );
  }

  println!("  Phases: {}", summary.phases.len());
  let width = summary.phases.iter().map(|p| p.phase.len()).max().unwrap_or(0);
  for phase in &summary.phases {
    let last = match phase.last_step {
      Some(idx) => format!("{}. {}", idx, summary.steps[idx].action),
      None => "-".to_string(),
    };
    println!("    {:<width$} {} {}", phase.phase, symbols::ARROW, last, width = width);
  }

  println!("  Resolution scopes: {}", join_or_dash(&summary.required_resolution_scopes));
  println!("  Collection scopes: {}", join_or_dash(&summary.required_collection_scopes));
  let plugins: BTreeSet<String> = summary.non_thread_safe_plugins.iter().map(|p| p.to_string()).collect();
  println!("  Non-thread-safe plugins: {}", join_or_dash(&plugins));
}

fn join_or_dash(items: &BTreeSet<String>) -> String {
  if items.is_empty() {
    "-".to_string()
  } else {
    items.iter().cloned().collect::<Vec<_>>().join(", ")
  }
}
