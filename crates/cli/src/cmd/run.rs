//! Implementation of the `lifecycle run` command.
//!
//! Runs every unit of a build file through the executor, printing one line per
//! unit. Ctrl-C interrupts the build: units stop between steps and every
//! pending wait is released.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use lifecycle_core::execute::{
  CommandRunner, ExecuteConfig, ExecutionResult, SkipReason, StepOutput, execute_project,
};
use lifecycle_core::{BuildFile, ProjectGraph, WaitInterrupt};

use crate::output::{
  OutputFormat, format_duration, print_error, print_info, print_json, print_stat, print_success, print_warning,
};

#[derive(Serialize)]
struct RunReport<'a> {
  succeeded: Vec<SucceededUnit<'a>>,
  failed: Vec<FailedUnit<'a>>,
  skipped: Vec<SkippedUnit<'a>>,
  duration_ms: u128,
}

#[derive(Serialize)]
struct SucceededUnit<'a> {
  unit: &'a str,
  steps: &'a [StepOutput],
}

#[derive(Serialize)]
struct FailedUnit<'a> {
  unit: &'a str,
  error: String,
}

#[derive(Serialize)]
struct SkippedUnit<'a> {
  unit: &'a str,
  reason: &'a SkipReason,
}

/// Execute the run command.
///
/// Step commands run with the build file's directory as working directory.
/// Returns an error when any unit failed or was skipped.
pub fn cmd_run(
  file: &Path,
  parallelism: Option<usize>,
  fail_fast: bool,
  format: OutputFormat,
  verbose: bool,
) -> Result<()> {
  let build_file = BuildFile::load(file).with_context(|| format!("Failed to load build file: {}", file.display()))?;
  let (_, graph) = build_file.into_project().context("Failed to assemble execution plans")?;
  let graph = Arc::new(graph);

  let mut config = ExecuteConfig {
    fail_fast,
    ..ExecuteConfig::default()
  };
  if let Some(parallelism) = parallelism {
    config.parallelism = parallelism.max(1);
  }

  let runner = Arc::new(CommandRunner::new(config.shell.clone(), working_dir(file)));
  let interrupt = WaitInterrupt::new();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let start = Instant::now();
  let result = rt.block_on(async {
    let watcher = tokio::spawn(watch_ctrl_c(interrupt.clone(), Arc::clone(&graph)));
    let result = execute_project(&graph, runner, &config, &interrupt).await;
    watcher.abort();
    result
  });
  let elapsed = start.elapsed();

  if format.is_json() {
    print_json(&report(&graph, &result, elapsed.as_millis()))?;
  } else {
    print_text(&graph, &result, verbose);
    println!();
    print_stat("Succeeded", &result.succeeded.len().to_string());
    print_stat("Failed", &result.failed.len().to_string());
    print_stat("Skipped", &result.skipped.len().to_string());
    print_stat("Duration", &format_duration(elapsed));
  }

  if !result.is_success() {
    bail!(
      "Build failed: {} unit(s) failed, {} skipped",
      result.failed.len(),
      result.skipped.len()
    );
  }

  Ok(())
}

async fn watch_ctrl_c(interrupt: WaitInterrupt, graph: Arc<ProjectGraph>) {
  match tokio::signal::ctrl_c().await {
    Ok(()) => {
      warn!("interrupt received, stopping build");
      interrupt.interrupt();
      graph.force_all_complete();
    }
    Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
  }
}

fn working_dir(file: &Path) -> Option<PathBuf> {
  file
    .parent()
    .filter(|dir| !dir.as_os_str().is_empty())
    .map(Path::to_path_buf)
}

fn print_text(graph: &ProjectGraph, result: &ExecutionResult, verbose: bool) {
  for unit in graph.build_order() {
    let name = unit.name.as_str();
    if let Some(done) = result.succeeded.get(name) {
      print_success(&format!("{} ({} steps)", name, done.steps.len()));
      if verbose {
        for step in &done.steps {
          print_info(&format!("  {} [{}]", step.step, step.phase));
          for line in step.output.lines() {
            println!("      {}", line);
          }
        }
      }
    } else if let Some(err) = result.failed.get(name) {
      print_error(&format!("{}: {}", name, err));
    } else if let Some(reason) = result.skipped.get(name) {
      print_warning(&format!("{} skipped: {}", name, reason));
    } else {
      info!(unit = %name, "unit has no recorded outcome");
    }
  }
}

fn report<'a>(graph: &'a ProjectGraph, result: &'a ExecutionResult, duration_ms: u128) -> RunReport<'a> {
  let mut report = RunReport {
    succeeded: Vec::new(),
    failed: Vec::new(),
    skipped: Vec::new(),
    duration_ms,
  };

  for unit in graph.build_order() {
    let name = unit.name.as_str();
    if let Some(done) = result.succeeded.get(name) {
      report.succeeded.push(SucceededUnit {
        unit: name,
        steps: &done.steps,
      });
    } else if let Some(err) = result.failed.get(name) {
      report.failed.push(FailedUnit {
        unit: name,
        error: err.to_string(),
      });
    } else if let Some(reason) = result.skipped.get(name) {
      report.skipped.push(SkippedUnit { unit: name, reason });
    }
  }

  report
}
