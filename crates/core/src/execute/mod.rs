//! Concurrent execution of a project's plans.
//!
//! Every build unit runs as its own task:
//! 1. wait (on a blocking thread) until every upstream plan is fully done
//! 2. skip if an upstream unit failed, the build was aborted or interrupted
//! 3. take a parallelism permit
//! 4. run the plan's steps in order, holding a per-plugin lock around every
//!    step whose plugin is not thread-safe
//!
//! A failing step marks its unit failed and force-completes the rest of that
//! unit's plan, which releases downstream waiters. With `fail_fast` every plan
//! in the project is force-completed.

pub mod cmd;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::action::{GoalExecution, PluginId};
use crate::plan::ExecutionPlan;
use crate::project::{BuildUnit, ProjectGraph};
use crate::step::WaitInterrupt;

pub use cmd::{CommandRunner, execute_cmd};
pub use types::{ExecuteConfig, ExecuteError, ExecutionResult, SkipReason, StepOutput, UnitOutcome, UnitResult};

type Plan = ExecutionPlan<GoalExecution>;

/// Runs the logic behind a single step.
pub trait StepRunner: Send + Sync + 'static {
  /// Run `action` on behalf of `unit`, returning its output.
  fn run(&self, unit: &str, action: &GoalExecution) -> impl Future<Output = Result<String, ExecuteError>> + Send;
}

/// State shared by all unit tasks of one execution.
struct Shared {
  semaphore: Semaphore,
  plugin_locks: HashMap<PluginId, AsyncMutex<()>>,
  failed: Mutex<HashSet<String>>,
  aborted: AtomicBool,
  fail_fast: bool,
  interrupt: WaitInterrupt,
  plans: Vec<Arc<Plan>>,
}

impl Shared {
  /// Must be called before the unit's plan is force-completed, so that a
  /// downstream unit released by that completion sees the failure.
  fn mark_failed(&self, unit: &str) {
    self
      .failed
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(unit.to_string());
  }

  fn failed_upstream<'a>(&self, upstream: &'a [String]) -> Option<&'a String> {
    let failed = self.failed.lock().unwrap_or_else(PoisonError::into_inner);
    upstream.iter().find(|name| failed.contains(*name))
  }

  fn abort(&self) {
    if !self.aborted.swap(true, Ordering::SeqCst) {
      warn!("aborting remaining units");
      for plan in &self.plans {
        plan.force_all_complete();
      }
    }
  }

  fn stop_reason(&self) -> Option<SkipReason> {
    if self.interrupt.is_interrupted() {
      Some(SkipReason::Interrupted)
    } else if self.aborted.load(Ordering::SeqCst) {
      Some(SkipReason::Aborted)
    } else {
      None
    }
  }
}

/// Releases a unit's plan when its task ends, however it ends.
///
/// A task that ends without calling `finish` (panic, cancellation) is
/// recorded as failed first.
struct UnitGuard {
  unit: String,
  plan: Arc<Plan>,
  shared: Arc<Shared>,
  finished: bool,
}

impl UnitGuard {
  fn finish(mut self, failed: bool) {
    if failed {
      self.shared.mark_failed(&self.unit);
    }
    self.finished = true;
  }
}

impl Drop for UnitGuard {
  fn drop(&mut self) {
    if !self.finished {
      self.shared.mark_failed(&self.unit);
    }
    self.plan.force_all_complete();
  }
}

/// Execute every unit of `graph`.
///
/// Triggering `interrupt` stops units between steps and releases all waits;
/// callers should also force-complete the graph's plans so that in-progress
/// waits return promptly.
pub async fn execute_project<R: StepRunner>(
  graph: &ProjectGraph,
  runner: Arc<R>,
  config: &ExecuteConfig,
  interrupt: &WaitInterrupt,
) -> ExecutionResult {
  info!(units = graph.len(), parallelism = config.parallelism, "starting project execution");

  let plugin_locks = graph
    .non_thread_safe_plugins()
    .into_iter()
    .map(|plugin| (plugin, AsyncMutex::new(())))
    .collect::<HashMap<_, _>>();
  debug!(plugins = plugin_locks.len(), "non-thread-safe plugins serialized");

  let shared = Arc::new(Shared {
    semaphore: Semaphore::new(config.parallelism.max(1)),
    plugin_locks,
    failed: Mutex::new(HashSet::new()),
    aborted: AtomicBool::new(false),
    fail_fast: config.fail_fast,
    interrupt: interrupt.clone(),
    plans: graph.units().iter().map(|u| u.plan.clone()).collect(),
  });

  let mut join_set = JoinSet::new();
  for unit in graph.build_order() {
    let upstream: Vec<(String, Arc<Plan>)> = graph
      .upstream(&unit.name)
      .into_iter()
      .map(|u| (u.name.clone(), u.plan.clone()))
      .collect();
    let unit = unit.clone();
    let shared = shared.clone();
    let runner = runner.clone();

    join_set.spawn(async move {
      let name = unit.name.clone();
      let outcome = run_unit(unit, upstream, shared, runner).await;
      (name, outcome)
    });
  }

  let mut result = ExecutionResult::default();
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((name, outcome)) => result.record(name, outcome),
      Err(e) => error!(error = %e, "unit task panicked"),
    }
  }

  // Panicked tasks never reported back.
  for unit in graph.units() {
    if !result.succeeded.contains_key(&unit.name)
      && !result.failed.contains_key(&unit.name)
      && !result.skipped.contains_key(&unit.name)
    {
      result.failed.insert(
        unit.name.clone(),
        ExecuteError::TaskFailed(format!("task for unit '{}' did not complete", unit.name)),
      );
    }
  }

  info!(
    succeeded = result.succeeded.len(),
    failed = result.failed.len(),
    skipped = result.skipped.len(),
    "project execution complete"
  );

  result
}

async fn run_unit<R: StepRunner>(
  unit: BuildUnit,
  upstream: Vec<(String, Arc<Plan>)>,
  shared: Arc<Shared>,
  runner: Arc<R>,
) -> UnitOutcome {
  let guard = UnitGuard {
    unit: unit.name.clone(),
    plan: unit.plan.clone(),
    shared: shared.clone(),
    finished: false,
  };

  let (upstream_names, upstream_plans): (Vec<String>, Vec<Arc<Plan>>) = upstream.into_iter().unzip();

  if !upstream_plans.is_empty() {
    debug!(unit = %unit.name, upstream = ?upstream_names, "waiting for upstream units");
    let interrupt = shared.interrupt.clone();
    let waited = tokio::task::spawn_blocking(move || {
      upstream_plans
        .iter()
        .try_for_each(|plan| plan.wait_until_all_done_interruptibly(&interrupt))
    })
    .await;

    match waited {
      Ok(Ok(())) => {}
      Ok(Err(_)) => return skip(guard, SkipReason::Interrupted),
      Err(e) => {
        error!(unit = %unit.name, error = %e, "upstream wait failed");
        guard.finish(true);
        return UnitOutcome::Failed(ExecuteError::TaskFailed(e.to_string()));
      }
    }
  }

  if shared.interrupt.is_interrupted() {
    return skip(guard, SkipReason::Interrupted);
  }
  if let Some(failed) = shared.failed_upstream(&upstream_names) {
    return skip(guard, SkipReason::UpstreamFailed(failed.clone()));
  }
  if let Some(reason) = shared.stop_reason() {
    return skip(guard, reason);
  }

  let _permit = match shared.semaphore.acquire().await {
    Ok(permit) => permit,
    Err(e) => {
      guard.finish(true);
      return UnitOutcome::Failed(ExecuteError::TaskFailed(e.to_string()));
    }
  };

  info!(unit = %unit.name, steps = unit.plan.size(), "building unit");
  let mut result = UnitResult::default();

  for step in unit.plan.iter() {
    if let Some(reason) = shared.stop_reason() {
      return skip(guard, reason);
    }

    let action = step.action();
    let _plugin_guard = match shared.plugin_locks.get(&action.plugin) {
      Some(lock) => Some(lock.lock().await),
      None => None,
    };

    // Force-completed while we waited for the plugin lock.
    if !step.mark_running() {
      let reason = shared.stop_reason().unwrap_or(SkipReason::Aborted);
      return skip(guard, reason);
    }

    debug!(unit = %unit.name, step = %action, phase = %step.phase(), "running step");
    match runner.run(&unit.name, action).await {
      Ok(output) => {
        step.mark_done();
        result.steps.push(StepOutput {
          step: action.to_string(),
          phase: step.phase().to_string(),
          output,
        });
      }
      Err(e) => {
        error!(unit = %unit.name, step = %action, error = %e, "step failed");
        shared.mark_failed(&unit.name);
        step.mark_done();
        unit.plan.force_all_complete();
        if shared.fail_fast {
          shared.abort();
        }
        guard.finish(true);
        return UnitOutcome::Failed(e);
      }
    }
  }

  info!(unit = %unit.name, "unit succeeded");
  guard.finish(false);
  UnitOutcome::Succeeded(result)
}

fn skip(guard: UnitGuard, reason: SkipReason) -> UnitOutcome {
  warn!(unit = %guard.unit, reason = %reason, "skipping unit");
  guard.finish(true);
  UnitOutcome::Skipped(reason)
}
