//! The immutable execution plan for one build unit.
//!
//! A plan is an ordered list of [`ExecutionStep`]s plus two indices computed
//! once at construction:
//!
//! - the phase closure: every phase of every lifecycle referenced by a step,
//!   in lifecycle order, including phases no step is bound to
//! - the carry-forward map: for each phase in the closure, the last step that
//!   will have run by the time that phase is reached
//!
//! Topology never changes after construction. Only the completion state inside
//! each step is mutable, so every query here is lock-free.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::action::{Action, PluginId, required_scopes};
use crate::error::WaitError;
use crate::lifecycle::PhaseRegistry;
use crate::step::{ExecutionStep, StepState, WaitInterrupt};

/// An ordered, immutable collection of steps with phase-level lookups.
#[derive(Debug)]
pub struct ExecutionPlan<A> {
  steps: Vec<ExecutionStep<A>>,
  required_resolution_scopes: BTreeSet<String>,
  required_collection_scopes: BTreeSet<String>,
  phases: Vec<String>,
  /// Index into `steps`; `None` when no step precedes the phase.
  last_step_for_phase: HashMap<String, Option<usize>>,
}

impl<A: Action> ExecutionPlan<A> {
  /// Build a plan from steps in execution order.
  ///
  /// Without a registry the phase closure is empty and every phase lookup
  /// reports absence. Steps bound to phases the registry does not know are
  /// kept in the plan but contribute nothing to the phase indices.
  pub fn build(
    steps: Vec<ExecutionStep<A>>,
    required_resolution_scopes: BTreeSet<String>,
    required_collection_scopes: BTreeSet<String>,
    registry: Option<&dyn PhaseRegistry>,
  ) -> Self {
    let phases = phase_closure(&distinct_phases(&steps), registry);

    // Later steps overwrite earlier ones: the phase's step is the last one bound to it.
    let mut occupied: HashMap<&str, usize> = HashMap::new();
    for (idx, step) in steps.iter().enumerate() {
      occupied.insert(step.phase(), idx);
    }

    let last_step_for_phase: HashMap<String, Option<usize>> = phases
      .iter()
      .scan(None, |last, phase| {
        if let Some(&idx) = occupied.get(phase.as_str()) {
          *last = Some(idx);
        }
        Some((phase.clone(), *last))
      })
      .collect();

    debug!(
      steps = steps.len(),
      phases = phases.len(),
      resolution_scopes = required_resolution_scopes.len(),
      collection_scopes = required_collection_scopes.len(),
      "built execution plan"
    );

    Self {
      steps,
      required_resolution_scopes,
      required_collection_scopes,
      phases,
      last_step_for_phase,
    }
  }

  /// Build a plan from actions, deriving the required scopes from the actions themselves.
  pub fn from_actions(actions: Vec<A>, registry: Option<&dyn PhaseRegistry>) -> Self {
    let (resolution, collection) = required_scopes(&actions);
    let steps = actions.into_iter().map(ExecutionStep::new).collect();
    Self::build(steps, resolution, collection, registry)
  }

  /// Distinct plugins of all steps whose action is not thread-safe.
  ///
  /// Computed by a full scan on every call.
  pub fn non_thread_safe_plugins(&self) -> BTreeSet<PluginId> {
    self
      .steps
      .iter()
      .map(ExecutionStep::action)
      .filter(|action| !action.is_thread_safe())
      .map(|action| action.plugin().clone())
      .collect()
  }
}

impl<A> ExecutionPlan<A> {
  /// The most recent step whose effects are visible once `phase` is reached.
  ///
  /// Returns `None` if the phase is not part of the plan or no step precedes it.
  pub fn find_last_in_phase(&self, phase: &str) -> Option<&ExecutionStep<A>> {
    self
      .last_step_for_phase
      .get(phase)
      .copied()
      .flatten()
      .map(|idx| &self.steps[idx])
  }

  pub fn contains_phase(&self, phase: &str) -> bool {
    self.last_step_for_phase.contains_key(phase)
  }

  /// The phase closure in lifecycle order.
  pub fn phases(&self) -> &[String] {
    &self.phases
  }

  pub fn steps(&self) -> &[ExecutionStep<A>] {
    &self.steps
  }

  pub fn iter(&self) -> std::slice::Iter<'_, ExecutionStep<A>> {
    self.steps.iter()
  }

  /// The underlying actions, in execution order.
  pub fn actions(&self) -> impl Iterator<Item = &A> {
    self.steps.iter().map(ExecutionStep::action)
  }

  pub fn size(&self) -> usize {
    self.steps.len()
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn required_resolution_scopes(&self) -> &BTreeSet<String> {
    &self.required_resolution_scopes
  }

  pub fn required_collection_scopes(&self) -> &BTreeSet<String> {
    &self.required_collection_scopes
  }

  /// Force-complete every step, releasing anything blocked on this plan.
  pub fn force_all_complete(&self) {
    for step in &self.steps {
      step.force_complete();
    }
  }

  /// Block until every step is terminal.
  pub fn wait_until_all_done(&self) {
    for step in &self.steps {
      step.wait_until_done();
    }
  }

  /// Block until every step is terminal or `timeout` elapses for the plan as a whole.
  ///
  /// A timeout too large to express as a deadline waits without one.
  pub fn wait_until_all_done_timeout(&self, timeout: Duration) -> Result<(), WaitError> {
    let deadline = Instant::now().checked_add(timeout);
    let never = WaitInterrupt::new();
    for step in &self.steps {
      step
        .wait_until(&never, deadline)
        .map_err(|_| WaitError::TimedOut(timeout))?;
    }
    Ok(())
  }

  /// Block until every step is terminal, giving up once `interrupt` fires.
  pub fn wait_until_all_done_interruptibly(&self, interrupt: &WaitInterrupt) -> Result<(), WaitError> {
    for step in &self.steps {
      step.wait_until_done_interruptibly(interrupt)?;
    }
    Ok(())
  }

  pub fn is_all_done(&self) -> bool {
    self.steps.iter().all(ExecutionStep::is_done)
  }
}

impl<A: Action + fmt::Display> ExecutionPlan<A> {
  /// A serializable snapshot of the plan and the current step states.
  pub fn summary(&self) -> PlanSummary {
    let steps = self
      .steps
      .iter()
      .enumerate()
      .map(|(index, step)| StepSummary {
        index,
        action: step.action().to_string(),
        plugin: step.action().plugin().clone(),
        phase: step.phase().to_string(),
        thread_safe: step.action().is_thread_safe(),
        state: step.state(),
      })
      .collect();

    let phases = self
      .phases
      .iter()
      .map(|phase| PhaseSummary {
        phase: phase.clone(),
        last_step: self.last_step_for_phase.get(phase).copied().flatten(),
      })
      .collect();

    PlanSummary {
      steps,
      phases,
      required_resolution_scopes: self.required_resolution_scopes.clone(),
      required_collection_scopes: self.required_collection_scopes.clone(),
      non_thread_safe_plugins: self.non_thread_safe_plugins(),
    }
  }
}

impl<'a, A> IntoIterator for &'a ExecutionPlan<A> {
  type Item = &'a ExecutionStep<A>;
  type IntoIter = std::slice::Iter<'a, ExecutionStep<A>>;

  fn into_iter(self) -> Self::IntoIter {
    self.steps.iter()
  }
}

/// Serializable view of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
  pub steps: Vec<StepSummary>,
  pub phases: Vec<PhaseSummary>,
  pub required_resolution_scopes: BTreeSet<String>,
  pub required_collection_scopes: BTreeSet<String>,
  pub non_thread_safe_plugins: BTreeSet<PluginId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
  pub index: usize,
  pub action: String,
  pub plugin: PluginId,
  pub phase: String,
  pub thread_safe: bool,
  pub state: StepState,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
  pub phase: String,
  /// Index of the carried-forward step, if any.
  pub last_step: Option<usize>,
}

/// Phases referenced by `steps`, in order of first appearance.
fn distinct_phases<A>(steps: &[ExecutionStep<A>]) -> Vec<&str> {
  let mut seen = HashSet::new();
  steps
    .iter()
    .map(ExecutionStep::phase)
    .filter(|phase| seen.insert(*phase))
    .collect()
}

/// Expand each phase to the full phase list of its owning lifecycle.
///
/// Lifecycles appear in the order their first phase was referenced; the
/// result has no duplicates.
fn phase_closure(phases: &[&str], registry: Option<&dyn PhaseRegistry>) -> Vec<String> {
  let Some(registry) = registry else {
    return Vec::new();
  };

  let mut expanded = HashSet::new();
  let mut seen = HashSet::new();
  let mut closure = Vec::new();

  for phase in phases {
    let Some(lifecycle) = registry.lifecycle_for_phase(phase) else {
      continue;
    };
    if !expanded.insert(lifecycle.name.as_str()) {
      continue;
    }
    for p in &lifecycle.phases {
      if seen.insert(p.as_str()) {
        closure.push(p.clone());
      }
    }
  }

  closure
}

#[cfg(test)]
mod tests {
  use std::thread;

  use proptest::prelude::*;

  use super::*;
  use crate::action::GoalExecution;
  use crate::lifecycle::{Lifecycle, Lifecycles};

  fn registry() -> Lifecycles {
    Lifecycles::new(vec![
      Lifecycle::new("clean", ["pre-clean", "clean", "post-clean"]),
      Lifecycle::new("default", ["validate", "compile", "test", "package", "install"]),
    ])
    .unwrap()
  }

  fn goal(plugin: &str, phase: &str) -> GoalExecution {
    GoalExecution::new(plugin, phase, phase)
  }

  fn plan_of(phases: &[&str], registry: Option<&dyn PhaseRegistry>) -> ExecutionPlan<GoalExecution> {
    let actions = phases.iter().map(|p| goal("org.example:plugin", p)).collect();
    ExecutionPlan::from_actions(actions, registry)
  }

  #[test]
  fn last_in_phase_carries_forward() {
    let registry = registry();
    let plan = plan_of(&["compile", "test", "package"], Some(&registry));

    assert_eq!(plan.phases(), &["validate", "compile", "test", "package", "install"]);
    assert_eq!(plan.find_last_in_phase("install").unwrap().phase(), "package");
    assert_eq!(plan.find_last_in_phase("test").unwrap().phase(), "test");
    assert!(plan.find_last_in_phase("validate").is_none());
    assert!(plan.find_last_in_phase("deploy").is_none());
  }

  #[test]
  fn empty_phases_between_occupied_ones_inherit() {
    let registry = registry();
    let plan = plan_of(&["validate", "package"], Some(&registry));

    assert_eq!(plan.find_last_in_phase("compile").unwrap().phase(), "validate");
    assert_eq!(plan.find_last_in_phase("test").unwrap().phase(), "validate");
    assert_eq!(plan.find_last_in_phase("install").unwrap().phase(), "package");
  }

  #[test]
  fn last_step_wins_within_a_phase() {
    let registry = registry();
    let actions = vec![
      goal("org.example:first", "compile"),
      goal("org.example:second", "compile"),
      goal("org.example:third", "test"),
    ];
    let plan = ExecutionPlan::from_actions(actions, Some(&registry));

    let step = plan.find_last_in_phase("compile").unwrap();
    assert_eq!(step.action().plugin.as_str(), "org.example:second");
  }

  #[test]
  fn empty_plan_with_registry() {
    let registry = registry();
    let plan = ExecutionPlan::<GoalExecution>::from_actions(Vec::new(), Some(&registry));

    assert!(plan.phases().is_empty());
    assert_eq!(plan.size(), 0);
    assert!(plan.is_empty());
    assert!(!plan.contains_phase("compile"));
    plan.wait_until_all_done();
    assert!(plan.is_all_done());
  }

  #[test]
  fn without_registry_indices_are_empty() {
    let plan = plan_of(&["compile", "test"], None);

    assert_eq!(plan.size(), 2);
    assert!(plan.phases().is_empty());
    assert!(!plan.contains_phase("compile"));
    assert!(plan.find_last_in_phase("test").is_none());
  }

  #[test]
  fn unknown_phase_is_tolerated() {
    let registry = registry();
    let plan = plan_of(&["compile", "mystery"], Some(&registry));

    assert_eq!(plan.size(), 2);
    assert!(!plan.contains_phase("mystery"));
    assert!(plan.find_last_in_phase("mystery").is_none());
    assert!(plan.contains_phase("install"));
    assert_eq!(plan.find_last_in_phase("install").unwrap().phase(), "compile");
  }

  #[test]
  fn closure_spans_all_referenced_lifecycles_in_first_seen_order() {
    let registry = registry();
    let plan = plan_of(&["clean", "compile", "pre-clean"], Some(&registry));

    assert_eq!(
      plan.phases(),
      &[
        "pre-clean",
        "clean",
        "post-clean",
        "validate",
        "compile",
        "test",
        "package",
        "install"
      ]
    );
    // Carry-forward follows the closure order, so validate inherits the clean step.
    assert_eq!(plan.find_last_in_phase("validate").unwrap().phase(), "clean");
    assert_eq!(plan.find_last_in_phase("post-clean").unwrap().phase(), "clean");
  }

  #[test]
  fn iteration_is_ordered_and_restartable() {
    let registry = registry();
    let plan = plan_of(&["compile", "test", "package"], Some(&registry));

    let first: Vec<_> = plan.iter().map(ExecutionStep::phase).collect();
    let second: Vec<_> = (&plan).into_iter().map(ExecutionStep::phase).collect();
    assert_eq!(first, vec!["compile", "test", "package"]);
    assert_eq!(first, second);

    let goals: Vec<_> = plan.actions().map(|a| a.goal.as_str()).collect();
    assert_eq!(goals, vec!["compile", "test", "package"]);
  }

  #[test]
  fn non_thread_safe_plugins_are_distinct() {
    let actions = vec![
      goal("org.example:shared", "compile").not_thread_safe(),
      goal("org.example:safe", "test"),
      goal("org.example:shared", "package").not_thread_safe(),
    ];
    let plan = ExecutionPlan::from_actions(actions, None);

    let plugins = plan.non_thread_safe_plugins();
    assert_eq!(plugins.len(), 1);
    assert!(plugins.contains(&PluginId::from("org.example:shared")));
  }

  #[test]
  fn scopes_are_kept_as_given() {
    let resolution: BTreeSet<String> = ["compile".to_string()].into();
    let collection: BTreeSet<String> = ["test".to_string()].into();
    let steps = vec![ExecutionStep::new(goal("org.example:p", "compile"))];

    let plan = ExecutionPlan::build(steps, resolution.clone(), collection.clone(), None);

    assert_eq!(plan.required_resolution_scopes(), &resolution);
    assert_eq!(plan.required_collection_scopes(), &collection);
  }

  #[test]
  fn force_all_complete_then_wait_returns() {
    let registry = registry();
    let plan = plan_of(&["validate", "compile", "test", "package", "install"], Some(&registry));
    assert_eq!(plan.size(), 5);

    plan.force_all_complete();
    plan.wait_until_all_done();
    assert!(plan.iter().all(|s| s.state() == StepState::ForcedDone));
  }

  #[test]
  fn wait_until_all_done_tracks_out_of_order_completion() {
    let registry = registry();
    let plan = plan_of(&["compile", "test", "package"], Some(&registry));

    thread::scope(|s| {
      let waiter = s.spawn(|| plan.wait_until_all_done_timeout(Duration::from_secs(5)));
      for step in plan.iter().rev() {
        step.mark_running();
        step.mark_done();
      }
      assert_eq!(waiter.join().unwrap(), Ok(()));
    });
  }

  #[test]
  fn plan_wait_accepts_unbounded_timeout() {
    let plan = plan_of(&["compile", "test"], None);
    plan.force_all_complete();
    assert_eq!(plan.wait_until_all_done_timeout(Duration::MAX), Ok(()));

    let pending = plan_of(&["compile"], None);
    thread::scope(|s| {
      let waiter = s.spawn(|| pending.wait_until_all_done_timeout(Duration::MAX));
      thread::sleep(Duration::from_millis(20));
      pending.force_all_complete();
      assert_eq!(waiter.join().unwrap(), Ok(()));
    });
  }

  #[test]
  fn plan_wait_timeout_and_interrupt() {
    let plan = plan_of(&["compile"], None);

    assert_eq!(
      plan.wait_until_all_done_timeout(Duration::from_millis(10)),
      Err(WaitError::TimedOut(Duration::from_millis(10)))
    );

    let interrupt = WaitInterrupt::new();
    interrupt.interrupt();
    assert_eq!(
      plan.wait_until_all_done_interruptibly(&interrupt),
      Err(WaitError::Interrupted)
    );
  }

  #[test]
  fn summary_reports_carry_forward_indices() {
    let registry = registry();
    let plan = plan_of(&["compile", "package"], Some(&registry));
    plan.steps()[0].mark_done();

    let summary = plan.summary();
    assert_eq!(summary.steps.len(), 2);
    assert_eq!(summary.steps[0].state, StepState::Done);
    let lookup: Vec<_> = summary.phases.iter().map(|p| (p.phase.as_str(), p.last_step)).collect();
    assert_eq!(
      lookup,
      vec![
        ("validate", None),
        ("compile", Some(0)),
        ("test", Some(0)),
        ("package", Some(1)),
        ("install", Some(1)),
      ]
    );

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["steps"][0]["state"], "done");
  }

  const PHASE_POOL: &[&str] = &[
    "pre-clean",
    "clean",
    "post-clean",
    "validate",
    "compile",
    "test",
    "package",
    "install",
    "unknown",
  ];

  fn arb_steps() -> impl Strategy<Value = Vec<(usize, bool)>> {
    prop::collection::vec((0..PHASE_POOL.len(), any::<bool>()), 0..16)
  }

  proptest! {
    #[test]
    fn closure_covers_known_phases_without_duplicates(picks in arb_steps()) {
      let registry = registry();
      let actions: Vec<_> = picks
        .iter()
        .map(|&(p, _)| goal("org.example:plugin", PHASE_POOL[p]))
        .collect();
      let plan = ExecutionPlan::from_actions(actions, Some(&registry));

      let unique: HashSet<_> = plan.phases().iter().collect();
      prop_assert_eq!(unique.len(), plan.phases().len());

      for step in plan.iter() {
        let known = registry.lifecycle_for_phase(step.phase()).is_some();
        prop_assert_eq!(plan.contains_phase(step.phase()), known);
      }
      prop_assert_eq!(plan.size(), picks.len());
    }

    #[test]
    fn find_last_matches_nearest_preceding_occupied_phase(picks in arb_steps()) {
      let registry = registry();
      let actions: Vec<_> = picks
        .iter()
        .map(|&(p, _)| goal("org.example:plugin", PHASE_POOL[p]))
        .collect();
      let plan = ExecutionPlan::from_actions(actions, Some(&registry));
      let phases = plan.phases();

      for (i, phase) in phases.iter().enumerate() {
        let expected = phases[..=i]
          .iter()
          .rev()
          .find_map(|p| plan.iter().rposition(|s| s.phase() == p));
        let actual = plan
          .find_last_in_phase(phase)
          .map(|found| plan.iter().position(|s| std::ptr::eq(s, found)).unwrap());
        prop_assert_eq!(actual, expected, "phase {}", phase);
      }
    }

    #[test]
    fn non_thread_safe_set_is_exact(picks in arb_steps()) {
      let actions: Vec<_> = picks
        .iter()
        .map(|&(p, safe)| {
          let action = goal(&format!("org.example:{}", PHASE_POOL[p]), PHASE_POOL[p]);
          if safe { action } else { action.not_thread_safe() }
        })
        .collect();
      let expected: BTreeSet<PluginId> = actions
        .iter()
        .filter(|a| !a.thread_safe)
        .map(|a| a.plugin.clone())
        .collect();

      let plan = ExecutionPlan::from_actions(actions, None);
      prop_assert_eq!(plan.non_thread_safe_plugins(), expected);
    }
  }
}
