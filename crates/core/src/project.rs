//! Build units and the dependency graph between them.
//!
//! Each build unit owns one execution plan. Units form a DAG: an edge runs from
//! a dependency to its dependent. The executor uses the graph to decide which
//! plans a unit must wait for before it starts.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::action::{GoalExecution, PluginId};
use crate::error::PlanError;
use crate::plan::ExecutionPlan;

/// One build unit (module, project) and its plan.
#[derive(Debug, Clone)]
pub struct BuildUnit {
  pub name: String,
  pub depends_on: Vec<String>,
  pub plan: Arc<ExecutionPlan<GoalExecution>>,
}

impl BuildUnit {
  pub fn new(name: impl Into<String>, depends_on: Vec<String>, plan: ExecutionPlan<GoalExecution>) -> Self {
    Self {
      name: name.into(),
      depends_on,
      plan: Arc::new(plan),
    }
  }
}

/// A validated, acyclic graph of build units.
#[derive(Debug)]
pub struct ProjectGraph {
  graph: DiGraph<usize, ()>,
  units: Vec<BuildUnit>,
  nodes: HashMap<String, NodeIndex>,
  order: Vec<usize>,
}

impl ProjectGraph {
  /// Build the graph from units in declaration order.
  ///
  /// # Errors
  ///
  /// Returns `DuplicateUnit`, `UnknownDependency` or `CycleDetected`.
  pub fn new(units: Vec<BuildUnit>) -> Result<Self, PlanError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for (idx, unit) in units.iter().enumerate() {
      let node = graph.add_node(idx);
      if nodes.insert(unit.name.clone(), node).is_some() {
        return Err(PlanError::DuplicateUnit(unit.name.clone()));
      }
    }

    for unit in &units {
      let dependent = nodes[&unit.name];
      for dep in &unit.depends_on {
        let Some(&dependency) = nodes.get(dep) else {
          return Err(PlanError::UnknownDependency {
            unit: unit.name.clone(),
            dependency: dep.clone(),
          });
        };
        graph.update_edge(dependency, dependent, ());
      }
    }

    let order = toposort(&graph, None)
      .map_err(|cycle| PlanError::CycleDetected(units[graph[cycle.node_id()]].name.clone()))?
      .into_iter()
      .map(|node| graph[node])
      .collect();

    Ok(Self {
      graph,
      units,
      nodes,
      order,
    })
  }

  /// Units in declaration order.
  pub fn units(&self) -> &[BuildUnit] {
    &self.units
  }

  pub fn unit(&self, name: &str) -> Option<&BuildUnit> {
    self.nodes.get(name).map(|&node| &self.units[self.graph[node]])
  }

  /// Units in an order where every dependency precedes its dependents.
  pub fn build_order(&self) -> impl Iterator<Item = &BuildUnit> {
    self.order.iter().map(|&idx| &self.units[idx])
  }

  /// Direct dependencies of `name`.
  pub fn upstream(&self, name: &str) -> Vec<&BuildUnit> {
    self.neighbors(name, Direction::Incoming)
  }

  /// Units that depend directly on `name`.
  pub fn downstream(&self, name: &str) -> Vec<&BuildUnit> {
    self.neighbors(name, Direction::Outgoing)
  }

  /// Union of the non-thread-safe plugins over every unit's plan.
  pub fn non_thread_safe_plugins(&self) -> BTreeSet<PluginId> {
    self
      .units
      .iter()
      .flat_map(|unit| unit.plan.non_thread_safe_plugins())
      .collect()
  }

  /// Force-complete every unit's plan, releasing all waiters.
  pub fn force_all_complete(&self) {
    for unit in &self.units {
      unit.plan.force_all_complete();
    }
  }

  pub fn len(&self) -> usize {
    self.units.len()
  }

  pub fn is_empty(&self) -> bool {
    self.units.is_empty()
  }

  fn neighbors(&self, name: &str, direction: Direction) -> Vec<&BuildUnit> {
    let Some(&node) = self.nodes.get(name) else {
      return Vec::new();
    };

    let mut found: Vec<usize> = self
      .graph
      .neighbors_directed(node, direction)
      .map(|n| self.graph[n])
      .collect();
    found.sort_unstable();
    found.into_iter().map(|idx| &self.units[idx]).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn unit(name: &str, deps: &[&str]) -> BuildUnit {
    let actions = vec![GoalExecution::new(format!("org.example:{}", name), "compile", "compile")];
    BuildUnit::new(
      name,
      deps.iter().map(|d| d.to_string()).collect(),
      ExecutionPlan::from_actions(actions, None),
    )
  }

  fn names<'a>(units: impl IntoIterator<Item = &'a BuildUnit>) -> Vec<&'a str> {
    units.into_iter().map(|u| u.name.as_str()).collect()
  }

  #[test]
  fn empty_project() {
    let graph = ProjectGraph::new(Vec::new()).unwrap();
    assert!(graph.is_empty());
    assert_eq!(graph.build_order().count(), 0);
  }

  #[test]
  fn build_order_respects_dependencies() {
    // app -> service -> core, app -> core
    let graph = ProjectGraph::new(vec![
      unit("app", &["service", "core"]),
      unit("service", &["core"]),
      unit("core", &[]),
    ])
    .unwrap();

    let order = names(graph.build_order());
    let pos = |n: &str| order.iter().position(|o| *o == n).unwrap();
    assert!(pos("core") < pos("service"));
    assert!(pos("service") < pos("app"));

    assert_eq!(names(graph.upstream("app")), vec!["service", "core"]);
    assert_eq!(names(graph.downstream("core")), vec!["app", "service"]);
    assert!(graph.upstream("core").is_empty());
    assert!(graph.upstream("missing").is_empty());
  }

  #[test]
  fn unit_lookup() {
    let graph = ProjectGraph::new(vec![unit("a", &[]), unit("b", &["a"])]).unwrap();
    assert_eq!(graph.len(), 2);
    assert_eq!(graph.unit("b").unwrap().depends_on, vec!["a"]);
    assert!(graph.unit("c").is_none());
  }

  #[test]
  fn debug_output_names_units() {
    let graph = ProjectGraph::new(vec![unit("core", &[]), unit("app", &["core"])]).unwrap();
    let debug = format!("{:?}", graph);
    assert!(debug.contains("\"core\""));
    assert!(debug.contains("\"app\""));
  }

  #[test]
  fn rejects_duplicate_units() {
    let err = ProjectGraph::new(vec![unit("a", &[]), unit("a", &[])]).unwrap_err();
    assert_eq!(err, PlanError::DuplicateUnit("a".to_string()));
  }

  #[test]
  fn rejects_unknown_dependency() {
    let err = ProjectGraph::new(vec![unit("a", &["ghost"])]).unwrap_err();
    assert_eq!(
      err,
      PlanError::UnknownDependency {
        unit: "a".to_string(),
        dependency: "ghost".to_string(),
      }
    );
  }

  #[test]
  fn rejects_cycles() {
    let err = ProjectGraph::new(vec![unit("a", &["b"]), unit("b", &["a"])]).unwrap_err();
    assert!(matches!(err, PlanError::CycleDetected(_)));
  }

  #[test]
  fn non_thread_safe_plugins_across_units() {
    let unsafe_plan = ExecutionPlan::from_actions(
      vec![GoalExecution::new("org.example:shared", "run", "test").not_thread_safe()],
      None,
    );
    let other_plan = ExecutionPlan::from_actions(
      vec![
        GoalExecution::new("org.example:shared", "run", "test").not_thread_safe(),
        GoalExecution::new("org.example:safe", "run", "test"),
      ],
      None,
    );
    let graph = ProjectGraph::new(vec![
      BuildUnit::new("a", Vec::new(), unsafe_plan),
      BuildUnit::new("b", Vec::new(), other_plan),
    ])
    .unwrap();

    let plugins = graph.non_thread_safe_plugins();
    assert_eq!(plugins.into_iter().collect::<Vec<_>>(), vec![PluginId::from("org.example:shared")]);
  }
}
