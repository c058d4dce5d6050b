//! Task dependency graph.
//!
//! The graph is built once at load time from the full set of task
//! definitions and is immutable afterwards. Nodes are tasks; an edge runs
//! from each dependency to its dependent, so cascades walk edge direction.
//!
//! Validation enforces the startup invariants:
//! - every dependency name resolves to a defined task
//! - the dependency relation is acyclic (cycles are reported with their
//!   member names)
//! - every task is reachable: it has its own interval or an
//!   interval-bearing ancestor (a task with neither an interval nor
//!   dependencies is a special case of this)
//! - expressions and log templates reference only the task's transitive
//!   dependency closure or the task's own name

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::core::task::TaskDef;
use crate::{Error, Result};

pub struct TaskGraph {
    graph: DiGraph<TaskDef, ()>,
    index: HashMap<String, NodeIndex>,
    /// Topological order over task names, ties broken by declaration order.
    order: Vec<String>,
    /// Name -> position in `order`, for sorting cascade targets.
    position: HashMap<String, usize>,
    /// Name -> transitive dependency set.
    closures: HashMap<String, HashSet<String>>,
}

impl TaskGraph {
    /// Build and validate the graph from the declared task definitions.
    ///
    /// # Errors
    /// `DuplicateTask`, `UnknownDependency`, `Cycle` (naming the members),
    /// `UnreachableTask`, or `UndeclaredReference`.
    pub fn build(tasks: Vec<TaskDef>) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();

        for task in tasks {
            if index.contains_key(&task.name) {
                return Err(Error::DuplicateTask(task.name));
            }
            let name = task.name.clone();
            let node = graph.add_node(task);
            index.insert(name, node);
        }

        for node in graph.node_indices().collect::<Vec<_>>() {
            let (name, dependencies) = {
                let task = &graph[node];
                (task.name.clone(), task.dependencies.clone())
            };
            for dependency in &dependencies {
                let dep_node = index.get(dependency).ok_or_else(|| Error::UnknownDependency {
                    task: name.clone(),
                    dependency: dependency.clone(),
                })?;
                graph.add_edge(*dep_node, node, ());
            }
        }

        check_acyclic(&graph)?;

        let order = topological_order(&graph);
        let position: HashMap<String, usize> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let closures = dependency_closures(&graph, &index, &order);

        let built = Self {
            graph,
            index,
            order,
            position,
            closures,
        };
        built.check_reachability()?;
        built.check_references()?;
        Ok(built)
    }

    /// Deterministic topological order over all task names: every dependency
    /// precedes its dependents, ties follow declaration order.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    pub fn task(&self, name: &str) -> Option<&TaskDef> {
        self.index.get(name).map(|&node| &self.graph[node])
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskDef> {
        self.graph.node_weights()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Immediate dependents of a task, in topological order.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        let Some(&node) = self.index.get(name) else {
            return Vec::new();
        };
        let mut dependents: Vec<&str> = self
            .graph
            .neighbors_directed(node, petgraph::Direction::Outgoing)
            .map(|n| self.graph[n].name.as_str())
            .collect();
        dependents.sort_by_key(|n| self.position[*n]);
        dependents
    }

    /// The transitive dependency set of a task. Execution contexts are built
    /// from exactly these names.
    pub fn closure_of(&self, name: &str) -> Option<&HashSet<String>> {
        self.closures.get(name)
    }

    /// All tasks downstream of `name`, in topological order. The cascade
    /// visits these (skipping interval-bearing ones) after `name` updates.
    pub fn descendants_of(&self, name: &str) -> Vec<String> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for next in self
                .graph
                .neighbors_directed(node, petgraph::Direction::Outgoing)
            {
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        let mut names: Vec<String> = seen
            .into_iter()
            .map(|node| self.graph[node].name.clone())
            .collect();
        names.sort_by_key(|n| self.position[n]);
        names
    }

    fn check_reachability(&self) -> Result<()> {
        for task in self.graph.node_weights() {
            if task.has_interval() {
                continue;
            }
            let closure = &self.closures[&task.name];
            let driven = closure
                .iter()
                .any(|dep| self.task(dep).map(TaskDef::has_interval).unwrap_or(false));
            if !driven {
                return Err(Error::UnreachableTask(task.name.clone()));
            }
        }
        Ok(())
    }

    /// Expressions may only reference the task's dependency closure or the
    /// task's own (pending) value; anything else could never be bound.
    fn check_references(&self) -> Result<()> {
        for task in self.graph.node_weights() {
            let closure = &self.closures[&task.name];
            for (field, names) in task.referenced_names() {
                for name in names {
                    if name != task.name && !closure.contains(&name) {
                        return Err(Error::UndeclaredReference {
                            task: task.name.clone(),
                            field,
                            name,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.graph.node_count())
            .field("dependencies", &self.graph.edge_count())
            .finish()
    }
}

/// Reject cycles, reporting every member of the offending cycle in
/// declaration order.
fn check_acyclic(graph: &DiGraph<TaskDef, ()>) -> Result<()> {
    for scc in tarjan_scc(graph) {
        let is_cycle = scc.len() > 1
            || (scc.len() == 1 && graph.find_edge(scc[0], scc[0]).is_some());
        if is_cycle {
            let mut members: Vec<NodeIndex> = scc;
            members.sort();
            return Err(Error::Cycle {
                members: members
                    .into_iter()
                    .map(|node| graph[node].name.clone())
                    .collect(),
            });
        }
    }
    Ok(())
}

/// Kahn's algorithm with a min-heap keyed on declaration order, so the
/// result is stable across runs: among tasks whose dependencies are all
/// settled, the one declared first comes first.
fn topological_order(graph: &DiGraph<TaskDef, ()>) -> Vec<String> {
    let mut indegree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|node| {
            (
                node,
                graph
                    .neighbors_directed(node, petgraph::Direction::Incoming)
                    .count(),
            )
        })
        .collect();

    // NodeIndex order is declaration order; Reverse gives a min-heap.
    let mut ready: BinaryHeap<std::cmp::Reverse<NodeIndex>> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&node, _)| std::cmp::Reverse(node))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(std::cmp::Reverse(node)) = ready.pop() {
        order.push(graph[node].name.clone());
        for next in graph.neighbors_directed(node, petgraph::Direction::Outgoing) {
            let deg = indegree.get_mut(&next).expect("node present");
            *deg -= 1;
            if *deg == 0 {
                ready.push(std::cmp::Reverse(next));
            }
        }
    }
    order
}

/// Transitive dependency sets, folded in topological order so each task's
/// closure is its direct dependencies plus their already-computed closures.
fn dependency_closures(
    graph: &DiGraph<TaskDef, ()>,
    index: &HashMap<String, NodeIndex>,
    order: &[String],
) -> HashMap<String, HashSet<String>> {
    let mut closures: HashMap<String, HashSet<String>> = HashMap::new();
    for name in order {
        let node = index[name];
        let mut closure = HashSet::new();
        for dep in &graph[node].dependencies {
            closure.insert(dep.clone());
            if let Some(upstream) = closures.get(dep) {
                closure.extend(upstream.iter().cloned());
            }
        }
        closures.insert(name.clone(), closure);
    }
    closures
}
