//! Task graph (directed acyclic graph) for dependency management.
//!
//! [`TaskGraph::build`] validates a decomposition result in full before any
//! execution: ids must be unique, every dependency must name a task in the
//! same graph, and the dependency relation must admit a topological order.
//! Edges point from a dependency to its dependent.

use crate::core::task::{TaskDescriptor, TaskId};
use crate::error::{Error, Result};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet};

/// The validated task dependency graph. Immutable once built.
pub struct TaskGraph {
    /// Nodes are descriptors, an edge `a -> b` means `b` depends on `a`.
    graph: DiGraph<TaskDescriptor, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
    /// A topological order computed at build time.
    order: Vec<NodeIndex>,
}

impl TaskGraph {
    /// Build and validate a graph from decomposition output.
    ///
    /// Repeated entries within one `depends_on` list are collapsed.
    ///
    /// # Errors
    /// - `DuplicateTaskId` if two descriptors share an id
    /// - `UnknownDependency` if a dependency names no descriptor
    /// - `CycleDetected` if a task depends on itself or the dependencies
    ///   form a cycle; the error lists every task on a cycle
    pub fn build(descriptors: Vec<TaskDescriptor>) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(descriptors.len(), descriptors.len());
        let mut task_index = HashMap::with_capacity(descriptors.len());

        for mut descriptor in descriptors {
            if task_index.contains_key(&descriptor.id) {
                return Err(Error::DuplicateTaskId(descriptor.id));
            }
            let mut seen = HashSet::new();
            descriptor.depends_on.retain(|dep| seen.insert(dep.clone()));

            let id = descriptor.id.clone();
            let index = graph.add_node(descriptor);
            task_index.insert(id, index);
        }

        let mut edges = Vec::new();
        for index in graph.node_indices() {
            let task = &graph[index];
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(Error::CycleDetected(vec![task.id.clone()]));
                }
                let dep_index = task_index.get(dep).ok_or_else(|| Error::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                })?;
                edges.push((*dep_index, index));
            }
        }
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(_) => return Err(Error::CycleDetected(cycle_members(&graph))),
        };

        Ok(Self {
            graph,
            task_index,
            order,
        })
    }

    /// Get a task descriptor by id.
    pub fn get(&self, id: &TaskId) -> Option<&TaskDescriptor> {
        self.task_index.get(id).map(|&index| &self.graph[index])
    }

    /// Number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Descriptors in the order they were supplied.
    pub fn descriptors(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.graph.node_weights()
    }

    /// Ids of the tasks the given task depends on.
    pub fn dependencies(&self, id: &TaskId) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Ids of the tasks that depend directly on the given task.
    pub fn dependents(&self, id: &TaskId) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<&TaskId> {
        match self.task_index.get(id) {
            Some(&index) => {
                let mut ids: Vec<&TaskId> = self
                    .graph
                    .neighbors_directed(index, direction)
                    .map(|n| &self.graph[n].id)
                    .collect();
                ids.sort();
                ids
            }
            None => Vec::new(),
        }
    }

    /// Tasks with no dependencies, in insertion order.
    pub fn roots(&self) -> Vec<&TaskId> {
        self.graph
            .node_indices()
            .filter(|&i| {
                self.graph
                    .neighbors_directed(i, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|i| &self.graph[i].id)
            .collect()
    }

    /// Task ids in an order where every task follows its dependencies.
    pub fn topological_order(&self) -> Vec<&TaskId> {
        self.order.iter().map(|&i| &self.graph[i].id).collect()
    }

    /// Distinct task types appearing in the graph.
    pub fn task_types(&self) -> BTreeSet<&str> {
        self.graph
            .node_weights()
            .map(|t| t.task_type.as_str())
            .collect()
    }

    /// Number of tasks on the longest dependency chain. Bounds the number
    /// of scheduling rounds a run can take.
    pub fn depth(&self) -> usize {
        let mut depth: HashMap<NodeIndex, usize> = HashMap::with_capacity(self.len());
        let mut longest = 0;
        for &index in &self.order {
            let d = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .max()
                .map_or(1, |d| d + 1);
            depth.insert(index, d);
            longest = longest.max(d);
        }
        longest
    }

    // ========== Scheduler access ==========

    pub(crate) fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub(crate) fn descriptor_at(&self, index: NodeIndex) -> &TaskDescriptor {
        &self.graph[index]
    }

    pub(crate) fn in_degree(&self, index: NodeIndex) -> usize {
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .count()
    }

    pub(crate) fn dependent_indices(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect()
    }
}

/// Collect every task that sits on a cycle, sorted by id.
fn cycle_members(graph: &DiGraph<TaskDescriptor, ()>) -> Vec<TaskId> {
    let mut members: Vec<TaskId> = tarjan_scc(graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .flatten()
        .map(|index| graph[index].id.clone())
        .collect();
    members.sort();
    members
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.len())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
