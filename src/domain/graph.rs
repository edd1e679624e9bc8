//! Task dependency graph for the execution and gap-filling phases.
//!
//! The graph is an explicit node/edge structure keyed by task id. It is
//! validated acyclic when a plan is accepted, so scheduling can rely on
//! readiness alone. Nodes are kept in a `BTreeMap` so iteration order is
//! stable across replays.

use crate::domain::types::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// One node of the task dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: TaskId,
    /// What the task is expected to find out or produce.
    pub objective: String,
    /// Tasks that must be complete before this one may start.
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl TaskNode {
    /// Creates a pending node with no dependencies.
    pub fn new(id: impl Into<TaskId>, objective: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            objective: objective.into(),
            depends_on: BTreeSet::new(),
            status: TaskStatus::Pending,
        }
    }

    /// Adds a dependency and returns the node (builder style).
    pub fn with_dependency(mut self, dep: impl Into<TaskId>) -> Self {
        self.depends_on.insert(dep.into());
        self
    }
}

/// Structural problems detected while validating a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A node names a dependency that is not part of the graph.
    UnknownDependency { task: TaskId, dependency: TaskId },
    /// Two nodes share the same task id.
    DuplicateTask { task: TaskId },
    /// The dependency structure contains a cycle through this task.
    CycleDetected { task: TaskId },
    /// An operation referenced a task id not present in the graph.
    UnknownTask { task: TaskId },
}

impl Display for GraphError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownDependency { task, dependency } => {
                write!(f, "task '{}' depends on unknown task '{}'", task, dependency)
            }
            Self::DuplicateTask { task } => write!(f, "duplicate task id '{}'", task),
            Self::CycleDetected { task } => {
                write!(f, "dependency cycle detected through task '{}'", task)
            }
            Self::UnknownTask { task } => write!(f, "unknown task id '{}'", task),
        }
    }
}

impl std::error::Error for GraphError {}

/// The full task dependency graph of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskGraph {
    nodes: BTreeMap<TaskId, TaskNode>,
}

impl TaskGraph {
    /// Builds a graph from nodes, rejecting duplicates, unknown
    /// dependencies, and cycles.
    pub fn from_nodes(nodes: impl IntoIterator<Item = TaskNode>) -> Result<Self, GraphError> {
        let mut graph = Self::default();
        for node in nodes {
            if graph.nodes.contains_key(&node.id) {
                return Err(GraphError::DuplicateTask { task: node.id });
            }
            graph.nodes.insert(node.id.clone(), node);
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Returns true if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Looks up a node by id.
    pub fn node(&self, id: &TaskId) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    /// Iterates all nodes in stable (id) order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values()
    }

    /// Validates referential integrity and acyclicity (Kahn's algorithm).
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            for dep in &node.depends_on {
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                if dep == &node.id {
                    return Err(GraphError::CycleDetected {
                        task: node.id.clone(),
                    });
                }
            }
        }

        let mut in_degree: BTreeMap<&TaskId, usize> = self
            .nodes
            .values()
            .map(|n| (&n.id, n.depends_on.len()))
            .collect();
        let mut queue: Vec<&TaskId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;

        while let Some(id) = queue.pop() {
            visited += 1;
            for node in self.nodes.values() {
                if node.depends_on.contains(id) {
                    let deg = in_degree
                        .get_mut(&node.id)
                        .expect("in-degree entry exists for every node");
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push(&node.id);
                    }
                }
            }
        }

        if visited != self.nodes.len() {
            let cyclic = in_degree
                .iter()
                .find(|(_, deg)| **deg > 0)
                .map(|(id, _)| (*id).clone())
                .unwrap_or_else(|| TaskId::from("unknown"));
            return Err(GraphError::CycleDetected { task: cyclic });
        }
        Ok(())
    }

    /// Returns true if every node status is pending.
    pub fn all_pending(&self) -> bool {
        self.nodes
            .values()
            .all(|n| n.status == TaskStatus::Pending)
    }

    /// Returns true once every node has reached a terminal status.
    pub fn all_terminal(&self) -> bool {
        self.nodes.values().all(|n| n.status.is_terminal())
    }

    /// Returns true once every node is complete.
    pub fn all_complete(&self) -> bool {
        self.nodes
            .values()
            .all(|n| n.status == TaskStatus::Complete)
    }

    /// Pending nodes whose dependencies are all complete, in stable order.
    pub fn ready_tasks(&self) -> Vec<&TaskNode> {
        self.nodes
            .values()
            .filter(|n| {
                n.status == TaskStatus::Pending
                    && n.depends_on.iter().all(|dep| {
                        self.nodes
                            .get(dep)
                            .map(|d| d.status == TaskStatus::Complete)
                            .unwrap_or(false)
                    })
            })
            .collect()
    }

    /// Nodes currently marked running, in stable order.
    pub fn running_tasks(&self) -> Vec<&TaskNode> {
        self.nodes
            .values()
            .filter(|n| n.status == TaskStatus::Running)
            .collect()
    }

    /// Nodes that have failed, in stable order.
    pub fn failed_tasks(&self) -> Vec<&TaskNode> {
        self.nodes
            .values()
            .filter(|n| n.status == TaskStatus::Failed)
            .collect()
    }

    /// Pending nodes that can never become ready because a transitive
    /// dependency has failed.
    pub fn blocked_tasks(&self) -> Vec<&TaskNode> {
        self.nodes
            .values()
            .filter(|n| n.status == TaskStatus::Pending && self.is_blocked(&n.id))
            .collect()
    }

    fn is_blocked(&self, id: &TaskId) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        node.depends_on.iter().any(|dep| {
            self.nodes.get(dep).is_some_and(|d| {
                d.status == TaskStatus::Failed
                    || (d.status == TaskStatus::Pending && self.is_blocked(dep))
            })
        })
    }

    /// Counts nodes per status: (pending, running, complete, failed).
    pub fn status_counts(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for node in self.nodes.values() {
            match node.status {
                TaskStatus::Pending => counts.0 += 1,
                TaskStatus::Running => counts.1 += 1,
                TaskStatus::Complete => counts.2 += 1,
                TaskStatus::Failed => counts.3 += 1,
            }
        }
        counts
    }

    /// Inserts a node without re-validating the whole graph. Used when
    /// applying an already-validated `GapTasksPlanned` event.
    pub(crate) fn insert_node(&mut self, node: TaskNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Updates a node's status.
    pub(crate) fn set_status(&mut self, id: &TaskId, status: TaskStatus) -> Result<(), GraphError> {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.status = status;
                Ok(())
            }
            None => Err(GraphError::UnknownTask { task: id.clone() }),
        }
    }

    /// Extends the graph with additional nodes (gap-filling). New nodes
    /// may depend on existing ones; the merged graph must stay acyclic.
    pub fn extended_with(
        &self,
        tasks: impl IntoIterator<Item = TaskNode>,
    ) -> Result<Self, GraphError> {
        let mut merged = self.clone();
        for node in tasks {
            if merged.nodes.contains_key(&node.id) {
                return Err(GraphError::DuplicateTask { task: node.id });
            }
            merged.nodes.insert(node.id.clone(), node);
        }
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
#[path = "tests/graph_tests.rs"]
mod tests;
