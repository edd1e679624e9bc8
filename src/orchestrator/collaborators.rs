//! Collaborator traits: the boundary to the content-producing logic.
//!
//! The engine treats planning, task execution, analysis, and synthesis
//! as opaque, potentially slow, potentially failing external calls. The
//! engine owns *when* each collaborator runs and records *what* it
//! produced as events; the collaborators own the content itself.

use crate::domain::analysis::Analysis;
use crate::domain::graph::{TaskGraph, TaskNode};
use crate::domain::report::{FinalReport, OutlineSection, ReportOutline, ReportSection};
use crate::domain::types::{Objective, TaskId, TaskOutput};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Everything an executor gets for one task: its identity, objective,
/// and the outputs of the dependencies it declared.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_id: TaskId,
    pub objective: String,
    pub inputs: BTreeMap<TaskId, TaskOutput>,
}

/// Failure of a single task execution.
#[derive(Debug, Clone)]
pub struct TaskExecutionError {
    pub message: String,
}

impl TaskExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for TaskExecutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TaskExecutionError {}

/// Produces the task dependency graph for an objective.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, objective: &Objective) -> anyhow::Result<TaskGraph>;
}

/// Executes one task of the graph.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, spec: TaskSpec) -> Result<TaskOutput, TaskExecutionError>;
}

/// Validates collected outputs and derives gap tasks.
#[async_trait]
pub trait Analyst: Send + Sync {
    /// Validates the collected outputs against the objective.
    async fn analyze(
        &self,
        objective: &Objective,
        results: &BTreeMap<TaskId, TaskOutput>,
    ) -> anyhow::Result<Analysis>;

    /// Turns identified gaps into additional tasks. May return an empty
    /// list when nothing is missing; task ids must not collide with the
    /// existing graph.
    async fn fill_gaps(
        &self,
        analysis: &Analysis,
        graph: &TaskGraph,
    ) -> anyhow::Result<Vec<TaskNode>>;
}

/// Produces the report outline, sections, and final report.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn outline(
        &self,
        objective: &Objective,
        results: &BTreeMap<TaskId, TaskOutput>,
    ) -> anyhow::Result<ReportOutline>;

    async fn write_section(
        &self,
        objective: &Objective,
        section: &OutlineSection,
        results: &BTreeMap<TaskId, TaskOutput>,
    ) -> anyhow::Result<ReportSection>;

    async fn finalize(
        &self,
        objective: &Objective,
        sections: &[ReportSection],
    ) -> anyhow::Result<FinalReport>;
}

/// The full collaborator set wired into an engine.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub executor: Arc<dyn TaskExecutor>,
    pub analyst: Arc<dyn Analyst>,
    pub synthesizer: Arc<dyn Synthesizer>,
}
