//! Strongly typed domain primitives for the run aggregate.
//!
//! These newtypes provide type safety and semantic clarity for run
//! identifiers, task identifiers, and resource counters. They are used
//! throughout the domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a research run.
/// Used as the aggregate_id in the event store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Creates a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a run ID from a string.
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one task within a run's dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The research objective a run was started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective(pub String);

impl Objective {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Objective {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Objective {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// UTC timestamp for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampUtc(pub DateTime<Utc>);

impl TimestampUtc {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the timestamp as an RFC3339 string.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for TimestampUtc {
    fn default() -> Self {
        Self::now()
    }
}

/// Phase of a research run.
///
/// Phases advance strictly in declaration order; `Failed` and `Cancelled`
/// are reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Planning,
    Executing,
    Analyzing,
    GapFilling,
    Synthesizing,
    Complete,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Returns true for statuses no event may leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Returns a human-readable label for this status.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Planning => "Planning",
            Self::Executing => "Executing",
            Self::Analyzing => "Analyzing",
            Self::GapFilling => "Gap Filling",
            Self::Synthesizing => "Synthesizing",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Execution state of one task graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
}

impl TaskStatus {
    /// Returns true once a task can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Resource usage reported by a single task execution or progress sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskCost {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub tool_calls: u64,
}

/// Accumulated resource usage across a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CostTotals {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub tool_calls: u64,
    #[serde(default)]
    pub tasks_finished: u64,
}

impl CostTotals {
    /// Adds one task's cost sample to the totals.
    pub fn add(&mut self, cost: &TaskCost) {
        self.input_tokens = self.input_tokens.saturating_add(cost.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(cost.output_tokens);
        self.tool_calls = self.tool_calls.saturating_add(cost.tool_calls);
    }

    /// Records one task reaching a terminal state.
    pub fn record_task_finished(&mut self) {
        self.tasks_finished = self.tasks_finished.saturating_add(1);
    }
}

/// Result payload produced by a completed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Free-form result content (findings, extracted text, ...).
    pub content: String,
    /// Source references backing the content.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Resources the task consumed.
    #[serde(default)]
    pub cost: TaskCost,
}

impl TaskOutput {
    /// Creates an output with content only.
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sources: Vec::new(),
            cost: TaskCost::default(),
        }
    }
}

/// Why a run ended in the `Failed` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub reason: String,
    /// Task whose failure caused the run to fail, when attributable.
    #[serde(default)]
    pub failed_task: Option<TaskId>,
}
