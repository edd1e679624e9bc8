//! Run commands for the CQRS aggregate.
//!
//! Commands represent intent to change state. The aggregate validates
//! commands and produces events that are persisted to the event log.
//! Every accepted command produces exactly one event.

use crate::domain::analysis::Analysis;
use crate::domain::graph::{TaskGraph, TaskNode};
use crate::domain::report::{FinalReport, ReportOutline, ReportSection};
use crate::domain::types::{Objective, TaskCost, TaskId, TaskOutput};
use serde::{Deserialize, Serialize};

/// Commands that can be executed against the run aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCommand {
    /// Initialize aggregate state for a new run.
    StartRun { objective: Objective },

    /// Planner produced the task dependency graph.
    SetPlan { graph: TaskGraph },

    /// A ready task was dispatched to an executor.
    StartTask { task_id: TaskId },

    /// Record a partial result from a running task.
    RecordTaskProgress {
        task_id: TaskId,
        note: String,
        cost: TaskCost,
    },

    /// A running task finished with a result payload.
    CompleteTask {
        task_id: TaskId,
        output: TaskOutput,
    },

    /// A running task failed.
    FailTask { task_id: TaskId, error: String },

    /// Analyst validated the collected outputs.
    CompleteAnalysis { analysis: Analysis },

    /// Gap tasks were derived from the analysis (may be empty).
    PlanGapTasks { tasks: Vec<TaskNode> },

    /// All gap tasks are settled; begin synthesis.
    StartSynthesis,

    /// Synthesizer produced the report outline.
    SetOutline { outline: ReportOutline },

    /// Synthesizer wrote one report section.
    WriteSection { section: ReportSection },

    /// Synthesizer assembled the final report.
    ProduceReport { report: FinalReport },

    /// The run finished successfully.
    CompleteRun,

    /// The run failed unrecoverably.
    FailRun {
        reason: String,
        failed_task: Option<TaskId>,
    },

    /// The run was cancelled externally.
    CancelRun { reason: String },
}

impl RunCommand {
    /// Human-readable name for error messages and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartRun { .. } => "StartRun",
            Self::SetPlan { .. } => "SetPlan",
            Self::StartTask { .. } => "StartTask",
            Self::RecordTaskProgress { .. } => "RecordTaskProgress",
            Self::CompleteTask { .. } => "CompleteTask",
            Self::FailTask { .. } => "FailTask",
            Self::CompleteAnalysis { .. } => "CompleteAnalysis",
            Self::PlanGapTasks { .. } => "PlanGapTasks",
            Self::StartSynthesis => "StartSynthesis",
            Self::SetOutline { .. } => "SetOutline",
            Self::WriteSection { .. } => "WriteSection",
            Self::ProduceReport { .. } => "ProduceReport",
            Self::CompleteRun => "CompleteRun",
            Self::FailRun { .. } => "FailRun",
            Self::CancelRun { .. } => "CancelRun",
        }
    }
}
