//! Run events for the CQRS aggregate.
//!
//! Events represent facts that have happened. They are the single source
//! of truth for run state and are persisted to the event log. Each event
//! carries everything needed to apply it without consulting any other
//! event; timestamps are captured at creation time.

use crate::domain::analysis::Analysis;
use crate::domain::graph::{TaskGraph, TaskNode};
use crate::domain::report::{FinalReport, ReportOutline, ReportSection};
use crate::domain::types::{Objective, TaskCost, TaskId, TaskOutput, TimestampUtc};
use cqrs_es::DomainEvent;
use serde::{Deserialize, Serialize};

/// Events emitted by the run aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEvent {
    /// Run was started.
    RunStarted {
        objective: Objective,
        started_at: TimestampUtc,
    },

    /// Planning produced the task dependency graph.
    PlanProduced {
        graph: TaskGraph,
        produced_at: TimestampUtc,
    },

    /// A task was dispatched.
    TaskStarted {
        task_id: TaskId,
        started_at: TimestampUtc,
    },

    /// A running task reported partial progress.
    TaskProgressed {
        task_id: TaskId,
        note: String,
        #[serde(default)]
        cost: TaskCost,
        recorded_at: TimestampUtc,
    },

    /// A task finished with a result payload.
    TaskCompleted {
        task_id: TaskId,
        output: TaskOutput,
        completed_at: TimestampUtc,
    },

    /// A task failed.
    TaskFailed {
        task_id: TaskId,
        error: String,
        failed_at: TimestampUtc,
    },

    /// Validation of the collected outputs completed.
    AnalysisCompleted {
        analysis: Analysis,
        completed_at: TimestampUtc,
    },

    /// Gap tasks were added to the graph (possibly none).
    GapTasksPlanned {
        tasks: Vec<TaskNode>,
        planned_at: TimestampUtc,
    },

    /// Synthesis phase began.
    SynthesisStarted { started_at: TimestampUtc },

    /// The report outline was produced.
    OutlineProduced {
        outline: ReportOutline,
        produced_at: TimestampUtc,
    },

    /// One report section was written.
    SectionWritten {
        section: ReportSection,
        written_at: TimestampUtc,
    },

    /// The final report was produced.
    ReportProduced {
        report: FinalReport,
        produced_at: TimestampUtc,
    },

    /// Run finished successfully.
    RunCompleted { completed_at: TimestampUtc },

    /// Run failed unrecoverably.
    RunFailed {
        reason: String,
        #[serde(default)]
        failed_task: Option<TaskId>,
        failed_at: TimestampUtc,
    },

    /// Run was cancelled externally.
    RunCancelled {
        reason: String,
        cancelled_at: TimestampUtc,
    },
}

/// Discriminator used for bus subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    RunStarted,
    PlanProduced,
    TaskStarted,
    TaskProgressed,
    TaskCompleted,
    TaskFailed,
    AnalysisCompleted,
    GapTasksPlanned,
    SynthesisStarted,
    OutlineProduced,
    SectionWritten,
    ReportProduced,
    RunCompleted,
    RunFailed,
    RunCancelled,
}

impl RunEvent {
    /// Returns this event's kind discriminator.
    pub fn kind(&self) -> RunEventKind {
        match self {
            Self::RunStarted { .. } => RunEventKind::RunStarted,
            Self::PlanProduced { .. } => RunEventKind::PlanProduced,
            Self::TaskStarted { .. } => RunEventKind::TaskStarted,
            Self::TaskProgressed { .. } => RunEventKind::TaskProgressed,
            Self::TaskCompleted { .. } => RunEventKind::TaskCompleted,
            Self::TaskFailed { .. } => RunEventKind::TaskFailed,
            Self::AnalysisCompleted { .. } => RunEventKind::AnalysisCompleted,
            Self::GapTasksPlanned { .. } => RunEventKind::GapTasksPlanned,
            Self::SynthesisStarted { .. } => RunEventKind::SynthesisStarted,
            Self::OutlineProduced { .. } => RunEventKind::OutlineProduced,
            Self::SectionWritten { .. } => RunEventKind::SectionWritten,
            Self::ReportProduced { .. } => RunEventKind::ReportProduced,
            Self::RunCompleted { .. } => RunEventKind::RunCompleted,
            Self::RunFailed { .. } => RunEventKind::RunFailed,
            Self::RunCancelled { .. } => RunEventKind::RunCancelled,
        }
    }

    /// Phase-boundary events trigger a snapshot in the store adapters.
    pub fn is_phase_boundary(&self) -> bool {
        matches!(
            self,
            Self::PlanProduced { .. }
                | Self::AnalysisCompleted { .. }
                | Self::SynthesisStarted { .. }
                | Self::RunCompleted { .. }
                | Self::RunFailed { .. }
                | Self::RunCancelled { .. }
        )
    }
}

impl DomainEvent for RunEvent {
    fn event_type(&self) -> String {
        match self {
            Self::RunStarted { .. } => "RunStarted".to_string(),
            Self::PlanProduced { .. } => "PlanProduced".to_string(),
            Self::TaskStarted { .. } => "TaskStarted".to_string(),
            Self::TaskProgressed { .. } => "TaskProgressed".to_string(),
            Self::TaskCompleted { .. } => "TaskCompleted".to_string(),
            Self::TaskFailed { .. } => "TaskFailed".to_string(),
            Self::AnalysisCompleted { .. } => "AnalysisCompleted".to_string(),
            Self::GapTasksPlanned { .. } => "GapTasksPlanned".to_string(),
            Self::SynthesisStarted { .. } => "SynthesisStarted".to_string(),
            Self::OutlineProduced { .. } => "OutlineProduced".to_string(),
            Self::SectionWritten { .. } => "SectionWritten".to_string(),
            Self::ReportProduced { .. } => "ReportProduced".to_string(),
            Self::RunCompleted { .. } => "RunCompleted".to_string(),
            Self::RunFailed { .. } => "RunFailed".to_string(),
            Self::RunCancelled { .. } => "RunCancelled".to_string(),
        }
    }

    fn event_version(&self) -> String {
        "1".to_string()
    }
}
