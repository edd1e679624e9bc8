//! Run view projection for progress display and resume decisions.
//!
//! The `RunView` is derived from `RunEvent` only (no direct mutation) and
//! contains the data the orchestrator and subscribers need: the current
//! status, the task graph with live statuses, collected outputs, and the
//! synthesis products.

use crate::domain::analysis::Analysis;
use crate::domain::cqrs::RunAggregate;
use crate::domain::graph::TaskGraph;
use crate::domain::report::{FinalReport, ReportOutline, ReportSection};
use crate::domain::types::{
    CostTotals, Objective, RunFailure, RunId, RunStatus, TaskId, TaskOutput, TaskStatus,
    TimestampUtc,
};
use crate::domain::RunEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Read-only view of run state derived from events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunView {
    run_id: Option<RunId>,
    objective: Option<Objective>,
    started_at: Option<TimestampUtc>,
    status: RunStatus,
    graph: TaskGraph,
    results: BTreeMap<TaskId, TaskOutput>,
    cost: CostTotals,
    analysis: Option<Analysis>,
    gap_tasks_planned: bool,
    outline: Option<ReportOutline>,
    sections: Vec<ReportSection>,
    report: Option<FinalReport>,
    failure: Option<RunFailure>,
    cancel_reason: Option<String>,
    last_event_sequence: u64,
}

impl RunView {
    /// Apply an event to update the view.
    pub fn apply_event(&mut self, aggregate_id: &str, event: &RunEvent, sequence: u64) {
        // Parse aggregate_id as UUID - log warning on invalid format
        match Uuid::parse_str(aggregate_id) {
            Ok(uuid) => self.run_id = Some(RunId(uuid)),
            Err(e) => tracing::warn!("invalid aggregate ID '{}': {}", aggregate_id, e),
        }
        self.last_event_sequence = sequence;

        match event {
            RunEvent::RunStarted {
                objective,
                started_at,
            } => {
                self.objective = Some(objective.clone());
                self.started_at = Some(*started_at);
                self.status = RunStatus::Planning;
                self.graph = TaskGraph::default();
                self.results.clear();
                self.cost = CostTotals::default();
                self.analysis = None;
                self.gap_tasks_planned = false;
                self.outline = None;
                self.sections.clear();
                self.report = None;
                self.failure = None;
                self.cancel_reason = None;
            }

            RunEvent::PlanProduced { graph, .. } => {
                self.graph = graph.clone();
                self.status = RunStatus::Executing;
            }

            RunEvent::TaskStarted { task_id, .. } => {
                self.set_task_status(task_id, TaskStatus::Running);
            }

            RunEvent::TaskProgressed { cost, .. } => {
                self.cost.add(cost);
            }

            RunEvent::TaskCompleted {
                task_id, output, ..
            } => {
                self.set_task_status(task_id, TaskStatus::Complete);
                self.cost.add(&output.cost);
                self.cost.record_task_finished();
                self.results.insert(task_id.clone(), output.clone());
                if self.status == RunStatus::Executing && self.graph.all_terminal() {
                    self.status = RunStatus::Analyzing;
                }
            }

            RunEvent::TaskFailed { task_id, .. } => {
                self.set_task_status(task_id, TaskStatus::Failed);
                self.cost.record_task_finished();
                if self.status == RunStatus::Executing && self.graph.all_terminal() {
                    self.status = RunStatus::Analyzing;
                }
            }

            RunEvent::AnalysisCompleted { analysis, .. } => {
                self.analysis = Some(analysis.clone());
                self.status = RunStatus::GapFilling;
            }

            RunEvent::GapTasksPlanned { tasks, .. } => {
                for task in tasks {
                    self.graph.insert_node(task.clone());
                }
                self.gap_tasks_planned = true;
            }

            RunEvent::SynthesisStarted { .. } => {
                self.status = RunStatus::Synthesizing;
            }

            RunEvent::OutlineProduced { outline, .. } => {
                self.outline = Some(outline.clone());
            }

            RunEvent::SectionWritten { section, .. } => {
                self.sections.push(section.clone());
            }

            RunEvent::ReportProduced { report, .. } => {
                self.report = Some(report.clone());
            }

            RunEvent::RunCompleted { .. } => {
                self.status = RunStatus::Complete;
            }

            RunEvent::RunFailed {
                reason,
                failed_task,
                ..
            } => {
                self.failure = Some(RunFailure {
                    reason: reason.clone(),
                    failed_task: failed_task.clone(),
                });
                self.status = RunStatus::Failed;
            }

            RunEvent::RunCancelled { reason, .. } => {
                self.cancel_reason = Some(reason.clone());
                self.status = RunStatus::Cancelled;
            }
        }
    }

    fn set_task_status(&mut self, id: &TaskId, status: TaskStatus) {
        if self.graph.set_status(id, status).is_err() {
            tracing::warn!("event referenced unknown task '{}'", id);
        }
    }

    /// Returns the run ID.
    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    /// Returns the research objective.
    pub fn objective(&self) -> Option<&Objective> {
        self.objective.as_ref()
    }

    /// Returns the start timestamp.
    pub fn started_at(&self) -> Option<TimestampUtc> {
        self.started_at
    }

    /// Returns the current status (`Pending` before any event).
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns the task dependency graph with live statuses.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Returns the collected task outputs.
    pub fn results(&self) -> &BTreeMap<TaskId, TaskOutput> {
        &self.results
    }

    /// Returns accumulated resource totals.
    pub fn cost(&self) -> &CostTotals {
        &self.cost
    }

    /// Returns the analysis result.
    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    /// Returns whether gap tasks were planned.
    pub fn gap_tasks_planned(&self) -> bool {
        self.gap_tasks_planned
    }

    /// Returns the report outline.
    pub fn outline(&self) -> Option<&ReportOutline> {
        self.outline.as_ref()
    }

    /// Returns the report sections written so far.
    pub fn sections(&self) -> &[ReportSection] {
        &self.sections
    }

    /// Returns the final report.
    pub fn report(&self) -> Option<&FinalReport> {
        self.report.as_ref()
    }

    /// Returns the failure record.
    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    /// Returns the cancellation reason.
    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    /// Returns the last applied event sequence number.
    pub fn last_event_sequence(&self) -> u64 {
        self.last_event_sequence
    }

    /// Returns true once the run can make no further progress.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Serializable wrapper for event envelopes used on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEventEnvelope {
    /// Unique id of the stored event (for idempotent re-delivery).
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub sequence: u64,
    pub event: RunEvent,
}

impl RunEventEnvelope {
    /// Metadata key under which adapters record the stored event id.
    pub const EVENT_ID_METADATA_KEY: &'static str = "event_id";
}

impl From<&cqrs_es::EventEnvelope<RunAggregate>> for RunEventEnvelope {
    fn from(source: &cqrs_es::EventEnvelope<RunAggregate>) -> Self {
        let event_id = source
            .metadata
            .get(Self::EVENT_ID_METADATA_KEY)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .unwrap_or_else(Uuid::new_v4);
        Self {
            event_id,
            aggregate_id: source.aggregate_id.clone(),
            sequence: source.sequence as u64,
            event: source.payload.clone(),
        }
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
