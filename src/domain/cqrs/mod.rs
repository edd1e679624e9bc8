//! CQRS core types for event sourcing.
//!
//! This module contains the core CQRS types:
//! - **Commands**: Intent to change state
//! - **Events**: Facts that have happened
//! - **Aggregate**: Command validation and event application
//! - **Query**: Read-side projection dispatch

pub mod commands;
pub mod events;
pub mod query;

pub use commands::RunCommand;
pub use events::{RunEvent, RunEventKind};
pub use query::RunQuery;

use crate::domain::analysis::Analysis;
use crate::domain::errors::RunError;
use crate::domain::graph::TaskGraph;
use crate::domain::report::{FinalReport, ReportOutline, ReportSection};
use crate::domain::services::RunServices;
use crate::domain::types::{
    CostTotals, Objective, RunFailure, RunStatus, TaskId, TaskOutput, TaskStatus, TimestampUtc,
};
use async_trait::async_trait;
use cqrs_es::Aggregate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Active run data once the aggregate is initialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunData {
    objective: Objective,
    started_at: TimestampUtc,
    status: RunStatus,
    graph: TaskGraph,
    results: BTreeMap<TaskId, TaskOutput>,
    progress_notes: BTreeMap<TaskId, Vec<String>>,
    cost: CostTotals,
    analysis: Option<Analysis>,
    gap_tasks_planned: bool,
    outline: Option<ReportOutline>,
    sections: Vec<ReportSection>,
    report: Option<FinalReport>,
    failure: Option<RunFailure>,
    cancel_reason: Option<String>,
}

impl RunData {
    // ========== Public Getters ==========

    /// Returns the research objective.
    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    /// Returns the start timestamp.
    pub fn started_at(&self) -> &TimestampUtc {
        &self.started_at
    }

    /// Returns the current run status.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns the task dependency graph.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Returns the completed task outputs keyed by task id.
    pub fn results(&self) -> &BTreeMap<TaskId, TaskOutput> {
        &self.results
    }

    /// Returns recorded progress notes keyed by task id.
    pub fn progress_notes(&self) -> &BTreeMap<TaskId, Vec<String>> {
        &self.progress_notes
    }

    /// Returns accumulated resource totals.
    pub fn cost(&self) -> &CostTotals {
        &self.cost
    }

    /// Returns the analysis result, once the analysis phase ran.
    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    /// Returns whether gap tasks were planned for this run.
    pub fn gap_tasks_planned(&self) -> bool {
        self.gap_tasks_planned
    }

    /// Returns the report outline, once produced.
    pub fn outline(&self) -> Option<&ReportOutline> {
        self.outline.as_ref()
    }

    /// Returns the report sections written so far.
    pub fn sections(&self) -> &[ReportSection] {
        &self.sections
    }

    /// Returns the final report, once produced.
    pub fn report(&self) -> Option<&FinalReport> {
        self.report.as_ref()
    }

    /// Returns the failure record, if the run failed.
    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    /// Returns the cancellation reason, if the run was cancelled.
    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    // ========== Crate-level Setters ==========

    pub(crate) fn set_status(&mut self, status: RunStatus) {
        self.status = status;
    }

    pub(crate) fn set_graph(&mut self, graph: TaskGraph) {
        self.graph = graph;
    }

    /// Updates one task's status; unknown ids are logged, not fatal.
    pub(crate) fn set_task_status(&mut self, id: &TaskId, status: TaskStatus) {
        if self.graph.set_status(id, status).is_err() {
            tracing::warn!("event referenced unknown task '{}'", id);
        }
    }

    pub(crate) fn insert_result(&mut self, id: TaskId, output: TaskOutput) {
        self.results.insert(id, output);
    }

    pub(crate) fn push_progress_note(&mut self, id: TaskId, note: String) {
        self.progress_notes.entry(id).or_default().push(note);
    }

    pub(crate) fn cost_mut(&mut self) -> &mut CostTotals {
        &mut self.cost
    }

    pub(crate) fn set_analysis(&mut self, analysis: Analysis) {
        self.analysis = Some(analysis);
    }

    pub(crate) fn set_gap_tasks_planned(&mut self) {
        self.gap_tasks_planned = true;
    }

    pub(crate) fn graph_mut(&mut self) -> &mut TaskGraph {
        &mut self.graph
    }

    pub(crate) fn set_outline(&mut self, outline: ReportOutline) {
        self.outline = Some(outline);
    }

    pub(crate) fn push_section(&mut self, section: ReportSection) {
        self.sections.push(section);
    }

    pub(crate) fn set_report(&mut self, report: FinalReport) {
        self.report = Some(report);
    }

    pub(crate) fn set_failure(&mut self, failure: RunFailure) {
        self.failure = Some(failure);
    }

    pub(crate) fn set_cancel_reason(&mut self, reason: String) {
        self.cancel_reason = Some(reason);
    }

    /// Advances executing -> analyzing once every graph node is terminal.
    pub(crate) fn advance_if_execution_done(&mut self) {
        if self.status == RunStatus::Executing && self.graph.all_terminal() {
            self.status = RunStatus::Analyzing;
        }
    }
}

/// Run aggregate state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum RunState {
    /// Aggregate has not been initialized.
    #[default]
    Uninitialized,
    /// Aggregate is active with run data (boxed for memory efficiency).
    Active(Box<RunData>),
}

/// The run aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunAggregate {
    pub state: RunState,
}

impl RunAggregate {
    /// Returns the active run data, if initialized.
    pub fn data(&self) -> Option<&RunData> {
        match &self.state {
            RunState::Uninitialized => None,
            RunState::Active(data) => Some(data),
        }
    }

    /// Returns the current status (`Pending` while uninitialized).
    pub fn status(&self) -> RunStatus {
        self.data().map(RunData::status).unwrap_or(RunStatus::Pending)
    }
}

#[async_trait]
impl Aggregate for RunAggregate {
    type Command = RunCommand;
    type Event = RunEvent;
    type Error = RunError;
    type Services = RunServices;

    fn aggregate_type() -> String {
        "run".to_string()
    }

    async fn handle(
        &self,
        command: Self::Command,
        services: &Self::Services,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        let now = services.clock.now();

        let data = match (&self.state, &command) {
            // StartRun - only valid on an uninitialized aggregate
            (RunState::Uninitialized, RunCommand::StartRun { objective }) => {
                if objective.as_str().trim().is_empty() {
                    return Err(RunError::invalid("objective must not be empty"));
                }
                return Ok(vec![RunEvent::RunStarted {
                    objective: objective.clone(),
                    started_at: now,
                }]);
            }
            (RunState::Uninitialized, _) => return Err(RunError::NotInitialized),
            (RunState::Active(_), RunCommand::StartRun { .. }) => {
                return Err(RunError::invalid("run is already started"));
            }
            (RunState::Active(data), _) => data,
        };

        match command {
            RunCommand::SetPlan { graph } => {
                require_status(data, RunStatus::Planning, "SetPlan")?;
                if graph.is_empty() {
                    return Err(RunError::invalid("plan must contain at least one task"));
                }
                if !graph.all_pending() {
                    return Err(RunError::invalid("planned tasks must all be pending"));
                }
                graph
                    .validate()
                    .map_err(|e| RunError::invalid(e.to_string()))?;
                Ok(vec![RunEvent::PlanProduced {
                    graph,
                    produced_at: now,
                }])
            }

            RunCommand::StartTask { task_id } => {
                require_task_phase(data, "StartTask")?;
                let node = data
                    .graph()
                    .node(&task_id)
                    .ok_or_else(|| RunError::invalid(format!("unknown task '{}'", task_id)))?;
                if node.status != TaskStatus::Pending {
                    return Err(RunError::invalid(format!(
                        "task '{}' is {:?}, not pending",
                        task_id, node.status
                    )));
                }
                if let Some(dep) = node.depends_on.iter().find(|dep| {
                    data.graph()
                        .node(dep)
                        .map(|d| d.status != TaskStatus::Complete)
                        .unwrap_or(true)
                }) {
                    return Err(RunError::invalid(format!(
                        "task '{}' has incomplete dependency '{}'",
                        task_id, dep
                    )));
                }
                Ok(vec![RunEvent::TaskStarted {
                    task_id,
                    started_at: now,
                }])
            }

            RunCommand::RecordTaskProgress {
                task_id,
                note,
                cost,
            } => {
                require_task_phase(data, "RecordTaskProgress")?;
                require_task_running(data, &task_id)?;
                Ok(vec![RunEvent::TaskProgressed {
                    task_id,
                    note,
                    cost,
                    recorded_at: now,
                }])
            }

            RunCommand::CompleteTask { task_id, output } => {
                require_task_phase(data, "CompleteTask")?;
                require_task_running(data, &task_id)?;
                Ok(vec![RunEvent::TaskCompleted {
                    task_id,
                    output,
                    completed_at: now,
                }])
            }

            RunCommand::FailTask { task_id, error } => {
                require_task_phase(data, "FailTask")?;
                require_task_running(data, &task_id)?;
                Ok(vec![RunEvent::TaskFailed {
                    task_id,
                    error,
                    failed_at: now,
                }])
            }

            RunCommand::CompleteAnalysis { analysis } => {
                require_status(data, RunStatus::Analyzing, "CompleteAnalysis")?;
                Ok(vec![RunEvent::AnalysisCompleted {
                    analysis,
                    completed_at: now,
                }])
            }

            RunCommand::PlanGapTasks { tasks } => {
                require_status(data, RunStatus::GapFilling, "PlanGapTasks")?;
                if data.gap_tasks_planned() {
                    return Err(RunError::invalid("gap tasks were already planned"));
                }
                if let Some(task) = tasks.iter().find(|t| t.status != TaskStatus::Pending) {
                    return Err(RunError::invalid(format!(
                        "gap task '{}' must be pending",
                        task.id
                    )));
                }
                data.graph()
                    .extended_with(tasks.iter().cloned())
                    .map_err(|e| RunError::invalid(e.to_string()))?;
                Ok(vec![RunEvent::GapTasksPlanned {
                    tasks,
                    planned_at: now,
                }])
            }

            RunCommand::StartSynthesis => {
                require_status(data, RunStatus::GapFilling, "StartSynthesis")?;
                if !data.gap_tasks_planned() {
                    return Err(RunError::invalid(
                        "gap tasks must be planned before synthesis",
                    ));
                }
                if !data.graph().all_terminal() {
                    return Err(RunError::invalid(
                        "all tasks must be settled before synthesis",
                    ));
                }
                Ok(vec![RunEvent::SynthesisStarted { started_at: now }])
            }

            RunCommand::SetOutline { outline } => {
                require_status(data, RunStatus::Synthesizing, "SetOutline")?;
                if data.outline().is_some() {
                    return Err(RunError::invalid("outline was already produced"));
                }
                if outline.is_empty() {
                    return Err(RunError::invalid("outline must contain sections"));
                }
                Ok(vec![RunEvent::OutlineProduced {
                    outline,
                    produced_at: now,
                }])
            }

            RunCommand::WriteSection { section } => {
                require_status(data, RunStatus::Synthesizing, "WriteSection")?;
                let outline = data
                    .outline()
                    .ok_or_else(|| RunError::invalid("no outline to write sections against"))?;
                if data.sections().len() >= outline.len() {
                    return Err(RunError::invalid("all outlined sections are written"));
                }
                Ok(vec![RunEvent::SectionWritten {
                    section,
                    written_at: now,
                }])
            }

            RunCommand::ProduceReport { report } => {
                require_status(data, RunStatus::Synthesizing, "ProduceReport")?;
                if data.report().is_some() {
                    return Err(RunError::invalid("report was already produced"));
                }
                Ok(vec![RunEvent::ReportProduced {
                    report,
                    produced_at: now,
                }])
            }

            RunCommand::CompleteRun => {
                require_status(data, RunStatus::Synthesizing, "CompleteRun")?;
                if data.report().is_none() {
                    return Err(RunError::invalid("run has no report to complete with"));
                }
                Ok(vec![RunEvent::RunCompleted { completed_at: now }])
            }

            RunCommand::FailRun {
                reason,
                failed_task,
            } => {
                require_not_terminal(data, "FailRun")?;
                Ok(vec![RunEvent::RunFailed {
                    reason,
                    failed_task,
                    failed_at: now,
                }])
            }

            RunCommand::CancelRun { reason } => {
                require_not_terminal(data, "CancelRun")?;
                Ok(vec![RunEvent::RunCancelled {
                    reason,
                    cancelled_at: now,
                }])
            }

            RunCommand::StartRun { .. } => unreachable!("handled above"),
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match (&mut self.state, event) {
            // RunStarted initializes the aggregate
            (
                RunState::Uninitialized,
                RunEvent::RunStarted {
                    objective,
                    started_at,
                },
            ) => {
                self.state = RunState::Active(Box::new(RunData {
                    objective,
                    started_at,
                    status: RunStatus::Planning,
                    graph: TaskGraph::default(),
                    results: BTreeMap::new(),
                    progress_notes: BTreeMap::new(),
                    cost: CostTotals::default(),
                    analysis: None,
                    gap_tasks_planned: false,
                    outline: None,
                    sections: Vec::new(),
                    report: None,
                    failure: None,
                    cancel_reason: None,
                }));
            }

            (RunState::Active(data), RunEvent::PlanProduced { graph, .. }) => {
                data.set_graph(graph);
                data.set_status(RunStatus::Executing);
            }

            (RunState::Active(data), RunEvent::TaskStarted { task_id, .. }) => {
                data.set_task_status(&task_id, TaskStatus::Running);
            }

            (
                RunState::Active(data),
                RunEvent::TaskProgressed {
                    task_id,
                    note,
                    cost,
                    ..
                },
            ) => {
                data.push_progress_note(task_id, note);
                data.cost_mut().add(&cost);
            }

            (
                RunState::Active(data),
                RunEvent::TaskCompleted {
                    task_id, output, ..
                },
            ) => {
                data.set_task_status(&task_id, TaskStatus::Complete);
                data.cost_mut().add(&output.cost);
                data.cost_mut().record_task_finished();
                data.insert_result(task_id, output);
                data.advance_if_execution_done();
            }

            (RunState::Active(data), RunEvent::TaskFailed { task_id, .. }) => {
                data.set_task_status(&task_id, TaskStatus::Failed);
                data.cost_mut().record_task_finished();
                data.advance_if_execution_done();
            }

            (RunState::Active(data), RunEvent::AnalysisCompleted { analysis, .. }) => {
                data.set_analysis(analysis);
                data.set_status(RunStatus::GapFilling);
            }

            (RunState::Active(data), RunEvent::GapTasksPlanned { tasks, .. }) => {
                for task in tasks {
                    data.graph_mut().insert_node(task);
                }
                data.set_gap_tasks_planned();
            }

            (RunState::Active(data), RunEvent::SynthesisStarted { .. }) => {
                data.set_status(RunStatus::Synthesizing);
            }

            (RunState::Active(data), RunEvent::OutlineProduced { outline, .. }) => {
                data.set_outline(outline);
            }

            (RunState::Active(data), RunEvent::SectionWritten { section, .. }) => {
                data.push_section(section);
            }

            (RunState::Active(data), RunEvent::ReportProduced { report, .. }) => {
                data.set_report(report);
            }

            (RunState::Active(data), RunEvent::RunCompleted { .. }) => {
                data.set_status(RunStatus::Complete);
            }

            (
                RunState::Active(data),
                RunEvent::RunFailed {
                    reason,
                    failed_task,
                    ..
                },
            ) => {
                data.set_failure(RunFailure {
                    reason,
                    failed_task,
                });
                data.set_status(RunStatus::Failed);
            }

            (RunState::Active(data), RunEvent::RunCancelled { reason, .. }) => {
                data.set_cancel_reason(reason);
                data.set_status(RunStatus::Cancelled);
            }

            // Ignore events on wrong state (shouldn't happen with correct event sourcing)
            _ => {}
        }
    }
}

/// Requires the run to be in exactly the given status.
fn require_status(data: &RunData, status: RunStatus, command: &str) -> Result<(), RunError> {
    if data.status() == status {
        Ok(())
    } else {
        Err(RunError::invalid(format!(
            "command '{}' not valid in status '{}'",
            command,
            data.status()
        )))
    }
}

/// Requires a phase in which tasks execute (executing or gap-filling).
fn require_task_phase(data: &RunData, command: &str) -> Result<(), RunError> {
    match data.status() {
        RunStatus::Executing | RunStatus::GapFilling => Ok(()),
        status => Err(RunError::invalid(format!(
            "command '{}' not valid in status '{}'",
            command, status
        ))),
    }
}

/// Requires the named task to currently be running.
fn require_task_running(data: &RunData, task_id: &TaskId) -> Result<(), RunError> {
    match data.graph().node(task_id) {
        Some(node) if node.status == TaskStatus::Running => Ok(()),
        Some(node) => Err(RunError::invalid(format!(
            "task '{}' is {:?}, not running",
            task_id, node.status
        ))),
        None => Err(RunError::invalid(format!("unknown task '{}'", task_id))),
    }
}

/// Rejects commands once the run reached a terminal status.
fn require_not_terminal(data: &RunData, command: &str) -> Result<(), RunError> {
    if data.status().is_terminal() {
        Err(RunError::invalid(format!(
            "command '{}' not valid in terminal status '{}'",
            command,
            data.status()
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/aggregate_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "../tests/replay_tests.rs"]
mod replay_tests;
