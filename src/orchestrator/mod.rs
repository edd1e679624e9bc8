//! Resumable orchestrator.
//!
//! The engine owns the run registry (run id -> actor handle), drives each
//! run through its phases by issuing commands against the aggregate, and
//! can resume an interrupted run by reloading state and falling through
//! the remaining phases. It never records progress anywhere except the
//! event stream, so resumption is exact.

pub mod collaborators;
mod scheduler;

pub use collaborators::{
    Analyst, Collaborators, Planner, Synthesizer, TaskExecutionError, TaskExecutor, TaskSpec,
};

use crate::config::EngineConfig;
use crate::domain::actor::create_actor_args;
use crate::domain::cqrs::RunEventKind;
use crate::domain::errors::RunError;
use crate::domain::subscription::EventSubscription;
use crate::domain::types::{Objective, RunId, RunStatus};
use crate::domain::view::{RunEventEnvelope, RunView};
use crate::domain::{RunActor, RunCommand, RunMessage};
use crate::event_store::RunStore;
use crate::structured_logger::StructuredLogger;
use anyhow::{bail, Context};
use ractor::{Actor, ActorRef};
use scheduler::PhaseOutcome;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch, Mutex};

/// Handle to one live run: the serializing actor plus its channels.
pub struct RunHandle {
    aggregate_id: String,
    actor: ActorRef<RunMessage>,
    event_tx: broadcast::Sender<RunEventEnvelope>,
    cancel_tx: watch::Sender<bool>,
}

impl RunHandle {
    /// The run id this handle serves.
    pub fn run_id(&self) -> &str {
        &self.aggregate_id
    }

    /// Executes one command through the run's actor and returns the
    /// updated view.
    pub async fn execute(&self, command: RunCommand) -> Result<RunView, RunError> {
        let (tx, rx) = oneshot::channel();
        self.actor
            .send_message(RunMessage::Command(Box::new(command), tx))
            .map_err(|e| RunError::StorageFailure {
                message: format!("run actor unavailable: {}", e),
            })?;
        rx.await.map_err(|e| RunError::StorageFailure {
            message: format!("run actor dropped reply: {}", e),
        })?
    }

    /// Returns the current view.
    pub async fn view(&self) -> Result<RunView, RunError> {
        let (tx, rx) = oneshot::channel();
        self.actor
            .send_message(RunMessage::GetView(tx))
            .map_err(|e| RunError::StorageFailure {
                message: format!("run actor unavailable: {}", e),
            })?;
        rx.await.map_err(|e| RunError::StorageFailure {
            message: format!("run actor dropped reply: {}", e),
        })
    }

    /// Subscribes to this run's published events, optionally filtered.
    pub fn subscribe(&self, kinds: impl IntoIterator<Item = RunEventKind>) -> EventSubscription {
        let kinds: Vec<RunEventKind> = kinds.into_iter().collect();
        if kinds.is_empty() {
            EventSubscription::all(self.event_tx.subscribe())
        } else {
            EventSubscription::filtered(self.event_tx.subscribe(), kinds)
        }
    }

    /// Returns a receiver for the cooperative cancellation signal.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    fn signal_cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

/// The resumable orchestrator over a pluggable event store.
pub struct Engine<ES>
where
    ES: RunStore + Clone + Send + Sync + 'static,
{
    store: ES,
    config: EngineConfig,
    collaborators: Collaborators,
    runs: Mutex<HashMap<String, Arc<RunHandle>>>,
    logger: Option<Arc<StructuredLogger>>,
}

impl<ES> Engine<ES>
where
    ES: RunStore + Clone + Send + Sync + 'static,
{
    /// Creates an engine over a store and collaborator set.
    pub fn new(store: ES, config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            store,
            config,
            collaborators,
            runs: Mutex::new(HashMap::new()),
            logger: None,
        }
    }

    /// Attaches a structured diagnostics logger.
    pub fn with_logger(mut self, logger: Arc<StructuredLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &ES {
        &self.store
    }

    /// Starts a new run and drives it to a terminal status.
    pub async fn start(&self, objective: Objective) -> anyhow::Result<RunView> {
        let run_id = RunId::new().to_string();
        let handle = self.attach(&run_id).await?;

        if let Some(logger) = &self.logger {
            logger.log_run_started(&run_id, objective.as_str());
        }

        handle
            .execute(RunCommand::StartRun { objective })
            .await
            .context("start run")?;
        self.drive(&handle).await
    }

    /// Resumes a run from durable state and drives the remaining phases.
    ///
    /// Safe to call on a run that is already terminal: the unchanged view
    /// is returned and nothing executes.
    pub async fn resume(&self, run_id: &str) -> anyhow::Result<RunView> {
        let handle = self.attach(run_id).await?;
        let view = handle.view().await?;
        if view.status() == RunStatus::Pending {
            bail!("run '{}' has no recorded events", run_id);
        }
        if view.is_terminal() {
            return Ok(view);
        }
        if let Some(logger) = &self.logger {
            logger.log_run_resumed(run_id, view.status().label());
        }
        self.drive(&handle).await
    }

    /// Cancels a run. The aggregate transitions to `Cancelled`
    /// immediately; in-flight task executions are signalled to stop
    /// cooperatively and their stray results are ignored.
    pub async fn cancel(&self, run_id: &str, reason: &str) -> anyhow::Result<RunView> {
        let handle = self.attach(run_id).await?;
        let view = handle
            .execute(RunCommand::CancelRun {
                reason: reason.to_string(),
            })
            .await
            .context("cancel run")?;
        handle.signal_cancel();
        Ok(view)
    }

    /// Enumerates run ids known to the store.
    pub async fn list_runs(&self) -> anyhow::Result<Vec<String>> {
        self.store.list_run_ids().await.context("list runs")
    }

    /// Reconstructs a run's view read-only, without spawning an actor.
    pub async fn load_view(&self, run_id: &str) -> anyhow::Result<RunView> {
        crate::domain::actor::bootstrap_view(&self.store, run_id)
            .await
            .context("load view")
    }

    /// Subscribes to a run's published events.
    pub async fn subscribe(
        &self,
        run_id: &str,
        kinds: impl IntoIterator<Item = RunEventKind>,
    ) -> anyhow::Result<EventSubscription> {
        let handle = self.attach(run_id).await?;
        Ok(handle.subscribe(kinds))
    }

    /// Returns the existing handle for a run or spawns its actor.
    async fn attach(&self, run_id: &str) -> anyhow::Result<Arc<RunHandle>> {
        let mut runs = self.runs.lock().await;
        if let Some(handle) = runs.get(run_id) {
            return Ok(handle.clone());
        }

        let (args, _view_rx, _event_rx) = create_actor_args(self.store.clone(), run_id);
        let event_tx = args.event_tx.clone();
        let (actor, _join) = Actor::spawn(None, RunActor::<ES>::default(), args)
            .await
            .with_context(|| format!("spawn actor for run '{}'", run_id))?;

        let (cancel_tx, _cancel_rx) = watch::channel(false);
        let handle = Arc::new(RunHandle {
            aggregate_id: run_id.to_string(),
            actor,
            event_tx,
            cancel_tx,
        });
        runs.insert(run_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Falls through the remaining phases until the run is terminal.
    async fn drive(&self, handle: &RunHandle) -> anyhow::Result<RunView> {
        let mut last_status = None;
        loop {
            let view = handle.view().await?;
            let status = view.status();

            if last_status != Some(status) {
                if let Some(logger) = &self.logger {
                    logger.log_phase_transition(handle.run_id(), status.label());
                }
                tracing::info!(run_id = handle.run_id(), "phase: {}", status);
                last_status = Some(status);
            }

            match status {
                RunStatus::Pending => bail!("run has no recorded start event"),
                RunStatus::Planning => self.run_planning(handle, &view).await?,
                RunStatus::Executing => self.run_execution(handle).await?,
                RunStatus::Analyzing => self.run_analysis(handle, &view).await?,
                RunStatus::GapFilling => self.run_gap_filling(handle, &view).await?,
                RunStatus::Synthesizing => self.run_synthesis(handle, &view).await?,
                RunStatus::Complete | RunStatus::Failed | RunStatus::Cancelled => {
                    return Ok(view);
                }
            }
        }
    }

    async fn run_planning(&self, handle: &RunHandle, view: &RunView) -> anyhow::Result<()> {
        let objective = required_objective(view)?;
        match self.collaborators.planner.plan(&objective).await {
            Ok(graph) => {
                self.execute_or_terminal(handle, RunCommand::SetPlan { graph })
                    .await?;
            }
            Err(e) => {
                self.fail_run(handle, format!("planning failed: {:#}", e), None)
                    .await?;
            }
        }
        Ok(())
    }

    async fn run_execution(&self, handle: &RunHandle) -> anyhow::Result<()> {
        let outcome = scheduler::drive_task_phase(
            handle,
            &self.collaborators.executor,
            self.config.max_parallel_tasks.max(1),
            self.config.fail_fast,
        )
        .await?;
        self.settle_phase_outcome(handle, outcome).await
    }

    async fn run_analysis(&self, handle: &RunHandle, view: &RunView) -> anyhow::Result<()> {
        let objective = required_objective(view)?;
        match self
            .collaborators
            .analyst
            .analyze(&objective, view.results())
            .await
        {
            Ok(analysis) => {
                self.execute_or_terminal(handle, RunCommand::CompleteAnalysis { analysis })
                    .await?;
            }
            Err(e) => {
                self.fail_run(handle, format!("analysis failed: {:#}", e), None)
                    .await?;
            }
        }
        Ok(())
    }

    async fn run_gap_filling(&self, handle: &RunHandle, view: &RunView) -> anyhow::Result<()> {
        if !view.gap_tasks_planned() {
            let analysis = view.analysis().cloned().unwrap_or_default();
            match self
                .collaborators
                .analyst
                .fill_gaps(&analysis, view.graph())
                .await
            {
                Ok(tasks) => {
                    self.execute_or_terminal(handle, RunCommand::PlanGapTasks { tasks })
                        .await?;
                }
                Err(e) => {
                    return self
                        .fail_run(handle, format!("gap planning failed: {:#}", e), None)
                        .await;
                }
            }
        }

        let outcome = scheduler::drive_task_phase(
            handle,
            &self.collaborators.executor,
            self.config.max_parallel_tasks.max(1),
            self.config.fail_fast,
        )
        .await?;

        if matches!(outcome, PhaseOutcome::Drained) {
            self.execute_or_terminal(handle, RunCommand::StartSynthesis)
                .await?;
            return Ok(());
        }
        self.settle_phase_outcome(handle, outcome).await
    }

    async fn run_synthesis(&self, handle: &RunHandle, view: &RunView) -> anyhow::Result<()> {
        let objective = required_objective(view)?;
        let synthesizer = &self.collaborators.synthesizer;
        let mut view = view.clone();

        if view.outline().is_none() {
            match synthesizer.outline(&objective, view.results()).await {
                Ok(outline) => {
                    view = self
                        .execute_or_terminal(handle, RunCommand::SetOutline { outline })
                        .await?;
                }
                Err(e) => {
                    return self
                        .fail_run(handle, format!("outlining failed: {:#}", e), None)
                        .await;
                }
            }
        }
        if view.is_terminal() {
            return Ok(());
        }

        let outline = view.outline().cloned().unwrap_or_default();
        while view.sections().len() < outline.len() {
            let next = &outline.sections[view.sections().len()];
            match synthesizer
                .write_section(&objective, next, view.results())
                .await
            {
                Ok(section) => {
                    view = self
                        .execute_or_terminal(handle, RunCommand::WriteSection { section })
                        .await?;
                }
                Err(e) => {
                    return self
                        .fail_run(
                            handle,
                            format!("writing section '{}' failed: {:#}", next.heading, e),
                            None,
                        )
                        .await;
                }
            }
            if view.is_terminal() {
                return Ok(());
            }
        }

        if view.report().is_none() {
            match synthesizer.finalize(&objective, view.sections()).await {
                Ok(report) => {
                    view = self
                        .execute_or_terminal(handle, RunCommand::ProduceReport { report })
                        .await?;
                }
                Err(e) => {
                    return self
                        .fail_run(handle, format!("report assembly failed: {:#}", e), None)
                        .await;
                }
            }
        }
        if view.is_terminal() {
            return Ok(());
        }

        self.execute_or_terminal(handle, RunCommand::CompleteRun)
            .await?;
        Ok(())
    }

    async fn settle_phase_outcome(
        &self,
        handle: &RunHandle,
        outcome: PhaseOutcome,
    ) -> anyhow::Result<()> {
        match outcome {
            PhaseOutcome::Advanced | PhaseOutcome::Drained | PhaseOutcome::Interrupted => Ok(()),
            PhaseOutcome::Blocked { task_id } => {
                self.fail_run(
                    handle,
                    format!(
                        "task '{}' failed and blocks the remaining graph",
                        task_id
                    ),
                    Some(task_id),
                )
                .await
            }
            PhaseOutcome::FailedFast { task_id, error } => {
                self.fail_run(
                    handle,
                    format!("task '{}' failed: {}", task_id, error),
                    Some(task_id),
                )
                .await
            }
        }
    }

    /// Records a run failure, tolerating a run that is already terminal.
    async fn fail_run(
        &self,
        handle: &RunHandle,
        reason: String,
        failed_task: Option<crate::domain::types::TaskId>,
    ) -> anyhow::Result<()> {
        tracing::warn!(run_id = handle.run_id(), "run failed: {}", reason);
        self.execute_or_terminal(
            handle,
            RunCommand::FailRun {
                reason,
                failed_task,
            },
        )
        .await?;
        Ok(())
    }

    /// Executes a command, treating "already terminal" as success with
    /// the current view. All other errors propagate.
    async fn execute_or_terminal(
        &self,
        handle: &RunHandle,
        command: RunCommand,
    ) -> anyhow::Result<RunView> {
        let name = command.name();
        match handle.execute(command).await {
            Ok(view) => Ok(view),
            Err(RunError::InvalidTransition { message }) => {
                let view = handle.view().await?;
                if view.is_terminal() {
                    tracing::debug!("'{}' rejected on terminal run: {}", name, message);
                    Ok(view)
                } else {
                    bail!("'{}' rejected: {}", name, message)
                }
            }
            Err(e) => Err(anyhow::Error::from(e).context(format!("execute {}", name))),
        }
    }
}

fn required_objective(view: &RunView) -> anyhow::Result<Objective> {
    view.objective()
        .cloned()
        .context("run has no recorded objective")
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
