//! Dependency-ordered task scheduling for the execution and gap-filling
//! phases.
//!
//! The scheduler never keeps its own record of work attempted: readiness
//! is always computed from the replayed task statuses in the current
//! view, which is what makes resume idempotent. Tasks recorded running
//! but not actually in flight (work lost to a crash) are re-dispatched;
//! tasks recorded complete are never re-executed.

use crate::domain::errors::RunError;
use crate::domain::types::{TaskId, TaskOutput};
use crate::domain::{RunCommand, RunView};
use crate::orchestrator::collaborators::{TaskExecutionError, TaskExecutor, TaskSpec};
use crate::orchestrator::RunHandle;
use futures::FutureExt;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;

/// How a task phase ended.
#[derive(Debug)]
pub(crate) enum PhaseOutcome {
    /// The run status advanced past this phase (all tasks settled).
    Advanced,
    /// Every node is terminal but the status is unchanged; the caller
    /// decides the next transition (gap-filling -> synthesis).
    Drained,
    /// Pending tasks can never become ready because a dependency failed.
    Blocked { task_id: TaskId },
    /// Fail-fast policy stopped the phase at the first task failure.
    FailedFast { task_id: TaskId, error: String },
    /// The run reached a terminal status while the phase was active.
    Interrupted,
}

/// Drives one task phase until it settles.
pub(crate) async fn drive_task_phase(
    handle: &RunHandle,
    executor: &Arc<dyn TaskExecutor>,
    max_parallel: usize,
    fail_fast: bool,
) -> anyhow::Result<PhaseOutcome> {
    let mut cancel_rx = handle.cancel_signal();
    let phase = handle.view().await?.status();
    let mut in_flight: HashSet<TaskId> = HashSet::new();
    let mut join_set: JoinSet<(TaskId, Result<TaskOutput, TaskExecutionError>)> = JoinSet::new();

    loop {
        let view = handle.view().await?;
        let status = view.status();
        if status.is_terminal() {
            join_set.abort_all();
            return Ok(PhaseOutcome::Interrupted);
        }
        if status != phase {
            return Ok(PhaseOutcome::Advanced);
        }

        // Re-dispatch tasks recorded running with no live execution
        // (interrupted work found during resume).
        let recorded_running: Vec<TaskId> = view
            .graph()
            .running_tasks()
            .iter()
            .map(|n| n.id.clone())
            .collect();
        for task_id in recorded_running {
            if !in_flight.contains(&task_id) {
                tracing::info!("re-dispatching interrupted task '{}'", task_id);
                dispatch(&mut join_set, &mut in_flight, executor, &view, &task_id);
            }
        }

        // Dispatch ready tasks up to the parallelism limit. The
        // TaskStarted event is durable before the executor runs.
        let ready: Vec<TaskId> = view
            .graph()
            .ready_tasks()
            .iter()
            .map(|n| n.id.clone())
            .collect();
        for task_id in ready {
            if in_flight.len() >= max_parallel {
                break;
            }
            match handle
                .execute(RunCommand::StartTask {
                    task_id: task_id.clone(),
                })
                .await
            {
                Ok(updated) => {
                    dispatch(&mut join_set, &mut in_flight, executor, &updated, &task_id);
                }
                Err(RunError::InvalidTransition { message }) => {
                    // The run moved on between view and command; the next
                    // loop iteration re-evaluates from fresh state.
                    tracing::debug!("start of task '{}' rejected: {}", task_id, message);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if join_set.is_empty() {
            // Nothing running and nothing became ready.
            let view = handle.view().await?;
            if view.status() != phase {
                return Ok(PhaseOutcome::Advanced);
            }
            if view.graph().all_terminal() {
                return Ok(PhaseOutcome::Drained);
            }
            let task_id = view
                .graph()
                .failed_tasks()
                .first()
                .map(|n| n.id.clone())
                .unwrap_or_else(|| TaskId::from("unknown"));
            return Ok(PhaseOutcome::Blocked { task_id });
        }

        tokio::select! {
            joined = join_set.join_next() => {
                match joined {
                    Some(Ok((task_id, result))) => {
                        in_flight.remove(&task_id);
                        if let Some(outcome) =
                            settle_task(handle, &mut join_set, task_id, result, fail_fast).await?
                        {
                            return Ok(outcome);
                        }
                    }
                    Some(Err(join_err)) => {
                        if !join_err.is_cancelled() {
                            tracing::warn!("task join error: {}", join_err);
                        }
                    }
                    None => {}
                }
            }
            changed = cancel_rx.changed() => {
                if changed.is_ok() && *cancel_rx.borrow() {
                    join_set.abort_all();
                    return Ok(PhaseOutcome::Interrupted);
                }
            }
        }
    }
}

/// Records one finished execution. Returns an outcome when the phase
/// must end (fail-fast).
async fn settle_task(
    handle: &RunHandle,
    join_set: &mut JoinSet<(TaskId, Result<TaskOutput, TaskExecutionError>)>,
    task_id: TaskId,
    result: Result<TaskOutput, TaskExecutionError>,
    fail_fast: bool,
) -> anyhow::Result<Option<PhaseOutcome>> {
    match result {
        Ok(output) => {
            match handle
                .execute(RunCommand::CompleteTask {
                    task_id: task_id.clone(),
                    output,
                })
                .await
            {
                Ok(_) => {}
                Err(RunError::InvalidTransition { .. }) => {
                    // Stray result of a run that reached a terminal
                    // status in the meantime: accepted but ignored.
                    tracing::debug!("ignoring stray completion of task '{}'", task_id);
                }
                Err(e) => return Err(e.into()),
            }
            Ok(None)
        }
        Err(err) => {
            let message = err.to_string();
            tracing::warn!("task '{}' failed: {}", task_id, message);
            match handle
                .execute(RunCommand::FailTask {
                    task_id: task_id.clone(),
                    error: message.clone(),
                })
                .await
            {
                Ok(_) => {}
                Err(RunError::InvalidTransition { .. }) => {
                    tracing::debug!("ignoring stray failure of task '{}'", task_id);
                }
                Err(e) => return Err(e.into()),
            }
            if fail_fast {
                join_set.abort_all();
                return Ok(Some(PhaseOutcome::FailedFast {
                    task_id,
                    error: message,
                }));
            }
            Ok(None)
        }
    }
}

/// Spawns one task execution into the join set. Executor panics are
/// caught and surfaced as task failures.
fn dispatch(
    join_set: &mut JoinSet<(TaskId, Result<TaskOutput, TaskExecutionError>)>,
    in_flight: &mut HashSet<TaskId>,
    executor: &Arc<dyn TaskExecutor>,
    view: &RunView,
    task_id: &TaskId,
) {
    let Some(node) = view.graph().node(task_id) else {
        tracing::warn!("cannot dispatch unknown task '{}'", task_id);
        return;
    };

    let inputs: BTreeMap<TaskId, TaskOutput> = node
        .depends_on
        .iter()
        .filter_map(|dep| view.results().get(dep).map(|o| (dep.clone(), o.clone())))
        .collect();
    let spec = TaskSpec {
        task_id: task_id.clone(),
        objective: node.objective.clone(),
        inputs,
    };

    let executor = executor.clone();
    let id = task_id.clone();
    in_flight.insert(id.clone());
    join_set.spawn(async move {
        let result = AssertUnwindSafe(executor.execute(spec)).catch_unwind().await;
        let settled = match result {
            Ok(r) => r,
            Err(_) => Err(TaskExecutionError::new("task execution panicked")),
        };
        (id, settled)
    });
}
