//! Tests for the RunView projection.

use super::*;
use crate::domain::graph::TaskNode;
use crate::domain::types::{TaskCost, TaskStatus};

fn output(content: &str) -> TaskOutput {
    TaskOutput {
        content: content.to_string(),
        sources: Vec::new(),
        cost: TaskCost {
            input_tokens: 2,
            output_tokens: 1,
            tool_calls: 0,
        },
    }
}

fn plan() -> TaskGraph {
    TaskGraph::from_nodes([
        TaskNode::new("a", "collect"),
        TaskNode::new("b", "digest").with_dependency("a"),
    ])
    .unwrap()
}

#[test]
fn view_mirrors_the_aggregate_transitions() {
    let run_id = uuid::Uuid::new_v4().to_string();
    let mut view = RunView::default();
    assert_eq!(view.status(), RunStatus::Pending);

    view.apply_event(
        &run_id,
        &RunEvent::RunStarted {
            objective: "objective".into(),
            started_at: TimestampUtc::now(),
        },
        1,
    );
    assert_eq!(view.status(), RunStatus::Planning);
    assert_eq!(view.run_id().unwrap().to_string(), run_id);
    assert_eq!(view.last_event_sequence(), 1);

    view.apply_event(
        &run_id,
        &RunEvent::PlanProduced {
            graph: plan(),
            produced_at: TimestampUtc::now(),
        },
        2,
    );
    assert_eq!(view.status(), RunStatus::Executing);
    assert_eq!(view.graph().len(), 2);

    view.apply_event(
        &run_id,
        &RunEvent::TaskStarted {
            task_id: "a".into(),
            started_at: TimestampUtc::now(),
        },
        3,
    );
    assert_eq!(
        view.graph().node(&"a".into()).unwrap().status,
        TaskStatus::Running
    );

    view.apply_event(
        &run_id,
        &RunEvent::TaskCompleted {
            task_id: "a".into(),
            output: output("found it"),
            completed_at: TimestampUtc::now(),
        },
        4,
    );
    assert_eq!(view.results().len(), 1);
    assert_eq!(view.cost().tasks_finished, 1);
    assert_eq!(view.status(), RunStatus::Executing);
    assert_eq!(view.last_event_sequence(), 4);
}

#[test]
fn view_tracks_terminal_states() {
    let run_id = uuid::Uuid::new_v4().to_string();
    let mut view = RunView::default();
    view.apply_event(
        &run_id,
        &RunEvent::RunStarted {
            objective: "objective".into(),
            started_at: TimestampUtc::now(),
        },
        1,
    );
    view.apply_event(
        &run_id,
        &RunEvent::RunCancelled {
            reason: "operator stop".to_string(),
            cancelled_at: TimestampUtc::now(),
        },
        2,
    );

    assert!(view.is_terminal());
    assert_eq!(view.status(), RunStatus::Cancelled);
    assert_eq!(view.cancel_reason(), Some("operator stop"));
}

#[test]
fn view_records_failures_with_causing_task() {
    let run_id = uuid::Uuid::new_v4().to_string();
    let mut view = RunView::default();
    view.apply_event(
        &run_id,
        &RunEvent::RunStarted {
            objective: "objective".into(),
            started_at: TimestampUtc::now(),
        },
        1,
    );
    view.apply_event(
        &run_id,
        &RunEvent::RunFailed {
            reason: "task 'a' failed".to_string(),
            failed_task: Some("a".into()),
            failed_at: TimestampUtc::now(),
        },
        2,
    );

    assert_eq!(view.status(), RunStatus::Failed);
    assert_eq!(
        view.failure().unwrap().failed_task,
        Some(TaskId::from("a"))
    );
}
