//! Tests for the file-based event store adapter.

use super::*;
use crate::domain::graph::{TaskGraph, TaskNode};
use crate::domain::services::RunServices;
use crate::domain::types::{RunStatus, TaskOutput};
use crate::domain::RunCommand;
use cqrs_es::CqrsFramework;
use tempfile::tempdir;

fn store_in(dir: &tempfile::TempDir, snapshot_every: u64) -> FileEventStore {
    FileEventStore::new(dir.path().to_path_buf(), snapshot_every)
}

fn cqrs_for(store: FileEventStore) -> CqrsFramework<RunAggregate, FileEventStore> {
    CqrsFramework::new(store, Vec::new(), RunServices::default())
}

fn plan_a() -> TaskGraph {
    TaskGraph::from_nodes([TaskNode::new("a", "solo task")]).unwrap()
}

async fn seed_running_task(cqrs: &CqrsFramework<RunAggregate, FileEventStore>, run_id: &str) {
    cqrs.execute(
        run_id,
        RunCommand::StartRun {
            objective: "store test".into(),
        },
    )
    .await
    .expect("start");
    cqrs.execute(run_id, RunCommand::SetPlan { graph: plan_a() })
        .await
        .expect("plan");
    cqrs.execute(
        run_id,
        RunCommand::StartTask {
            task_id: "a".into(),
        },
    )
    .await
    .expect("start task");
}

#[tokio::test]
async fn events_get_strictly_increasing_sequences() {
    let dir = tempdir().expect("temp dir");
    let store = store_in(&dir, 0);
    let run_id = "run-1";
    let cqrs = cqrs_for(store.clone());

    seed_running_task(&cqrs, run_id).await;

    let events = store.load_events(run_id).await.expect("load");
    let sequences: Vec<usize> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    let stored = store.load_events_from(run_id, 0).await.expect("stored");
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0].event_type, "RunStarted");
    // Every stored event has a unique id
    assert_ne!(stored[0].event_id, stored[1].event_id);
}

#[tokio::test]
async fn load_events_from_skips_earlier_versions() {
    let dir = tempdir().expect("temp dir");
    let store = store_in(&dir, 0);
    let run_id = "run-1";
    let cqrs = cqrs_for(store.clone());
    seed_running_task(&cqrs, run_id).await;

    let tail = store.load_events_from(run_id, 2).await.expect("tail");
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].sequence, 3);
    assert_eq!(tail[0].event_type, "TaskStarted");
}

#[tokio::test]
async fn commit_with_stale_expected_version_conflicts() {
    let dir = tempdir().expect("temp dir");
    let store = store_in(&dir, 0);
    let run_id = "run-1";
    let cqrs = cqrs_for(store.clone());
    seed_running_task(&cqrs, run_id).await;

    // Two writers load the same version
    let ctx_one = store.load_aggregate(run_id).await.expect("ctx one");
    let ctx_two = store.load_aggregate(run_id).await.expect("ctx two");
    assert_eq!(ctx_one.current_sequence, 3);

    let complete = RunCommand::CompleteTask {
        task_id: "a".into(),
        output: TaskOutput::from_content("winner"),
    };
    let events_one = ctx_one
        .aggregate
        .handle(complete.clone(), &RunServices::default())
        .await
        .expect("handle");
    let events_two = ctx_two
        .aggregate
        .handle(complete, &RunServices::default())
        .await
        .expect("handle");

    let first = store
        .commit(events_one, ctx_one, Default::default())
        .await;
    assert!(first.is_ok());

    let second = store
        .commit(events_two, ctx_two, Default::default())
        .await;
    assert!(matches!(second, Err(AggregateError::AggregateConflict)));

    // The stream contains exactly one completion at version 4
    let stored = store.load_events_from(run_id, 0).await.expect("stored");
    assert_eq!(stored.len(), 4);
    assert_eq!(
        stored
            .iter()
            .filter(|e| e.event_type == "TaskCompleted")
            .count(),
        1
    );
    let sequences: Vec<u64> = stored.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn concurrent_commits_let_exactly_one_writer_through() {
    let dir = tempdir().expect("temp dir");
    let store = store_in(&dir, 0);
    let run_id = "run-1";
    let cqrs = cqrs_for(store.clone());
    seed_running_task(&cqrs, run_id).await;

    let ctx_one = store.load_aggregate(run_id).await.expect("ctx one");
    let ctx_two = store.load_aggregate(run_id).await.expect("ctx two");

    let complete = RunCommand::CompleteTask {
        task_id: "a".into(),
        output: TaskOutput::from_content("racer"),
    };
    let events_one = ctx_one
        .aggregate
        .handle(complete.clone(), &RunServices::default())
        .await
        .expect("handle");
    let events_two = ctx_two
        .aggregate
        .handle(complete, &RunServices::default())
        .await
        .expect("handle");

    let store_one = store.clone();
    let store_two = store.clone();
    let (first, second) = tokio::join!(
        store_one.commit(events_one, ctx_one, Default::default()),
        store_two.commit(events_two, ctx_two, Default::default()),
    );

    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    let conflicts = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(AggregateError::AggregateConflict)))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);

    let stored = store.load_events_from(run_id, 0).await.expect("stored");
    assert_eq!(stored.len(), 4);
}

#[tokio::test]
async fn list_run_ids_enumerates_streams() {
    let dir = tempdir().expect("temp dir");
    let store = store_in(&dir, 0);
    let cqrs = cqrs_for(store.clone());

    for run_id in ["run-b", "run-a"] {
        cqrs.execute(
            run_id,
            RunCommand::StartRun {
                objective: "listed".into(),
            },
        )
        .await
        .expect("start");
    }

    let ids = store.list_run_ids().await.expect("list");
    assert_eq!(ids, vec!["run-a".to_string(), "run-b".to_string()]);
}

#[tokio::test]
async fn phase_boundaries_write_snapshots() {
    let dir = tempdir().expect("temp dir");
    let store = store_in(&dir, 0);
    let run_id = "run-1";
    let cqrs = cqrs_for(store.clone());

    cqrs.execute(
        run_id,
        RunCommand::StartRun {
            objective: "snapshots".into(),
        },
    )
    .await
    .expect("start");
    assert!(store.load_snapshot(run_id).await.expect("load").is_none());

    // PlanProduced is a phase boundary
    cqrs.execute(run_id, RunCommand::SetPlan { graph: plan_a() })
        .await
        .expect("plan");

    let snapshot = store
        .load_snapshot(run_id)
        .await
        .expect("load")
        .expect("snapshot present");
    assert_eq!(snapshot.sequence, 2);
    assert_eq!(snapshot.state.status(), RunStatus::Executing);
}

#[tokio::test]
async fn snapshot_based_load_equals_full_replay() {
    let dir = tempdir().expect("temp dir");
    let store = store_in(&dir, 0);
    let run_id = "run-1";
    let cqrs = cqrs_for(store.clone());
    seed_running_task(&cqrs, run_id).await;
    cqrs.execute(
        run_id,
        RunCommand::CompleteTask {
            task_id: "a".into(),
            output: TaskOutput::from_content("done"),
        },
    )
    .await
    .expect("complete");

    // Snapshot exists (PlanProduced boundary) and events continue past it
    assert!(store.load_snapshot(run_id).await.expect("load").is_some());

    let context = store.load_aggregate(run_id).await.expect("load aggregate");
    assert_eq!(context.current_sequence, 4);

    let mut replayed = RunAggregate::default();
    for envelope in store.load_events(run_id).await.expect("events") {
        replayed.apply(envelope.payload);
    }

    assert_eq!(
        serde_json::to_value(&context.aggregate).unwrap(),
        serde_json::to_value(&replayed).unwrap()
    );
    assert_eq!(context.aggregate.status(), RunStatus::Analyzing);
}

#[tokio::test]
async fn deleting_the_snapshot_only_slows_loading_down() {
    let dir = tempdir().expect("temp dir");
    let store = store_in(&dir, 0);
    let run_id = "run-1";
    let cqrs = cqrs_for(store.clone());
    seed_running_task(&cqrs, run_id).await;

    let with_snapshot = store.load_aggregate(run_id).await.expect("load");

    std::fs::remove_file(dir.path().join("runs").join(run_id).join("snapshot.json"))
        .expect("remove snapshot");

    let without_snapshot = store.load_aggregate(run_id).await.expect("load");
    assert_eq!(
        serde_json::to_value(&with_snapshot.aggregate).unwrap(),
        serde_json::to_value(&without_snapshot.aggregate).unwrap()
    );
    assert_eq!(without_snapshot.current_sequence, 3);
}

#[tokio::test]
async fn run_ids_that_escape_the_data_dir_are_rejected() {
    let dir = tempdir().expect("temp dir");
    let store = store_in(&dir, 0);

    let result = store.load_events_from("../evil", 0).await;
    assert!(matches!(result, Err(RunError::StorageFailure { .. })));

    let result = store.load_events_from("", 0).await;
    assert!(matches!(result, Err(RunError::StorageFailure { .. })));
}
