//! End-to-end engine tests with scripted collaborators.
//!
//! These cover the full happy path, interrupted resume, resume
//! idempotence on finished runs, failure policies, gap-filling, bounded
//! parallelism, and cooperative cancellation.

use super::*;
use crate::config::EngineConfig;
use crate::domain::analysis::{Analysis, Gap};
use crate::domain::graph::{TaskGraph, TaskNode};
use crate::domain::report::{FinalReport, OutlineSection, ReportOutline, ReportSection};
use crate::domain::services::RunServices;
use crate::domain::types::{Objective, TaskId, TaskOutput, TaskStatus};
use crate::event_store::MemoryEventStore;
use async_trait::async_trait;
use cqrs_es::CqrsFramework;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

struct StaticPlanner {
    graph: TaskGraph,
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _objective: &Objective) -> anyhow::Result<TaskGraph> {
        Ok(self.graph.clone())
    }
}

/// Executor that records calls and can be scripted to fail or hang on
/// specific tasks.
#[derive(Default)]
struct ScriptedExecutor {
    calls: Mutex<Vec<TaskId>>,
    failing: Vec<TaskId>,
    hanging: Vec<TaskId>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    fn calls(&self) -> Vec<TaskId> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, spec: TaskSpec) -> Result<TaskOutput, TaskExecutionError> {
        self.calls.lock().expect("calls lock").push(spec.task_id.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Give parallel dispatches a chance to overlap
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.hanging.contains(&spec.task_id) {
            futures::future::pending::<()>().await;
        }
        if self.failing.contains(&spec.task_id) {
            return Err(TaskExecutionError::new(format!(
                "scripted failure of '{}'",
                spec.task_id
            )));
        }
        Ok(TaskOutput::from_content(format!(
            "result of {} (inputs: {})",
            spec.task_id,
            spec.inputs.len()
        )))
    }
}

struct StaticAnalyst {
    gaps: Vec<Gap>,
    gap_tasks: Vec<TaskNode>,
}

#[async_trait]
impl Analyst for StaticAnalyst {
    async fn analyze(
        &self,
        _objective: &Objective,
        results: &BTreeMap<TaskId, TaskOutput>,
    ) -> anyhow::Result<Analysis> {
        Ok(Analysis {
            summary: format!("{} results validated", results.len()),
            contradictions: Vec::new(),
            gaps: self.gaps.clone(),
        })
    }

    async fn fill_gaps(
        &self,
        _analysis: &Analysis,
        _graph: &TaskGraph,
    ) -> anyhow::Result<Vec<TaskNode>> {
        Ok(self.gap_tasks.clone())
    }
}

struct StaticSynthesizer;

#[async_trait]
impl Synthesizer for StaticSynthesizer {
    async fn outline(
        &self,
        _objective: &Objective,
        _results: &BTreeMap<TaskId, TaskOutput>,
    ) -> anyhow::Result<ReportOutline> {
        Ok(ReportOutline {
            sections: vec![
                OutlineSection {
                    heading: "Summary".to_string(),
                    notes: String::new(),
                },
                OutlineSection {
                    heading: "Details".to_string(),
                    notes: String::new(),
                },
            ],
        })
    }

    async fn write_section(
        &self,
        _objective: &Objective,
        section: &OutlineSection,
        results: &BTreeMap<TaskId, TaskOutput>,
    ) -> anyhow::Result<ReportSection> {
        Ok(ReportSection {
            heading: section.heading.clone(),
            body: format!("{} ({} results)", section.heading, results.len()),
        })
    }

    async fn finalize(
        &self,
        objective: &Objective,
        sections: &[ReportSection],
    ) -> anyhow::Result<FinalReport> {
        Ok(FinalReport {
            title: objective.as_str().to_string(),
            sections: sections.to_vec(),
        })
    }
}

fn plan_ab() -> TaskGraph {
    TaskGraph::from_nodes([
        TaskNode::new("a", "collect background"),
        TaskNode::new("b", "deep dive").with_dependency("a"),
    ])
    .unwrap()
}

struct EngineSetup {
    engine: Engine<MemoryEventStore>,
    executor: Arc<ScriptedExecutor>,
    store: MemoryEventStore,
}

fn engine_with(
    graph: TaskGraph,
    executor: ScriptedExecutor,
    analyst: StaticAnalyst,
    config: EngineConfig,
) -> EngineSetup {
    let store = MemoryEventStore::new(25);
    let executor = Arc::new(executor);
    let collaborators = Collaborators {
        planner: Arc::new(StaticPlanner { graph }),
        executor: executor.clone(),
        analyst: Arc::new(analyst),
        synthesizer: Arc::new(StaticSynthesizer),
    };
    EngineSetup {
        engine: Engine::new(store.clone(), config, collaborators),
        executor,
        store,
    }
}

fn no_gaps() -> StaticAnalyst {
    StaticAnalyst {
        gaps: Vec::new(),
        gap_tasks: Vec::new(),
    }
}

#[tokio::test]
async fn happy_path_runs_to_completion() {
    let setup = engine_with(
        plan_ab(),
        ScriptedExecutor::default(),
        no_gaps(),
        EngineConfig::default(),
    );

    let view = setup
        .engine
        .start("what changed in 2025?".into())
        .await
        .expect("run");

    assert_eq!(view.status(), RunStatus::Complete);
    assert!(view.graph().all_complete());
    assert_eq!(view.sections().len(), 2);
    let report = view.report().expect("report");
    assert_eq!(report.title, "what changed in 2025?");
    assert_eq!(view.cost().tasks_finished, 2);

    // Dependency order: `a` strictly before `b`
    assert_eq!(setup.executor.calls(), vec![TaskId::from("a"), TaskId::from("b")]);

    // Dependent task saw its input
    let b_output = view.results().get(&TaskId::from("b")).expect("b output");
    assert!(b_output.content.contains("inputs: 1"));
}

#[tokio::test]
async fn parallelism_stays_within_the_configured_bound() {
    let graph = TaskGraph::from_nodes([
        TaskNode::new("t1", "one"),
        TaskNode::new("t2", "two"),
        TaskNode::new("t3", "three"),
        TaskNode::new("t4", "four"),
    ])
    .unwrap();
    let config = EngineConfig {
        max_parallel_tasks: 2,
        ..EngineConfig::default()
    };
    let setup = engine_with(graph, ScriptedExecutor::default(), no_gaps(), config);

    let view = setup.engine.start("parallel".into()).await.expect("run");

    assert_eq!(view.status(), RunStatus::Complete);
    assert_eq!(setup.executor.calls().len(), 4);
    assert!(setup.executor.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn resume_skips_completed_work() {
    let store = MemoryEventStore::new(25);
    let run_id = uuid::Uuid::new_v4().to_string();

    // A previous process recorded: started, planned, `a` completed.
    let cqrs = CqrsFramework::new(store.clone(), Vec::new(), RunServices::default());
    cqrs.execute(
        &run_id,
        RunCommand::StartRun {
            objective: "interrupted".into(),
        },
    )
    .await
    .expect("start");
    cqrs.execute(&run_id, RunCommand::SetPlan { graph: plan_ab() })
        .await
        .expect("plan");
    cqrs.execute(
        &run_id,
        RunCommand::StartTask {
            task_id: "a".into(),
        },
    )
    .await
    .expect("start a");
    cqrs.execute(
        &run_id,
        RunCommand::CompleteTask {
            task_id: "a".into(),
            output: TaskOutput::from_content("previous result"),
        },
    )
    .await
    .expect("complete a");

    // Resume in a fresh engine (simulated process restart)
    let executor = Arc::new(ScriptedExecutor::default());
    let collaborators = Collaborators {
        planner: Arc::new(StaticPlanner { graph: plan_ab() }),
        executor: executor.clone(),
        analyst: Arc::new(no_gaps()),
        synthesizer: Arc::new(StaticSynthesizer),
    };
    let engine = Engine::new(store, EngineConfig::default(), collaborators);

    let view = engine.resume(&run_id).await.expect("resume");

    assert_eq!(view.status(), RunStatus::Complete);
    // `a` was never re-executed; only `b` ran in this process
    assert_eq!(executor.calls(), vec![TaskId::from("b")]);
    assert_eq!(
        view.results().get(&TaskId::from("a")).expect("kept").content,
        "previous result"
    );
}

#[tokio::test]
async fn resume_redispatches_a_task_interrupted_mid_flight() {
    let store = MemoryEventStore::new(25);
    let run_id = uuid::Uuid::new_v4().to_string();

    // The process died after `a` started but before it finished.
    let cqrs = CqrsFramework::new(store.clone(), Vec::new(), RunServices::default());
    cqrs.execute(
        &run_id,
        RunCommand::StartRun {
            objective: "interrupted".into(),
        },
    )
    .await
    .expect("start");
    cqrs.execute(&run_id, RunCommand::SetPlan { graph: plan_ab() })
        .await
        .expect("plan");
    cqrs.execute(
        &run_id,
        RunCommand::StartTask {
            task_id: "a".into(),
        },
    )
    .await
    .expect("start a");

    let executor = Arc::new(ScriptedExecutor::default());
    let collaborators = Collaborators {
        planner: Arc::new(StaticPlanner { graph: plan_ab() }),
        executor: executor.clone(),
        analyst: Arc::new(no_gaps()),
        synthesizer: Arc::new(StaticSynthesizer),
    };
    let engine = Engine::new(store, EngineConfig::default(), collaborators);

    let view = engine.resume(&run_id).await.expect("resume");

    assert_eq!(view.status(), RunStatus::Complete);
    assert_eq!(executor.calls(), vec![TaskId::from("a"), TaskId::from("b")]);
}

#[tokio::test]
async fn resuming_a_finished_run_is_a_noop() {
    let setup = engine_with(
        plan_ab(),
        ScriptedExecutor::default(),
        no_gaps(),
        EngineConfig::default(),
    );
    let view = setup.engine.start("finish me".into()).await.expect("run");
    let run_id = view.run_id().expect("id").to_string();
    let calls_after_first = setup.executor.calls().len();

    let resumed = setup.engine.resume(&run_id).await.expect("resume");

    assert_eq!(resumed.status(), RunStatus::Complete);
    assert_eq!(setup.executor.calls().len(), calls_after_first);
    assert_eq!(
        resumed.last_event_sequence(),
        view.last_event_sequence(),
        "no new events were appended"
    );
}

#[tokio::test]
async fn resuming_an_unknown_run_fails() {
    let setup = engine_with(
        plan_ab(),
        ScriptedExecutor::default(),
        no_gaps(),
        EngineConfig::default(),
    );
    let result = setup.engine.resume("does-not-exist").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn a_failed_dependency_fails_the_run_with_the_causing_task() {
    let setup = engine_with(
        plan_ab(),
        ScriptedExecutor {
            failing: vec![TaskId::from("a")],
            ..ScriptedExecutor::default()
        },
        no_gaps(),
        EngineConfig::default(),
    );

    let view = setup.engine.start("doomed".into()).await.expect("run");

    assert_eq!(view.status(), RunStatus::Failed);
    let failure = view.failure().expect("failure recorded");
    assert_eq!(failure.failed_task, Some(TaskId::from("a")));
    // `b` never became ready
    assert_eq!(setup.executor.calls(), vec![TaskId::from("a")]);
}

#[tokio::test]
async fn an_independent_failure_does_not_abort_the_run() {
    let graph = TaskGraph::from_nodes([
        TaskNode::new("a", "solid"),
        TaskNode::new("flaky", "optional extra"),
    ])
    .unwrap();
    let setup = engine_with(
        graph,
        ScriptedExecutor {
            failing: vec![TaskId::from("flaky")],
            ..ScriptedExecutor::default()
        },
        no_gaps(),
        EngineConfig::default(),
    );

    let view = setup.engine.start("resilient".into()).await.expect("run");

    assert_eq!(view.status(), RunStatus::Complete);
    assert!(view.results().contains_key(&TaskId::from("a")));
    assert!(!view.results().contains_key(&TaskId::from("flaky")));
    assert_eq!(
        view.graph().node(&"flaky".into()).unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn fail_fast_stops_at_the_first_failure() {
    let graph = TaskGraph::from_nodes([
        TaskNode::new("a", "solid"),
        TaskNode::new("flaky", "breaks"),
    ])
    .unwrap();
    let config = EngineConfig {
        fail_fast: true,
        max_parallel_tasks: 1,
        ..EngineConfig::default()
    };
    let setup = engine_with(
        graph,
        ScriptedExecutor {
            failing: vec![TaskId::from("flaky")],
            ..ScriptedExecutor::default()
        },
        no_gaps(),
        config,
    );

    let view = setup.engine.start("strict".into()).await.expect("run");

    assert_eq!(view.status(), RunStatus::Failed);
    assert_eq!(
        view.failure().expect("failure").failed_task,
        Some(TaskId::from("flaky"))
    );
}

#[tokio::test]
async fn gap_tasks_run_before_synthesis() {
    let analyst = StaticAnalyst {
        gaps: vec![Gap {
            id: "g1".to_string(),
            description: "missing recent numbers".to_string(),
        }],
        gap_tasks: vec![TaskNode::new("gap-g1", "find recent numbers").with_dependency("a")],
    };
    let setup = engine_with(
        plan_ab(),
        ScriptedExecutor::default(),
        analyst,
        EngineConfig::default(),
    );

    let view = setup.engine.start("gappy".into()).await.expect("run");

    assert_eq!(view.status(), RunStatus::Complete);
    assert!(view.gap_tasks_planned());
    assert_eq!(view.graph().len(), 3);
    assert_eq!(
        view.graph().node(&"gap-g1".into()).unwrap().status,
        TaskStatus::Complete
    );
    assert_eq!(
        setup.executor.calls(),
        vec![TaskId::from("a"), TaskId::from("b"), TaskId::from("gap-g1")]
    );
    // The gap task's result feeds synthesis like any other
    assert!(view.results().contains_key(&TaskId::from("gap-g1")));
}

#[tokio::test]
async fn cancellation_interrupts_execution_and_ignores_stray_results() {
    let setup = engine_with(
        plan_ab(),
        ScriptedExecutor {
            hanging: vec![TaskId::from("a")],
            ..ScriptedExecutor::default()
        },
        no_gaps(),
        EngineConfig::default(),
    );
    let engine = Arc::new(setup.engine);

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start("cancel me".into()).await })
    };

    // Wait until task `a` is durably recorded running
    let run_id = loop {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let ids = engine.list_runs().await.expect("list");
        if let Some(id) = ids.first() {
            let view = engine.load_view(id).await.expect("view");
            if view
                .graph()
                .node(&"a".into())
                .is_some_and(|n| n.status == TaskStatus::Running)
            {
                break id.clone();
            }
        }
    };

    let cancelled = engine.cancel(&run_id, "operator stop").await.expect("cancel");
    assert_eq!(cancelled.status(), RunStatus::Cancelled);

    let view = runner.await.expect("join").expect("drive");
    assert_eq!(view.status(), RunStatus::Cancelled);
    assert_eq!(view.cancel_reason(), Some("operator stop"));

    // No completion event was recorded for the aborted task
    let events = setup.store.load_events_from(&run_id, 0).await.expect("events");
    assert!(events.iter().all(|e| e.event_type != "TaskCompleted"));
    // And `b` never started
    assert_eq!(setup.executor.calls(), vec![TaskId::from("a")]);
}

#[tokio::test]
async fn cancelling_a_finished_run_is_rejected() {
    let setup = engine_with(
        plan_ab(),
        ScriptedExecutor::default(),
        no_gaps(),
        EngineConfig::default(),
    );
    let view = setup.engine.start("done".into()).await.expect("run");
    let run_id = view.run_id().expect("id").to_string();

    let result = setup.engine.cancel(&run_id, "too late").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn list_runs_surfaces_started_runs() {
    let setup = engine_with(
        plan_ab(),
        ScriptedExecutor::default(),
        no_gaps(),
        EngineConfig::default(),
    );
    let view = setup.engine.start("listed".into()).await.expect("run");
    let run_id = view.run_id().expect("id").to_string();

    let ids = setup.engine.list_runs().await.expect("list");
    assert_eq!(ids, vec![run_id]);
}
