//! Run actor for CQRS command handling.
//!
//! The `RunActor` wraps the CQRS framework and provides a message-based
//! interface for executing commands and querying state. One actor per run
//! serializes all command execution for that run; separate runs proceed
//! fully independently. The actor is generic over the event store
//! adapter, so the backing medium can be swapped without touching it.

use crate::domain::cqrs::RunAggregate;
use crate::domain::errors::RunError;
use crate::domain::services::RunServices;
use crate::domain::view::{RunEventEnvelope, RunView};
use crate::domain::{RunCommand, RunQuery};
use crate::event_store::RunStore;
use async_trait::async_trait;
use cqrs_es::{AggregateError, CqrsFramework};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch, RwLock};

/// Buffered envelopes per broadcast subscriber before drop-oldest kicks in.
pub const EVENT_BROADCAST_CAPACITY: usize = 64;

/// Messages that can be sent to the run actor.
pub enum RunMessage {
    /// Execute a command and return the updated view (or error).
    Command(
        Box<RunCommand>,
        oneshot::Sender<Result<RunView, RunError>>,
    ),
    /// Get the current view.
    GetView(oneshot::Sender<RunView>),
}

/// Arguments for spawning a run actor.
#[derive(Clone)]
pub struct RunActorArgs<ES> {
    /// The aggregate ID (run ID).
    pub aggregate_id: String,
    /// The event store adapter.
    pub store: ES,
    /// Shared view for projection.
    pub view: Arc<RwLock<RunView>>,
    /// Watch channel sender for view snapshots.
    pub snapshot_tx: watch::Sender<RunView>,
    /// Broadcast channel sender for event streaming.
    pub event_tx: broadcast::Sender<RunEventEnvelope>,
    /// Services for command handling.
    pub services: RunServices,
}

/// State maintained by the run actor.
pub struct RunActorState<ES>
where
    ES: RunStore,
{
    /// The CQRS framework instance.
    pub cqrs: CqrsFramework<RunAggregate, ES>,
    /// The aggregate ID.
    pub aggregate_id: String,
    /// Shared view for reading.
    pub view: Arc<RwLock<RunView>>,
}

/// The run actor.
pub struct RunActor<ES> {
    _store: PhantomData<ES>,
}

impl<ES> Default for RunActor<ES> {
    fn default() -> Self {
        Self {
            _store: PhantomData,
        }
    }
}

impl<ES> RunActor<ES>
where
    ES: RunStore + Clone + Send + Sync + 'static,
{
    /// Builds the CQRS framework from actor arguments.
    pub fn build_cqrs(args: &RunActorArgs<ES>) -> CqrsFramework<RunAggregate, ES> {
        let query = RunQuery::new(
            args.view.clone(),
            args.snapshot_tx.clone(),
            args.event_tx.clone(),
        );

        CqrsFramework::new(args.store.clone(), vec![Box::new(query)], args.services.clone())
    }
}

#[async_trait]
impl<ES> Actor for RunActor<ES>
where
    ES: RunStore + Clone + Send + Sync + 'static,
{
    type Msg = RunMessage;
    type State = RunActorState<ES>;
    type Arguments = RunActorArgs<ES>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        // Hydrate the shared view by replaying the stored events, so a
        // resumed run observes its full history before the first command.
        let bootstrapped = bootstrap_view(&args.store, &args.aggregate_id).await?;
        {
            let mut view = args.view.write().await;
            *view = bootstrapped.clone();
        }
        let _ = args.snapshot_tx.send(bootstrapped);

        let cqrs = Self::build_cqrs(&args);

        Ok(RunActorState {
            cqrs,
            aggregate_id: args.aggregate_id,
            view: args.view,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RunMessage::Command(boxed_cmd, reply) => {
                let cmd = *boxed_cmd;
                let result = state.cqrs.execute(&state.aggregate_id, cmd).await;
                let view = state.view.read().await.clone();

                let mapped = match result {
                    Ok(()) => Ok(view),
                    Err(AggregateError::UserError(err)) => Err(err),
                    Err(AggregateError::AggregateConflict) => Err(RunError::ConcurrencyConflict {
                        message: "run was modified concurrently".to_string(),
                    }),
                    Err(err) => Err(RunError::StorageFailure {
                        message: err.to_string(),
                    }),
                };

                if reply.send(mapped).is_err() {
                    tracing::debug!("command reply channel closed");
                }
            }
            RunMessage::GetView(reply) => {
                let view = state.view.read().await.clone();
                if reply.send(view).is_err() {
                    tracing::debug!("view reply channel closed");
                }
            }
        }

        Ok(())
    }
}

/// Rebuilds a `RunView` by replaying all stored events for a run.
///
/// Returns `RunView::default()` for a run with no recorded events.
pub async fn bootstrap_view<ES>(store: &ES, aggregate_id: &str) -> Result<RunView, RunError>
where
    ES: RunStore,
{
    let mut view = RunView::default();
    let events = store
        .load_events(aggregate_id)
        .await
        .map_err(|e| RunError::StorageFailure {
            message: e.to_string(),
        })?;

    for envelope in &events {
        view.apply_event(aggregate_id, &envelope.payload, envelope.sequence as u64);
    }

    Ok(view)
}

/// Creates actor arguments plus the receiving halves of the view watch
/// and event broadcast channels.
pub fn create_actor_args<ES>(
    store: ES,
    aggregate_id: &str,
) -> (
    RunActorArgs<ES>,
    watch::Receiver<RunView>,
    broadcast::Receiver<RunEventEnvelope>,
)
where
    ES: RunStore + Clone + Send + Sync + 'static,
{
    let view = Arc::new(RwLock::new(RunView::default()));
    let (snapshot_tx, snapshot_rx) = watch::channel(RunView::default());
    let (event_tx, event_rx) = broadcast::channel(EVENT_BROADCAST_CAPACITY);

    let args = RunActorArgs {
        aggregate_id: aggregate_id.to_string(),
        store,
        view,
        snapshot_tx,
        event_tx,
        services: RunServices::default(),
    };

    (args, snapshot_rx, event_rx)
}

#[cfg(test)]
#[path = "tests/actor_tests.rs"]
mod tests;
