//! Run supervisor for fault-tolerant actor management.
//!
//! The supervisor monitors run actors and automatically restarts them if
//! they fail or terminate unexpectedly. A restarted actor re-hydrates its
//! view from the event store, so no state is lost.

use crate::domain::actor::{RunActor, RunActorArgs};
use crate::event_store::RunStore;
use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use std::marker::PhantomData;

/// Messages for the run supervisor.
pub enum SupervisorMsg<ES> {
    /// Spawn a new run actor.
    Spawn(RunActorArgs<ES>),
}

/// The run supervisor actor.
pub struct RunSupervisor<ES> {
    _store: PhantomData<ES>,
}

impl<ES> Default for RunSupervisor<ES> {
    fn default() -> Self {
        Self {
            _store: PhantomData,
        }
    }
}

#[async_trait]
impl<ES> Actor for RunSupervisor<ES>
where
    ES: RunStore + Clone + Send + Sync + 'static,
{
    type Msg = SupervisorMsg<ES>;
    type State = Option<RunActorArgs<ES>>;
    type Arguments = ();

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        _args: (),
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(None)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        msg: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match msg {
            SupervisorMsg::Spawn(args) => {
                *state = Some(args.clone());
                let _ = RunActor::spawn_linked(
                    None,
                    RunActor::default(),
                    args,
                    myself.get_cell(),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        evt: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if matches!(
            evt,
            SupervisionEvent::ActorFailed(_, _) | SupervisionEvent::ActorTerminated(_, _, _)
        ) {
            if let Some(args) = state.clone() {
                let _ = RunActor::spawn_linked(
                    None,
                    RunActor::default(),
                    args,
                    myself.get_cell(),
                )
                .await?;
            }
        }
        Ok(())
    }
}
