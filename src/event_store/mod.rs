//! Event store port and adapters.
//!
//! The port is `cqrs_es::EventStore` (load + append-with-OCC) extended by
//! [`RunStore`] with snapshot access, partial loads, and run enumeration.
//! Adapters must satisfy the identical contract so the aggregate, actor,
//! and orchestrator stay adapter-agnostic.

pub mod file_store;
pub mod memory_store;

pub use file_store::FileEventStore;
pub use memory_store::MemoryEventStore;

use crate::domain::errors::RunError;
use crate::domain::types::TimestampUtc;
use crate::domain::view::RunEventEnvelope;
use crate::domain::{RunAggregate, RunEvent};
use async_trait::async_trait;
use cqrs_es::{AggregateContext, DomainEvent, EventEnvelope, EventStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A stored event record in a run's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique id assigned at append time, for idempotent re-delivery.
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub sequence: u64,
    pub recorded_at: TimestampUtc,
    pub event_type: String,
    pub event_version: String,
    pub event: RunEvent,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StoredEvent {
    /// Builds a fresh record for an event being appended.
    pub fn new(
        aggregate_id: &str,
        sequence: u64,
        event: RunEvent,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id: aggregate_id.to_string(),
            sequence,
            recorded_at: TimestampUtc::now(),
            event_type: event.event_type(),
            event_version: event.event_version(),
            event,
            metadata,
        }
    }

    /// Converts to a framework envelope, carrying the stored event id in
    /// the metadata so bus consumers can deduplicate re-deliveries.
    pub fn to_envelope(&self) -> EventEnvelope<RunAggregate> {
        let mut metadata = self.metadata.clone();
        metadata.insert(
            RunEventEnvelope::EVENT_ID_METADATA_KEY.to_string(),
            self.event_id.to_string(),
        );
        EventEnvelope {
            aggregate_id: self.aggregate_id.clone(),
            sequence: self.sequence as usize,
            payload: self.event.clone(),
            metadata,
        }
    }
}

/// A stored snapshot for faster aggregate loading.
///
/// Purely a performance optimization: deleting every snapshot only makes
/// loading slower, never incorrect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub aggregate_id: String,
    /// Version of the last event folded into `state`.
    pub sequence: u64,
    pub snapshot_at: TimestampUtc,
    pub state: RunAggregate,
}

/// Aggregate context shared by the store adapters.
pub struct RunAggregateContext {
    /// The aggregate ID.
    pub aggregate_id: String,
    /// The rehydrated aggregate.
    pub aggregate: RunAggregate,
    /// The current sequence number (last applied event). This is the
    /// expected version checked by the append path.
    pub current_sequence: u64,
}

impl AggregateContext<RunAggregate> for RunAggregateContext {
    fn aggregate(&self) -> &RunAggregate {
        &self.aggregate
    }
}

/// Store port used by the actor, orchestrator, and ops tooling.
#[async_trait]
pub trait RunStore: EventStore<RunAggregate, AC = RunAggregateContext> {
    /// Loads stored events with `sequence > from_sequence`, in order.
    async fn load_events_from(
        &self,
        aggregate_id: &str,
        from_sequence: u64,
    ) -> Result<Vec<StoredEvent>, RunError>;

    /// Loads the latest snapshot for a run, if one exists.
    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Option<StoredSnapshot>, RunError>;

    /// Saves (replaces) the snapshot for a run.
    async fn save_snapshot(&self, snapshot: StoredSnapshot) -> Result<(), RunError>;

    /// Enumerates the run ids known to this store, in sorted order.
    async fn list_run_ids(&self) -> Result<Vec<String>, RunError>;
}

/// Determines if a snapshot should be taken after committing `last`.
///
/// Snapshots are taken every `snapshot_every` events (0 = disabled) and at
/// phase boundaries, which are the natural clean stopping points.
pub(crate) fn should_snapshot(sequence: u64, snapshot_every: u64, last: &RunEvent) -> bool {
    if last.is_phase_boundary() {
        return true;
    }
    snapshot_every != 0 && sequence.is_multiple_of(snapshot_every)
}
