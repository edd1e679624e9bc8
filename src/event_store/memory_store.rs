//! In-memory event store implementation.
//!
//! Satisfies the same contract as the file adapter, including the
//! optimistic-concurrency check (performed under the map lock, so exactly
//! one of two racing commits with the same expected sequence succeeds).
//! Used in tests and for ephemeral embedding.

use crate::domain::errors::RunError;
use crate::domain::types::TimestampUtc;
use crate::domain::{RunAggregate, RunEvent};
use crate::event_store::{
    should_snapshot, RunAggregateContext, RunStore, StoredEvent, StoredSnapshot,
};
use async_trait::async_trait;
use cqrs_es::{Aggregate, AggregateError, EventEnvelope, EventStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct StreamState {
    events: Vec<StoredEvent>,
    snapshot: Option<StoredSnapshot>,
}

/// Thread-safe in-memory event store.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    streams: Arc<Mutex<HashMap<String, StreamState>>>,
    snapshot_every: u64,
}

impl MemoryEventStore {
    /// Creates a new in-memory store.
    pub fn new(snapshot_every: u64) -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            snapshot_every,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, StreamState>>, RunError> {
        self.streams.lock().map_err(|e| RunError::StorageFailure {
            message: format!("store lock poisoned: {}", e),
        })
    }
}

#[async_trait]
impl EventStore<RunAggregate> for MemoryEventStore {
    type AC = RunAggregateContext;

    async fn load_events(
        &self,
        aggregate_id: &str,
    ) -> Result<Vec<EventEnvelope<RunAggregate>>, AggregateError<RunError>> {
        let streams = self.lock().map_err(AggregateError::UserError)?;
        Ok(streams
            .get(aggregate_id)
            .map(|s| s.events.iter().map(StoredEvent::to_envelope).collect())
            .unwrap_or_default())
    }

    async fn load_aggregate(
        &self,
        aggregate_id: &str,
    ) -> Result<Self::AC, AggregateError<RunError>> {
        let streams = self.lock().map_err(AggregateError::UserError)?;

        let mut aggregate = RunAggregate::default();
        let mut current_sequence = 0u64;

        if let Some(stream) = streams.get(aggregate_id) {
            if let Some(snapshot) = &stream.snapshot {
                aggregate = snapshot.state.clone();
                current_sequence = snapshot.sequence;
            }
            for stored in &stream.events {
                if stored.sequence > current_sequence {
                    current_sequence = stored.sequence;
                    aggregate.apply(stored.event.clone());
                }
            }
        }

        Ok(RunAggregateContext {
            aggregate_id: aggregate_id.to_string(),
            aggregate,
            current_sequence,
        })
    }

    async fn commit(
        &self,
        events: Vec<RunEvent>,
        context: Self::AC,
        metadata: HashMap<String, String>,
    ) -> Result<Vec<EventEnvelope<RunAggregate>>, AggregateError<RunError>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let RunAggregateContext {
            aggregate_id,
            mut aggregate,
            current_sequence,
        } = context;

        let mut streams = self.lock().map_err(AggregateError::UserError)?;
        let stream = streams.entry(aggregate_id.clone()).or_default();

        // Optimistic concurrency: the expected sequence must still match
        let last_sequence = stream.events.last().map(|e| e.sequence).unwrap_or(0);
        if last_sequence != current_sequence {
            return Err(AggregateError::AggregateConflict);
        }

        let mut sequence = current_sequence;
        let mut envelopes = Vec::new();
        let mut last_event = None;

        for event in events {
            sequence += 1;
            let record = StoredEvent::new(&aggregate_id, sequence, event, metadata.clone());
            envelopes.push(record.to_envelope());
            last_event = Some(record.event.clone());
            aggregate.apply(record.event.clone());
            stream.events.push(record);
        }

        if let Some(last) = last_event {
            if should_snapshot(sequence, self.snapshot_every, &last) {
                stream.snapshot = Some(StoredSnapshot {
                    aggregate_id,
                    sequence,
                    snapshot_at: TimestampUtc::now(),
                    state: aggregate,
                });
            }
        }

        Ok(envelopes)
    }
}

#[async_trait]
impl RunStore for MemoryEventStore {
    async fn load_events_from(
        &self,
        aggregate_id: &str,
        from_sequence: u64,
    ) -> Result<Vec<StoredEvent>, RunError> {
        let streams = self.lock()?;
        Ok(streams
            .get(aggregate_id)
            .map(|s| {
                s.events
                    .iter()
                    .filter(|e| e.sequence > from_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Option<StoredSnapshot>, RunError> {
        let streams = self.lock()?;
        Ok(streams.get(aggregate_id).and_then(|s| s.snapshot.clone()))
    }

    async fn save_snapshot(&self, snapshot: StoredSnapshot) -> Result<(), RunError> {
        let mut streams = self.lock()?;
        let aggregate_id = snapshot.aggregate_id.clone();
        streams
            .entry(aggregate_id)
            .or_default()
            .snapshot = Some(snapshot);
        Ok(())
    }

    async fn list_run_ids(&self) -> Result<Vec<String>, RunError> {
        let streams = self.lock()?;
        let mut ids: Vec<String> = streams.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
#[path = "tests/memory_store_tests.rs"]
mod tests;
