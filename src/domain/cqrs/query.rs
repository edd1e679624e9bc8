//! CQRS query handler for run event projection.
//!
//! The `RunQuery` is the in-process half of the event bus. It runs after
//! the store has durably committed the events, applies them to the shared
//! `RunView` projection, pushes a view snapshot on a watch channel, and
//! fans the envelopes out on a bounded broadcast channel. Broadcast
//! subscribers that fall behind are lagged: the oldest buffered envelopes
//! are dropped for that subscriber only, the producer never blocks, and
//! the durable log is unaffected.

use crate::domain::cqrs::RunAggregate;
use crate::domain::view::{RunEventEnvelope, RunView};
use async_trait::async_trait;
use cqrs_es::Query;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};

/// CQRS query handler that maintains the `RunView` projection.
pub struct RunQuery {
    /// In-memory projection of the run state.
    pub projection: Arc<RwLock<RunView>>,
    /// Watch channel for snapshot updates (latest view).
    pub snapshot_tx: watch::Sender<RunView>,
    /// Broadcast channel for event streaming.
    pub event_tx: broadcast::Sender<RunEventEnvelope>,
}

impl RunQuery {
    /// Creates a new run query handler.
    pub fn new(
        projection: Arc<RwLock<RunView>>,
        snapshot_tx: watch::Sender<RunView>,
        event_tx: broadcast::Sender<RunEventEnvelope>,
    ) -> Self {
        Self {
            projection,
            snapshot_tx,
            event_tx,
        }
    }
}

#[async_trait]
impl Query<RunAggregate> for RunQuery {
    async fn dispatch(&self, aggregate_id: &str, events: &[cqrs_es::EventEnvelope<RunAggregate>]) {
        let mut view = self.projection.write().await;

        for event in events {
            // Apply event to projection
            view.apply_event(aggregate_id, &event.payload, event.sequence as u64);

            // Broadcast to subscribers; a send error only means there are
            // no receivers right now
            let envelope = RunEventEnvelope::from(event);
            if let Err(e) = self.event_tx.send(envelope) {
                tracing::debug!("no event subscribers: {:?}", e);
            }
        }

        // Send updated view snapshot
        let _ = self.snapshot_tx.send(view.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cqrs::RunEvent;
    use crate::domain::types::{Objective, TimestampUtc};
    use crate::domain::RunStatus;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[tokio::test]
    async fn dispatch_applies_event_and_broadcasts() {
        let view = Arc::new(RwLock::new(RunView::default()));
        let (snapshot_tx, mut snapshot_rx) = watch::channel(RunView::default());
        let (event_tx, mut event_rx) = broadcast::channel(16);

        let query = RunQuery::new(view.clone(), snapshot_tx, event_tx);
        let aggregate_id = Uuid::new_v4().to_string();

        let event = RunEvent::RunStarted {
            objective: Objective::from("test objective"),
            started_at: TimestampUtc::now(),
        };

        let event_id = Uuid::new_v4();
        let mut metadata = HashMap::new();
        metadata.insert(
            RunEventEnvelope::EVENT_ID_METADATA_KEY.to_string(),
            event_id.to_string(),
        );
        let envelope = cqrs_es::EventEnvelope {
            aggregate_id: aggregate_id.clone(),
            sequence: 1,
            payload: event,
            metadata,
        };

        query.dispatch(&aggregate_id, &[envelope]).await;

        // View was updated
        let updated = view.read().await;
        assert_eq!(updated.status(), RunStatus::Planning);
        assert_eq!(updated.last_event_sequence(), 1);

        // Snapshot was sent
        snapshot_rx.changed().await.unwrap();
        assert_eq!(snapshot_rx.borrow().status(), RunStatus::Planning);

        // Event was broadcast with its stored id
        let received = event_rx.try_recv().unwrap();
        assert_eq!(received.aggregate_id, aggregate_id);
        assert_eq!(received.sequence, 1);
        assert_eq!(received.event_id, event_id);
    }
}
