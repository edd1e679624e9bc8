//! Best-effort projection fan-out.
//!
//! Projection handlers build external read models (status files, search
//! indexes, dashboards) from the published event stream. Each handler
//! runs in its own spawned task fed by its own broadcast receiver, so a
//! slow, failing, or panicking handler can never block the run or touch
//! the durable append path. Handler errors are logged and dropped; the
//! underlying events are already durable and can be reprojected later.
//!
//! Handlers must be idempotent under re-delivery of the same
//! `event_id`, since best-effort delivery may redeliver after a crash.

pub mod status_file;

pub use status_file::StatusFileProjection;

use crate::domain::view::RunEventEnvelope;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// An external read-model writer fed from the event stream.
#[async_trait]
pub trait ProjectionHandler: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Handles one published event envelope.
    async fn handle(&self, envelope: &RunEventEnvelope) -> anyhow::Result<()>;
}

/// Spawns projection handler tasks off a broadcast sender.
pub struct ProjectionHost {
    event_tx: broadcast::Sender<RunEventEnvelope>,
}

impl ProjectionHost {
    /// Creates a host fanning out from the given broadcast sender.
    pub fn new(event_tx: broadcast::Sender<RunEventEnvelope>) -> Self {
        Self { event_tx }
    }

    /// Spawns one handler in its own task and returns its join handle.
    ///
    /// The task ends when the broadcast channel closes. Lag drops the
    /// oldest buffered envelopes for this handler only.
    pub fn spawn(&self, handler: Arc<dyn ProjectionHandler>) -> JoinHandle<()> {
        let mut rx = self.event_tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if let Err(e) = handler.handle(&envelope).await {
                            tracing::warn!(
                                projection = handler.name(),
                                event_id = %envelope.event_id,
                                "projection failed: {:#}",
                                e
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            projection = handler.name(),
                            "projection lagged, dropped {} envelopes",
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Objective, TimestampUtc};
    use crate::domain::RunEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Counting {
        seen: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ProjectionHandler for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _envelope: &RunEventEnvelope) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("intentional failure");
            }
            Ok(())
        }
    }

    fn envelope(sequence: u64) -> RunEventEnvelope {
        RunEventEnvelope {
            event_id: Uuid::new_v4(),
            aggregate_id: Uuid::new_v4().to_string(),
            sequence,
            event: RunEvent::RunStarted {
                objective: Objective::from("q"),
                started_at: TimestampUtc::now(),
            },
        }
    }

    #[tokio::test]
    async fn handler_failure_does_not_stop_the_feed() {
        let (tx, _rx) = broadcast::channel(16);
        let host = ProjectionHost::new(tx.clone());
        let handler = Arc::new(Counting {
            seen: AtomicUsize::new(0),
            fail: true,
        });
        let join = host.spawn(handler.clone());

        tx.send(envelope(1)).unwrap();
        tx.send(envelope(2)).unwrap();
        drop(host);
        drop(tx);
        drop(_rx);

        join.await.unwrap();
        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);
    }
}
