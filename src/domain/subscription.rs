//! Filtered event subscriptions over the broadcast feed.
//!
//! Secondary consumers (live progress displays, ad-hoc tooling) subscribe
//! to an in-memory feed with an optional event-kind filter. The feed is a
//! bounded broadcast channel: a subscriber that falls behind loses the
//! oldest buffered envelopes (drop-oldest), never the durable events.

use crate::domain::cqrs::RunEventKind;
use crate::domain::view::RunEventEnvelope;
use std::collections::HashSet;
use tokio::sync::broadcast;

/// A subscription to published run events, optionally filtered by kind.
pub struct EventSubscription {
    rx: broadcast::Receiver<RunEventEnvelope>,
    kinds: Option<HashSet<RunEventKind>>,
}

impl EventSubscription {
    /// Subscribes to every event kind.
    pub fn all(rx: broadcast::Receiver<RunEventEnvelope>) -> Self {
        Self { rx, kinds: None }
    }

    /// Subscribes to the given event kinds only.
    pub fn filtered(
        rx: broadcast::Receiver<RunEventEnvelope>,
        kinds: impl IntoIterator<Item = RunEventKind>,
    ) -> Self {
        Self {
            rx,
            kinds: Some(kinds.into_iter().collect()),
        }
    }

    /// Receives the next matching envelope.
    ///
    /// Returns `None` once the channel is closed. Lag is logged and
    /// skipped: the subscription continues with the oldest retained
    /// envelope.
    pub async fn recv(&mut self) -> Option<RunEventEnvelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    let matches = self
                        .kinds
                        .as_ref()
                        .map(|kinds| kinds.contains(&envelope.event.kind()))
                        .unwrap_or(true);
                    if matches {
                        return Some(envelope);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("event subscription lagged, dropped {} envelopes", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
