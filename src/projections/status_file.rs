//! Status file projection.
//!
//! Renders each run's latest state into `<root>/runs/<run_id>/status.json`
//! for external tooling. The whole file is rewritten atomically on every
//! event, which makes re-delivery of the same event id a no-op.

use crate::domain::types::{CostTotals, RunStatus};
use crate::domain::view::RunEventEnvelope;
use crate::domain::RunView;
use crate::projections::ProjectionHandler;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Per-run status document written by the projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusDocument {
    pub run_id: String,
    pub status: RunStatus,
    pub objective: Option<String>,
    pub tasks_pending: usize,
    pub tasks_running: usize,
    pub tasks_complete: usize,
    pub tasks_failed: usize,
    pub cost: CostTotals,
    pub last_event_id: Uuid,
    pub last_event_sequence: u64,
}

/// Writes a compact status document per run.
pub struct StatusFileProjection {
    root: PathBuf,
    /// Views rebuilt per run from the delivered envelopes.
    views: Mutex<HashMap<String, RunView>>,
}

impl StatusFileProjection {
    /// Creates a projection rooted at the store's data directory.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            views: Mutex::new(HashMap::new()),
        }
    }

    fn status_path(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(run_id).join("status.json")
    }
}

#[async_trait]
impl ProjectionHandler for StatusFileProjection {
    fn name(&self) -> &str {
        "status-file"
    }

    async fn handle(&self, envelope: &RunEventEnvelope) -> anyhow::Result<()> {
        let document = {
            let mut views = self.views.lock().await;
            let view = views.entry(envelope.aggregate_id.clone()).or_default();
            view.apply_event(&envelope.aggregate_id, &envelope.event, envelope.sequence);

            let (pending, running, complete, failed) = view.graph().status_counts();
            RunStatusDocument {
                run_id: envelope.aggregate_id.clone(),
                status: view.status(),
                objective: view.objective().map(|o| o.as_str().to_string()),
                tasks_pending: pending,
                tasks_running: running,
                tasks_complete: complete,
                tasks_failed: failed,
                cost: *view.cost(),
                last_event_id: envelope.event_id,
                last_event_sequence: envelope.sequence,
            }
        };

        let path = self.status_path(&document.run_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(&document).context("encode status")?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("publish {}", path.display()))?;
        Ok(())
    }
}
