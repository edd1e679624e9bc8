//! Structured JSONL logger for debugging and diagnostics.
//!
//! This module provides machine-parseable logging with:
//! - Monotonic sequence numbers for ordering
//! - ISO 8601 timestamps with microsecond precision
//! - An engine instance id for correlation
//! - Structured event data in JSON format
//!
//! This is a diagnostics trail only; the authoritative history of a run
//! is its event stream in the store.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::domain::RunCommand;
use crate::domain::RunEvent;

/// Structured JSONL logger for engine diagnostics.
pub struct StructuredLogger {
    engine_id: String,
    seq: AtomicU64,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

/// A single log entry in JSONL format.
#[derive(Serialize, serde::Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number (unique across the engine instance)
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds
    pub ts: String,
    /// Engine instance ID
    pub engine_id: String,
    /// Component that emitted the log
    pub component: String,
    /// Structured event data
    pub event: Value,
}

impl StructuredLogger {
    /// Creates a new structured logger for one engine instance.
    ///
    /// Logs are written to `<logs_dir>/engine.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The logs directory cannot be created
    /// - The log file cannot be opened
    pub fn new(engine_id: &str, logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let log_path = logs_dir.join("engine.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            engine_id: engine_id.to_string(),
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
            log_path,
        })
    }

    /// Returns the next sequence number.
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Logs a structured event.
    ///
    /// The event is serialized to JSON and written as a single line.
    /// This method is thread-safe.
    pub fn log(&self, component: &str, event: impl Serialize) {
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            engine_id: self.engine_id.clone(),
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Logs a domain run command.
    pub fn log_run_command(&self, run_id: &str, command: &RunCommand) {
        self.log(
            "Run",
            serde_json::json!({
                "type": "RunCommand",
                "run_id": run_id,
                "command": command
            }),
        );
    }

    /// Logs a domain run event.
    pub fn log_run_event(&self, run_id: &str, event: &RunEvent) {
        self.log(
            "Run",
            serde_json::json!({
                "type": "RunEvent",
                "run_id": run_id,
                "event": event
            }),
        );
    }

    /// Logs a run being started.
    pub fn log_run_started(&self, run_id: &str, objective: &str) {
        self.log(
            "Engine",
            serde_json::json!({
                "type": "RunStarted",
                "run_id": run_id,
                "objective": objective
            }),
        );
    }

    /// Logs a run being resumed.
    pub fn log_run_resumed(&self, run_id: &str, status: &str) {
        self.log(
            "Engine",
            serde_json::json!({
                "type": "RunResumed",
                "run_id": run_id,
                "status": status
            }),
        );
    }

    /// Logs a phase transition.
    pub fn log_phase_transition(&self, run_id: &str, to: &str) {
        self.log(
            "Engine",
            serde_json::json!({
                "type": "PhaseTransition",
                "run_id": run_id,
                "to": to
            }),
        );
    }

    /// Logs a task dispatch.
    pub fn log_task_dispatch(&self, run_id: &str, task_id: &str) {
        self.log(
            "Scheduler",
            serde_json::json!({
                "type": "TaskDispatched",
                "run_id": run_id,
                "task_id": task_id
            }),
        );
    }

    /// Logs a task reaching a terminal state.
    pub fn log_task_finished(&self, run_id: &str, task_id: &str, success: bool) {
        self.log(
            "Scheduler",
            serde_json::json!({
                "type": "TaskFinished",
                "run_id": run_id,
                "task_id": task_id,
                "success": success
            }),
        );
    }

    /// Logs a projection handler failure (logged and dropped).
    pub fn log_projection_failure(&self, projection: &str, error: &str) {
        self.log(
            "Projection",
            serde_json::json!({
                "type": "ProjectionFailed",
                "projection": projection,
                "error": error
            }),
        );
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }

    /// Returns the engine instance ID.
    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Objective;

    #[test]
    fn writes_jsonl_entries_with_monotonic_sequence() {
        let dir = tempfile::tempdir().expect("temp dir");
        let logger = StructuredLogger::new("engine-1", dir.path()).expect("logger");

        logger.log_run_started("run-1", "objective");
        logger.log_phase_transition("run-1", "Planning");
        logger.log_run_command(
            "run-1",
            &RunCommand::StartRun {
                objective: Objective::from("objective"),
            },
        );

        let content = std::fs::read_to_string(logger.path()).expect("read log");
        let entries: Vec<LogEntry> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("parse entry"))
            .collect();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[2].seq, 3);
        assert!(entries.iter().all(|e| e.engine_id == "engine-1"));
    }
}
