//! File-based event store implementation.
//!
//! Each run owns a directory under `<root>/runs/<run_id>/` holding an
//! append-only `events.jsonl` log (one JSON object per line, in sequence
//! order) and a `snapshot.json`. Features:
//! - Optimistic concurrency via an expected-sequence check under an
//!   exclusive file lock
//! - Snapshots for faster aggregate loading
//! - Atomic snapshot writes via temp file + rename
//! - `sync_all` before returning, so no half-appended event is ever
//!   visible on reload

use crate::domain::errors::RunError;
use crate::domain::types::TimestampUtc;
use crate::domain::{RunAggregate, RunEvent};
use crate::event_store::{
    should_snapshot, RunAggregateContext, RunStore, StoredEvent, StoredSnapshot,
};
use async_trait::async_trait;
use cqrs_es::{Aggregate, AggregateError, DomainEvent, EventEnvelope, EventStore};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const EVENT_LOG_FILE: &str = "events.jsonl";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// File-based event store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct FileEventStore {
    /// Data directory; run streams live under `<root>/runs/`.
    pub root: PathBuf,
    /// Snapshot after every N events (0 = phase boundaries only).
    pub snapshot_every: u64,
}

impl FileEventStore {
    /// Creates a new file event store.
    pub fn new(root: PathBuf, snapshot_every: u64) -> Self {
        Self {
            root,
            snapshot_every,
        }
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn run_dir(&self, aggregate_id: &str) -> Result<PathBuf, RunError> {
        validate_run_id(aggregate_id)?;
        Ok(self.runs_dir().join(aggregate_id))
    }

    fn log_path(&self, aggregate_id: &str) -> Result<PathBuf, RunError> {
        Ok(self.run_dir(aggregate_id)?.join(EVENT_LOG_FILE))
    }

    fn snapshot_path(&self, aggregate_id: &str) -> Result<PathBuf, RunError> {
        Ok(self.run_dir(aggregate_id)?.join(SNAPSHOT_FILE))
    }

    /// Reads all stored events for a run, in sequence order.
    fn read_stored_events(&self, aggregate_id: &str) -> Result<Vec<StoredEvent>, RunError> {
        let path = self.log_path(aggregate_id)?;
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("open event log", &e)),
        };

        file.lock_shared()
            .map_err(|e| storage_error("lock event log", &e))?;

        read_events_from_file(&file, aggregate_id)
    }
}

#[async_trait]
impl EventStore<RunAggregate> for FileEventStore {
    type AC = RunAggregateContext;

    async fn load_events(
        &self,
        aggregate_id: &str,
    ) -> Result<Vec<EventEnvelope<RunAggregate>>, AggregateError<RunError>> {
        let stored = self
            .read_stored_events(aggregate_id)
            .map_err(AggregateError::UserError)?;

        let mut envelopes = Vec::with_capacity(stored.len());
        for record in stored {
            // Validate event type and version match the payload
            if record.event_type != record.event.event_type()
                || record.event_version != record.event.event_version()
            {
                return Err(AggregateError::UnexpectedError(Box::new(
                    std::io::Error::new(ErrorKind::InvalidData, "event version/type mismatch"),
                )));
            }
            envelopes.push(record.to_envelope());
        }

        Ok(envelopes)
    }

    async fn load_aggregate(
        &self,
        aggregate_id: &str,
    ) -> Result<Self::AC, AggregateError<RunError>> {
        let mut aggregate = RunAggregate::default();
        let mut current_sequence = 0u64;

        // Try to load from snapshot first
        let snapshot_path = self
            .snapshot_path(aggregate_id)
            .map_err(AggregateError::UserError)?;
        if let Some(snapshot) =
            read_snapshot_file(&snapshot_path).map_err(AggregateError::UserError)?
        {
            if snapshot.aggregate_id == aggregate_id {
                aggregate = snapshot.state;
                current_sequence = snapshot.sequence;
            }
        }

        // Apply events after the snapshot
        let events = self.load_events(aggregate_id).await?;
        for event in events {
            let seq = event.sequence as u64;
            if seq > current_sequence {
                current_sequence = seq;
                aggregate.apply(event.payload);
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

        let log_path = self
            .log_path(&aggregate_id)
            .map_err(AggregateError::UserError)?;
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AggregateError::UnexpectedError(Box::new(e)))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| AggregateError::UnexpectedError(Box::new(e)))?;

        // Acquire exclusive lock for writing
        file.lock_exclusive()
            .map_err(|e| AggregateError::UnexpectedError(Box::new(e)))?;

        // Check for concurrent writes (optimistic concurrency)
        let last_sequence = read_last_sequence(&file, &aggregate_id)?;
        if last_sequence != current_sequence {
            return Err(AggregateError::AggregateConflict);
        }

        let mut sequence = current_sequence;
        let mut envelopes: Vec<EventEnvelope<RunAggregate>> = Vec::new();

        for event in events {
            sequence += 1;

            let record = StoredEvent::new(&aggregate_id, sequence, event, metadata.clone());
            let line = serde_json::to_string(&record)
                .map_err(|e| AggregateError::UnexpectedError(Box::new(e)))?;

            writeln!(file, "{}", line).map_err(|e| AggregateError::UnexpectedError(Box::new(e)))?;

            envelopes.push(record.to_envelope());
        }

        // Ensure all data is persisted before anyone observes the events
        file.flush()
            .map_err(|e| AggregateError::UnexpectedError(Box::new(e)))?;
        file.sync_all()
            .map_err(|e| AggregateError::UnexpectedError(Box::new(e)))?;

        // Apply events to the aggregate for a potential snapshot
        let mut last_event = None;
        for envelope in &envelopes {
            let event: RunEvent = envelope.payload.clone();
            last_event = Some(event.clone());
            aggregate.apply(event);
        }

        if let Some(last) = last_event {
            if should_snapshot(sequence, self.snapshot_every, &last) {
                let snapshot = StoredSnapshot {
                    aggregate_id: aggregate_id.clone(),
                    sequence,
                    snapshot_at: TimestampUtc::now(),
                    state: aggregate,
                };
                let path = self
                    .snapshot_path(&aggregate_id)
                    .map_err(AggregateError::UserError)?;
                write_snapshot_file(&path, &snapshot).map_err(AggregateError::UserError)?;
            }
        }

        Ok(envelopes)
    }
}

#[async_trait]
impl RunStore for FileEventStore {
    async fn load_events_from(
        &self,
        aggregate_id: &str,
        from_sequence: u64,
    ) -> Result<Vec<StoredEvent>, RunError> {
        let mut events = self.read_stored_events(aggregate_id)?;
        events.retain(|e| e.sequence > from_sequence);
        Ok(events)
    }

    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Option<StoredSnapshot>, RunError> {
        read_snapshot_file(&self.snapshot_path(aggregate_id)?)
    }

    async fn save_snapshot(&self, snapshot: StoredSnapshot) -> Result<(), RunError> {
        let path = self.snapshot_path(&snapshot.aggregate_id)?;
        write_snapshot_file(&path, &snapshot)
    }

    async fn list_run_ids(&self) -> Result<Vec<String>, RunError> {
        let runs_dir = self.runs_dir();
        let entries = match std::fs::read_dir(&runs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("list runs", &e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| storage_error("list runs", &e))?;
            if entry.path().join(EVENT_LOG_FILE).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Rejects ids that cannot safely be used as a path component.
fn validate_run_id(aggregate_id: &str) -> Result<(), RunError> {
    let valid = !aggregate_id.is_empty()
        && aggregate_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RunError::StorageFailure {
            message: format!("invalid run id '{}'", aggregate_id),
        })
    }
}

fn storage_error(action: &str, err: &dyn std::fmt::Display) -> RunError {
    RunError::StorageFailure {
        message: format!("{}: {}", action, err),
    }
}

/// Reads every stored event for an aggregate from an open log file.
fn read_events_from_file(file: &File, aggregate_id: &str) -> Result<Vec<StoredEvent>, RunError> {
    let mut reader = BufReader::new(
        file.try_clone()
            .map_err(|e| storage_error("clone log handle", &e))?,
    );
    reader
        .seek(SeekFrom::Start(0))
        .map_err(|e| storage_error("seek event log", &e))?;

    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| storage_error("read event log", &e))?;
        if line.trim().is_empty() {
            continue;
        }
        let stored: StoredEvent =
            serde_json::from_str(&line).map_err(|e| storage_error("decode event", &e))?;
        if stored.aggregate_id == aggregate_id {
            events.push(stored);
        }
    }
    Ok(events)
}

/// Reads the last sequence number for an aggregate from the log file.
fn read_last_sequence(
    file: &File,
    aggregate_id: &str,
) -> Result<u64, AggregateError<RunError>> {
    let events = read_events_from_file(file, aggregate_id).map_err(AggregateError::UserError)?;
    Ok(events.last().map(|e| e.sequence).unwrap_or(0))
}

/// Loads a snapshot from disk.
fn read_snapshot_file(path: &Path) -> Result<Option<StoredSnapshot>, RunError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(storage_error("read snapshot", &e)),
    };

    let snapshot: StoredSnapshot =
        serde_json::from_str(&content).map_err(|e| storage_error("decode snapshot", &e))?;
    Ok(Some(snapshot))
}

/// Saves a snapshot to disk atomically (temp file + rename).
fn write_snapshot_file(path: &Path, snapshot: &StoredSnapshot) -> Result<(), RunError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| storage_error("create run dir", &e))?;
    }

    let content =
        serde_json::to_string(snapshot).map_err(|e| storage_error("encode snapshot", &e))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content).map_err(|e| storage_error("write snapshot", &e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| storage_error("publish snapshot", &e))?;

    Ok(())
}

#[cfg(test)]
#[path = "tests/file_store_tests.rs"]
mod tests;
