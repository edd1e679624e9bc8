//! Event-sourced core for resumable, multi-phase research runs.
//!
//! A run advances through planning, parallel task execution, analysis,
//! gap-filling, and synthesis. Every state transition is an immutable,
//! versioned event appended to a per-run stream with optimistic
//! concurrency control; in-memory state is rebuilt by replaying that
//! stream (optionally from a snapshot), so a killed or paused run can be
//! resumed from exactly where it left off without repeating completed
//! work.
//!
//! The content-producing logic (planning, search, synthesis) lives
//! behind the collaborator traits in [`orchestrator::collaborators`];
//! this crate owns state, persistence, scheduling, and the event bus.

pub mod config;
pub mod domain;
pub mod event_store;
pub mod orchestrator;
pub mod projections;
pub mod storage_paths;
pub mod structured_logger;

pub use config::EngineConfig;
pub use domain::{
    EventSubscription, RunAggregate, RunCommand, RunError, RunEvent, RunEventEnvelope,
    RunEventKind, RunStatus, RunView,
};
pub use event_store::{FileEventStore, MemoryEventStore, RunStore, StoredEvent, StoredSnapshot};
pub use orchestrator::{Collaborators, Engine, RunHandle};
pub use structured_logger::StructuredLogger;
