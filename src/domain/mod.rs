//! Domain model for event-sourced run state management.
//!
//! This module provides a strongly typed CQRS/ES domain model that
//! replaces direct state mutations with command-driven state changes
//! through an event log.
//!
//! # Architecture
//!
//! - **Commands** (`cqrs/commands.rs`): Intent to change state
//! - **Events** (`cqrs/events.rs`): Facts that have happened
//! - **Aggregate** (`cqrs/mod.rs`): Command validation and event application
//! - **View** (`view.rs`): Read-only projection for progress and resume
//!
//! # Usage
//!
//! ```ignore
//! use crate::domain::{RunCommand, RunEvent, RunAggregate};
//!
//! // Commands are dispatched through the actor or CQRS framework
//! let cmd = RunCommand::StartRun { objective: "...".into() };
//!
//! // Events are applied to rebuild state
//! for event in events {
//!     view.apply_event(aggregate_id, &event, sequence);
//! }
//! ```

pub mod actor;
pub mod analysis;
pub mod cqrs;
pub mod errors;
pub mod graph;
pub mod report;
pub mod services;
pub mod subscription;
pub mod supervisor;
pub mod types;
pub mod view;

// Re-export CQRS types
pub use cqrs::*;

// Re-export commonly used types for convenience
pub use actor::{
    bootstrap_view, create_actor_args, RunActor, RunActorArgs, RunMessage,
    EVENT_BROADCAST_CAPACITY,
};
pub use analysis::{Analysis, Contradiction, Gap};
pub use errors::RunError;
pub use graph::{GraphError, TaskGraph, TaskNode};
pub use report::{FinalReport, OutlineSection, ReportOutline, ReportSection};
pub use services::{RunClock, RunServices};
pub use subscription::EventSubscription;
pub use supervisor::{RunSupervisor, SupervisorMsg};
pub use types::{
    CostTotals, Objective, RunFailure, RunId, RunStatus, TaskCost, TaskId, TaskOutput, TaskStatus,
    TimestampUtc,
};
pub use view::{RunEventEnvelope, RunView};
