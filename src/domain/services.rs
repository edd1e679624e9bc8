//! External services for the run aggregate.
//!
//! Services provide external dependencies (like time) to the aggregate
//! without coupling it to specific implementations. Timestamps are
//! captured at command-handling time only, never during `apply`, so
//! replay stays deterministic.

use crate::domain::types::TimestampUtc;

/// Services injected into the run aggregate for command handling.
#[derive(Debug, Clone, Default)]
pub struct RunServices {
    pub clock: RunClock,
}

/// Clock service for timestamp generation.
#[derive(Debug, Clone, Default)]
pub struct RunClock;

impl RunClock {
    /// Returns the current UTC timestamp.
    pub fn now(&self) -> TimestampUtc {
        TimestampUtc::now()
    }
}
