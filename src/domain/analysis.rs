//! Analysis-phase data: validation findings, contradictions, and gaps.

use crate::domain::types::TaskId;
use serde::{Deserialize, Serialize};

/// A contradiction found between the outputs of two or more tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contradiction {
    /// Tasks whose outputs disagree.
    pub task_ids: Vec<TaskId>,
    pub description: String,
}

/// A gap in coverage identified during analysis. Gaps become additional
/// tasks in the gap-filling phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// Stable identifier, reused as the gap task id prefix.
    pub id: String,
    pub description: String,
}

/// Outcome of validating the execution phase's collected outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Analysis {
    /// Overall validation summary.
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    #[serde(default)]
    pub gaps: Vec<Gap>,
}

impl Analysis {
    /// Returns true when analysis found nothing left to fill.
    pub fn has_gaps(&self) -> bool {
        !self.gaps.is_empty()
    }
}
