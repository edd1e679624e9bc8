//! Synthesis-phase data: the report outline, written sections, and the
//! final report.

use serde::{Deserialize, Serialize};

/// One planned section of the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub heading: String,
    /// Guidance for the writer (key points to cover).
    #[serde(default)]
    pub notes: String,
}

/// Ordered plan for the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReportOutline {
    pub sections: Vec<OutlineSection>,
}

impl ReportOutline {
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// One written section of the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    pub heading: String,
    pub body: String,
}

/// The assembled final report of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub title: String,
    pub sections: Vec<ReportSection>,
}
