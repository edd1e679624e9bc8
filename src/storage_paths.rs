//! Centralized home-based storage paths for all research-agent
//! persistence.
//!
//! Unified layout under `~/.research-agent/`:
//! - `runs/<run_id>/` - per-run event log, snapshot, and status file
//! - `logs/` - structured diagnostics

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// The name of the research agent directory.
const RESEARCH_AGENT_DIR: &str = ".research-agent";

/// Returns the home-based data directory: `~/.research-agent/`
///
/// Creates the directory if it doesn't exist.
///
/// # Errors
///
/// Returns an error if:
/// - Home directory cannot be determined
/// - Directory creation fails
pub fn data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory for run storage")?;
    let dir = home.join(RESEARCH_AGENT_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the runs directory: `~/.research-agent/runs/`
///
/// Creates the directory if it doesn't exist.
pub fn runs_dir() -> Result<PathBuf> {
    let dir = data_dir()?.join("runs");
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create runs directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the logs directory: `~/.research-agent/logs/`
///
/// Creates the directory if it doesn't exist.
pub fn logs_dir() -> Result<PathBuf> {
    let dir = data_dir()?.join("logs");
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create logs directory: {}", dir.display()))?;
    Ok(dir)
}
