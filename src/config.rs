//! Engine configuration.
//!
//! All fields have defaults so a config file is optional; when present it
//! is YAML, loaded with `serde_yaml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the run engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Data directory; defaults to `~/.research-agent`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Bounded parallelism for task execution within one run.
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
    /// Snapshot after every N events (0 = phase boundaries only).
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    /// Fail the run on the first task failure instead of continuing
    /// with the tasks that can still make progress.
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_max_parallel_tasks() -> usize {
    4
}

fn default_snapshot_every() -> u64 {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_parallel_tasks: default_max_parallel_tasks(),
            snapshot_every: default_snapshot_every(),
            fail_fast: false,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Resolves the data directory, falling back to the home layout.
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create data dir: {}", dir.display()))?;
                Ok(dir.clone())
            }
            None => crate::storage_paths::data_dir(),
        }
    }
}
