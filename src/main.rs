//! Ops CLI over the durable run store.
//!
//! Every terminal state is inspectable purely by replaying the event
//! stream, so these commands need nothing but the data directory.
//! Driving new runs requires embedding the library with real
//! collaborators; this binary intentionally stays on the read/ops side,
//! plus cancellation.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use cqrs_es::{Aggregate, AggregateError, CqrsFramework, EventStore};
use research_agent::domain::services::RunServices;
use research_agent::domain::RunCommand;
use research_agent::{EngineConfig, FileEventStore, RunAggregate, RunError, RunStore};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "research")]
#[command(about = "Inspect and manage event-sourced research runs")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to ~/.research-agent)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Optional engine config file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List run ids known to the store
    List,
    /// Show a run's reconstructed state
    Show { run_id: String },
    /// Print a run's stored events
    Log {
        run_id: String,
        /// Only events with a sequence greater than this
        #[arg(long, default_value_t = 0)]
        from: u64,
    },
    /// Cancel a run (valid in any non-terminal status)
    Cancel {
        run_id: String,
        #[arg(long, default_value = "cancelled from CLI")]
        reason: String,
    },
    /// Check that snapshot-based loading matches a full replay
    Verify { run_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir.clone();
    }
    let data_dir = config.resolved_data_dir()?;
    let store = FileEventStore::new(data_dir, config.snapshot_every);

    match cli.command {
        Command::List => list_runs(&store).await,
        Command::Show { run_id } => show_run(&store, &run_id).await,
        Command::Log { run_id, from } => print_log(&store, &run_id, from).await,
        Command::Cancel { run_id, reason } => cancel_run(store, &run_id, reason).await,
        Command::Verify { run_id } => verify_run(&store, &run_id).await,
    }
}

async fn list_runs(store: &FileEventStore) -> Result<()> {
    let ids = store.list_run_ids().await?;
    if ids.is_empty() {
        println!("no runs recorded");
        return Ok(());
    }
    for id in ids {
        let view = research_agent::domain::bootstrap_view(store, &id).await?;
        println!("{}  {}", id, view.status());
    }
    Ok(())
}

async fn show_run(store: &FileEventStore, run_id: &str) -> Result<()> {
    let events = store.load_events_from(run_id, 0).await?;
    if events.is_empty() {
        bail!("no events recorded for run '{}'", run_id);
    }
    let view = research_agent::domain::bootstrap_view(store, run_id).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn print_log(store: &FileEventStore, run_id: &str, from: u64) -> Result<()> {
    let events = store.load_events_from(run_id, from).await?;
    if events.is_empty() {
        bail!("no events recorded for run '{}' after version {}", run_id, from);
    }
    for stored in events {
        println!(
            "v{:<5} {}  {}  {}",
            stored.sequence,
            stored.recorded_at.to_rfc3339(),
            stored.event_type,
            serde_json::to_string(&stored.event)?
        );
    }
    Ok(())
}

async fn cancel_run(store: FileEventStore, run_id: &str, reason: String) -> Result<()> {
    let cqrs = CqrsFramework::new(store, Vec::new(), RunServices::default());
    let result = cqrs
        .execute(run_id, RunCommand::CancelRun { reason })
        .await;

    match result {
        Ok(()) => {
            println!("run '{}' cancelled", run_id);
            Ok(())
        }
        Err(AggregateError::UserError(RunError::NotInitialized)) => {
            bail!("no events recorded for run '{}'", run_id)
        }
        Err(AggregateError::UserError(err)) => bail!("cannot cancel: {}", err),
        Err(AggregateError::AggregateConflict) => {
            bail!("run '{}' was modified concurrently, retry", run_id)
        }
        Err(err) => bail!("cancel run failed: {}", err),
    }
}

async fn verify_run(store: &FileEventStore, run_id: &str) -> Result<()> {
    let events = store.load_events(run_id).await.map_err(flatten_store_err)?;
    if events.is_empty() {
        bail!("no events recorded for run '{}'", run_id);
    }

    // Full replay from version 0
    let mut replayed = RunAggregate::default();
    let total = events.len();
    for envelope in events {
        replayed.apply(envelope.payload);
    }

    // Snapshot-based load (falls back to full replay without a snapshot)
    let context = store
        .load_aggregate(run_id)
        .await
        .map_err(flatten_store_err)?;

    let replayed_json = serde_json::to_value(&replayed)?;
    let loaded_json = serde_json::to_value(&context.aggregate)?;
    let snapshot = store.load_snapshot(run_id).await?;

    if replayed_json == loaded_json {
        match snapshot {
            Some(s) => println!(
                "ok: {} events; snapshot at v{} matches full replay",
                total, s.sequence
            ),
            None => println!("ok: {} events; no snapshot present, full replay used", total),
        }
        Ok(())
    } else {
        bail!(
            "state mismatch for run '{}': snapshot-based load differs from full replay",
            run_id
        )
    }
}

fn flatten_store_err(err: AggregateError<RunError>) -> anyhow::Error {
    anyhow::anyhow!("{}", err)
}
