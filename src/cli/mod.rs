//! Command-line interface for coursegen.
//!
//! Provides commands for dispatching generation events, checking run
//! status, listing runs, resuming interrupted runs and purging the
//! checkpoints of finished runs.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::HttpGenerationClient;
use crate::config;
use crate::core::{
    CheckpointStore, DispatchError, Dispatcher, InboundEvent, JsonlCheckpointStore, Orchestrator,
    RunHandle, StepExecutor,
};
use crate::domain::RunState;
use crate::storage::SqliteStore;
use crate::workflows::{Services, WorkflowReport};

/// coursegen - Checkpointed course content generation
#[derive(Parser, Debug)]
#[command(name = "coursegen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispatch events from a JSON or JSONL file
    Dispatch {
        /// Event file (reads from stdin if not provided)
        file: Option<PathBuf>,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Re-dispatch events, resuming their runs from checkpoints
    Resume {
        /// Event file (reads from stdin if not provided)
        file: Option<PathBuf>,
    },

    /// Purge checkpoints of finished runs
    Gc,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Dispatch { file } => dispatch_events(file.as_deref(), false).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Resume { file } => dispatch_events(file.as_deref(), true).await,
            Commands::Gc => purge_finished().await,
            Commands::Config => show_config().await,
        }
    }
}

/// Wire the configured stores and generation client together
async fn build_orchestrator() -> Result<Orchestrator> {
    let cfg = config::config()?;

    std::fs::create_dir_all(&cfg.home)
        .with_context(|| format!("Failed to create {}", cfg.home.display()))?;

    let checkpoints = JsonlCheckpointStore::open(cfg.runs_dir()).await?;
    let store = Arc::new(
        SqliteStore::open(&cfg.database)
            .with_context(|| format!("Failed to open database: {}", cfg.database.display()))?,
    );
    let generator = HttpGenerationClient::new(cfg.generation.http_config())?;

    if cfg.generation.api_key.is_none() {
        tracing::warn!(
            variable = %cfg.generation.api_key_env,
            "No API key set; requests are sent unauthenticated"
        );
    }

    let services = Services {
        generator: Arc::new(generator),
        store: store.clone(),
        users: store,
    };
    let executor = StepExecutor::new(Arc::new(checkpoints), cfg.retry.clone());

    Ok(Orchestrator::new(services, executor))
}

/// Read events from a file or stdin
fn read_events(file: Option<&Path>) -> Result<Vec<InboundEvent>> {
    let input = if let Some(path) = file {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file: {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No events provided. Pass a file or pipe events to stdin");
    };

    parse_events(&input)
}

/// Accepts a single event, a JSON array of events, or JSONL
fn parse_events(input: &str) -> Result<Vec<InboundEvent>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        anyhow::bail!("Input is empty");
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return match value {
            serde_json::Value::Array(_) => {
                serde_json::from_value(value).context("Failed to parse event array")
            }
            _ => Ok(vec![serde_json::from_value(value).context("Failed to parse event")?]),
        };
    }

    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("Failed to parse event on line {}", idx + 1))
        })
        .collect()
}

/// Dispatch every event, then wait for all runs
async fn dispatch_events(file: Option<&Path>, resume: bool) -> Result<()> {
    let events = read_events(file)?;
    let cfg = config::config()?;
    let orchestrator = Arc::new(build_orchestrator().await?);
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&orchestrator), cfg.max_concurrent_runs));

    // Ctrl-C lets running workflows finish but starts nothing new
    let interrupt = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n[Interrupted: waiting for running workflows, queued events will not start]");
                dispatcher.close();
            }
        })
    };

    let mut handles: Vec<RunHandle> = Vec::new();
    let mut failures = 0usize;

    for event in events {
        if resume {
            if let Ok(request) = event.parse() {
                let run_id = event.run_id(&request);
                match orchestrator.get_run_status(run_id).await {
                    Ok(run) => eprintln!(
                        "[Resuming run {} with {} completed steps]",
                        run_id,
                        run.completed_steps()
                    ),
                    Err(_) => eprintln!("[No checkpoints for run {}, starting fresh]", run_id),
                }
            }
        }

        match dispatcher.dispatch(event) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                eprintln!("[Event rejected: {}]", e);
                failures += 1;
            }
        }
    }

    for handle in handles {
        let run_id = handle.run_id();
        let workflow = handle.workflow();

        match handle.join().await {
            Ok(report) => println!("{}  {:<24} {}", run_id, workflow, describe_report(&report)),
            Err(e) => {
                failures += 1;
                report_failure(run_id, workflow, &e);
            }
        }
    }

    interrupt.abort();

    eprintln!(
        "\n[Peak concurrent runs: {} of {}]",
        dispatcher.peak_in_flight(),
        dispatcher.max_concurrent()
    );

    if failures > 0 {
        eprintln!("[{} event(s) failed]", failures);
        std::process::exit(1);
    }

    Ok(())
}

fn describe_report(report: &WorkflowReport) -> String {
    match report {
        WorkflowReport::Chapters(r) => {
            let mut line = format!(
                "course {} ready: {}/{} notes, {} tests",
                r.course_id, r.notes_written, r.chapters, r.tests_written
            );
            for skipped in &r.skipped_tests {
                line.push_str(&format!("\n    chapter {} test skipped: {}", skipped.chapter_id, skipped.reason));
            }
            line
        }
        WorkflowReport::SingleShot(r) => {
            format!("{} {} ready: {} items", r.kind.as_str(), r.record_id, r.items)
        }
    }
}

fn report_failure(run_id: Uuid, workflow: &str, error: &DispatchError) {
    match error {
        DispatchError::Closed => eprintln!("{}  {:<24} NOT STARTED (use `resume` to run it)", run_id, workflow),
        _ => eprintln!("{}  {:<24} FAILED: {}", run_id, workflow, error),
    }
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let checkpoints = JsonlCheckpointStore::open_default().await?;
    let events = checkpoints.replay(run_id).await?;
    let run = crate::domain::Run::from_events(&events)
        .with_context(|| format!("Run {} not found", run_id))?;

    println!("Run ID: {}", run.id);
    println!("Workflow: {}", run.workflow);
    println!("State: {:?}", run.state);
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    println!("Attempts: {}", run.attempts);
    println!("\nStep statuses:");
    for (step, status) in &run.step_statuses {
        println!("  {}: {:?}", step, status);
    }

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let orchestrator = build_orchestrator().await?;
    let runs = orchestrator.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<24} {:<10} {:>6}", "RUN ID", "WORKFLOW", "STATE", "STEPS");
    println!("{}", "-".repeat(81));

    for run in runs {
        let state_str = match &run.state {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed { .. } => "failed",
        };
        println!(
            "{:<38} {:<24} {:<10} {:>6}",
            run.id,
            run.workflow,
            state_str,
            run.completed_steps()
        );
    }

    Ok(())
}

/// Purge checkpoints of finished runs
async fn purge_finished() -> Result<()> {
    let orchestrator = build_orchestrator().await?;
    let purged = orchestrator.purge_finished().await?;
    println!("Purged {} finished run(s)", purged);
    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("coursegen configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Runs:     {}", cfg.runs_dir().display());
    println!("  Database: {}", cfg.database.display());
    println!();
    println!("Dispatch:");
    println!("  Max concurrent runs: {}", cfg.max_concurrent_runs);
    println!();
    println!("Retry:");
    println!("  Max attempts: {}", cfg.retry.max_attempts);
    println!("  Base delay:   {}ms", cfg.retry.base_delay_ms);
    println!();
    println!("Generation:");
    println!("  Base URL: {}", cfg.generation.base_url);
    println!("  Model:    {}", cfg.generation.model);
    println!("  Timeout:  {}s", cfg.generation.timeout_seconds);
    println!(
        "  API key:  {} ({})",
        cfg.generation.api_key_env,
        if cfg.generation.api_key.is_some() { "set" } else { "not set" }
    );

    Ok(())
}
