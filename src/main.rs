//! wp - a resumable, sequential shell task orchestrator.
//!
//! Usage:
//!   wp run <workflow>          Run or resume a workflow to completion
//!   wp serve <workflow>        Control a workflow over the HTTP API
//!   wp validate <workflow>     Validate a workflow definition
//!   wp status <status-file>    Summarize a persisted status file

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use waypoint::api::{self, ApiConfig, ApiState};
use waypoint::{Definition, FileStore, Outcome, Status, StatusStore, Workflow};

/// wp - a resumable, sequential shell task orchestrator
#[derive(Parser)]
#[command(name = "wp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow, resuming from its status file when one exists
    Run {
        /// Path to the workflow definition (YAML)
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,

        /// Status file (default: <WORKFLOW>.status.json)
        #[arg(short, long, env = "WAYPOINT_STATUS")]
        status: Option<PathBuf>,

        /// Serve the observer API on this address while running
        #[arg(short, long, env = "WAYPOINT_LISTEN")]
        listen: Option<SocketAddr>,
    },

    /// Serve the HTTP API and wait for start requests
    Serve {
        /// Path to the workflow definition (YAML)
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,

        /// Status file (default: <WORKFLOW>.status.json)
        #[arg(short, long, env = "WAYPOINT_STATUS")]
        status: Option<PathBuf>,

        /// Address to listen on
        #[arg(short, long, env = "WAYPOINT_LISTEN", default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },

    /// Validate a workflow definition without running it
    Validate {
        /// Path to the workflow definition (YAML)
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,
    },

    /// Print a summary of a persisted status file
    Status {
        /// Path to the status file
        #[arg(value_name = "STATUS_FILE")]
        status: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            workflow,
            status,
            listen,
        } => run_workflow(&workflow, status, listen).await?,
        Commands::Serve {
            workflow,
            status,
            listen,
        } => serve_workflow(&workflow, status, listen).await?,
        Commands::Validate { workflow } => {
            validate_workflow(&workflow)?;
            0
        }
        Commands::Status { status } => {
            show_status(&status).await?;
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn status_path(workflow: &Path, status: Option<PathBuf>) -> PathBuf {
    status.unwrap_or_else(|| workflow.with_extension("status.json"))
}

/// Run (or resume) a workflow to completion and return the exit code.
async fn run_workflow(
    path: &Path,
    status: Option<PathBuf>,
    listen: Option<SocketAddr>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let store = FileStore::new(status_path(path, status));
    if store.exists().await? {
        info!("Resuming from: {}", store.path().display());
    } else {
        info!("Loading workflow from: {}", path.display());
    }

    let workflow = Workflow::load(path, store).await?;
    info!("Commands run in: {}", workflow.base_dir().display());

    let server = match listen {
        Some(addr) => {
            let state = ApiState::new(workflow.clone());
            Some(api::start_server(ApiConfig::from(addr), state).await?)
        }
        None => None,
    };

    info!("Press Ctrl+C to abort");
    let run = workflow.start();
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, aborting...");
            workflow.abort();
            (&mut run).await
        }
    };

    if let Some(server) = server {
        server.abort();
    }

    match result {
        Ok(outcome) => {
            report_outcome(&outcome, &workflow.snapshot().await);
            Ok(outcome.exit_code())
        }
        Err(e) => {
            error!("Workflow failed: {}", e);
            Ok(1)
        }
    }
}

/// Serve the API until Ctrl+C or until a run exits on purpose.
async fn serve_workflow(
    path: &Path,
    status: Option<PathBuf>,
    listen: SocketAddr,
) -> Result<i32, Box<dyn std::error::Error>> {
    let store = FileStore::new(status_path(path, status));
    let workflow = Workflow::load(path, store).await?;

    let (tx, mut outcomes) = mpsc::unbounded_channel();
    let state = ApiState::new(workflow.clone()).with_outcomes(tx);
    let server = api::start_server(ApiConfig::from(listen), state).await?;

    info!("Waiting for start requests, press Ctrl+C to stop");

    let code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                workflow.abort();
                break 0;
            }
            outcome = outcomes.recv() => {
                let Some(outcome) = outcome else { break 0 };
                report_outcome(&outcome, &workflow.snapshot().await);
                if let Outcome::Exited { .. } = outcome {
                    break outcome.exit_code();
                }
            }
        }
    };

    server.abort();
    Ok(code)
}

fn report_outcome(outcome: &Outcome, status: &Status) {
    match outcome {
        Outcome::Finished => match &status.error {
            Some(e) => error!("Workflow finished with error: {}", e),
            None => info!("Workflow finished ({}%)", status.percent),
        },
        Outcome::Aborted => warn!("Workflow aborted at {}%", status.percent),
        Outcome::Exited { group, task } => {
            info!(
                "Task '{}/{}' requested exit, run again to continue ({}%)",
                group, task, status.percent
            );
        }
    }
}

/// Validate a workflow definition without running.
fn validate_workflow(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating workflow: {}", path.display());

    let definition = match Definition::from_file(path) {
        Ok(definition) => definition,
        Err(e) => {
            error!("Validation failed: {}", e);
            return Err(e.into());
        }
    };

    println!(
        "{}: {} group(s), {} task(s)",
        path.display(),
        definition.groups().len(),
        definition.task_count()
    );
    for name in definition.vars().keys() {
        println!("  var {}", name);
    }
    for group in definition.groups() {
        if group.skip_cmd.is_empty() {
            println!("  - {}", group.id);
        } else {
            println!("  - {} (skip if: {})", group.id, group.skip_cmd);
        }
        for task in &group.tasks {
            let exits = if task.exits { ", exits" } else { "" };
            println!("      - {} (weight {}{})", task.id, task.weight, exits);
        }
    }

    Ok(())
}

/// Print a summary of a persisted status file.
async fn show_status(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::new(path);
    let Some(status) = store.load().await? else {
        println!("No status at {}", path.display());
        return Ok(());
    };

    println!("Status: {}", path.display());
    println!("  Started: {}", status.started);
    println!("  Finished: {}", status.finished);
    println!("  Progress: {}%", status.percent);
    if let Some((group, task)) = status.current() {
        println!("  Current: {}/{} ({:.0}%)", group.id, task.id, task.percent * 100.0);
    }
    if !status.last_message.is_empty() {
        println!("  Last message: {}", status.last_message);
    }
    if let Some(e) = &status.error {
        println!("  Error: {}", e);
    }
    println!();

    for group in &status.groups {
        let state = if group.skip {
            "skipped".to_string()
        } else if group.finished {
            "done".to_string()
        } else {
            format!("{:.0}%", group.percent)
        };
        println!("  - {} [{}]", group.id, state);
        for task in &group.tasks {
            let mark = if task.finished {
                "x"
            } else if task.started {
                ">"
            } else {
                " "
            };
            println!("      [{}] {}", mark, task.id);
        }
    }

    Ok(())
}
