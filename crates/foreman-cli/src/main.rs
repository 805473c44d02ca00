//! foreman - task orchestration CLI.

mod adapters;
mod settings;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use foreman_core::app::{OrchestratorBuilder, Termination};
use foreman_core::domain::TaskState;
use foreman_core::impls::{InMemoryTaskStore, Snapshot};
use foreman_core::manifest::Manifest;
use foreman_core::ports::{Clock, SystemClock, TaskStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::{CommandProducer, gate_checks};
use crate::settings::AppConfig;

/// Exit status when every remaining task is blocked.
const EXIT_STALLED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "foreman", version, about = "Runs a fixed manifest of tasks through producers and quality gates")]
struct Cli {
    /// Log filter (e.g. `debug`, `foreman_core=trace`). Falls back to RUST_LOG, then `info`.
    #[arg(long, global = true, env = "FOREMAN_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed the manifest and run until every task is complete or blocked
    Run {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        manifest: PathBuf,
    },

    /// Print the metrics aggregate of a snapshot as JSON
    Status {
        #[arg(long)]
        snapshot: PathBuf,
    },

    /// Print task records of a snapshot as JSON
    Tasks {
        #[arg(long)]
        snapshot: PathBuf,

        /// Only tasks in this state (e.g. `blocked`, `in-progress`)
        #[arg(long)]
        state: Option<TaskState>,
    },
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // stdout は JSON 出力専用
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Command::Run { config, manifest } => run(&config, &manifest).await,
        Command::Status { snapshot } => {
            let snapshot = read_snapshot(&snapshot).await?;
            print_json(&snapshot.aggregate())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Tasks { snapshot, state } => {
            let snapshot = read_snapshot(&snapshot).await?;
            let tasks: Vec<_> = snapshot
                .tasks
                .into_iter()
                .filter(|task| state.is_none_or(|s| task.state == s))
                .collect();
            print_json(&tasks)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config_path: &Path, manifest_path: &Path) -> anyhow::Result<ExitCode> {
    let config = AppConfig::load(config_path)?;
    let manifest = Manifest::load(manifest_path)
        .with_context(|| format!("failed to load manifest {}", manifest_path.display()))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn TaskStore> = match &config.core.store.snapshot_path {
        Some(path) => Arc::new(
            InMemoryTaskStore::open(path, clock.clone())
                .await
                .with_context(|| format!("failed to open snapshot {}", path.display()))?,
        ),
        None => Arc::new(InMemoryTaskStore::new(clock.clone())),
    };

    let orchestrator = OrchestratorBuilder::new(config.core.clone(), manifest)
        .store(store)
        .clock(clock)
        .producer(Arc::new(CommandProducer::new(&config.producer)))
        .checks(gate_checks(&config.checks))
        .build()
        .context("invalid orchestrator wiring")?;

    info!(
        tasks = orchestrator.manifest().len(),
        workers = config.core.total_workers(),
        "foreman starting"
    );
    let termination = orchestrator.run(shutdown_signal()).await?;
    print_json(&termination)?;

    Ok(match termination {
        Termination::AllComplete { .. } | Termination::Shutdown => ExitCode::SUCCESS,
        Termination::Stalled { .. } => ExitCode::from(EXIT_STALLED),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // handler が無いなら外部から止めてもらうしかない
        warn!(error = %e, "failed to listen for ctrl-c; running until termination");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn read_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    Snapshot::load(path)
        .await?
        .ok_or_else(|| anyhow!("no snapshot at {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
