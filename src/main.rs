use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskgraph::config::Config;
use taskgraph::core::TaskStore;
use taskgraph::orchestration::{InMemoryCatalog, Orchestrator, Resource, SystemMetrics};
use taskgraph::plan::Plan;
use taskgraph::Result;

/// taskgraph - hierarchical task store and agent collaboration scheduler
#[derive(Parser, Debug)]
#[command(name = "taskgraph")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TASKGRAPH_DEBUG=1     Enable debug logging (alternative to --debug)\n    TASKGRAPH_LOG=LEVEL   Override the log level")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.taskgraph/taskgraph.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Configuration file (defaults to ~/.taskgraph/taskgraph.toml)
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the orchestrator against an in-memory resource catalog
    Run {
        /// Stop after this many ticks (runs until Ctrl-C otherwise)
        #[arg(long)]
        ticks: Option<u64>,

        /// Resource to register in the catalog (repeatable)
        #[arg(long = "resource", value_name = "PATH")]
        resources: Vec<String>,

        /// Print metrics as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Load a TOML task plan and drive it to completion
    Plan {
        /// Plan file
        file: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    taskgraph::log::init_with_debug(cli.debug);
    if taskgraph::log::is_debug() {
        if let Some(path) = taskgraph::log::log_path() {
            eprintln!("Debug log: {}", path.display());
        }
    }
    debug!(command = ?cli.command, "taskgraph starting");

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Run {
            ticks,
            resources,
            json,
        } => run_orchestrator(config, ticks, resources, json),
        Command::Plan { file } => run_plan(&config, &file),
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run_orchestrator(
    config: Config,
    ticks: Option<u64>,
    resources: Vec<String>,
    json: bool,
) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let catalog = Arc::new(InMemoryCatalog::new());
        for path in &resources {
            catalog.add_resource(Resource::new(path)).await;
        }
        let store = TaskStore::new(&config.store).into_shared();
        let orchestrator = Orchestrator::in_memory(&config, store.clone(), catalog)?;

        let shutdown = CancellationToken::new();
        let ctrl_c = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                ctrl_c.cancel();
            }
        });

        match ticks {
            None => {
                let handle = orchestrator.spawn();
                let mut events = orchestrator.subscribe();
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        event = events.recv() => match event {
                            Ok(taskgraph::OrchestratorEvent::TickCompleted(_)) => {
                                print_metrics(&orchestrator.system_metrics().await, json)?;
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Event receiver lagged");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
                handle.shutdown();
                handle.join().await;
            }
            Some(count) => {
                for tick in 0..count {
                    if let Err(e) = orchestrator.tick().await {
                        warn!(tick, error = %e, "Tick failed");
                    }
                    print_metrics(&orchestrator.system_metrics().await, json)?;
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(config.scheduler.tick_interval()) => {}
                    }
                }
                tokio::select! {
                    _ = orchestrator.drain() => {}
                    _ = shutdown.cancelled() => orchestrator.stop().await,
                }
            }
        }

        let stats = store.read().await.get_task_statistics();
        println!("{}", serde_json::to_string_pretty(&stats)?);
        Ok::<(), taskgraph::Error>(())
    })
}

fn print_metrics(metrics: &SystemMetrics, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(metrics)?);
    } else {
        println!(
            "active={} queued={} completed={} load={:.2} agents={}/{}",
            metrics.active,
            metrics.queued,
            metrics.completed,
            metrics.system_load,
            metrics.active_agent_count,
            metrics.agent_count
        );
    }
    Ok(())
}

fn run_plan(config: &Config, file: &Path) -> Result<()> {
    let plan = Plan::load(file)?;
    let mut store = TaskStore::new(&config.store);
    let report = plan.drive(&mut store)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
