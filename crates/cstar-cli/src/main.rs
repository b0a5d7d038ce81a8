//! C-Star command-line interface.
//!
//! ## Commands
//!
//! - `blueprint check`: validate a blueprint, exit 2 when invalid
//! - `blueprint run`: run a single-simulation blueprint end to end
//! - `workplan check`: validate a workplan DAG, exit 2 when invalid
//! - `workplan run`: run a workplan under a run-ID, resumable
//! - `env show`: print the effective configuration
//!
//! Exit codes: 0 success, 1 runtime failure, 2 validation failure,
//! 3 configuration error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, Level};

use cstar_core::domain::error::{CstarError, Result};
use cstar_core::simulation::RunOptions;
use cstar_core::stager::Stager;
use cstar_core::system::SystemManager;
use cstar_core::Blueprint;
use cstar_orch::{Orchestrator, OrchestratorConfig, SimulationLauncher, Workplan};
use cstar_store::EnvironmentStore;

#[derive(Parser)]
#[command(name = "cstar")]
#[command(author = "C-Star developers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reproducible-simulation orchestrator for regional ocean biogeochemistry", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate or run a simulation blueprint
    Blueprint {
        #[command(subcommand)]
        action: BlueprintAction,
    },

    /// Validate or run a workplan
    Workplan {
        #[command(subcommand)]
        action: WorkplanAction,
    },

    /// Inspect the C-Star environment
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },
}

#[derive(Subcommand)]
enum BlueprintAction {
    /// Validate a blueprint (exit 0 valid, exit 2 invalid)
    Check {
        /// Blueprint path or URL
        path: String,
    },

    /// Run a single-simulation blueprint
    Run {
        /// Blueprint path or URL
        path: String,

        /// Working directory for the simulation (default: ./<name>)
        #[arg(short, long)]
        directory: Option<PathBuf>,

        /// Simulation start (default: blueprint valid range start)
        #[arg(long)]
        start_date: Option<String>,

        /// Simulation end (default: blueprint valid range end)
        #[arg(long)]
        end_date: Option<String>,

        /// Scheduler account
        #[arg(long)]
        account: Option<String>,

        /// Scheduler queue
        #[arg(long)]
        queue: Option<String>,

        /// Wall time, HH:MM:SS
        #[arg(long)]
        walltime: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkplanAction {
    /// Validate a workplan (exit 0 valid, exit 2 invalid)
    Check {
        path: PathBuf,
    },

    /// Run a workplan; idempotent per run-ID
    Run {
        path: PathBuf,

        /// Run identifier; resuming the same id continues the prior run
        #[arg(long, env = "CSTAR_RUNID")]
        run_id: String,

        /// Accept a changed workplan under an existing run-ID
        #[arg(long)]
        force: bool,
    },

    /// Cancel every non-terminal step of a run
    Cancel {
        path: PathBuf,

        #[arg(long, env = "CSTAR_RUNID")]
        run_id: String,
    },
}

#[derive(Subcommand)]
enum EnvAction {
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);
    if cli.json {
        builder.json().init();
    } else {
        builder.init();
    }

    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Blueprint { action } => match action {
            BlueprintAction::Check { path } => {
                let blueprint = Blueprint::from_location(&path).await?;
                println!(
                    "blueprint {} is valid ({} datasets, {} codebases)",
                    blueprint.name,
                    blueprint.dataset_entries().len(),
                    blueprint.codebases.len()
                );
                Ok(())
            }
            BlueprintAction::Run {
                path,
                directory,
                start_date,
                end_date,
                account,
                queue,
                walltime,
            } => {
                run_blueprint(
                    &path, directory, start_date, end_date, account, queue, walltime,
                )
                .await
            }
        },
        Commands::Workplan { action } => match action {
            WorkplanAction::Check { path } => {
                let plan = Workplan::from_path(&path)?;
                plan.validate()?;
                println!("workplan {} is valid ({} steps)", plan.name, plan.steps.len());
                Ok(())
            }
            WorkplanAction::Run { path, run_id, force } => {
                let plan = Workplan::from_path(&path)?;
                let system = SystemManager::detect();
                let orchestrator = Orchestrator::new(
                    SimulationLauncher::new(system),
                    OrchestratorConfig {
                        force,
                        ..OrchestratorConfig::default()
                    },
                );
                let outcome = orchestrator.run(&plan, &run_id).await?;
                for (step, status) in &outcome.statuses {
                    println!("{step}: {status}");
                }
                Ok(())
            }
            WorkplanAction::Cancel { path, run_id } => {
                let plan = Workplan::from_path(&path)?;
                let system = SystemManager::detect();
                let orchestrator = Orchestrator::new(
                    SimulationLauncher::new(system),
                    OrchestratorConfig::default(),
                );
                let cancelled = orchestrator.cancel(&plan, &run_id).await?;
                println!("cancelled {cancelled} steps");
                Ok(())
            }
        },
        Commands::Env { action } => match action {
            EnvAction::Show => show_env(),
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_blueprint(
    path: &str,
    directory: Option<PathBuf>,
    start_date: Option<String>,
    end_date: Option<String>,
    account: Option<String>,
    queue: Option<String>,
    walltime: Option<String>,
) -> Result<()> {
    let mut blueprint = Blueprint::from_location(path).await?;
    if let Some(start) = &start_date {
        blueprint.start_date = Some(cstar_core::SimDate::parse(start)?);
    }
    if let Some(end) = &end_date {
        blueprint.end_date = Some(cstar_core::SimDate::parse(end)?);
    }

    let directory = directory.unwrap_or_else(|| PathBuf::from(&blueprint.name));
    let mut simulation = blueprint.to_simulation(&directory)?;

    let system = SystemManager::detect();
    let stager = Stager::default();
    let mut env = EnvironmentStore::user()?;

    simulation.setup(&system, &stager, &mut env).await?;
    simulation.build(&system).await?;
    simulation.pre_run().await?;

    let opts = RunOptions {
        account_key: account,
        queue_name: queue,
        walltime,
        job_name: None,
    };
    let handler = simulation.run(&system, opts).await?;
    println!("submitted: {}", handler.id().unwrap_or_default());

    // Follow the job to completion, then join outputs.
    handler.updates(0).await?;
    let mut status = handler.status().await?;
    while !status.is_terminal() {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        status = handler.status().await?;
    }
    println!("finished: {status}");

    if status == cstar_core::JobStatus::Completed {
        simulation.post_run().await?;
        Ok(())
    } else {
        Err(CstarError::StepFailed {
            run_id: simulation.name.clone(),
            step: "run".to_string(),
        })
    }
}

fn show_env() -> Result<()> {
    let system = SystemManager::detect();
    println!("system: {}", system.name());
    println!(
        "scheduler: {}",
        match system.scheduler() {
            Some(cstar_core::SchedulerFlavor::Slurm) => "slurm",
            Some(cstar_core::SchedulerFlavor::Pbs) => "pbs",
            None => "none",
        }
    );
    println!("compiler: {}", system.compiler().as_str());
    println!("cstar_home: {}", cstar_store::cstar_home()?.display());
    println!("cstar_outdir: {}", cstar_store::cstar_outdir()?.display());

    let store = EnvironmentStore::user()?;
    println!("environment file: {}", store.path().display());
    for (key, value) in store.entries() {
        println!("  {key}={value}");
    }

    for var in [
        "CSTAR_SLURM_ACCOUNT",
        "CSTAR_SLURM_QUEUE",
        "CSTAR_SLURM_MAX_WALLTIME",
        "CSTAR_PBS_ACCOUNT",
        "CSTAR_PBS_QUEUE",
        "CSTAR_PBS_MAX_WALLTIME",
        "CSTAR_NPROCS_POST",
        "CSTAR_FRESH_CODEBASES",
        "CSTAR_CLOBBER_WORKING_DIR",
        "CSTAR_ORCH_TRX_FREQ",
        "CSTAR_RUNID",
    ] {
        if let Ok(value) = std::env::var(var) {
            println!("  {var}={value} (process)");
        }
    }
    Ok(())
}
