//! The seam between the orchestrator and simulation execution.
//!
//! The orchestrator drives steps through a [`StepLauncher`] so tests can
//! substitute a lightweight fake. The production implementation,
//! [`SimulationLauncher`], materializes a Simulation from the step's
//! blueprint and walks its lifecycle to submission.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use cstar_core::domain::error::{CstarError, Result};
use cstar_core::execution::ExecutionHandler;
use cstar_core::simulation::{RunOptions, Simulation};
use cstar_core::stager::Stager;
use cstar_core::system::SystemManager;
use cstar_core::Blueprint;
use cstar_store::{EnvironmentStore, StepRecord};

use crate::workplan::Step;

/// Launches and re-attaches workplan steps.
#[async_trait]
pub trait StepLauncher: Send + Sync {
    /// Materialize and submit a step; the returned handler is already
    /// submitted.
    async fn launch(&self, step: &Step, step_dir: &Path) -> Result<ExecutionHandler>;

    /// Reconnect to a step submitted by an earlier session.
    async fn attach(
        &self,
        step: &Step,
        step_dir: &Path,
        record: &StepRecord,
    ) -> Result<ExecutionHandler>;
}

/// Production launcher: blueprint → Simulation → setup/build/pre_run/run.
pub struct SimulationLauncher {
    system: SystemManager,
    stager: Stager,
    /// Environment-store path override for tests; `None` means the per-user
    /// store.
    env_store_path: Option<PathBuf>,
}

impl SimulationLauncher {
    pub fn new(system: SystemManager) -> Self {
        SimulationLauncher {
            system,
            stager: Stager::default(),
            env_store_path: None,
        }
    }

    pub fn with_env_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_store_path = Some(path.into());
        self
    }

    fn open_env_store(&self) -> Result<EnvironmentStore> {
        Ok(match &self.env_store_path {
            Some(path) => EnvironmentStore::open(path)?,
            None => EnvironmentStore::user()?,
        })
    }

    fn run_options(step: &Step) -> RunOptions {
        let mut opts = RunOptions::default();
        if let Some(overrides) = &step.compute_overrides {
            let get = |key: &str| {
                overrides
                    .get(key)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            };
            opts.account_key = get("account_key");
            opts.queue_name = get("queue_name");
            opts.walltime = get("walltime");
            opts.job_name = get("job_name");
        }
        opts
    }
}

#[async_trait]
impl StepLauncher for SimulationLauncher {
    async fn launch(&self, step: &Step, step_dir: &Path) -> Result<ExecutionHandler> {
        let mut blueprint = Blueprint::from_location(&step.blueprint).await?;
        if let Some(overrides) = &step.blueprint_overrides {
            blueprint.apply_overrides(overrides)?;
        }

        let mut simulation = blueprint.to_simulation(step_dir)?;
        let mut env = self.open_env_store()?;

        simulation.setup(&self.system, &self.stager, &mut env).await?;
        simulation.build(&self.system).await?;
        simulation.pre_run().await?;
        // run() submits and persists the handler id into the step directory.
        simulation.run(&self.system, Self::run_options(step)).await?;

        info!(step = %step.name, dir = %step_dir.display(), "step submitted");
        simulation.take_handler().ok_or_else(|| CstarError::Scheduler {
            message: format!("step {} submitted but no handler was recorded", step.name),
            stderr: String::new(),
        })
    }

    async fn attach(
        &self,
        step: &Step,
        step_dir: &Path,
        record: &StepRecord,
    ) -> Result<ExecutionHandler> {
        let mut simulation = Simulation::restore(step_dir).await?;
        let handler = simulation.take_handler().ok_or_else(|| {
            CstarError::Validation(format!(
                "step {} has handler id {:?} recorded but no handler in its state file",
                step.name, record.handler_id
            ))
        })?;
        Ok(handler)
    }
}
