//! The Simulation aggregate and its lifecycle.
//!
//! A [`Simulation`] ties every resolved resource together into one runnable
//! unit and walks the phase machine
//! `Constructed → SetupOk → Built → Ready → Running → Finished`.
//! `persist`/`restore` carry the whole state (including the live handler's
//! identity) across interpreter sessions; an earlier phase is reachable from
//! a later one only by restoring.

pub mod post_run;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use cstar_store::EnvironmentStore;

use crate::code::AdditionalCode;
use crate::codebase::ExternalCodeBase;
use crate::dataset::{DatasetRole, InputDataset};
use crate::domain::error::{CstarError, Result};
use crate::domain::{DateRange, Discretization, SimDate};
use crate::execution::{
    default_job_name, output_file_for, ExecutionHandler, HandlerRecord, JobSpec, LocalProcess,
    PbsJob, SlurmJob,
};
use crate::settings::RuntimeSettings;
use crate::stager::Stager;
use crate::system::{SchedulerFlavor, SystemManager};

const STATE_FILE: &str = ".cstar-simulation.json";
const BUILD_STAMP_FILE: &str = ".cstar-build.json";
const STATE_SCHEMA_VERSION: u32 = 1;

/// Lifecycle phase of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationPhase {
    Constructed,
    SetupOk,
    Built,
    Ready,
    Running,
    Finished,
}

/// Caller-facing knobs for [`Simulation::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub account_key: Option<String>,
    pub walltime: Option<String>,
    pub queue_name: Option<String>,
    pub job_name: Option<String>,
}

/// A fully-specified, runnable configuration of the ocean model.
#[derive(Debug)]
pub struct Simulation {
    pub name: String,
    pub directory: PathBuf,
    pub valid_date_range: DateRange,
    pub start_date: SimDate,
    pub end_date: SimDate,
    pub codebases: Vec<ExternalCodeBase>,
    pub runtime_code: Option<AdditionalCode>,
    pub compile_time_code: Option<AdditionalCode>,
    pub datasets: BTreeMap<DatasetRole, Vec<InputDataset>>,
    pub discretization: Discretization,

    phase: SimulationPhase,
    executable_path: Option<PathBuf>,
    settings_path: Option<PathBuf>,
    handler: Option<ExecutionHandler>,
}

impl Simulation {
    /// Construct a simulation. Only `start <= end` is checked here; range
    /// containment and dataset coverage are validated by `setup`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        valid_date_range: DateRange,
        start_date: SimDate,
        end_date: SimDate,
        codebases: Vec<ExternalCodeBase>,
        discretization: Discretization,
    ) -> Result<Self> {
        if start_date > end_date {
            return Err(CstarError::Validation(format!(
                "start date {start_date} is after end date {end_date}"
            )));
        }
        Ok(Simulation {
            name: name.into(),
            directory: cstar_store::absolutize(&directory.into())?,
            valid_date_range,
            start_date,
            end_date,
            codebases,
            runtime_code: None,
            compile_time_code: None,
            datasets: BTreeMap::new(),
            discretization,
            phase: SimulationPhase::Constructed,
            executable_path: None,
            settings_path: None,
            handler: None,
        })
    }

    pub fn phase(&self) -> SimulationPhase {
        self.phase
    }

    pub fn executable_path(&self) -> Option<&Path> {
        self.executable_path.as_deref()
    }

    pub fn handler(&mut self) -> Option<&mut ExecutionHandler> {
        self.handler.as_mut()
    }

    /// Hand the live handler to a caller that outlives this simulation.
    /// The handler's identity stays in the persisted state file.
    pub fn take_handler(&mut self) -> Option<ExecutionHandler> {
        self.handler.take()
    }

    /// The requested model-time window.
    pub fn active_range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    /// Date containment: requested window inside `valid_date_range` and
    /// inside every dated dataset's own window.
    pub fn validate_dates(&self) -> Result<()> {
        let active = self.active_range();
        if !active.is_subset_of(&self.valid_date_range) {
            return Err(CstarError::Validation(format!(
                "requested window {active} is outside the valid range {}",
                self.valid_date_range
            )));
        }
        for (role, datasets) in &self.datasets {
            for ds in datasets {
                if !ds.covers(&active) {
                    return Err(CstarError::Validation(format!(
                        "{role} dataset {} does not cover {active}",
                        ds.source.resource().location
                    )));
                }
            }
        }
        Ok(())
    }

    /// Install codebases, stage code, materialize datasets.
    ///
    /// Idempotent: files already present with matching hashes are not
    /// re-fetched.
    pub async fn setup(
        &mut self,
        system: &SystemManager,
        stager: &Stager,
        env: &mut EnvironmentStore,
    ) -> Result<()> {
        self.validate_dates()?;
        self.prepare_directory()?;

        for codebase in &self.codebases {
            let root = cstar_store::cstar_home()?
                .join("externals")
                .join(codebase.name.to_ascii_lowercase());
            codebase.get(&root, system, env, stager.retriever()).await?;
        }

        if let Some(code) = &mut self.compile_time_code {
            code.get(stager, &self.directory.join("additional_source_code"))
                .await?;
        }
        if let Some(code) = &mut self.runtime_code {
            code.get(stager, &self.directory.join("namelists")).await?;
        }

        let active = self.active_range();
        let input_dir = self.directory.join("input_datasets");
        for datasets in self.datasets.values_mut() {
            for ds in datasets {
                ds.get(stager, &input_dir, &active, false).await?;
            }
        }

        if self.phase < SimulationPhase::SetupOk {
            self.phase = SimulationPhase::SetupOk;
        }
        info!(name = %self.name, dir = %self.directory.display(), "simulation setup complete");
        Ok(())
    }

    /// Compile the model against the staged compile-time code.
    ///
    /// Refuses to rebuild over a stamp from a different rank layout; run
    /// [`Simulation::clean`] first.
    pub async fn build(&mut self, system: &SystemManager) -> Result<()> {
        self.require_phase(SimulationPhase::SetupOk, "build")?;

        let build_dir = self.directory.join("additional_source_code");
        if !build_dir.is_dir() {
            return Err(CstarError::Validation(format!(
                "no compile-time code staged under {}",
                build_dir.display()
            )));
        }

        if let Some(stamp) = self.read_build_stamp()? {
            if stamp != self.discretization {
                return Err(CstarError::Validation(format!(
                    "executable was built for a {}x{} rank layout but {}x{} is requested; clean first",
                    stamp.n_procs_x,
                    stamp.n_procs_y,
                    self.discretization.n_procs_x,
                    self.discretization.n_procs_y
                )));
            }
        }

        let output = Command::new("make")
            .arg(format!("COMPILER={}", system.compiler().as_str()))
            .current_dir(&build_dir)
            .output()
            .await
            .map_err(|e| CstarError::Build {
                name: self.name.clone(),
                message: format!("failed to run make: {e}"),
                log: String::new(),
            })?;
        if !output.status.success() {
            return Err(CstarError::Build {
                name: self.name.clone(),
                message: format!("make exited with {}", output.status),
                log: format!(
                    "{}\n{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        let exe = build_dir.join("roms");
        if !exe.is_file() {
            return Err(CstarError::Build {
                name: self.name.clone(),
                message: format!("build succeeded but {} was not produced", exe.display()),
                log: String::from_utf8_lossy(&output.stdout).into_owned(),
            });
        }

        self.write_build_stamp()?;
        self.executable_path = Some(exe);
        if self.phase < SimulationPhase::Built {
            self.phase = SimulationPhase::Built;
        }
        info!(name = %self.name, "model build complete");
        Ok(())
    }

    /// Drop the build stamp and executable so a new rank layout can build.
    pub fn clean(&mut self) -> Result<()> {
        let stamp = self.directory.join(BUILD_STAMP_FILE);
        if stamp.exists() {
            std::fs::remove_file(&stamp).map_err(|e| CstarError::io(&stamp, e))?;
        }
        if let Some(exe) = self.executable_path.take() {
            if exe.exists() {
                std::fs::remove_file(&exe).map_err(|e| CstarError::io(&exe, e))?;
            }
        }
        if self.phase > SimulationPhase::SetupOk {
            self.phase = SimulationPhase::SetupOk;
        }
        Ok(())
    }

    /// Render the runtime-settings file and partition inputs across ranks.
    pub async fn pre_run(&mut self) -> Result<()> {
        self.require_phase(SimulationPhase::Built, "pre_run")?;

        let settings_path = self.render_settings()?;
        self.settings_path = Some(settings_path);

        if self.discretization.n_procs() > 1 {
            for datasets in self.datasets.values() {
                for ds in datasets {
                    ds.partition(self.discretization.n_procs_x, self.discretization.n_procs_y)
                        .await?;
                }
            }
        }

        if self.phase < SimulationPhase::Ready {
            self.phase = SimulationPhase::Ready;
        }
        Ok(())
    }

    /// Substitute staged paths, dates, time step and rank grid into the
    /// `.in` template and write it into the working directory.
    fn render_settings(&self) -> Result<PathBuf> {
        let runtime_code = self.runtime_code.as_ref().ok_or_else(|| {
            CstarError::Validation("simulation has no runtime code".to_string())
        })?;
        let template_name = runtime_code.first_with_extension("in").ok_or_else(|| {
            CstarError::Validation("runtime code lists no .in template".to_string())
        })?;
        let template_path = runtime_code.staged_file(template_name).ok_or_else(|| {
            CstarError::Validation(format!("runtime template {template_name} is not staged"))
        })?;

        let mut settings = RuntimeSettings::from_file(&template_path)?;
        settings.set("title", [self.name.clone()]);
        settings.set_date("start_date", &self.start_date);
        settings.set_date("end_date", &self.end_date);

        let n_steps = self
            .discretization
            .steps_for(self.active_range().duration_seconds());
        settings.set(
            "time_stepping",
            [
                n_steps.to_string(),
                self.discretization.time_step.to_string(),
                "30".to_string(),
                "1".to_string(),
            ],
        );
        settings.set(
            "NP_XI_NP_ETA",
            [
                self.discretization.n_procs_x.to_string(),
                self.discretization.n_procs_y.to_string(),
            ],
        );

        if let Some(grid) = self.first_dataset_path(DatasetRole::ModelGrid) {
            settings.set("grid", [grid.display().to_string()]);
        }
        if let Some(init) = self.first_dataset_path(DatasetRole::InitialConditions) {
            settings.set("initial", [init.display().to_string()]);
        }
        let forcing: Vec<String> = [
            DatasetRole::TidalForcing,
            DatasetRole::BoundaryForcing,
            DatasetRole::SurfaceForcing,
            DatasetRole::RiverForcing,
            DatasetRole::ForcingCorrections,
        ]
        .iter()
        .flat_map(|role| self.dataset_paths(*role))
        .map(|p| p.display().to_string())
        .collect();
        if !forcing.is_empty() {
            settings.set("forcing", forcing);
        }

        let out = self.directory.join(format!("{}.in", self.name));
        settings.to_file(&out)?;
        Ok(out)
    }

    /// Submit the simulation and return its (already submitted) handler.
    pub async fn run(
        &mut self,
        system: &SystemManager,
        opts: RunOptions,
    ) -> Result<&mut ExecutionHandler> {
        self.require_phase(SimulationPhase::Ready, "run")?;

        // The executable must match the requested rank layout exactly.
        match self.read_build_stamp()? {
            Some(stamp) if stamp == self.discretization => {}
            _ => {
                return Err(CstarError::Validation(
                    "executable does not match the requested rank layout; rebuild first"
                        .to_string(),
                ))
            }
        }
        let exe = self.executable_path.clone().ok_or_else(|| {
            CstarError::Validation("no executable recorded; build first".to_string())
        })?;
        let settings = self.settings_path.clone().ok_or_else(|| {
            CstarError::Validation("no runtime-settings file; run pre_run first".to_string())
        })?;

        let n = self.discretization.n_procs();
        let job_name = opts
            .job_name
            .clone()
            .unwrap_or_else(|| default_job_name(chrono::Utc::now()));

        let mut handler = match system.scheduler() {
            None => {
                let command = format!("mpirun -n {n} {} {}", exe.display(), settings.display());
                let output = output_file_for(&self.directory, &job_name);
                ExecutionHandler::Local(LocalProcess::new(command, &self.directory, output))
            }
            Some(flavor) => {
                let ctx = system.submit_context(
                    opts.account_key.as_deref(),
                    opts.queue_name.as_deref(),
                    opts.walltime.as_deref(),
                )?;
                let launcher = match flavor {
                    SchedulerFlavor::Slurm => format!("srun -n {n}"),
                    SchedulerFlavor::Pbs => format!("mpiexec -n {n}"),
                };
                let mut spec = JobSpec::new(
                    format!("{launcher} {} {}", exe.display(), settings.display()),
                    &self.directory,
                    n,
                )
                .with_job_name(job_name.clone());
                spec.account = Some(ctx.account);
                spec.queue = Some(ctx.queue);
                spec.walltime = Some(ctx.walltime);
                spec.cores_per_node = Some(ctx.cores_per_node);
                spec.directives = ctx.directives;

                let script_path = self.directory.join(format!("{job_name}.sh"));
                match flavor {
                    SchedulerFlavor::Slurm => {
                        ExecutionHandler::Slurm(SlurmJob::new(spec, script_path))
                    }
                    SchedulerFlavor::Pbs => ExecutionHandler::Pbs(PbsJob::new(spec, script_path)),
                }
            }
        };

        let id = handler.submit().await?;
        info!(name = %self.name, handler_id = %id, "simulation submitted");
        self.handler = Some(handler);
        self.phase = SimulationPhase::Running;
        self.persist()?;
        Ok(self.handler.as_mut().expect("handler just stored"))
    }

    /// Join per-rank outputs and drop the partitioned intermediates.
    pub async fn post_run(&mut self) -> Result<Vec<PathBuf>> {
        self.require_phase(SimulationPhase::Running, "post_run")?;
        let joined = post_run::join_partitioned_outputs(
            &self.directory.join("output"),
            post_run::nprocs_post(),
        )
        .await?;
        self.phase = SimulationPhase::Finished;
        self.persist()?;
        Ok(joined)
    }

    /// Write the full simulation state to `<directory>/.cstar-simulation.json`.
    pub fn persist(&self) -> Result<()> {
        let state = SimulationState {
            schema_version: STATE_SCHEMA_VERSION,
            name: self.name.clone(),
            directory: self.directory.clone(),
            valid_date_range: self.valid_date_range,
            start_date: self.start_date,
            end_date: self.end_date,
            codebases: self.codebases.clone(),
            runtime_code: self.runtime_code.clone(),
            compile_time_code: self.compile_time_code.clone(),
            datasets: self.datasets.clone(),
            discretization: self.discretization,
            phase: self.phase,
            executable_path: self.executable_path.clone(),
            settings_path: self.settings_path.clone(),
            handler: self.handler.as_ref().map(|h| h.record()),
        };

        std::fs::create_dir_all(&self.directory)
            .map_err(|e| CstarError::io(&self.directory, e))?;
        let path = self.directory.join(STATE_FILE);
        let tmp = self.directory.join(format!("{STATE_FILE}.tmp"));
        {
            let mut f = std::fs::File::create(&tmp).map_err(|e| CstarError::io(&tmp, e))?;
            f.write_all(serde_json::to_string_pretty(&state)?.as_bytes())
                .map_err(|e| CstarError::io(&tmp, e))?;
            f.sync_all().map_err(|e| CstarError::io(&tmp, e))?;
        }
        std::fs::rename(&tmp, &path).map_err(|e| CstarError::io(&path, e))?;
        Ok(())
    }

    /// Rehydrate a simulation from its state file and reconnect to any
    /// still-live handler by re-querying the scheduler.
    pub async fn restore(directory: &Path) -> Result<Simulation> {
        let path = directory.join(STATE_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| CstarError::io(&path, e))?;
        let state: SimulationState = serde_json::from_str(&text)?;

        let mut handler = match &state.handler {
            Some(record) => Some(ExecutionHandler::from_record(record)?),
            None => None,
        };
        if let Some(h) = &mut handler {
            let status = h.status().await?;
            info!(name = %state.name, %status, "re-attached to handler");
        }

        Ok(Simulation {
            name: state.name,
            directory: state.directory,
            valid_date_range: state.valid_date_range,
            start_date: state.start_date,
            end_date: state.end_date,
            codebases: state.codebases,
            runtime_code: state.runtime_code,
            compile_time_code: state.compile_time_code,
            datasets: state.datasets,
            discretization: state.discretization,
            phase: state.phase,
            executable_path: state.executable_path,
            settings_path: state.settings_path,
            handler,
        })
    }

    fn require_phase(&self, at_least: SimulationPhase, op: &str) -> Result<()> {
        if self.phase < at_least {
            return Err(CstarError::Validation(format!(
                "cannot {op} from phase {:?}; complete the earlier lifecycle steps first",
                self.phase
            )));
        }
        Ok(())
    }

    /// Create the working-directory layout, honoring
    /// `CSTAR_CLOBBER_WORKING_DIR=1`. Clobbering refuses a directory that
    /// holds a Job Record or a simulation state file naming a handler.
    fn prepare_directory(&self) -> Result<()> {
        if self.directory.exists()
            && std::env::var("CSTAR_CLOBBER_WORKING_DIR").map(|v| v == "1") == Ok(true)
        {
            if self.directory.join("state.json").exists() {
                return Err(CstarError::Validation(format!(
                    "refusing to clobber {}: it contains a workplan Job Record",
                    self.directory.display()
                )));
            }
            let state_file = self.directory.join(STATE_FILE);
            if state_file.exists() {
                let text =
                    std::fs::read_to_string(&state_file).map_err(|e| CstarError::io(&state_file, e))?;
                let prior: SimulationState = serde_json::from_str(&text)?;
                if prior.handler.as_ref().is_some_and(|h| h.handler_id.is_some()) {
                    return Err(CstarError::Validation(format!(
                        "refusing to clobber {}: a prior run's handler is recorded there",
                        self.directory.display()
                    )));
                }
            }
            warn!(dir = %self.directory.display(), "clobbering working directory");
            std::fs::remove_dir_all(&self.directory)
                .map_err(|e| CstarError::io(&self.directory, e))?;
        }

        for sub in ["input_datasets", "additional_source_code", "namelists", "output"] {
            let dir = self.directory.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| CstarError::io(&dir, e))?;
        }
        Ok(())
    }

    fn first_dataset_path(&self, role: DatasetRole) -> Option<PathBuf> {
        self.dataset_paths(role).into_iter().next()
    }

    fn dataset_paths(&self, role: DatasetRole) -> Vec<PathBuf> {
        self.datasets
            .get(&role)
            .map(|list| {
                list.iter()
                    .flat_map(|ds| ds.working_files.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn read_build_stamp(&self) -> Result<Option<Discretization>> {
        let path = self.directory.join(BUILD_STAMP_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CstarError::io(&path, e)),
        }
    }

    fn write_build_stamp(&self) -> Result<()> {
        let path = self.directory.join(BUILD_STAMP_FILE);
        std::fs::write(&path, serde_json::to_string(&self.discretization)?)
            .map_err(|e| CstarError::io(&path, e))
    }
}

/// On-disk form of a simulation.
#[derive(Debug, Serialize, Deserialize)]
struct SimulationState {
    schema_version: u32,
    name: String,
    directory: PathBuf,
    valid_date_range: DateRange,
    start_date: SimDate,
    end_date: SimDate,
    codebases: Vec<ExternalCodeBase>,
    runtime_code: Option<AdditionalCode>,
    compile_time_code: Option<AdditionalCode>,
    datasets: BTreeMap<DatasetRole, Vec<InputDataset>>,
    discretization: Discretization,
    phase: SimulationPhase,
    executable_path: Option<PathBuf>,
    settings_path: Option<PathBuf>,
    handler: Option<HandlerRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;
    use crate::system::HostProfile;

    fn sim(dir: &Path) -> Simulation {
        Simulation::new(
            "test_case",
            dir,
            DateRange::parse("2012-01-01 12:00:00", "2012-12-31 12:00:00").unwrap(),
            SimDate::parse("2012-02-01").unwrap(),
            SimDate::parse("2012-03-01").unwrap(),
            vec![],
            Discretization::new(1, 1, 60),
        )
        .unwrap()
    }

    #[test]
    fn construction_rejects_inverted_dates() {
        let dir = tempfile::tempdir().unwrap();
        let err = Simulation::new(
            "bad",
            dir.path(),
            DateRange::parse("2012-01-01", "2012-12-31").unwrap(),
            SimDate::parse("2012-06-01").unwrap(),
            SimDate::parse("2012-02-01").unwrap(),
            vec![],
            Discretization::new(1, 1, 60),
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn setup_rejects_out_of_range_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Simulation::new(
            "early",
            dir.path(),
            DateRange::parse("2012-01-01 12:00:00", "2012-12-31 12:00:00").unwrap(),
            SimDate::parse("2011-12-31 12:00:00").unwrap(),
            SimDate::parse("2012-02-01").unwrap(),
            vec![],
            Discretization::new(1, 1, 60),
        )
        .unwrap();
        let env_dir = tempfile::tempdir().unwrap();
        let mut env = EnvironmentStore::open(env_dir.path().join(".cstar.env")).unwrap();
        let err = s
            .setup(
                &SystemManager::with_profile(HostProfile::GenericUnix),
                &Stager::default(),
                &mut env,
            )
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(s.phase(), SimulationPhase::Constructed);
    }

    #[tokio::test]
    async fn setup_creates_layout_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("case");
        let mut s = sim(&work);
        let env_dir = tempfile::tempdir().unwrap();
        let mut env = EnvironmentStore::open(env_dir.path().join(".cstar.env")).unwrap();
        let system = SystemManager::with_profile(HostProfile::GenericUnix);
        let stager = Stager::default();

        // Give it one local dataset so staging happens.
        let data = dir.path().join("grid.nc");
        std::fs::write(&data, b"grid").unwrap();
        s.datasets.insert(
            DatasetRole::ModelGrid,
            vec![InputDataset::netcdf(Resource::file(data.to_str().unwrap()))],
        );

        s.setup(&system, &stager, &mut env).await.unwrap();
        assert_eq!(s.phase(), SimulationPhase::SetupOk);
        for sub in ["input_datasets", "additional_source_code", "namelists", "output"] {
            assert!(work.join(sub).is_dir());
        }
        let staged = work.join("input_datasets/grid.nc");
        assert!(staged.exists());

        // Second setup leaves staged files untouched.
        let mtime = std::fs::metadata(&staged).unwrap().modified().unwrap();
        s.setup(&system, &stager, &mut env).await.unwrap();
        assert_eq!(
            std::fs::metadata(&staged).unwrap().modified().unwrap(),
            mtime
        );
    }

    #[tokio::test]
    async fn lifecycle_order_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = sim(&dir.path().join("case"));
        let system = SystemManager::with_profile(HostProfile::GenericUnix);
        assert!(s.build(&system).await.is_err());
        assert!(s.pre_run().await.is_err());
        assert!(s.run(&system, RunOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn build_pre_run_run_with_fake_model() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("case");
        let mut s = sim(&work);
        let env_dir = tempfile::tempdir().unwrap();
        let mut env = EnvironmentStore::open(env_dir.path().join(".cstar.env")).unwrap();
        let system = SystemManager::with_profile(HostProfile::GenericUnix);
        let stager = Stager::default();

        // Compile-time code: a Makefile producing a fake `roms` executable.
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join("Makefile"),
            "all:\n\tprintf '#!/bin/sh\\necho roms ran\\n' > roms && chmod +x roms\n",
        )
        .unwrap();
        s.compile_time_code = Some(AdditionalCode::new(
            Resource::file(src.to_str().unwrap()),
            vec!["Makefile".to_string()],
        ));

        // Runtime code: a minimal .in template.
        let nml = dir.path().join("nml");
        std::fs::create_dir_all(&nml).unwrap();
        std::fs::write(nml.join("roms.in"), "title:\n    placeholder\ngrid: none\n").unwrap();
        s.runtime_code = Some(AdditionalCode::new(
            Resource::file(nml.to_str().unwrap()),
            vec!["roms.in".to_string()],
        ));

        s.setup(&system, &stager, &mut env).await.unwrap();
        s.build(&system).await.unwrap();
        assert_eq!(s.phase(), SimulationPhase::Built);
        assert!(s.executable_path().unwrap().is_file());

        s.pre_run().await.unwrap();
        assert_eq!(s.phase(), SimulationPhase::Ready);
        let rendered = std::fs::read_to_string(work.join("test_case.in")).unwrap();
        assert!(rendered.contains("title: test_case"));
        assert!(rendered.contains("start_date: 2012-02-01 00:00:00"));

        // Changing the rank layout after a build is refused until clean().
        s.discretization = Discretization::new(2, 2, 60);
        let err = s.build(&system).await.unwrap_err();
        assert!(err.to_string().contains("rank layout"));
        s.clean().unwrap();
        s.build(&system).await.unwrap();
    }

    #[tokio::test]
    async fn persist_and_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("case");
        let s = sim(&work);
        s.persist().unwrap();

        let restored = Simulation::restore(&work).await.unwrap();
        assert_eq!(restored.name, "test_case");
        assert_eq!(restored.phase(), SimulationPhase::Constructed);
        assert_eq!(restored.start_date, s.start_date);
        assert_eq!(restored.discretization, s.discretization);
    }
}
