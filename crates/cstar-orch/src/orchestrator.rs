//! The workplan orchestrator.
//!
//! One `run` invocation owns one run-ID directory: it validates the plan,
//! reconciles the Job Record with scheduler reality, submits whatever the
//! dependency frontier allows, and keeps polling until every step is
//! terminal. Re-invoking with the same run-ID resumes from the record;
//! nothing terminal is ever resubmitted.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use cstar_core::domain::error::{CstarError, Result};
use cstar_core::execution::{ExecutionHandler, JobStatus};
use cstar_store::{JobRecord, RunDirLock, StepStatus};

use crate::dag;
use crate::digest::digest_value;
use crate::launcher::StepLauncher;
use crate::transform::{self, SplitFrequency};
use crate::workplan::Workplan;

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root for run-ID directories; defaults to `$CSTAR_OUTDIR`.
    pub outdir: Option<PathBuf>,

    /// Accept a Job Record whose digest disagrees with the submitted plan.
    pub force: bool,

    /// Delay between scheduler polls.
    pub poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            outdir: None,
            force: false,
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Final per-step statuses of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: String,
    pub statuses: BTreeMap<String, StepStatus>,
}

/// DAG scheduler over a [`StepLauncher`].
pub struct Orchestrator<L: StepLauncher> {
    launcher: L,
    config: OrchestratorConfig,
}

impl<L: StepLauncher> Orchestrator<L> {
    pub fn new(launcher: L, config: OrchestratorConfig) -> Self {
        Orchestrator { launcher, config }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Drive `workplan` under `run_id` until every step is terminal.
    pub async fn run(&self, workplan: &Workplan, run_id: &str) -> Result<RunOutcome> {
        workplan.validate()?;

        let outdir = match &self.config.outdir {
            Some(dir) => dir.clone(),
            None => cstar_store::cstar_outdir()?,
        };
        let run_dir = outdir.join(run_id);
        let outputs_root = run_dir.join("outputs");
        let scripts_dir = run_dir.join("submit_scripts");

        // The time-splitting transform rewrites the plan before anything is
        // recorded, so the digest covers what actually runs.
        let plan = match SplitFrequency::from_env()? {
            Some(freq) => {
                let expanded = transform::expand_workplan(workplan, freq, &outputs_root).await?;
                expanded.validate()?;
                expanded
            }
            None => workplan.clone(),
        };

        let digest = digest_value(&serde_yaml::to_value(&plan)?);
        let _lock = RunDirLock::acquire(&run_dir)?;
        std::fs::create_dir_all(&scripts_dir).map_err(|e| CstarError::io(&scripts_dir, e))?;

        let mut record = JobRecord::load_or_init(
            &run_dir,
            run_id,
            &digest,
            &plan.step_names(),
            self.config.force,
        )?;
        record.save(&run_dir)?;

        // Re-attach to handlers from a previous session.
        let mut handlers: BTreeMap<String, ExecutionHandler> = BTreeMap::new();
        for step in &plan.steps {
            let step_record = &record.steps[&step.name];
            if !step_record.status.is_terminal() && step_record.handler_id.is_some() {
                let step_dir = outputs_root.join(&step.name);
                match self.launcher.attach(step, &step_dir, step_record).await {
                    Ok(handler) => {
                        info!(run_id, step = %step.name, "re-attached to handler");
                        handlers.insert(step.name.clone(), handler);
                    }
                    Err(err) => {
                        warn!(run_id, step = %step.name, error = %err, "could not re-attach; marking failed");
                        let entry = record.steps.get_mut(&step.name).expect("step recorded");
                        entry.status = StepStatus::Failed;
                        entry.finished_at = Some(Utc::now());
                    }
                }
            }
        }

        // A terminal observation only commits after two consecutive
        // identical readings; scheduler queries are eventually consistent.
        let mut last_seen: BTreeMap<String, JobStatus> = BTreeMap::new();

        loop {
            // Poll live handlers.
            for (name, handler) in handlers.iter_mut() {
                let entry = record.steps.get_mut(name).expect("step recorded");
                if entry.status.is_terminal() {
                    continue;
                }
                let observed = handler.status().await?;
                if observed == JobStatus::Unknown {
                    continue;
                }
                if observed.is_terminal() {
                    if last_seen.get(name) == Some(&observed) {
                        entry.status = observed.as_step_status();
                        entry.finished_at = Some(Utc::now());
                        info!(run_id, step = %name, status = %observed, "step finished");
                    }
                } else {
                    entry.status = observed.as_step_status();
                }
                last_seen.insert(name.clone(), observed);
            }

            // Propagate: a step whose dependency ended without completing
            // can never run; iterate to a fixpoint so whole chains settle
            // in one pass.
            loop {
                let mut changed = false;
                for step in &plan.steps {
                    if record.steps[&step.name].status != StepStatus::Unsubmitted {
                        continue;
                    }
                    let dead_dep = step.depends_on.iter().find(|dep| {
                        record.steps.get(dep.as_str()).is_some_and(|d| {
                            d.status.is_terminal() && d.status != StepStatus::Completed
                        })
                    });
                    if let Some(dep) = dead_dep {
                        warn!(run_id, step = %step.name, dependency = %dep, "skipping step: dependency did not complete");
                        let entry = record.steps.get_mut(&step.name).expect("step recorded");
                        entry.status = StepStatus::Skipped;
                        entry.finished_at = Some(Utc::now());
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }

            // Submit the ready frontier in declaration order.
            let statuses: BTreeMap<String, StepStatus> = record
                .steps
                .iter()
                .map(|(n, s)| (n.clone(), s.status))
                .collect();
            let ready: Vec<String> = dag::ready_frontier(&plan.steps, &statuses)
                .into_iter()
                .map(|s| s.name.clone())
                .collect();

            for name in ready {
                let step = plan.step(&name).expect("frontier step exists");
                let step_dir = outputs_root.join(&name);
                match self.launcher.launch(step, &step_dir).await {
                    Ok(handler) => {
                        // Keep a copy of what was actually submitted.
                        if let Some(script) = handler.script() {
                            let archived = scripts_dir.join(format!("{name}.sh"));
                            if let Err(err) = std::fs::write(&archived, script) {
                                warn!(run_id, step = %name, error = %err, "could not archive submit script");
                            }
                        }
                        let entry = record.steps.get_mut(&name).expect("step recorded");
                        entry.handler_id = handler.id();
                        entry.output_path = Some(handler.output_file().to_path_buf());
                        entry.script_path = handler.script_path().map(|p| p.to_path_buf());
                        entry.submitted_at = handler.submitted_at();
                        entry.status = StepStatus::Pending;
                        info!(run_id, step = %name, handler_id = ?entry.handler_id, "step submitted");
                        handlers.insert(name.clone(), handler);
                    }
                    Err(err) => {
                        error!(run_id, step = %name, error = %err, "step launch failed");
                        let entry = record.steps.get_mut(&name).expect("step recorded");
                        entry.status = StepStatus::Failed;
                        entry.finished_at = Some(Utc::now());
                    }
                }
                // Handler ids are durable before anything else happens.
                record.save(&run_dir)?;
            }

            record.save(&run_dir)?;
            if record.all_terminal() {
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        let statuses: BTreeMap<String, StepStatus> = record
            .steps
            .iter()
            .map(|(n, s)| (n.clone(), s.status))
            .collect();

        if let Some(step) = record.steps_with_status(StepStatus::Failed).first() {
            return Err(CstarError::StepFailed {
                run_id: run_id.to_string(),
                step: step.to_string(),
            });
        }

        info!(run_id, "workplan complete");
        Ok(RunOutcome {
            run_id: run_id.to_string(),
            statuses,
        })
    }

    /// Cancel every non-terminal handler recorded under `run_id`. Returns
    /// how many cancellations were issued.
    pub async fn cancel(&self, workplan: &Workplan, run_id: &str) -> Result<usize> {
        let outdir = match &self.config.outdir {
            Some(dir) => dir.clone(),
            None => cstar_store::cstar_outdir()?,
        };
        let run_dir = outdir.join(run_id);
        let outputs_root = run_dir.join("outputs");
        let mut record = JobRecord::load(&JobRecord::path_in(&run_dir))?;

        let mut cancelled = 0;
        for step in &workplan.steps {
            let Some(entry) = record.steps.get_mut(&step.name) else {
                continue;
            };
            if entry.status.is_terminal() || entry.handler_id.is_none() {
                continue;
            }
            let step_dir = outputs_root.join(&step.name);
            let mut handler = self.launcher.attach(step, &step_dir, entry).await?;
            if handler.cancel().await? {
                cancelled += 1;
                entry.status = StepStatus::Cancelled;
                entry.finished_at = Some(Utc::now());
            }
        }
        record.save(&run_dir)?;
        info!(run_id, cancelled, "workplan cancellation issued");
        Ok(cancelled)
    }
}
