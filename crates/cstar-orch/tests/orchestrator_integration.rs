//! Integration tests for the orchestrator with a command-backed launcher.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cstar_core::domain::error::{CstarError, Result};
use cstar_core::execution::{ExecutionHandler, LocalProcess};
use cstar_orch::{Orchestrator, OrchestratorConfig, Step, StepLauncher, Workplan};
use cstar_store::{JobRecord, StepRecord, StepStatus};

/// Launcher that runs a fixed shell command per step.
struct CommandLauncher {
    commands: BTreeMap<String, String>,
    launches: AtomicUsize,
}

impl CommandLauncher {
    fn new(commands: &[(&str, &str)]) -> Self {
        CommandLauncher {
            commands: commands
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            launches: AtomicUsize::new(0),
        }
    }

    fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepLauncher for CommandLauncher {
    async fn launch(&self, step: &Step, step_dir: &Path) -> Result<ExecutionHandler> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let command = self
            .commands
            .get(&step.name)
            .cloned()
            .ok_or_else(|| CstarError::Validation(format!("no command for {}", step.name)))?;
        let output = step_dir.join("output/job.out");
        let mut handler = ExecutionHandler::Local(LocalProcess::new(command, step_dir, output));
        handler.submit().await?;
        Ok(handler)
    }

    async fn attach(
        &self,
        _step: &Step,
        step_dir: &Path,
        record: &StepRecord,
    ) -> Result<ExecutionHandler> {
        let pid: u32 = record
            .handler_id
            .as_deref()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CstarError::Validation("no pid recorded".to_string()))?;
        let output = record
            .output_path
            .clone()
            .unwrap_or_else(|| step_dir.join("output/job.out"));
        Ok(ExecutionHandler::Local(LocalProcess::attach(
            "", step_dir, output, pid, record.submitted_at,
        )))
    }
}

fn plan(steps: &[(&str, &[&str])]) -> Workplan {
    let steps_yaml: String = steps
        .iter()
        .map(|(name, deps)| {
            let deps = if deps.is_empty() {
                String::new()
            } else {
                format!(
                    "\n    depends_on: [{}]",
                    deps.iter().copied().collect::<Vec<_>>().join(", ")
                )
            };
            format!(
                "  - name: {name}\n    application: roms-marbl\n    blueprint: /plans/{name}.yaml{deps}\n"
            )
        })
        .collect();
    Workplan::parse_str(&format!(
        "name: test_plan\ndescription: integration\nstate: draft\nsteps:\n{steps_yaml}"
    ))
    .unwrap()
}

fn config(outdir: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        outdir: Some(outdir.to_path_buf()),
        force: false,
        poll_interval: Duration::from_millis(50),
    }
}

/// Dependency ordering: a dependent step only submits after its dependency
/// completed, while independent steps run side by side.
#[tokio::test]
async fn dag_ordering_honored() {
    let outdir = tempfile::tempdir().unwrap();
    let marker = outdir.path().join("job1.done");

    let launcher = CommandLauncher::new(&[
        ("job1", &format!("sleep 0.2 && touch {}", marker.display())),
        // job2 fails unless job1's marker already exists at launch.
        ("job2", &format!("test -f {}", marker.display())),
        ("job3", "echo independent"),
    ]);
    let workplan = plan(&[("job1", &[]), ("job2", &["job1"]), ("job3", &[])]);

    let orchestrator = Orchestrator::new(launcher, config(outdir.path()));
    let outcome = orchestrator.run(&workplan, "run1").await.unwrap();

    assert!(outcome.statuses.values().all(|s| *s == StepStatus::Completed));

    let record = JobRecord::load(&JobRecord::path_in(&outdir.path().join("run1"))).unwrap();
    let job1 = &record.steps["job1"];
    let job2 = &record.steps["job2"];
    assert!(job2.submitted_at.unwrap() >= job1.finished_at.unwrap());
    assert!(job1.handler_id.is_some());
    assert!(record.all_terminal());
}

/// A failed step fails the run, and its dependents are skipped without
/// disturbing independent branches.
#[tokio::test]
async fn failure_skips_dependents() {
    let outdir = tempfile::tempdir().unwrap();
    let launcher = CommandLauncher::new(&[
        ("job1", "exit 1"),
        ("job2", "echo never"),
        ("job3", "echo fine"),
    ]);
    let workplan = plan(&[("job1", &[]), ("job2", &["job1"]), ("job3", &[])]);

    let orchestrator = Orchestrator::new(launcher, config(outdir.path()));
    let err = orchestrator.run(&workplan, "run1").await.unwrap_err();
    assert!(err.to_string().contains("job1"));
    assert!(err.to_string().contains("run1"));

    let record = JobRecord::load(&JobRecord::path_in(&outdir.path().join("run1"))).unwrap();
    assert_eq!(record.steps["job1"].status, StepStatus::Failed);
    assert_eq!(record.steps["job2"].status, StepStatus::Skipped);
    assert_eq!(record.steps["job3"].status, StepStatus::Completed);
}

/// Re-running a completed run-ID is a no-op: nothing is resubmitted.
#[tokio::test]
async fn completed_run_id_is_idempotent() {
    let outdir = tempfile::tempdir().unwrap();
    let workplan = plan(&[("job1", &[]), ("job2", &["job1"])]);

    let first = CommandLauncher::new(&[("job1", "echo one"), ("job2", "echo two")]);
    let orchestrator = Orchestrator::new(first, config(outdir.path()));
    orchestrator.run(&workplan, "run1").await.unwrap();

    let second = CommandLauncher::new(&[("job1", "echo one"), ("job2", "echo two")]);
    let orchestrator = Orchestrator::new(second, config(outdir.path()));
    let outcome = orchestrator.run(&workplan, "run1").await.unwrap();

    assert!(outcome.statuses.values().all(|s| *s == StepStatus::Completed));
    assert_eq!(orchestrator.launcher().launch_count(), 0);
}

/// A later session re-attaches to a still-running handler by id instead of
/// resubmitting it.
#[tokio::test]
async fn resume_reattaches_to_live_handler() {
    let outdir = tempfile::tempdir().unwrap();
    let run_dir = outdir.path().join("run1");
    let step_dir = run_dir.join("outputs/job1");
    let workplan = plan(&[("job1", &[])]);

    // Session one: submit directly and record it, as if the process died
    // right after persisting.
    let output = step_dir.join("output/job.out");
    let mut handler = ExecutionHandler::Local(LocalProcess::new(
        "sleep 0.4 && echo done",
        &step_dir,
        &output,
    ));
    let pid = handler.submit().await.unwrap();

    let digest =
        cstar_orch::digest_value(&serde_yaml::to_value(&workplan).unwrap());
    let mut record = JobRecord::new("run1", &digest, &["job1".to_string()]);
    let entry = record.steps.get_mut("job1").unwrap();
    entry.status = StepStatus::Running;
    entry.handler_id = Some(pid);
    entry.output_path = Some(output);
    entry.submitted_at = handler.submitted_at();
    record.save(&run_dir).unwrap();

    // Session two: resume. No launches, just re-attach and finish.
    let launcher = CommandLauncher::new(&[("job1", "echo never-used")]);
    let orchestrator = Orchestrator::new(launcher, config(outdir.path()));
    let outcome = orchestrator.run(&workplan, "run1").await.unwrap();

    assert_eq!(outcome.statuses["job1"], StepStatus::Completed);
    assert_eq!(orchestrator.launcher().launch_count(), 0);
}

/// The same run-ID refuses a different workplan unless forced.
#[tokio::test]
async fn run_id_conflict_requires_force() {
    let outdir = tempfile::tempdir().unwrap();
    let workplan = plan(&[("job1", &[])]);

    let launcher = CommandLauncher::new(&[("job1", "echo one")]);
    let orchestrator = Orchestrator::new(launcher, config(outdir.path()));
    orchestrator.run(&workplan, "run1").await.unwrap();

    // Same step names, different blueprint path: different digest.
    let mut changed = workplan.clone();
    changed.steps[0].blueprint = "/plans/other.yaml".to_string();

    let launcher = CommandLauncher::new(&[("job1", "echo one")]);
    let orchestrator = Orchestrator::new(launcher, config(outdir.path()));
    let err = orchestrator.run(&changed, "run1").await.unwrap_err();
    assert_eq!(err.kind(), cstar_core::ErrorKind::RunIdConflict);

    let launcher = CommandLauncher::new(&[("job1", "echo one")]);
    let mut forced = config(outdir.path());
    forced.force = true;
    let orchestrator = Orchestrator::new(launcher, forced);
    orchestrator.run(&changed, "run1").await.unwrap();
}
