//! SLURM execution target.
//!
//! Submission goes through `sbatch --parsable`; status through `squeue`
//! while the job is queued or running, falling back to `sacct` once it has
//! left the queue; cancellation through `scancel`. Query failures are
//! retried with backoff and surface as `UNKNOWN` without forgetting the last
//! good reading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{info, warn};

use crate::domain::error::{CstarError, Result};
use crate::execution::retry::retry_with_backoff;
use crate::execution::script::JobSpec;
use crate::execution::status::JobStatus;

/// Scheduler queries are abandoned after this long.
const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// A job submitted (or to be submitted) to SLURM.
#[derive(Debug)]
pub struct SlurmJob {
    spec: JobSpec,
    script_path: PathBuf,
    job_id: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    last_good: JobStatus,
}

impl SlurmJob {
    pub fn new(spec: JobSpec, script_path: impl Into<PathBuf>) -> Self {
        SlurmJob {
            spec,
            script_path: script_path.into(),
            job_id: None,
            submitted_at: None,
            last_good: JobStatus::Unsubmitted,
        }
    }

    /// Reconnect to a job submitted by an earlier session.
    pub fn attach(
        spec: JobSpec,
        script_path: impl Into<PathBuf>,
        job_id: impl Into<String>,
        submitted_at: Option<DateTime<Utc>>,
    ) -> Self {
        SlurmJob {
            spec,
            script_path: script_path.into(),
            job_id: Some(job_id.into()),
            submitted_at,
            last_good: JobStatus::Pending,
        }
    }

    /// Write the batch script and `sbatch` it. Idempotent once submitted.
    pub async fn submit(&mut self) -> Result<String> {
        if let Some(id) = &self.job_id {
            return Ok(id.clone());
        }

        if let Some(parent) = self.script_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CstarError::io(parent, e))?;
        }
        if let Some(parent) = self.spec.output_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CstarError::io(parent, e))?;
        }
        tokio::fs::write(&self.script_path, self.spec.render_slurm())
            .await
            .map_err(|e| CstarError::io(&self.script_path, e))?;

        let args = vec![
            "--parsable".to_string(),
            self.script_path.display().to_string(),
        ];
        let run_dir = self.spec.run_dir.clone();
        let stdout =
            retry_with_backoff("sbatch", || run_scheduler("sbatch", &args, &run_dir))
                .await
                .map_err(|e| into_scheduler_error("sbatch", e))?;

        // `--parsable` prints `<jobid>` or `<jobid>;<cluster>`.
        let id = stdout
            .trim()
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(CstarError::Scheduler {
                message: format!("sbatch returned an unparseable job id: {stdout:?}"),
                stderr: String::new(),
            });
        }
        info!(job_id = %id, job_name = %self.spec.job_name, "submitted SLURM job");
        self.job_id = Some(id.clone());
        self.submitted_at = Some(Utc::now());
        self.last_good = JobStatus::Pending;
        Ok(id)
    }

    /// Query the scheduler. Persistent query failure yields `Unknown` while
    /// the previous reading is retained for the next success-path merge.
    pub async fn status(&mut self) -> Result<JobStatus> {
        let Some(id) = self.job_id.clone() else {
            return Ok(JobStatus::Unsubmitted);
        };
        if self.last_good.is_terminal() {
            return Ok(self.last_good);
        }

        match self.query_status(&id).await {
            Ok(status) => {
                if status != JobStatus::Unknown {
                    self.last_good = status;
                }
                Ok(status)
            }
            Err(err) => {
                warn!(job_id = %id, error = %err, "scheduler query failed, status unknown");
                Ok(JobStatus::Unknown)
            }
        }
    }

    async fn query_status(&self, id: &str) -> Result<JobStatus> {
        // squeue knows the job while it is queued or running.
        let squeue_args: Vec<String> = ["--noheader", "--job", id, "--format=%T"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let squeue = retry_with_backoff("squeue", || {
            run_scheduler("squeue", &squeue_args, &self.spec.run_dir)
        })
        .await;

        if let Ok(out) = &squeue {
            let word = out.trim();
            if !word.is_empty() {
                return Ok(JobStatus::from_slurm_state(word));
            }
        }

        // Fall back to accounting for jobs that left the queue.
        let sacct_args: Vec<String> = ["--noheader", "-X", "--jobs", id, "--format=State"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let sacct = retry_with_backoff("sacct", || {
            run_scheduler("sacct", &sacct_args, &self.spec.run_dir)
        })
        .await?;

        let word = sacct.lines().next().unwrap_or("").trim();
        if word.is_empty() {
            return Ok(JobStatus::Unknown);
        }
        Ok(JobStatus::from_slurm_state(word))
    }

    /// `scancel`. Returns `false` when the job is already terminal.
    pub async fn cancel(&mut self) -> Result<bool> {
        let status = self.status().await?;
        if status.is_terminal() || status == JobStatus::Unsubmitted {
            return Ok(false);
        }
        let args = vec![self.job_id.clone().expect("non-terminal implies submitted")];
        retry_with_backoff("scancel", || {
            run_scheduler("scancel", &args, &self.spec.run_dir)
        })
        .await
        .map_err(|e| into_scheduler_error("scancel", e))?;
        self.last_good = JobStatus::Cancelled;
        Ok(true)
    }

    pub fn id(&self) -> Option<String> {
        self.job_id.clone()
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn script(&self) -> String {
        self.spec.render_slurm()
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn output_file(&self) -> &Path {
        &self.spec.output_file
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }
}

/// Run a scheduler binary under the poll timeout, mapping failure to a
/// transient error so the retry wrapper can back off.
pub(crate) async fn run_scheduler(program: &str, args: &[String], cwd: &Path) -> Result<String> {
    let fut = Command::new(program).args(args).current_dir(cwd).output();
    let output = tokio::time::timeout(POLL_TIMEOUT, fut)
        .await
        .map_err(|_| CstarError::Network {
            url: program.to_string(),
            message: format!("{program} timed out after {}s", POLL_TIMEOUT.as_secs()),
        })?
        .map_err(|e| CstarError::Network {
            url: program.to_string(),
            message: format!("failed to run {program}: {e}"),
        })?;

    if !output.status.success() {
        return Err(CstarError::Network {
            url: program.to_string(),
            message: format!(
                "{program} {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// After retries are exhausted, a transient error becomes a permanent
/// scheduler error carrying the raw stderr.
pub(crate) fn into_scheduler_error(what: &str, err: CstarError) -> CstarError {
    match err {
        CstarError::Network { message, .. } => CstarError::Scheduler {
            message: format!("{what} failed after retries"),
            stderr: message,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> JobSpec {
        JobSpec::new("srun -n 4 ./roms case.in", "/work/case", 4)
            .with_job_name("cstar_job_20240115_093000")
    }

    #[tokio::test]
    async fn unsubmitted_job_reports_unsubmitted() {
        let mut job = SlurmJob::new(spec(), "/work/case/job.sh");
        assert_eq!(job.status().await.unwrap(), JobStatus::Unsubmitted);
        assert!(job.id().is_none());
        // Cancel before submit is a no-op.
        assert!(!job.cancel().await.unwrap());
    }

    #[test]
    fn attach_restores_identity() {
        let job = SlurmJob::attach(spec(), "/work/case/job.sh", "98765", None);
        assert_eq!(job.id().as_deref(), Some("98765"));
        assert!(job.script().contains("--job-name=cstar_job_20240115_093000"));
    }
}
