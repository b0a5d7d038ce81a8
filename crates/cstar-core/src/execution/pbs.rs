//! PBS execution target.
//!
//! Submission through `qsub`, status through `qstat -x -f -F json` (the
//! exit status disambiguates finished jobs), cancellation through `qdel`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::error::{CstarError, Result};
use crate::execution::retry::retry_with_backoff;
use crate::execution::script::JobSpec;
use crate::execution::slurm::{into_scheduler_error, run_scheduler};
use crate::execution::status::JobStatus;

/// A job submitted (or to be submitted) to PBS.
#[derive(Debug)]
pub struct PbsJob {
    spec: JobSpec,
    script_path: PathBuf,
    job_id: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    last_good: JobStatus,
}

impl PbsJob {
    pub fn new(spec: JobSpec, script_path: impl Into<PathBuf>) -> Self {
        PbsJob {
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
        PbsJob {
            spec,
            script_path: script_path.into(),
            job_id: Some(job_id.into()),
            submitted_at,
            last_good: JobStatus::Pending,
        }
    }

    /// Write the batch script and `qsub` it. Idempotent once submitted.
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
        tokio::fs::write(&self.script_path, self.spec.render_pbs())
            .await
            .map_err(|e| CstarError::io(&self.script_path, e))?;

        let args = vec![self.script_path.display().to_string()];
        let run_dir = self.spec.run_dir.clone();
        let stdout = retry_with_backoff("qsub", || run_scheduler("qsub", &args, &run_dir))
            .await
            .map_err(|e| into_scheduler_error("qsub", e))?;

        // qsub prints the full job id, e.g. `12345.desched1`.
        let id = stdout.trim().to_string();
        if id.is_empty() {
            return Err(CstarError::Scheduler {
                message: "qsub returned an empty job id".to_string(),
                stderr: String::new(),
            });
        }
        info!(job_id = %id, job_name = %self.spec.job_name, "submitted PBS job");
        self.job_id = Some(id.clone());
        self.submitted_at = Some(Utc::now());
        self.last_good = JobStatus::Pending;
        Ok(id)
    }

    /// Query the scheduler. Persistent query failure yields `Unknown` while
    /// the previous reading is retained.
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
        let args: Vec<String> = ["-x", "-f", "-F", "json", id]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let stdout = retry_with_backoff("qstat", || {
            run_scheduler("qstat", &args, &self.spec.run_dir)
        })
        .await?;

        parse_qstat_json(&stdout, id)
    }

    /// `qdel`. Returns `false` when the job is already terminal.
    pub async fn cancel(&mut self) -> Result<bool> {
        let status = self.status().await?;
        if status.is_terminal() || status == JobStatus::Unsubmitted {
            return Ok(false);
        }
        let args = vec![self.job_id.clone().expect("non-terminal implies submitted")];
        retry_with_backoff("qdel", || {
            run_scheduler("qdel", &args, &self.spec.run_dir)
        })
        .await
        .map_err(|e| into_scheduler_error("qdel", e))?;
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
        self.spec.render_pbs()
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

/// Pull `job_state` and `Exit_status` for `id` out of qstat's JSON form.
fn parse_qstat_json(text: &str, id: &str) -> Result<JobStatus> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        warn!(error = %e, "qstat produced unparseable JSON");
        CstarError::Scheduler {
            message: "qstat produced unparseable JSON".to_string(),
            stderr: text.to_string(),
        }
    })?;

    let jobs = value.get("Jobs").and_then(|j| j.as_object());
    let job = jobs.and_then(|map| {
        // The key may be the full id or have a different server suffix.
        map.get(id)
            .or_else(|| {
                let prefix = id.split('.').next().unwrap_or(id);
                map.iter()
                    .find(|(k, _)| k.split('.').next() == Some(prefix))
                    .map(|(_, v)| v)
            })
    });

    let Some(job) = job else {
        return Ok(JobStatus::Unknown);
    };
    let state = job
        .get("job_state")
        .and_then(|s| s.as_str())
        .unwrap_or_default();
    let exit_status = job.get("Exit_status").and_then(|s| s.as_i64());
    Ok(JobStatus::from_pbs_state(state, exit_status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> JobSpec {
        JobSpec::new("mpiexec -n 4 ./roms case.in", "/work/case", 4)
            .with_job_name("cstar_job_20240115_093000")
    }

    #[tokio::test]
    async fn unsubmitted_job_reports_unsubmitted() {
        let mut job = PbsJob::new(spec(), "/work/case/job.pbs");
        assert_eq!(job.status().await.unwrap(), JobStatus::Unsubmitted);
        assert!(!job.cancel().await.unwrap());
    }

    #[test]
    fn qstat_json_parsing() {
        let text = r#"{
            "Jobs": {
                "12345.desched1": {
                    "job_state": "F",
                    "Exit_status": 0
                }
            }
        }"#;
        assert_eq!(
            parse_qstat_json(text, "12345.desched1").unwrap(),
            JobStatus::Completed
        );
        // Prefix match when the stored id has no server suffix.
        assert_eq!(
            parse_qstat_json(text, "12345").unwrap(),
            JobStatus::Completed
        );

        let failed = r#"{"Jobs": {"9.x": {"job_state": "F", "Exit_status": 271}}}"#;
        assert_eq!(parse_qstat_json(failed, "9.x").unwrap(), JobStatus::Failed);

        let running = r#"{"Jobs": {"9.x": {"job_state": "R"}}}"#;
        assert_eq!(parse_qstat_json(running, "9.x").unwrap(), JobStatus::Running);

        let gone = r#"{"Jobs": {}}"#;
        assert_eq!(parse_qstat_json(gone, "9.x").unwrap(), JobStatus::Unknown);
    }

    #[test]
    fn attach_restores_identity() {
        let job = PbsJob::attach(spec(), "/work/case/job.pbs", "12345.desched1", None);
        assert_eq!(job.id().as_deref(), Some("12345.desched1"));
        assert!(job.script().contains("#PBS -N cstar_job_20240115_093000"));
    }
}
