//! Uniform execution handling over local processes and batch schedulers.
//!
//! [`ExecutionHandler`] is a closed sum over the supported targets. New
//! targets are added by extending the sum; application code never branches
//! on the concrete variant.

pub mod local;
pub mod pbs;
pub mod retry;
pub mod script;
pub mod slurm;
pub mod status;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::error::{CstarError, Result};

pub use local::LocalProcess;
pub use pbs::PbsJob;
pub use script::{default_job_name, output_file_for, JobSpec};
pub use slurm::SlurmJob;
pub use status::JobStatus;

/// Uniform façade over a running or submitted computation.
#[derive(Debug)]
pub enum ExecutionHandler {
    Local(LocalProcess),
    Slurm(SlurmJob),
    Pbs(PbsJob),
}

impl ExecutionHandler {
    /// Submit the job. Idempotent once in a non-unsubmitted state.
    pub async fn submit(&mut self) -> Result<String> {
        match self {
            ExecutionHandler::Local(p) => p.submit().await,
            ExecutionHandler::Slurm(j) => j.submit().await,
            ExecutionHandler::Pbs(j) => j.submit().await,
        }
    }

    /// Query the current status. May take a few seconds on scheduler hosts.
    pub async fn status(&mut self) -> Result<JobStatus> {
        match self {
            ExecutionHandler::Local(p) => p.status().await,
            ExecutionHandler::Slurm(j) => j.status().await,
            ExecutionHandler::Pbs(j) => j.status().await,
        }
    }

    /// Best-effort cancellation; `false` when already terminal.
    pub async fn cancel(&mut self) -> Result<bool> {
        match self {
            ExecutionHandler::Local(p) => p.cancel().await,
            ExecutionHandler::Slurm(j) => j.cancel().await,
            ExecutionHandler::Pbs(j) => j.cancel().await,
        }
    }

    /// Stream lines appended to the output file to stdout.
    ///
    /// `seconds > 0` bounds the stream; `seconds == 0` streams until the job
    /// reaches a terminal state or the caller interrupts with ctrl-c.
    pub async fn updates(&mut self, seconds: u64) -> Result<()> {
        let path = self.output_file().to_path_buf();
        let deadline = (seconds > 0).then(|| Instant::now() + Duration::from_secs(seconds));
        let mut offset: u64 = 0;

        loop {
            offset = drain_new_output(&path, offset).await?;

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    break;
                }
            }
            if self.status().await?.is_terminal() {
                // One final drain so the tail of the file is not lost.
                drain_new_output(&path, offset).await?;
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                _ = tokio::signal::ctrl_c() => {
                    debug!("output streaming interrupted");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Handler id: scheduler job id or local PID, once submitted.
    pub fn id(&self) -> Option<String> {
        match self {
            ExecutionHandler::Local(p) => p.id(),
            ExecutionHandler::Slurm(j) => j.id(),
            ExecutionHandler::Pbs(j) => j.id(),
        }
    }

    /// The submission script text; local processes have none.
    pub fn script(&self) -> Option<String> {
        match self {
            ExecutionHandler::Local(_) => None,
            ExecutionHandler::Slurm(j) => Some(j.script()),
            ExecutionHandler::Pbs(j) => Some(j.script()),
        }
    }

    pub fn script_path(&self) -> Option<&Path> {
        match self {
            ExecutionHandler::Local(_) => None,
            ExecutionHandler::Slurm(j) => Some(j.script_path()),
            ExecutionHandler::Pbs(j) => Some(j.script_path()),
        }
    }

    pub fn output_file(&self) -> &Path {
        match self {
            ExecutionHandler::Local(p) => p.output_file(),
            ExecutionHandler::Slurm(j) => j.output_file(),
            ExecutionHandler::Pbs(j) => j.output_file(),
        }
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ExecutionHandler::Local(p) => p.submitted_at(),
            ExecutionHandler::Slurm(j) => j.submitted_at(),
            ExecutionHandler::Pbs(j) => j.submitted_at(),
        }
    }

    /// Serializable identity of this handler for persistence.
    pub fn record(&self) -> HandlerRecord {
        match self {
            ExecutionHandler::Local(p) => HandlerRecord {
                kind: HandlerKind::Local,
                handler_id: p.id(),
                command: p.command().to_string(),
                run_dir: p.run_dir().to_path_buf(),
                output_file: p.output_file().to_path_buf(),
                script_path: None,
                spec: None,
                submitted_at: p.submitted_at(),
            },
            ExecutionHandler::Slurm(j) => HandlerRecord {
                kind: HandlerKind::Slurm,
                handler_id: j.id(),
                command: j.spec().command.clone(),
                run_dir: j.spec().run_dir.clone(),
                output_file: j.output_file().to_path_buf(),
                script_path: Some(j.script_path().to_path_buf()),
                spec: Some(j.spec().clone()),
                submitted_at: j.submitted_at(),
            },
            ExecutionHandler::Pbs(j) => HandlerRecord {
                kind: HandlerKind::Pbs,
                handler_id: j.id(),
                command: j.spec().command.clone(),
                run_dir: j.spec().run_dir.clone(),
                output_file: j.output_file().to_path_buf(),
                script_path: Some(j.script_path().to_path_buf()),
                spec: Some(j.spec().clone()),
                submitted_at: j.submitted_at(),
            },
        }
    }

    /// Rebuild a handler from its persisted identity.
    pub fn from_record(record: &HandlerRecord) -> Result<ExecutionHandler> {
        match record.kind {
            HandlerKind::Local => {
                let pid = record
                    .handler_id
                    .as_deref()
                    .and_then(|s| s.parse::<u32>().ok())
                    .ok_or_else(|| {
                        CstarError::Validation(
                            "persisted local handler has no usable PID".to_string(),
                        )
                    })?;
                Ok(ExecutionHandler::Local(LocalProcess::attach(
                    record.command.clone(),
                    record.run_dir.clone(),
                    record.output_file.clone(),
                    pid,
                    record.submitted_at,
                )))
            }
            HandlerKind::Slurm | HandlerKind::Pbs => {
                let spec = record.spec.clone().ok_or_else(|| {
                    CstarError::Validation(
                        "persisted scheduler handler is missing its job spec".to_string(),
                    )
                })?;
                let script_path = record.script_path.clone().ok_or_else(|| {
                    CstarError::Validation(
                        "persisted scheduler handler is missing its script path".to_string(),
                    )
                })?;
                let id = record.handler_id.clone().ok_or_else(|| {
                    CstarError::Validation(
                        "persisted scheduler handler was never submitted".to_string(),
                    )
                })?;
                Ok(match record.kind {
                    HandlerKind::Slurm => ExecutionHandler::Slurm(SlurmJob::attach(
                        spec,
                        script_path,
                        id,
                        record.submitted_at,
                    )),
                    _ => ExecutionHandler::Pbs(PbsJob::attach(
                        spec,
                        script_path,
                        id,
                        record.submitted_at,
                    )),
                })
            }
        }
    }
}

/// Which execution target a persisted handler belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Local,
    Slurm,
    Pbs,
}

/// Serializable identity of an execution handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerRecord {
    pub kind: HandlerKind,
    pub handler_id: Option<String>,
    pub command: String,
    pub run_dir: PathBuf,
    pub output_file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<JobSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Print any bytes appended past `offset`, returning the new offset.
async fn drain_new_output(path: &Path, offset: u64) -> Result<u64> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(offset),
        Err(e) => return Err(CstarError::io(path, e)),
    };
    let len = data.len() as u64;
    if len > offset {
        print!("{}", String::from_utf8_lossy(&data[offset as usize..]));
    }
    Ok(len.max(offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_handler_roundtrips_through_record() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output/job.out");
        let mut handler =
            ExecutionHandler::Local(LocalProcess::new("echo recorded", dir.path(), &out));
        handler.submit().await.unwrap();

        let record = handler.record();
        assert_eq!(record.kind, HandlerKind::Local);
        assert!(record.handler_id.is_some());

        let mut rebuilt = ExecutionHandler::from_record(&record).unwrap();
        // Eventually terminal with the same identity.
        let mut last = JobStatus::Unknown;
        for _ in 0..50 {
            last = rebuilt.status().await.unwrap();
            if last.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(last, JobStatus::Completed);
        assert_eq!(rebuilt.id(), record.handler_id);
    }

    #[test]
    fn scheduler_record_requires_spec() {
        let record = HandlerRecord {
            kind: HandlerKind::Slurm,
            handler_id: Some("1".to_string()),
            command: "srun ./roms".to_string(),
            run_dir: PathBuf::from("/w"),
            output_file: PathBuf::from("/w/output/j.out"),
            script_path: None,
            spec: None,
            submitted_at: None,
        };
        assert!(ExecutionHandler::from_record(&record).is_err());
    }

    #[tokio::test]
    async fn updates_bounded_duration_prints_and_returns() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output/job.out");
        let mut handler = ExecutionHandler::Local(LocalProcess::new(
            "echo line1; echo line2",
            dir.path(),
            &out,
        ));
        handler.submit().await.unwrap();
        // Bounded streaming terminates even though seconds > job runtime.
        handler.updates(1).await.unwrap();
    }
}
