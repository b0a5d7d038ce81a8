//! Local subprocess execution target.
//!
//! `submit` forks a detached shell whose whole process group can be
//! signalled; stdout and stderr are redirected into the job's output file,
//! and the exit code is dropped into `<output>.exit` so a later session can
//! classify a finished run without a scheduler to ask.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::domain::error::{CstarError, Result};
use crate::execution::status::JobStatus;

/// A job run as a local OS process.
#[derive(Debug)]
pub struct LocalProcess {
    command: String,
    run_dir: PathBuf,
    output_file: PathBuf,
    pid: Option<u32>,
    submitted_at: Option<DateTime<Utc>>,
    cancelled: bool,
    child: Option<Child>,
}

impl LocalProcess {
    pub fn new(command: impl Into<String>, run_dir: impl Into<PathBuf>, output_file: impl Into<PathBuf>) -> Self {
        LocalProcess {
            command: command.into(),
            run_dir: run_dir.into(),
            output_file: output_file.into(),
            pid: None,
            submitted_at: None,
            cancelled: false,
            child: None,
        }
    }

    /// Reconnect to a previously submitted process by PID.
    pub fn attach(
        command: impl Into<String>,
        run_dir: impl Into<PathBuf>,
        output_file: impl Into<PathBuf>,
        pid: u32,
        submitted_at: Option<DateTime<Utc>>,
    ) -> Self {
        LocalProcess {
            command: command.into(),
            run_dir: run_dir.into(),
            output_file: output_file.into(),
            pid: Some(pid),
            submitted_at,
            cancelled: false,
            child: None,
        }
    }

    /// Spawn the job in the background and return its PID as the handler id.
    ///
    /// Idempotent: a second call returns the existing id.
    pub async fn submit(&mut self) -> Result<String> {
        if let Some(pid) = self.pid {
            return Ok(pid.to_string());
        }

        if let Some(parent) = self.output_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CstarError::io(parent, e))?;
        }
        tokio::fs::create_dir_all(&self.run_dir)
            .await
            .map_err(|e| CstarError::io(&self.run_dir, e))?;

        let wrapped = format!(
            "({cmd}) > {out} 2>&1; echo $? > {out}.exit",
            cmd = self.command,
            out = shell_quote(&self.output_file),
        );
        let child = Command::new("sh")
            .arg("-c")
            .arg(&wrapped)
            .current_dir(&self.run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| CstarError::io(&self.run_dir, e))?;

        let pid = child.id().ok_or_else(|| CstarError::Scheduler {
            message: "spawned process exited before a PID could be read".to_string(),
            stderr: String::new(),
        })?;
        self.pid = Some(pid);
        self.submitted_at = Some(Utc::now());
        self.child = Some(child);
        info!(pid, command = %self.command, "spawned local process");
        Ok(pid.to_string())
    }

    /// Submit (if needed) and block until the process finishes.
    pub async fn run(&mut self) -> Result<JobStatus> {
        self.submit().await?;
        if let Some(child) = &mut self.child {
            let _ = child
                .wait()
                .await
                .map_err(|e| CstarError::io(&self.run_dir, e))?;
        } else {
            // Attached from another session: poll the exit file.
            while !self.status().await?.is_terminal() {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
        }
        self.status().await
    }

    /// Current status, derived from the exit file and a PID liveness probe.
    pub async fn status(&mut self) -> Result<JobStatus> {
        let Some(pid) = self.pid else {
            return Ok(JobStatus::Unsubmitted);
        };

        let exit_file = self.exit_file();
        match tokio::fs::read_to_string(&exit_file).await {
            Ok(text) => {
                let code: i32 = text.trim().parse().unwrap_or(-1);
                if self.cancelled {
                    return Ok(JobStatus::Cancelled);
                }
                Ok(if code == 0 {
                    JobStatus::Completed
                } else {
                    JobStatus::Failed
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.cancelled {
                    return Ok(JobStatus::Cancelled);
                }
                if pid_alive(pid).await {
                    Ok(JobStatus::Running)
                } else {
                    // Died without writing the exit file.
                    Ok(JobStatus::Failed)
                }
            }
            Err(e) => Err(CstarError::io(&exit_file, e)),
        }
    }

    /// Terminate the whole process group. Returns `false` when already
    /// terminal.
    pub async fn cancel(&mut self) -> Result<bool> {
        let status = self.status().await?;
        if status.is_terminal() || status == JobStatus::Unsubmitted {
            return Ok(false);
        }
        let pid = self.pid.expect("non-terminal implies submitted");
        debug!(pid, "cancelling local process group");
        let _ = Command::new("kill")
            .args(["-TERM", "--", &format!("-{pid}")])
            .output()
            .await;
        self.cancelled = true;
        Ok(true)
    }

    pub fn id(&self) -> Option<String> {
        self.pid.map(|p| p.to_string())
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    fn exit_file(&self) -> PathBuf {
        let mut name = self
            .output_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".exit");
        self.output_file.with_file_name(name)
    }
}

/// Probe a PID with signal 0.
async fn pid_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Single-quote a path for the shell wrapper.
fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}
