//! The run-ID-keyed Job Record.
//!
//! One JSON file per workplan invocation, at `$CSTAR_OUTDIR/<run_id>/state.json`.
//! Re-invoking a workplan with the same run-ID reads this file and resumes;
//! a different workplan under the same run-ID is a conflict unless forced.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::Result;

/// Current schema version written by this build.
pub const JOB_RECORD_SCHEMA_VERSION: u32 = 1;

/// Status of one workplan step as recorded on disk.
///
/// Mirrors the runtime job status, plus `Skipped` for steps whose
/// dependencies failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Unsubmitted,
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
    Skipped,
    Held,
    Ending,
    Unknown,
}

impl StepStatus {
    /// Whether the step needs no further scheduling attention.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Cancelled | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Unsubmitted => "UNSUBMITTED",
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Cancelled => "CANCELLED",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
            StepStatus::Held => "HELD",
            StepStatus::Ending => "ENDING",
            StepStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Per-step bookkeeping inside a [`JobRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    /// Last observed status.
    pub status: StepStatus,

    /// Scheduler or process id once submitted.
    pub handler_id: Option<String>,

    /// Path of the job's output file.
    pub output_path: Option<PathBuf>,

    /// Path of the generated submission script, when a scheduler is used.
    pub script_path: Option<PathBuf>,

    /// When the step was submitted.
    pub submitted_at: Option<DateTime<Utc>>,

    /// When the step reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// A fresh, never-submitted step.
    pub fn unsubmitted() -> Self {
        StepRecord {
            status: StepStatus::Unsubmitted,
            handler_id: None,
            output_path: None,
            script_path: None,
            submitted_at: None,
            finished_at: None,
        }
    }
}

/// Persistent state of one workplan invocation, keyed by run-ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    /// Schema version of this file.
    pub schema_version: u32,

    /// User-supplied run identifier.
    pub run_id: String,

    /// Digest of the canonicalized workplan this record belongs to.
    pub workplan_digest: String,

    /// Per-step state, keyed by step name.
    pub steps: BTreeMap<String, StepRecord>,

    /// When the record was first created.
    pub created_at: DateTime<Utc>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a fresh record for the named steps, all `UNSUBMITTED`.
    pub fn new(run_id: &str, workplan_digest: &str, step_names: &[String]) -> Self {
        let now = Utc::now();
        JobRecord {
            schema_version: JOB_RECORD_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            workplan_digest: workplan_digest.to_string(),
            steps: step_names
                .iter()
                .map(|n| (n.clone(), StepRecord::unsubmitted()))
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Path of the record file inside a run directory.
    pub fn path_in(run_dir: &Path) -> PathBuf {
        run_dir.join("state.json")
    }

    /// Load the record for `run_dir` if present, otherwise create a fresh one.
    ///
    /// An existing record whose digest disagrees with `workplan_digest` is a
    /// [`StoreError::DigestConflict`] unless `force` is set, in which case the
    /// stored digest is replaced and step state is kept.
    pub fn load_or_init(
        run_dir: &Path,
        run_id: &str,
        workplan_digest: &str,
        step_names: &[String],
        force: bool,
    ) -> Result<Self> {
        let path = Self::path_in(run_dir);
        if !path.exists() {
            return Ok(Self::new(run_id, workplan_digest, step_names));
        }
        let mut record = Self::load(&path)?;
        if record.workplan_digest != workplan_digest {
            if !force {
                return Err(StoreError::DigestConflict {
                    run_id: run_id.to_string(),
                    stored: record.workplan_digest,
                    submitted: workplan_digest.to_string(),
                });
            }
            record.workplan_digest = workplan_digest.to_string();
        }
        // Steps added by a forced workplan edit start unsubmitted.
        for name in step_names {
            record
                .steps
                .entry(name.clone())
                .or_insert_with(StepRecord::unsubmitted);
        }
        Ok(record)
    }

    /// Read a record file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let record: JobRecord =
            serde_json::from_str(&text).map_err(|e| StoreError::Serialization {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        if record.schema_version > JOB_RECORD_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                path: path.to_path_buf(),
                found: record.schema_version,
                supported: JOB_RECORD_SCHEMA_VERSION,
            });
        }
        Ok(record)
    }

    /// Write the record atomically into `run_dir`.
    pub fn save(&mut self, run_dir: &Path) -> Result<()> {
        self.updated_at = Utc::now();
        std::fs::create_dir_all(run_dir).map_err(|e| StoreError::io(run_dir, e))?;
        let path = Self::path_in(run_dir);
        let text = serde_json::to_string_pretty(self).map_err(|e| StoreError::Serialization {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let tmp = run_dir.join("state.json.tmp");
        {
            let mut f = std::fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
            f.write_all(text.as_bytes())
                .map_err(|e| StoreError::io(&tmp, e))?;
            f.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
        }
        std::fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }

    /// Whether every step is terminal.
    pub fn all_terminal(&self) -> bool {
        self.steps.values().all(|s| s.status.is_terminal())
    }

    /// Step names with a given status.
    pub fn steps_with_status(&self, status: StepStatus) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|(_, s)| s.status == status)
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fresh_record_has_unsubmitted_steps() {
        let record = JobRecord::new("r1", "digest", &names(&["job1", "job2"]));
        assert_eq!(record.steps.len(), 2);
        assert!(record
            .steps
            .values()
            .all(|s| s.status == StepStatus::Unsubmitted));
        assert!(!record.all_terminal());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = JobRecord::new("r1", "digest", &names(&["job1"]));
        record.steps.get_mut("job1").unwrap().status = StepStatus::Running;
        record.steps.get_mut("job1").unwrap().handler_id = Some("12345".to_string());
        record.save(dir.path()).unwrap();

        let loaded = JobRecord::load(&JobRecord::path_in(dir.path())).unwrap();
        assert_eq!(loaded.run_id, "r1");
        assert_eq!(loaded.steps["job1"].status, StepStatus::Running);
        assert_eq!(loaded.steps["job1"].handler_id.as_deref(), Some("12345"));
    }

    #[test]
    fn load_or_init_resumes_existing_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = JobRecord::new("r1", "digest", &names(&["job1"]));
        record.steps.get_mut("job1").unwrap().status = StepStatus::Completed;
        record.save(dir.path()).unwrap();

        let resumed =
            JobRecord::load_or_init(dir.path(), "r1", "digest", &names(&["job1"]), false).unwrap();
        assert_eq!(resumed.steps["job1"].status, StepStatus::Completed);
    }

    #[test]
    fn digest_mismatch_is_conflict_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = JobRecord::new("r1", "old-digest", &names(&["job1"]));
        record.save(dir.path()).unwrap();

        let err = JobRecord::load_or_init(dir.path(), "r1", "new-digest", &names(&["job1"]), false)
            .unwrap_err();
        assert!(matches!(err, StoreError::DigestConflict { .. }));

        let forced =
            JobRecord::load_or_init(dir.path(), "r1", "new-digest", &names(&["job1"]), true)
                .unwrap();
        assert_eq!(forced.workplan_digest, "new-digest");
    }

    #[test]
    fn newer_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = JobRecord::new("r1", "digest", &names(&["job1"]));
        record.schema_version = JOB_RECORD_SCHEMA_VERSION + 1;
        record.save(dir.path()).unwrap();

        let err = JobRecord::load(&JobRecord::path_in(dir.path())).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchema { .. }));
    }

    #[test]
    fn terminal_statuses() {
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Cancelled.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(!StepStatus::Held.is_terminal());
        assert!(!StepStatus::Unknown.is_terminal());
    }
}
