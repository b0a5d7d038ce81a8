//! Job status taxonomy shared by every execution target.

use serde::{Deserialize, Serialize};

/// Observed state of a submitted (or not yet submitted) job.
///
/// `Held` and `Ending` are transient scheduler states; `Unknown` means the
/// last scheduler query failed and the previous reading still stands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Unsubmitted,
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
    Held,
    Ending,
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }

    /// Map a SLURM state word (squeue `%T` or sacct `State`) to a status.
    ///
    /// sacct suffixes like `CANCELLED by 1234` are accepted.
    pub fn from_slurm_state(word: &str) -> JobStatus {
        let word = word
            .trim()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        // Trailing '+' marks a truncated sacct state column.
        let word = word.trim_end_matches('+');
        match word {
            "PENDING" | "CONFIGURING" => JobStatus::Pending,
            "RUNNING" => JobStatus::Running,
            "COMPLETED" => JobStatus::Completed,
            "CANCELLED" | "DEADLINE" | "PREEMPTED" | "REVOKED" => JobStatus::Cancelled,
            "FAILED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" | "BOOT_FAIL" => {
                JobStatus::Failed
            }
            "SUSPENDED" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" | "RESV_DEL_HOLD" => {
                JobStatus::Held
            }
            "COMPLETING" | "STAGE_OUT" | "SIGNALING" => JobStatus::Ending,
            _ => JobStatus::Unknown,
        }
    }

    /// Map a PBS `job_state` letter; `F` is split on the recorded exit
    /// status.
    pub fn from_pbs_state(state: &str, exit_status: Option<i64>) -> JobStatus {
        match state.trim().to_ascii_uppercase().as_str() {
            "Q" | "W" | "T" => JobStatus::Pending,
            "R" | "B" => JobStatus::Running,
            "H" | "S" | "U" => JobStatus::Held,
            "E" => JobStatus::Ending,
            "F" | "X" => match exit_status {
                Some(0) => JobStatus::Completed,
                Some(_) => JobStatus::Failed,
                None => JobStatus::Completed,
            },
            _ => JobStatus::Unknown,
        }
    }

    /// The on-disk step status this runtime status maps to.
    pub fn as_step_status(self) -> cstar_store::StepStatus {
        use cstar_store::StepStatus as S;
        match self {
            JobStatus::Unsubmitted => S::Unsubmitted,
            JobStatus::Pending => S::Pending,
            JobStatus::Running => S::Running,
            JobStatus::Completed => S::Completed,
            JobStatus::Cancelled => S::Cancelled,
            JobStatus::Failed => S::Failed,
            JobStatus::Held => S::Held,
            JobStatus::Ending => S::Ending,
            JobStatus::Unknown => S::Unknown,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Unsubmitted => "UNSUBMITTED",
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Failed => "FAILED",
            JobStatus::Held => "HELD",
            JobStatus::Ending => "ENDING",
            JobStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slurm_state_words() {
        assert_eq!(JobStatus::from_slurm_state("PENDING"), JobStatus::Pending);
        assert_eq!(JobStatus::from_slurm_state("RUNNING"), JobStatus::Running);
        assert_eq!(
            JobStatus::from_slurm_state("COMPLETED"),
            JobStatus::Completed
        );
        assert_eq!(
            JobStatus::from_slurm_state("CANCELLED by 1234"),
            JobStatus::Cancelled
        );
        assert_eq!(JobStatus::from_slurm_state("TIMEOUT"), JobStatus::Failed);
        assert_eq!(JobStatus::from_slurm_state("CANCELLED+"), JobStatus::Cancelled);
        assert_eq!(JobStatus::from_slurm_state("COMPLETING"), JobStatus::Ending);
        assert_eq!(JobStatus::from_slurm_state("wat"), JobStatus::Unknown);
    }

    #[test]
    fn pbs_state_letters() {
        assert_eq!(JobStatus::from_pbs_state("Q", None), JobStatus::Pending);
        assert_eq!(JobStatus::from_pbs_state("R", None), JobStatus::Running);
        assert_eq!(JobStatus::from_pbs_state("H", None), JobStatus::Held);
        assert_eq!(JobStatus::from_pbs_state("E", None), JobStatus::Ending);
        assert_eq!(
            JobStatus::from_pbs_state("F", Some(0)),
            JobStatus::Completed
        );
        assert_eq!(JobStatus::from_pbs_state("F", Some(137)), JobStatus::Failed);
    }

    #[test]
    fn terminal_set() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Ending.is_terminal());
        assert!(!JobStatus::Unknown.is_terminal());
    }
}
