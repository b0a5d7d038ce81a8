//! PID-bearing lockfile for run directories.
//!
//! The orchestrator takes this lock before touching a Job Record so that two
//! processes cannot drive the same run-ID at once. A lockfile whose recorded
//! PID is no longer alive is considered stale and taken over.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::StoreError;
use crate::Result;

const LOCK_FILE_NAME: &str = "orchestrator.lock";

/// Held lock on a run directory. Best-effort removal on drop.
#[derive(Debug)]
pub struct RunDirLock {
    path: PathBuf,
}

impl RunDirLock {
    /// Acquire the lock for `run_dir`, writing our PID into it.
    pub fn acquire(run_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(run_dir).map_err(|e| StoreError::io(run_dir, e))?;
        let path = run_dir.join(LOCK_FILE_NAME);

        if let Ok(contents) = std::fs::read_to_string(&path) {
            if let Ok(pid) = contents.trim().parse::<u32>() {
                if pid_alive(pid) {
                    return Err(StoreError::Locked {
                        path: run_dir.to_path_buf(),
                        pid,
                    });
                }
                warn!(path = %path.display(), pid, "replacing stale lock from dead process");
            }
        }

        std::fs::write(&path, format!("{}\n", std::process::id()))
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(RunDirLock { path })
    }

    /// Path of the lockfile.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunDirLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Probe whether a PID is alive with signal 0.
fn pid_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        {
            let lock = RunDirLock::acquire(dir.path()).unwrap();
            assert!(lock.path().exists());
            // Same directory, same live PID file: second acquire fails.
            let err = RunDirLock::acquire(dir.path()).unwrap_err();
            assert!(matches!(err, StoreError::Locked { .. }));
        }
        // Dropped: lockfile removed, re-acquire succeeds.
        let _lock = RunDirLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn stale_lock_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        // PIDs wrap below ~4 million; u32::MAX is never a live process.
        std::fs::write(dir.path().join(LOCK_FILE_NAME), "4294967295\n").unwrap();
        let _lock = RunDirLock::acquire(dir.path()).unwrap();
    }
}
