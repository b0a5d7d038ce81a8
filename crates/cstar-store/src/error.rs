//! Error types for cstar-store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the file-backed persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted record failed to serialize or deserialize.
    #[error("serialization failed for {path}: {message}")]
    Serialization { path: PathBuf, message: String },

    /// A Job Record exists for the run-ID but was written for a different
    /// workplan.
    #[error("run ID {run_id} already used for a different workplan (stored digest {stored}, submitted {submitted})")]
    DigestConflict {
        run_id: String,
        stored: String,
        submitted: String,
    },

    /// A Job Record was written by a newer schema than this build understands.
    #[error("unsupported job record schema version {found} at {path} (supported: {supported})")]
    UnsupportedSchema {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    /// The run directory is owned by another live orchestrator process.
    #[error("run directory {path} is locked by pid {pid}")]
    Locked { path: PathBuf, pid: u32 },

    /// The user's home directory could not be determined.
    #[error("cannot resolve home directory: HOME is unset")]
    NoHome,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_conflict_display() {
        let err = StoreError::DigestConflict {
            run_id: "r1".to_string(),
            stored: "abc".to_string(),
            submitted: "def".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("r1"));
        assert!(msg.contains("abc"));
        assert!(msg.contains("def"));
    }

    #[test]
    fn test_locked_display() {
        let err = StoreError::Locked {
            path: PathBuf::from("/tmp/run"),
            pid: 42,
        };
        assert!(err.to_string().contains("pid 42"));
    }
}
