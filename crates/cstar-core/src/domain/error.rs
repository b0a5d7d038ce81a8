//! Domain-level error taxonomy for C-Star.

use std::path::PathBuf;

/// Classification of a [`CstarError`], used for retry policy and CLI exit
/// codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Required environment variable missing, host unrecognized, account or
    /// queue absent on a scheduler host.
    Configuration,
    /// Schema violation, date out of range, DAG cycle, duplicate step name.
    Validation,
    /// Hash mismatch, wrong remote on a reused clone.
    Integrity,
    /// Transient fetch failure.
    Network,
    /// Model compilation failure.
    Build,
    /// Input-dataset materialization or partitioning failure.
    Dataset,
    /// Persistent scheduler submission or poll failure after retries.
    Scheduler,
    /// Job Record digest disagrees with the submitted workplan.
    RunIdConflict,
    /// A workplan step ran and failed.
    Execution,
    /// Everything else (I/O, serialization).
    Internal,
}

/// C-Star domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CstarError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("integrity error at {path}: expected hash {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("integrity error: {0}")]
    IntegrityOther(String),

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("build failed for {name}: {message}")]
    Build {
        name: String,
        message: String,
        /// Captured stdout/stderr of the build.
        log: String,
    },

    #[error("dataset error for {path}: {message}")]
    Dataset { path: PathBuf, message: String },

    #[error("scheduler error: {message}")]
    Scheduler { message: String, stderr: String },

    #[error("run ID {run_id} already used for a different workplan (stored digest {stored}, submitted {submitted}); pass --force to override")]
    RunIdConflict {
        run_id: String,
        stored: String,
        submitted: String,
    },

    #[error("run {run_id}: step {step} failed")]
    StepFailed { run_id: String, step: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Store(#[from] cstar_store::StoreError),
}

impl CstarError {
    /// Convenience constructor for I/O failures tied to a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CstarError::Io {
            path: path.into(),
            source,
        }
    }

    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CstarError::Configuration(_) => ErrorKind::Configuration,
            CstarError::Validation(_) => ErrorKind::Validation,
            CstarError::Integrity { .. } | CstarError::IntegrityOther(_) => ErrorKind::Integrity,
            CstarError::Network { .. } => ErrorKind::Network,
            CstarError::Build { .. } => ErrorKind::Build,
            CstarError::Dataset { .. } => ErrorKind::Dataset,
            CstarError::Scheduler { .. } => ErrorKind::Scheduler,
            CstarError::RunIdConflict { .. } => ErrorKind::RunIdConflict,
            CstarError::StepFailed { .. } => ErrorKind::Execution,
            CstarError::Store(cstar_store::StoreError::DigestConflict { .. }) => {
                ErrorKind::RunIdConflict
            }
            // Malformed YAML is a schema violation from the caller's side.
            CstarError::Yaml(_) => ErrorKind::Validation,
            _ => ErrorKind::Internal,
        }
    }

    /// CLI exit code: 2 for validation failures, 3 for configuration errors,
    /// 1 for any other failure.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Validation => 2,
            ErrorKind::Configuration => 3,
            _ => 1,
        }
    }

    /// Whether local retry with backoff is appropriate.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network)
    }
}

/// Result type for C-Star domain operations.
pub type Result<T> = std::result::Result<T, CstarError>;
