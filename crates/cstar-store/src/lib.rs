//! C-Star file-backed state persistence.
//!
//! This crate is the persistence layer for the C-Star orchestrator. All
//! durable state lives in plain files under `$CSTAR_HOME` and `$CSTAR_OUTDIR`:
//!
//! ## Layer 0 - Data/Persistence
//!
//! - `EnvironmentStore`: the per-user `.cstar.env` key/value file recording
//!   installed codebase roots and user-pinned variables
//! - `JobRecord`: the run-ID-keyed `state.json` tracking workplan step
//!   progress across sessions
//! - `RunDirLock`: PID-bearing lockfile guarding exclusive ownership of a
//!   run directory

mod env_store;
mod error;
mod job_record;
mod lock;
mod paths;

pub use env_store::EnvironmentStore;
pub use error::StoreError;
pub use job_record::{JobRecord, StepRecord, StepStatus, JOB_RECORD_SCHEMA_VERSION};
pub use lock::RunDirLock;
pub use paths::{absolutize, cstar_home, cstar_outdir, expand_tilde};

/// Result type for cstar-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
