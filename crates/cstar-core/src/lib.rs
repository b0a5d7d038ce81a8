//! C-Star core: simulation lifecycle and execution handling.
//!
//! Re-exports the domain model and the components of the orchestration
//! engine: host detection, resource acquisition and staging, external
//! codebases, input datasets, runtime settings, execution handlers, the
//! [`Simulation`] aggregate, and the blueprint codec.

pub mod blueprint;
pub mod code;
pub mod codebase;
pub mod dataset;
pub mod domain;
pub mod execution;
pub mod resource;
pub mod retriever;
pub mod settings;
pub mod simulation;
pub mod stager;
pub mod system;

pub use blueprint::{Blueprint, SchemaFlavor};
pub use code::AdditionalCode;
pub use codebase::{ConfigStatus, ExternalCodeBase};
pub use dataset::{DatasetRole, DatasetSource, InputDataset};
pub use domain::{CstarError, DateRange, Discretization, ErrorKind, FileHash, Result, SimDate};
pub use execution::{
    ExecutionHandler, HandlerKind, HandlerRecord, JobSpec, JobStatus, LocalProcess, PbsJob,
    SlurmJob,
};
pub use resource::{Location, Resource};
pub use retriever::{LocalRepoStatus, SourceRetriever};
pub use settings::RuntimeSettings;
pub use simulation::{RunOptions, Simulation, SimulationPhase};
pub use stager::{HashPolicy, Stager};
pub use system::{HostProfile, SchedulerFlavor, SubmitContext, SystemManager};
