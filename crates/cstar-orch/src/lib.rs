//! C-Star workplan orchestration.
//!
//! Loads a workplan (a DAG of blueprint-executing steps), plans the ready
//! frontier, submits through the execution layer, and persists progress in
//! a run-ID-keyed Job Record so a later session can resume exactly where
//! this one stopped.

pub mod dag;
pub mod digest;
pub mod launcher;
pub mod orchestrator;
pub mod transform;
pub mod workplan;

pub use digest::{digest_value, digest_yaml_text};
pub use launcher::{SimulationLauncher, StepLauncher};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunOutcome};
pub use transform::SplitFrequency;
pub use workplan::{Step, Workplan, WorkplanState};
