//! Rank grid and time step.

use serde::{Deserialize, Serialize};

/// Domain decomposition and model time step.
///
/// The model executable is compiled for exactly `n_procs_x * n_procs_y`
/// ranks; a simulation refuses to run against an executable built for a
/// different layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discretization {
    /// MPI ranks along x.
    pub n_procs_x: u32,

    /// MPI ranks along y.
    pub n_procs_y: u32,

    /// Baroclinic time step in seconds.
    pub time_step: u32,
}

impl Discretization {
    pub fn new(n_procs_x: u32, n_procs_y: u32, time_step: u32) -> Self {
        Discretization {
            n_procs_x,
            n_procs_y,
            time_step,
        }
    }

    /// Total rank count.
    pub fn n_procs(&self) -> u32 {
        self.n_procs_x * self.n_procs_y
    }

    /// Number of time steps needed to cover `seconds` of model time.
    pub fn steps_for(&self, seconds: i64) -> i64 {
        if self.time_step == 0 {
            return 0;
        }
        seconds / i64::from(self.time_step)
    }
}
