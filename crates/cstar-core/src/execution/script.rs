//! Deterministic submission-script composition.
//!
//! A [`JobSpec`] is everything a scheduler needs to place the job: name,
//! account, queue, wall time, rank count, site directives, and the final
//! application command line. Rendering the same spec always produces the
//! same bytes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inputs to submission-script generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// `cstar_job_YYYYMMDD_HHMMSS` unless the caller names the job.
    pub job_name: String,

    pub account: Option<String>,

    pub queue: Option<String>,

    /// `HH:MM:SS`.
    pub walltime: Option<String>,

    /// Total MPI rank count.
    pub n_tasks: u32,

    /// Cores per node on the target system, when known; drives the node
    /// count (SLURM) and the `select` chunk (PBS).
    pub cores_per_node: Option<u32>,

    /// Extra site directives, rendered in sorted key order.
    pub directives: BTreeMap<String, String>,

    /// Full application command line (`srun -n 6 ./roms case.in`).
    pub command: String,

    /// Directory the job runs in.
    pub run_dir: PathBuf,

    /// Where stdout/stderr land.
    pub output_file: PathBuf,
}

impl JobSpec {
    pub fn new(command: impl Into<String>, run_dir: impl Into<PathBuf>, n_tasks: u32) -> Self {
        let run_dir = run_dir.into();
        let job_name = default_job_name(Utc::now());
        let output_file = output_file_for(&run_dir, &job_name);
        JobSpec {
            job_name,
            account: None,
            queue: None,
            walltime: None,
            n_tasks,
            cores_per_node: None,
            directives: BTreeMap::new(),
            command: command.into(),
            run_dir,
            output_file,
        }
    }

    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = name.into();
        self.output_file = output_file_for(&self.run_dir, &self.job_name);
        self
    }

    /// Nodes needed for `n_tasks` at `cores_per_node`.
    pub fn n_nodes(&self) -> Option<u32> {
        self.cores_per_node
            .filter(|&c| c > 0)
            .map(|c| self.n_tasks.div_ceil(c))
    }

    /// Render the SLURM batch script.
    pub fn render_slurm(&self) -> String {
        let mut s = String::from("#!/bin/bash\n");
        let mut directive = |line: String| {
            s.push_str("#SBATCH ");
            s.push_str(&line);
            s.push('\n');
        };
        directive(format!("--job-name={}", self.job_name));
        if let Some(account) = &self.account {
            directive(format!("--account={account}"));
        }
        if let Some(queue) = &self.queue {
            directive(format!("--partition={queue}"));
        }
        if let Some(walltime) = &self.walltime {
            directive(format!("--time={walltime}"));
        }
        directive(format!("--ntasks={}", self.n_tasks));
        if let Some(nodes) = self.n_nodes() {
            directive(format!("--nodes={nodes}"));
        }
        directive(format!("--output={}", self.output_file.display()));
        for (key, value) in &self.directives {
            directive(format!("--{key}={value}"));
        }
        s.push('\n');
        s.push_str(&format!("cd {}\n", self.run_dir.display()));
        s.push_str(&self.command);
        s.push('\n');
        s
    }

    /// Render the PBS batch script.
    pub fn render_pbs(&self) -> String {
        let mut s = String::from("#!/bin/bash\n");
        let mut directive = |line: String| {
            s.push_str("#PBS ");
            s.push_str(&line);
            s.push('\n');
        };
        directive(format!("-N {}", self.job_name));
        if let Some(account) = &self.account {
            directive(format!("-A {account}"));
        }
        if let Some(queue) = &self.queue {
            directive(format!("-q {queue}"));
        }
        if let Some(walltime) = &self.walltime {
            directive(format!("-l walltime={walltime}"));
        }
        match (self.n_nodes(), self.cores_per_node) {
            (Some(nodes), Some(cores)) => {
                directive(format!("-l select={nodes}:ncpus={cores}:mpiprocs={cores}"));
            }
            _ => directive(format!("-l select=1:ncpus={n}:mpiprocs={n}", n = self.n_tasks)),
        }
        directive("-j oe".to_string());
        directive(format!("-o {}", self.output_file.display()));
        for (key, value) in &self.directives {
            directive(format!("-l {key}={value}"));
        }
        s.push('\n');
        s.push_str(&format!("cd {}\n", self.run_dir.display()));
        s.push_str(&self.command);
        s.push('\n');
        s
    }
}

/// `cstar_job_YYYYMMDD_HHMMSS`.
pub fn default_job_name(now: DateTime<Utc>) -> String {
    format!("cstar_job_{}", now.format("%Y%m%d_%H%M%S"))
}

/// `<run_dir>/output/<job_name>.out`.
pub fn output_file_for(run_dir: &Path, job_name: &str) -> PathBuf {
    run_dir.join("output").join(format!("{job_name}.out"))
}
