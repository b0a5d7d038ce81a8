//! Registry of known HPC systems.
//!
//! Adding support for a cluster is one entry here: scheduler flavor, queue
//! table, extra submission directives, compiler family, and the hostname /
//! `LMOD_SYSHOST` patterns that identify it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Batch scheduler running on a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerFlavor {
    Slurm,
    Pbs,
}

/// Compiler family passed to model makefiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerFamily {
    Gnu,
    Intel,
    Cray,
}

impl CompilerFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompilerFamily::Gnu => "gnu",
            CompilerFamily::Intel => "intel",
            CompilerFamily::Cray => "cray",
        }
    }
}

/// One scheduler queue/QoS with its caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    /// Queue (SLURM partition / QoS, PBS queue) name.
    pub name: String,

    /// Maximum wall time, `HH:MM:SS`.
    pub max_walltime: String,

    /// Maximum cores a job may request, when the site caps it.
    pub max_cores: Option<u32>,
}

/// Static description of one known cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSpec {
    /// Canonical system name (matches `CSTAR_SYSHOST`/`LMOD_SYSHOST`).
    pub name: String,

    /// Hostname substrings that also identify the system.
    pub hostname_patterns: Vec<String>,

    pub scheduler: SchedulerFlavor,

    /// Queues in preference order; the first is the default.
    pub queues: Vec<QueueSpec>,

    /// Physical cores per compute node, used to derive node counts.
    pub cores_per_node: u32,

    /// Extra scheduler directives required by the site
    /// (e.g. `constraint=cpu` on SLURM, `l=job_priority` on PBS).
    pub directives: BTreeMap<String, String>,

    pub compiler: CompilerFamily,

    /// Whether login nodes may run MPI directly (used by local fallbacks).
    pub mpi_on_login: bool,
}

impl SystemSpec {
    /// Default queue for this system.
    pub fn default_queue(&self) -> Option<&QueueSpec> {
        self.queues.first()
    }

    /// Look up a queue by name.
    pub fn queue(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }
}

fn directives(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The built-in system table.
pub fn known_systems() -> Vec<SystemSpec> {
    vec![
        SystemSpec {
            name: "perlmutter".to_string(),
            hostname_patterns: vec!["perlmutter".to_string(), "login".to_string()],
            scheduler: SchedulerFlavor::Slurm,
            queues: vec![
                QueueSpec {
                    name: "regular".to_string(),
                    max_walltime: "48:00:00".to_string(),
                    max_cores: None,
                },
                QueueSpec {
                    name: "debug".to_string(),
                    max_walltime: "00:30:00".to_string(),
                    max_cores: Some(256),
                },
                QueueSpec {
                    name: "shared".to_string(),
                    max_walltime: "48:00:00".to_string(),
                    max_cores: Some(64),
                },
            ],
            cores_per_node: 128,
            directives: directives(&[("constraint", "cpu")]),
            compiler: CompilerFamily::Gnu,
            mpi_on_login: false,
        },
        SystemSpec {
            name: "expanse".to_string(),
            hostname_patterns: vec!["expanse".to_string()],
            scheduler: SchedulerFlavor::Slurm,
            queues: vec![
                QueueSpec {
                    name: "compute".to_string(),
                    max_walltime: "48:00:00".to_string(),
                    max_cores: None,
                },
                QueueSpec {
                    name: "debug".to_string(),
                    max_walltime: "00:30:00".to_string(),
                    max_cores: Some(128),
                },
            ],
            cores_per_node: 128,
            directives: BTreeMap::new(),
            compiler: CompilerFamily::Intel,
            mpi_on_login: false,
        },
        SystemSpec {
            name: "derecho".to_string(),
            hostname_patterns: vec!["derecho".to_string(), "de1".to_string()],
            scheduler: SchedulerFlavor::Pbs,
            queues: vec![
                QueueSpec {
                    name: "main".to_string(),
                    max_walltime: "12:00:00".to_string(),
                    max_cores: None,
                },
                QueueSpec {
                    name: "develop".to_string(),
                    max_walltime: "06:00:00".to_string(),
                    max_cores: Some(256),
                },
            ],
            cores_per_node: 128,
            directives: directives(&[("job_priority", "regular")]),
            compiler: CompilerFamily::Intel,
            mpi_on_login: false,
        },
    ]
}

/// Find a system by `CSTAR_SYSHOST`/`LMOD_SYSHOST` value or hostname.
pub fn find_system(syshost: Option<&str>, hostname: &str) -> Option<SystemSpec> {
    let systems = known_systems();
    if let Some(sh) = syshost {
        let sh = sh.to_ascii_lowercase();
        if let Some(s) = systems.iter().find(|s| s.name == sh) {
            return Some(s.clone());
        }
    }
    let hostname = hostname.to_ascii_lowercase();
    systems
        .into_iter()
        .find(|s| s.hostname_patterns.iter().any(|p| hostname.contains(p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syshost_wins_over_hostname() {
        let s = find_system(Some("derecho"), "perlmutter-login01").unwrap();
        assert_eq!(s.name, "derecho");
        assert_eq!(s.scheduler, SchedulerFlavor::Pbs);
    }

    #[test]
    fn hostname_pattern_match() {
        let s = find_system(None, "expanse-ln2.sdsc.edu").unwrap();
        assert_eq!(s.name, "expanse");
    }

    #[test]
    fn unknown_host_is_none() {
        assert!(find_system(None, "my-laptop.local").is_none());
    }

    #[test]
    fn queue_lookup() {
        let s = find_system(Some("perlmutter"), "").unwrap();
        assert_eq!(s.default_queue().unwrap().name, "regular");
        assert_eq!(s.queue("debug").unwrap().max_walltime, "00:30:00");
        assert!(s.queue("nope").is_none());
    }
}
