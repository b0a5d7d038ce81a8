//! Host detection and per-system execution environment.
//!
//! The [`SystemManager`] classifies the host once per process and answers
//! every scheduler-shaped question after that: which batch system (if any),
//! which queues with which wall-time caps, which directives a submission
//! script must carry, and which compiler family model makefiles get.
//!
//! Detection never fails; missing scheduler accounts and queues only fail at
//! submission time, when they are actually needed.

pub mod registry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::error::{CstarError, Result};

pub use registry::{CompilerFamily, QueueSpec, SchedulerFlavor, SystemSpec};

/// Classification of the host this process runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostProfile {
    /// Plain Linux box with no batch scheduler.
    GenericUnix,

    /// Apple-silicon macOS workstation.
    MacosArm,

    /// A known cluster from the registry.
    Cluster(SystemSpec),
}

/// Everything a scheduler submission needs, resolved and validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitContext {
    pub scheduler: SchedulerFlavor,
    pub account: String,
    pub queue: String,
    pub walltime: String,
    pub cores_per_node: u32,
    pub directives: BTreeMap<String, String>,
}

/// Process-wide view of the host system. Construct once and share.
#[derive(Debug, Clone)]
pub struct SystemManager {
    profile: HostProfile,
}

impl SystemManager {
    /// Probe environment variables and the hostname to classify the host.
    pub fn detect() -> Self {
        let syshost = std::env::var("CSTAR_SYSHOST")
            .or_else(|_| std::env::var("LMOD_SYSHOST"))
            .ok();
        let hostname = hostname();

        let profile = match registry::find_system(syshost.as_deref(), &hostname) {
            Some(spec) => HostProfile::Cluster(spec),
            None if cfg!(all(target_os = "macos", target_arch = "aarch64")) => {
                HostProfile::MacosArm
            }
            None => HostProfile::GenericUnix,
        };
        debug!(?profile, hostname, "classified host");
        SystemManager { profile }
    }

    /// Construct with an explicit profile (tests, overrides).
    pub fn with_profile(profile: HostProfile) -> Self {
        SystemManager { profile }
    }

    pub fn profile(&self) -> &HostProfile {
        &self.profile
    }

    /// The batch scheduler on this host, if any.
    pub fn scheduler(&self) -> Option<SchedulerFlavor> {
        match &self.profile {
            HostProfile::Cluster(spec) => Some(spec.scheduler),
            _ => None,
        }
    }

    /// Compiler family for model builds.
    pub fn compiler(&self) -> CompilerFamily {
        match &self.profile {
            HostProfile::Cluster(spec) => spec.compiler,
            _ => CompilerFamily::Gnu,
        }
    }

    /// Human-readable system name.
    pub fn name(&self) -> &str {
        match &self.profile {
            HostProfile::GenericUnix => "generic-unix",
            HostProfile::MacosArm => "macos-arm",
            HostProfile::Cluster(spec) => &spec.name,
        }
    }

    /// Resolve account/queue/walltime for a submission.
    ///
    /// Explicit arguments win; otherwise `CSTAR_SLURM_ACCOUNT` /
    /// `CSTAR_SLURM_QUEUE` / `CSTAR_SLURM_MAX_WALLTIME` (or the PBS
    /// equivalents) are consulted. A missing account or queue on a scheduler
    /// host is a [`CstarError::Configuration`]; calling this on a host with
    /// no scheduler is one too.
    pub fn submit_context(
        &self,
        account: Option<&str>,
        queue: Option<&str>,
        walltime: Option<&str>,
    ) -> Result<SubmitContext> {
        let HostProfile::Cluster(spec) = &self.profile else {
            return Err(CstarError::Configuration(format!(
                "host {} has no batch scheduler; run the simulation locally instead",
                self.name()
            )));
        };

        let prefix = match spec.scheduler {
            SchedulerFlavor::Slurm => "CSTAR_SLURM",
            SchedulerFlavor::Pbs => "CSTAR_PBS",
        };

        let account = resolve(account, &format!("{prefix}_ACCOUNT")).ok_or_else(|| {
            CstarError::Configuration(format!(
                "no scheduler account: pass one or set {prefix}_ACCOUNT"
            ))
        })?;

        let queue_name = resolve(queue, &format!("{prefix}_QUEUE"))
            .or_else(|| spec.default_queue().map(|q| q.name.clone()))
            .ok_or_else(|| {
                CstarError::Configuration(format!(
                    "no scheduler queue: pass one or set {prefix}_QUEUE"
                ))
            })?;

        let queue_spec = spec.queue(&queue_name).ok_or_else(|| {
            CstarError::Configuration(format!(
                "queue {queue_name:?} is not known on {}; known queues: {}",
                spec.name,
                spec.queues
                    .iter()
                    .map(|q| q.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        let walltime = resolve(walltime, &format!("{prefix}_MAX_WALLTIME"))
            .unwrap_or_else(|| queue_spec.max_walltime.clone());

        Ok(SubmitContext {
            scheduler: spec.scheduler,
            account,
            queue: queue_name,
            walltime,
            cores_per_node: spec.cores_per_node,
            directives: spec.directives.clone(),
        })
    }
}

fn resolve(explicit: Option<&str>, var: &str) -> Option<String> {
    if let Some(v) = explicit {
        return Some(v.to_string());
    }
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

fn hostname() -> String {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slurm_profile() -> HostProfile {
        HostProfile::Cluster(registry::find_system(Some("perlmutter"), "").unwrap())
    }

    #[test]
    fn no_scheduler_on_generic_host() {
        let sys = SystemManager::with_profile(HostProfile::GenericUnix);
        assert!(sys.scheduler().is_none());
        assert!(sys
            .submit_context(Some("acct"), None, None)
            .is_err());
    }

    #[test]
    fn submit_context_resolves_defaults() {
        let sys = SystemManager::with_profile(slurm_profile());
        let ctx = sys
            .submit_context(Some("m1234"), Some("debug"), Some("00:10:00"))
            .unwrap();
        assert_eq!(ctx.scheduler, SchedulerFlavor::Slurm);
        assert_eq!(ctx.account, "m1234");
        assert_eq!(ctx.queue, "debug");
        assert_eq!(ctx.walltime, "00:10:00");
        assert_eq!(ctx.directives.get("constraint").unwrap(), "cpu");
    }

    #[test]
    fn missing_account_is_configuration_error() {
        let sys = SystemManager::with_profile(slurm_profile());
        // No explicit account; env var is absent in the test environment.
        std::env::remove_var("CSTAR_SLURM_ACCOUNT");
        let err = sys.submit_context(None, Some("debug"), None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn unknown_queue_rejected() {
        let sys = SystemManager::with_profile(slurm_profile());
        let err = sys
            .submit_context(Some("m1234"), Some("gpu-nope"), None)
            .unwrap_err();
        assert!(err.to_string().contains("gpu-nope"));
    }

    #[test]
    fn default_queue_walltime_used_when_unset() {
        let sys = SystemManager::with_profile(slurm_profile());
        std::env::remove_var("CSTAR_SLURM_QUEUE");
        std::env::remove_var("CSTAR_SLURM_MAX_WALLTIME");
        let ctx = sys.submit_context(Some("m1234"), None, None).unwrap();
        assert_eq!(ctx.queue, "regular");
        assert_eq!(ctx.walltime, "48:00:00");
    }
}
