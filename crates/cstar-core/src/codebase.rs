//! Pinned external model codebases (UCLA-ROMS, MARBL).
//!
//! A codebase is a git repository at a fixed ref plus the recipe to compile
//! it. Install roots are recorded in the per-user environment store under
//! `<NAME>_ROOT`, so sessions after the first skip the clone-and-build unless
//! `CSTAR_FRESH_CODEBASES=1`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use cstar_store::EnvironmentStore;

use crate::domain::error::{CstarError, Result};
use crate::retriever::{LocalRepoStatus, SourceRetriever};
use crate::system::SystemManager;

/// Local-configuration state of a codebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    /// Installed at the recorded root, right remote, right commit.
    Configured,
    /// Installed but checked out at a different commit.
    WrongCommit { found: String },
    /// The recorded root is a clone of a different repository.
    WrongRemote { found: String },
    /// No usable install root recorded or present.
    Absent,
}

/// A pinned version of a model source repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCodeBase {
    /// Short name (`ROMS`, `MARBL`); uppercased for the root variable.
    pub name: String,

    pub source_repo: String,

    pub checkout_target: String,

    /// Subdirectory holding the build entry point, when not the repo root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_subdir: Option<PathBuf>,
}

impl ExternalCodeBase {
    pub fn new(name: &str, source_repo: &str, checkout_target: &str) -> Self {
        ExternalCodeBase {
            name: name.to_string(),
            source_repo: source_repo.to_string(),
            checkout_target: checkout_target.to_string(),
            build_subdir: None,
        }
    }

    /// Environment-store key recording the install root.
    pub fn root_var(&self) -> String {
        format!("{}_ROOT", self.name.to_ascii_uppercase())
    }

    /// Currently recorded install root, if any.
    pub fn local_root(&self, env: &EnvironmentStore) -> Option<PathBuf> {
        env.get(&self.root_var()).map(PathBuf::from)
    }

    /// Compute the configuration status from the recorded root.
    pub async fn config_status(
        &self,
        env: &EnvironmentStore,
        retriever: &SourceRetriever,
    ) -> ConfigStatus {
        let Some(root) = self.local_root(env) else {
            return ConfigStatus::Absent;
        };
        match retriever
            .verify_local(&root, &self.source_repo, &self.checkout_target)
            .await
        {
            Ok(LocalRepoStatus::Matches) => ConfigStatus::Configured,
            Ok(LocalRepoStatus::WrongRef { found }) => ConfigStatus::WrongCommit { found },
            Ok(LocalRepoStatus::WrongRemote { found }) => ConfigStatus::WrongRemote { found },
            Ok(LocalRepoStatus::NotARepo) | Err(_) => ConfigStatus::Absent,
        }
    }

    /// Install the codebase: fetch, build, record the root.
    ///
    /// A `Configured` codebase returns immediately (the retriever ignores
    /// reuse when `CSTAR_FRESH_CODEBASES=1`, so a fresh run re-clones).
    pub async fn get(
        &self,
        target_root: &Path,
        system: &SystemManager,
        env: &mut EnvironmentStore,
        retriever: &SourceRetriever,
    ) -> Result<()> {
        if self.config_status(env, retriever).await == ConfigStatus::Configured
            && std::env::var("CSTAR_FRESH_CODEBASES").map(|v| v == "1") != Ok(true)
        {
            debug!(name = %self.name, "codebase already configured, skipping install");
            return Ok(());
        }

        retriever
            .fetch_repo(&self.source_repo, &self.checkout_target, target_root)
            .await?;
        self.build(target_root, system).await?;

        env.set(&self.root_var(), &target_root.to_string_lossy())?;
        info!(name = %self.name, root = %target_root.display(), "installed codebase");
        Ok(())
    }

    /// Run the model's own build with the host's compiler family.
    async fn build(&self, root: &Path, system: &SystemManager) -> Result<()> {
        let build_dir = match &self.build_subdir {
            Some(sub) => root.join(sub),
            None => root.to_path_buf(),
        };
        if !build_dir.join("Makefile").exists() && !build_dir.join("makefile").exists() {
            debug!(name = %self.name, dir = %build_dir.display(), "no Makefile, skipping compile");
            return Ok(());
        }

        let output = Command::new("make")
            .arg(format!("COMPILER={}", system.compiler().as_str()))
            .current_dir(&build_dir)
            .output()
            .await
            .map_err(|e| CstarError::Build {
                name: self.name.clone(),
                message: format!("failed to run make: {e}"),
                log: String::new(),
            })?;

        if !output.status.success() {
            let log = format!(
                "{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(CstarError::Build {
                name: self.name.clone(),
                message: format!("make exited with {}", output.status),
                log,
            });
        }
        Ok(())
    }
}
