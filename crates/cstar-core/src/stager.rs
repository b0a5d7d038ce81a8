//! Working-copy materialization of resources.
//!
//! The stager turns a [`Resource`] into files under a simulation's working
//! directory: a single file copied or downloaded, or a listed set of files
//! lifted out of a cached repository clone. Staging is idempotent; a file
//! already present with the expected hash is left untouched.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::domain::error::{CstarError, Result};
use crate::domain::FileHash;
use crate::resource::{Location, Resource};
use crate::retriever::SourceRetriever;

/// How a hash mismatch on an already-present or local file is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashPolicy {
    /// Mismatch is an [`CstarError::Integrity`] (remote datasets).
    Enforce,
    /// Mismatch logs a warning and proceeds (local datasets).
    Advisory,
}

/// Materializes resources into working directories.
#[derive(Debug, Clone, Default)]
pub struct Stager {
    retriever: SourceRetriever,
}

impl Stager {
    pub fn new(retriever: SourceRetriever) -> Self {
        Stager { retriever }
    }

    pub fn retriever(&self) -> &SourceRetriever {
        &self.retriever
    }

    /// Stage a file resource into `target_dir`, returning the staged path.
    ///
    /// Idempotent: a present file with a matching hash is a no-op. A present
    /// file with a mismatched hash fails under [`HashPolicy::Enforce`] unless
    /// `force` re-fetches it.
    pub async fn stage_file(
        &self,
        resource: &mut Resource,
        target_dir: &Path,
        policy: HashPolicy,
        force: bool,
    ) -> Result<PathBuf> {
        let name = resource.location.basename().ok_or_else(|| {
            CstarError::Validation(format!(
                "cannot derive a file name from {}",
                resource.location
            ))
        })?;
        let dest = target_dir.join(&name);

        if dest.exists() && !force {
            match self.check_existing(&dest, resource.file_hash.as_ref(), policy)? {
                true => {
                    debug!(dest = %dest.display(), "already staged, skipping");
                    resource.working_path = Some(dest.clone());
                    return Ok(dest);
                }
                false => {} // fall through to re-stage
            }
        }

        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| CstarError::io(target_dir, e))?;

        match &resource.location {
            Location::Url(url) => {
                let expected = match policy {
                    HashPolicy::Enforce => resource.file_hash.as_ref(),
                    HashPolicy::Advisory => None,
                };
                self.retriever.fetch_file(url, &dest, expected).await?;
            }
            Location::Path(path) => {
                let src = cstar_store::absolutize(path)?;
                if !src.exists() {
                    return Err(CstarError::Validation(format!(
                        "local resource {} does not exist",
                        src.display()
                    )));
                }
                verify_hash(&src, resource.file_hash.as_ref(), policy)?;
                tokio::fs::copy(&src, &dest)
                    .await
                    .map_err(|e| CstarError::io(&dest, e))?;
                debug!(src = %src.display(), dest = %dest.display(), "copied local file");
            }
        }

        resource.working_path = Some(dest.clone());
        Ok(dest)
    }

    /// Stage selected files from a repository resource into `target_dir`.
    ///
    /// The repository is cloned once into the per-user cache
    /// (`$CSTAR_HOME/cache/repos`) and the listed files, resolved against
    /// `resource.subdir`, are copied out.
    pub async fn stage_repo_files(
        &self,
        resource: &mut Resource,
        files: &[String],
        target_dir: &Path,
    ) -> Result<PathBuf> {
        let url = resource.location.to_string();
        let reference = resource
            .checkout_target
            .as_deref()
            .ok_or_else(|| {
                CstarError::Validation(format!("repository resource {url} has no checkout_target"))
            })?;

        let cache = repo_cache_dir(&url, reference)?;
        let clone = self.retriever.fetch_repo(&url, reference, &cache).await?;

        let src_root = match &resource.subdir {
            Some(sub) => clone.join(sub),
            None => clone.clone(),
        };
        if !src_root.is_dir() {
            return Err(CstarError::Validation(format!(
                "subdirectory {} not present in {url} at {reference}",
                src_root.display()
            )));
        }

        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| CstarError::io(target_dir, e))?;
        for file in files {
            let src = src_root.join(file);
            if !src.is_file() {
                return Err(CstarError::Validation(format!(
                    "listed file {file} not present under {}",
                    src_root.display()
                )));
            }
            let dest = target_dir.join(file);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CstarError::io(parent, e))?;
            }
            tokio::fs::copy(&src, &dest)
                .await
                .map_err(|e| CstarError::io(&dest, e))?;
        }
        info!(url, reference, count = files.len(), dest = %target_dir.display(), "staged repository files");

        resource.working_path = Some(target_dir.to_path_buf());
        Ok(target_dir.to_path_buf())
    }

    /// Stage files from a local directory resource into `target_dir`.
    pub async fn stage_local_files(
        &self,
        resource: &mut Resource,
        files: &[String],
        target_dir: &Path,
    ) -> Result<PathBuf> {
        let Location::Path(src_dir) = &resource.location else {
            return self.stage_repo_files(resource, files, target_dir).await;
        };
        let src_root = match &resource.subdir {
            Some(sub) => cstar_store::absolutize(src_dir)?.join(sub),
            None => cstar_store::absolutize(src_dir)?,
        };

        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| CstarError::io(target_dir, e))?;
        for file in files {
            let src = src_root.join(file);
            if !src.is_file() {
                return Err(CstarError::Validation(format!(
                    "listed file {file} not present under {}",
                    src_root.display()
                )));
            }
            let dest = target_dir.join(file);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CstarError::io(parent, e))?;
            }
            tokio::fs::copy(&src, &dest)
                .await
                .map_err(|e| CstarError::io(&dest, e))?;
        }

        resource.working_path = Some(target_dir.to_path_buf());
        Ok(target_dir.to_path_buf())
    }

    /// Returns `Ok(true)` when the existing file can be kept.
    fn check_existing(
        &self,
        dest: &Path,
        expected: Option<&FileHash>,
        policy: HashPolicy,
    ) -> Result<bool> {
        let Some(expected) = expected else {
            return Ok(true);
        };
        let actual = FileHash::of_file(dest)?;
        if &actual == expected {
            return Ok(true);
        }
        match policy {
            HashPolicy::Enforce => Err(CstarError::Integrity {
                path: dest.to_path_buf(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            }),
            HashPolicy::Advisory => {
                warn!(
                    path = %dest.display(),
                    expected = %expected.short(),
                    actual = %actual.short(),
                    "hash mismatch on local file, keeping it"
                );
                Ok(true)
            }
        }
    }
}

fn verify_hash(path: &Path, expected: Option<&FileHash>, policy: HashPolicy) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = FileHash::of_file(path)?;
    if &actual == expected {
        return Ok(());
    }
    match policy {
        HashPolicy::Enforce => Err(CstarError::Integrity {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
        HashPolicy::Advisory => {
            warn!(
                path = %path.display(),
                expected = %expected.short(),
                actual = %actual.short(),
                "hash mismatch on local file, proceeding"
            );
            Ok(())
        }
    }
}

/// Cache slot for a `(url, ref)` pair under `$CSTAR_HOME/cache/repos`.
fn repo_cache_dir(url: &str, reference: &str) -> Result<PathBuf> {
    let sanitized: String = url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            c
        } else {
            '_'
        })
        .collect();
    Ok(cstar_store::cstar_home()?
        .join("cache")
        .join("repos")
        .join(format!("{sanitized}@{reference}")))
}
