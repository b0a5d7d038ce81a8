//! Deterministic acquisition of remote files and git repositories.
//!
//! Files stream over HTTPS into a temp file, are hash-verified, and move
//! atomically into place. Repositories go through the `git` CLI: shallow
//! clone for branches and tags, full clone for pinned commits, detached
//! checkout either way. An existing clone is reused when its remote matches
//! and `CSTAR_FRESH_CODEBASES` is not set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::error::{CstarError, Result};
use crate::domain::FileHash;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Classification of a pre-existing directory against an expected remote/ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalRepoStatus {
    Matches,
    WrongRemote { found: String },
    WrongRef { found: String },
    NotARepo,
}

/// Fetches remote artifacts to local paths.
#[derive(Debug, Clone)]
pub struct SourceRetriever {
    http: reqwest::Client,
    fresh: bool,
}

impl Default for SourceRetriever {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRetriever {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cstar/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .build()
            .expect("HTTP client construction cannot fail with static config");
        SourceRetriever {
            http,
            fresh: fresh_codebases(),
        }
    }

    /// Stream `url` to `dest`, verifying SHA-256 when `expected` is given.
    ///
    /// On hash mismatch nothing is left at `dest`.
    pub async fn fetch_file(
        &self,
        url: &str,
        dest: &Path,
        expected: Option<&FileHash>,
    ) -> Result<PathBuf> {
        let parent = dest
            .parent()
            .ok_or_else(|| CstarError::Validation(format!("{} has no parent", dest.display())))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CstarError::io(parent, e))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CstarError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        // Temp file beside the destination so the final rename is atomic.
        let tmp_path = parent.join(format!(
            ".{}.cstar-download",
            dest.file_name().unwrap_or_default().to_string_lossy()
        ));
        let mut tmp = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| CstarError::io(&tmp_path, e))?;

        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CstarError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            hasher.update(&chunk);
            tmp.write_all(&chunk)
                .await
                .map_err(|e| CstarError::io(&tmp_path, e))?;
        }
        tmp.sync_all()
            .await
            .map_err(|e| CstarError::io(&tmp_path, e))?;
        drop(tmp);

        let actual = FileHash::finish(hasher);
        if let Some(expected) = expected {
            if &actual != expected {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(CstarError::Integrity {
                    path: dest.to_path_buf(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        tokio::fs::rename(&tmp_path, dest)
            .await
            .map_err(|e| CstarError::io(dest, e))?;
        info!(url, dest = %dest.display(), hash = %actual.short(), "fetched file");
        Ok(dest.to_path_buf())
    }

    /// Clone (or reuse) `url` at `reference` into `dest`, checked out
    /// detached.
    pub async fn fetch_repo(&self, url: &str, reference: &str, dest: &Path) -> Result<PathBuf> {
        if dest.join(".git").exists() {
            match self.verify_local(dest, url, reference).await? {
                LocalRepoStatus::Matches if !self.fresh => {
                    debug!(dest = %dest.display(), reference, "reusing existing clone");
                    return Ok(dest.to_path_buf());
                }
                LocalRepoStatus::WrongRemote { found } => {
                    return Err(CstarError::IntegrityOther(format!(
                        "{} is a clone of {found}, expected {url}",
                        dest.display()
                    )));
                }
                LocalRepoStatus::WrongRef { .. } | LocalRepoStatus::Matches => {
                    // Right remote; fetch and re-checkout below.
                    run_git(&["fetch", "--tags", "origin"], Some(dest)).await?;
                    run_git(&["checkout", "--detach", reference], Some(dest)).await?;
                    return Ok(dest.to_path_buf());
                }
                LocalRepoStatus::NotARepo => {}
            }
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CstarError::io(parent, e))?;
        }

        let dest_str = dest.to_string_lossy().into_owned();
        if looks_like_commit(reference) {
            // A commit cannot be cloned shallowly by name.
            run_git(&["clone", url, &dest_str], None).await?;
        } else {
            run_git(
                &["clone", "--depth", "1", "--branch", reference, url, &dest_str],
                None,
            )
            .await?;
        }
        run_git(&["checkout", "--detach", reference], Some(dest)).await?;
        info!(url, reference, dest = %dest.display(), "cloned repository");
        Ok(dest.to_path_buf())
    }

    /// Classify a pre-existing directory against an expected remote and ref.
    pub async fn verify_local(
        &self,
        path: &Path,
        remote: &str,
        reference: &str,
    ) -> Result<LocalRepoStatus> {
        if !path.join(".git").exists() {
            return Ok(LocalRepoStatus::NotARepo);
        }
        let found_remote = match run_git(&["remote", "get-url", "origin"], Some(path)).await {
            Ok(out) => out.trim().to_string(),
            Err(_) => return Ok(LocalRepoStatus::NotARepo),
        };
        if !same_remote(&found_remote, remote) {
            return Ok(LocalRepoStatus::WrongRemote {
                found: found_remote,
            });
        }

        let head = run_git(&["rev-parse", "HEAD"], Some(path)).await?;
        let head = head.trim();
        // The ref may be a branch/tag name; resolve it if the clone knows it.
        let wanted = match run_git(&["rev-parse", &format!("{reference}^{{commit}}")], Some(path))
            .await
        {
            Ok(out) => out.trim().to_string(),
            Err(_) => reference.to_string(),
        };
        if head == wanted || head.starts_with(&wanted) || wanted.starts_with(head) {
            Ok(LocalRepoStatus::Matches)
        } else {
            Ok(LocalRepoStatus::WrongRef {
                found: head.to_string(),
            })
        }
    }
}

/// Run a git command, surfacing stderr in the error on failure.
pub(crate) async fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd.output().await.map_err(|e| CstarError::Network {
        url: "git".to_string(),
        message: format!("failed to run git {}: {e}", args.join(" ")),
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        warn!(args = ?args, %stderr, "git command failed");
        return Err(CstarError::Network {
            url: "git".to_string(),
            message: format!("git {} failed: {stderr}", args.join(" ")),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// 7 to 40 hex characters reads as a commit SHA rather than a branch/tag.
fn looks_like_commit(reference: &str) -> bool {
    (7..=40).contains(&reference.len()) && reference.chars().all(|c| c.is_ascii_hexdigit())
}

/// Compare remotes modulo trailing `.git` and trailing slash.
fn same_remote(a: &str, b: &str) -> bool {
    let norm = |s: &str| {
        s.trim_end_matches('/')
            .trim_end_matches(".git")
            .to_ascii_lowercase()
    };
    norm(a) == norm(b)
}

fn fresh_codebases() -> bool {
    std::env::var("CSTAR_FRESH_CODEBASES").map(|v| v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git_sync(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git_sync(dir.path(), &["init"]);
        run_git_sync(dir.path(), &["config", "user.name", "test-user"]);
        run_git_sync(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git_sync(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[test]
    fn commit_heuristic() {
        assert!(looks_like_commit("ee2ba557bd45"));
        assert!(looks_like_commit(&"a".repeat(40)));
        assert!(!looks_like_commit("main"));
        assert!(!looks_like_commit("v1.0.0"));
        assert!(!looks_like_commit("abc"));
    }

    #[test]
    fn remote_comparison_ignores_dot_git() {
        assert!(same_remote(
            "https://github.com/CESR/ucla-roms.git",
            "https://github.com/CESR/ucla-roms"
        ));
        assert!(!same_remote(
            "https://github.com/CESR/ucla-roms",
            "https://github.com/other/repo"
        ));
    }

    #[tokio::test]
    async fn verify_local_classifies_directories() {
        let retriever = SourceRetriever::new();

        let plain = tempfile::tempdir().unwrap();
        assert_eq!(
            retriever
                .verify_local(plain.path(), "https://example.org/r.git", "main")
                .await
                .unwrap(),
            LocalRepoStatus::NotARepo
        );

        let repo = make_git_repo();
        run_git_sync(
            repo.path(),
            &["remote", "add", "origin", "https://example.org/r.git"],
        );
        let head = String::from_utf8(
            StdCommand::new("git")
                .args(["rev-parse", "HEAD"])
                .current_dir(repo.path())
                .output()
                .unwrap()
                .stdout,
        )
        .unwrap();

        assert_eq!(
            retriever
                .verify_local(repo.path(), "https://example.org/r.git", head.trim())
                .await
                .unwrap(),
            LocalRepoStatus::Matches
        );
        assert!(matches!(
            retriever
                .verify_local(repo.path(), "https://example.org/other.git", head.trim())
                .await
                .unwrap(),
            LocalRepoStatus::WrongRemote { .. }
        ));
        assert!(matches!(
            retriever
                .verify_local(repo.path(), "https://example.org/r.git", &"0".repeat(40))
                .await
                .unwrap(),
            LocalRepoStatus::WrongRef { .. }
        ));
    }

    #[tokio::test]
    async fn fetch_repo_clones_local_repo_at_commit() {
        let upstream = make_git_repo();
        let head = String::from_utf8(
            StdCommand::new("git")
                .args(["rev-parse", "HEAD"])
                .current_dir(upstream.path())
                .output()
                .unwrap()
                .stdout,
        )
        .unwrap();
        let head = head.trim().to_string();

        let retriever = SourceRetriever::new();
        let dest_root = tempfile::tempdir().unwrap();
        let dest = dest_root.path().join("clone");
        let url = upstream.path().to_string_lossy().into_owned();

        let cloned = retriever.fetch_repo(&url, &head, &dest).await.unwrap();
        assert!(cloned.join(".git").exists());

        // Second fetch reuses the clone.
        retriever.fetch_repo(&url, &head, &dest).await.unwrap();
    }
}
