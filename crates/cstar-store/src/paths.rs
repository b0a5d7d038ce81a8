//! Resolution of the C-Star state directories.
//!
//! All externally-visible paths are tilde-expanded and absolute.

use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::Result;

/// Expand a leading `~` or `~/` to the user's home directory.
///
/// Paths without a leading tilde are returned unchanged.
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let Some(s) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    if s == "~" {
        return home_dir();
    }
    if let Some(rest) = s.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }
    Ok(path.to_path_buf())
}

/// Make a path absolute against the current working directory.
///
/// Does not touch the filesystem; the path need not exist.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let expanded = expand_tilde(path)?;
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    let cwd = std::env::current_dir().map_err(|e| StoreError::io(path, e))?;
    Ok(cwd.join(expanded))
}

/// The C-Star home directory: `$CSTAR_HOME`, defaulting to `~/.cstar`.
pub fn cstar_home() -> Result<PathBuf> {
    match std::env::var_os("CSTAR_HOME") {
        Some(v) => absolutize(Path::new(&v)),
        None => Ok(home_dir()?.join(".cstar")),
    }
}

/// The C-Star output root: `$CSTAR_OUTDIR`, defaulting to `$CSTAR_HOME/assets`.
pub fn cstar_outdir() -> Result<PathBuf> {
    match std::env::var_os("CSTAR_OUTDIR") {
        Some(v) => absolutize(Path::new(&v)),
        None => Ok(cstar_home()?.join("assets")),
    }
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or(StoreError::NoHome)
}
