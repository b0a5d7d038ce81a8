//! The per-user `.cstar.env` key/value store.
//!
//! External codebases record their install roots here (`<NAME>_ROOT`) so
//! later sessions can skip reinstall. The file is a flat `KEY=VALUE` list,
//! read once at open and written atomically (temp file + rename). There is
//! no cross-process locking: last writer wins, and a corrupted file is
//! re-initialized with a warning.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::StoreError;
use crate::paths::cstar_home;
use crate::Result;

/// File name under `$CSTAR_HOME`.
const ENV_FILE_NAME: &str = ".cstar.env";

/// Flat key/value store persisted to `$CSTAR_HOME/.cstar.env`.
#[derive(Debug)]
pub struct EnvironmentStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl EnvironmentStore {
    /// Open the per-user store at its default location.
    pub fn user() -> Result<Self> {
        Self::open(cstar_home()?.join(ENV_FILE_NAME))
    }

    /// Open a store at an explicit path. Missing files yield an empty store;
    /// corrupted files are discarded with a warning and start empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match parse_entries(&text) {
                Some(entries) => entries,
                None => {
                    warn!(path = %path.display(), "corrupted environment file, re-initializing");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        Ok(EnvironmentStore { path, entries })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a key. Falls back to the process environment so shell-exported
    /// overrides win over stale file contents.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Ok(v) = std::env::var(key) {
            return Some(v);
        }
        self.entries.get(key).cloned()
    }

    /// Look up a key in the file only, ignoring the process environment.
    pub fn get_stored(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set a key and persist immediately.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        self.save()
    }

    /// Remove a key and persist immediately. Returns whether it was present.
    pub fn unset(&mut self, key: &str) -> Result<bool> {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// All stored entries, sorted by key.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Write the store atomically: temp file in the same directory, then
    /// rename over the target.
    pub fn save(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let mut text = String::new();
        text.push_str("# C-Star environment overrides. Managed by cstar; edits are preserved\n");
        text.push_str("# per key but comments are not.\n");
        for (k, v) in &self.entries {
            text.push_str(k);
            text.push('=');
            text.push_str(v);
            text.push('\n');
        }

        let tmp = self.path.with_extension("env.tmp");
        {
            let mut f = std::fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
            f.write_all(text.as_bytes())
                .map_err(|e| StoreError::io(&tmp, e))?;
            f.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped.
/// Returns `None` when any remaining line has no `=`.
fn parse_entries(text: &str) -> Option<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=')?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        entries.insert(key.to_string(), value.trim().to_string());
    }
    Some(entries)
}
