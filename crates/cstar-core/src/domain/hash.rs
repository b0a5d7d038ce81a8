//! SHA-256 content hashes for fetched files.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::error::{CstarError, Result};

/// SHA-256 digest as a lowercase hex string.
///
/// The inner field is private to guarantee the string is always valid
/// 64-char lowercase hex produced by `from_bytes`/`of_file` or validated via
/// `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash(String);

impl FileHash {
    /// Compute the hash of an in-memory byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        FileHash(hex::encode(hasher.finalize()))
    }

    /// Compute the hash of a file, streaming in 64 KiB chunks.
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path).map_err(|e| CstarError::io(path, e))?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).map_err(|e| CstarError::io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(FileHash(hex::encode(hasher.finalize())))
    }

    /// Finalize a hasher the caller fed incrementally (streaming fetch).
    pub fn finish(hasher: Sha256) -> Self {
        FileHash(hex::encode(hasher.finalize()))
    }

    /// Full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl TryFrom<String> for FileHash {
    type Error = CstarError;

    fn try_from(s: String) -> Result<Self> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CstarError::Validation(format!(
                "invalid SHA-256 hash {s:?}: expected 64 hex characters"
            )));
        }
        Ok(FileHash(s.to_ascii_lowercase()))
    }
}

impl From<FileHash> for String {
    fn from(h: FileHash) -> String {
        h.0
    }
}

impl std::fmt::Display for FileHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // sha256("")
        let h = FileHash::from_bytes(b"");
        assert_eq!(
            h.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn of_file_matches_from_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.nc");
        std::fs::write(&path, b"netcdf bytes").unwrap();
        assert_eq!(
            FileHash::of_file(&path).unwrap(),
            FileHash::from_bytes(b"netcdf bytes")
        );
    }

    #[test]
    fn try_from_validates_and_lowercases() {
        let upper = "EE2BA557BD45645A8DDD5DA464A88B382A078265D15106CA4B4CF7E55F182A44";
        let h = FileHash::try_from(upper.to_string()).unwrap();
        assert_eq!(
            h.as_str(),
            "ee2ba557bd45645a8ddd5da464a88b382a078265d15106ca4b4cf7e55f182a44"
        );
        assert_eq!(h.short(), "ee2ba557bd45");

        assert!(FileHash::try_from("abc".to_string()).is_err());
        assert!(FileHash::try_from("z".repeat(64)).is_err());
    }
}
