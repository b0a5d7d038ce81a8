//! Referenced external artifacts.
//!
//! A [`Resource`] names something C-Star must acquire before a simulation can
//! run: a file (by URL or local path) or a git repository (optionally a
//! subdirectory at a pinned ref). Once staged, `working_path` points at the
//! materialized copy.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{DateRange, FileHash};

/// Where a resource lives.
///
/// Serializes as its string form; deserialization re-classifies, so a URL
/// never comes back as a filesystem path or vice versa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Url(String),
    Path(PathBuf),
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Url(u) => f.write_str(u),
            Location::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

impl Serialize for Location {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Location::classify(&s))
    }
}

impl Location {
    /// Classify a location string: anything with an http/https/git/ssh scheme
    /// or scp-style `git@host:` form is a URL, the rest are filesystem paths.
    pub fn classify(s: &str) -> Location {
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("http://")
            || lower.starts_with("https://")
            || lower.starts_with("git://")
            || lower.starts_with("ssh://")
            || s.contains('@') && s.contains(':') && !s.contains('/')
            || s.starts_with("git@")
        {
            Location::Url(s.to_string())
        } else {
            Location::Path(PathBuf::from(s))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Url(_))
    }

    /// Last path component, used as the default file name when staging.
    pub fn basename(&self) -> Option<String> {
        match self {
            Location::Url(u) => u
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            Location::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        }
    }
}

/// A referenced artifact with optional pinning and verification metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub location: Location,

    /// Git ref (branch, tag, or commit) for repository resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_target: Option<String>,

    /// Subdirectory of interest inside a repository resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<PathBuf>,

    /// Expected SHA-256 of a file resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<FileHash>,

    /// Dates over which this resource is valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_date_range: Option<DateRange>,

    /// Where the staged copy landed. Transient; never persisted.
    #[serde(skip)]
    pub working_path: Option<PathBuf>,
}

impl Resource {
    /// A file resource at a location string.
    pub fn file(location: &str) -> Self {
        Resource {
            location: Location::classify(location),
            checkout_target: None,
            subdir: None,
            file_hash: None,
            valid_date_range: None,
            working_path: None,
        }
    }

    /// A repository resource pinned to a ref.
    pub fn repo(location: &str, checkout_target: &str) -> Self {
        Resource {
            checkout_target: Some(checkout_target.to_string()),
            ..Resource::file(location)
        }
    }

    pub fn with_hash(mut self, hash: FileHash) -> Self {
        self.file_hash = Some(hash);
        self
    }

    pub fn with_subdir(mut self, subdir: impl Into<PathBuf>) -> Self {
        self.subdir = Some(subdir.into());
        self
    }

    /// Whether the staged copy exists on disk.
    pub fn is_staged(&self) -> bool {
        self.working_path.as_deref().is_some_and(Path::exists)
    }
}
