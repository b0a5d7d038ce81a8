//! Additional code: plain-text files parameterizing the model.
//!
//! Runtime code (namelists, `.in` templates) and compile-time code
//! (source-code mods, opt files) are both ordered lists of file names plus a
//! resource describing where they come from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::error::{CstarError, Result};
use crate::resource::{Location, Resource};
use crate::stager::Stager;

/// A collection of plain-text files sourced locally or from a repo subdir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalCode {
    pub source: Resource,

    /// File names, in order, relative to the source (or its `subdir`).
    pub files: Vec<String>,
}

impl AdditionalCode {
    pub fn new(source: Resource, files: Vec<String>) -> Self {
        AdditionalCode { source, files }
    }

    /// Stage every listed file into `target_dir`.
    ///
    /// Post-condition: the file list and the staged directory agree.
    pub async fn get(&mut self, stager: &Stager, target_dir: &Path) -> Result<PathBuf> {
        if self.files.is_empty() {
            return Err(CstarError::Validation(
                "additional code with no files listed".to_string(),
            ));
        }
        let staged = match &self.source.location {
            Location::Path(_) if self.source.checkout_target.is_none() => {
                stager
                    .stage_local_files(&mut self.source, &self.files, target_dir)
                    .await?
            }
            _ => {
                stager
                    .stage_repo_files(&mut self.source, &self.files, target_dir)
                    .await?
            }
        };

        for file in &self.files {
            let path = staged.join(file);
            if !path.is_file() {
                return Err(CstarError::Validation(format!(
                    "staged directory {} is missing listed file {file}",
                    staged.display()
                )));
            }
        }
        Ok(staged)
    }

    /// Where the files were staged, once `get` has run.
    pub fn working_path(&self) -> Option<&Path> {
        self.source.working_path.as_deref()
    }

    /// Path of one staged file by name.
    pub fn staged_file(&self, name: &str) -> Option<PathBuf> {
        let root = self.working_path()?;
        let path = root.join(name);
        path.is_file().then_some(path)
    }

    /// First listed file with the given extension (e.g. the `.in` template).
    pub fn first_with_extension(&self, ext: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| Path::new(f).extension().is_some_and(|e| e == ext))
            .map(String::as_str)
    }
}
