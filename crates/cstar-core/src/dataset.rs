//! Model input datasets.
//!
//! A dataset is either a ready-made netCDF file or a YAML recipe that the
//! external grid/forcing generator turns into netCDF before the run. Each
//! dataset knows the date range it covers; a simulation's active range must
//! sit inside the range of every required role.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::error::{CstarError, Result};
use crate::domain::{DateRange, SimDate};
use crate::resource::Resource;
use crate::stager::{HashPolicy, Stager};

/// The role a dataset plays in a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetRole {
    ModelGrid,
    InitialConditions,
    TidalForcing,
    BoundaryForcing,
    SurfaceForcing,
    RiverForcing,
    ForcingCorrections,
}

impl DatasetRole {
    /// Roles a ROMS simulation cannot run without.
    pub fn required() -> &'static [DatasetRole] {
        &[DatasetRole::ModelGrid, DatasetRole::InitialConditions]
    }
}

impl std::fmt::Display for DatasetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DatasetRole::ModelGrid => "model_grid",
            DatasetRole::InitialConditions => "initial_conditions",
            DatasetRole::TidalForcing => "tidal_forcing",
            DatasetRole::BoundaryForcing => "boundary_forcing",
            DatasetRole::SurfaceForcing => "surface_forcing",
            DatasetRole::RiverForcing => "river_forcing",
            DatasetRole::ForcingCorrections => "forcing_corrections",
        };
        f.write_str(s)
    }
}

/// What kind of artifact backs the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetSource {
    /// A netCDF file, fetched or copied as-is.
    NetcdfFile { resource: Resource },
    /// A YAML recipe consumed by the external grid/forcing generator.
    YamlRecipe { resource: Resource },
}

impl DatasetSource {
    pub fn resource(&self) -> &Resource {
        match self {
            DatasetSource::NetcdfFile { resource } | DatasetSource::YamlRecipe { resource } => {
                resource
            }
        }
    }

    pub fn resource_mut(&mut self) -> &mut Resource {
        match self {
            DatasetSource::NetcdfFile { resource } | DatasetSource::YamlRecipe { resource } => {
                resource
            }
        }
    }
}

/// One input dataset with its validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDataset {
    pub source: DatasetSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<SimDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<SimDate>,

    /// The netCDF files this dataset resolved to after `get`.
    #[serde(skip)]
    pub working_files: Vec<PathBuf>,
}

impl InputDataset {
    pub fn netcdf(resource: Resource) -> Self {
        InputDataset {
            source: DatasetSource::NetcdfFile { resource },
            start_date: None,
            end_date: None,
            working_files: Vec::new(),
        }
    }

    pub fn yaml_recipe(resource: Resource) -> Self {
        InputDataset {
            source: DatasetSource::YamlRecipe { resource },
            start_date: None,
            end_date: None,
            working_files: Vec::new(),
        }
    }

    /// Validity window of the dataset, when declared.
    pub fn range(&self) -> Option<DateRange> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => DateRange::new(start, end).ok(),
            _ => self.source.resource().valid_date_range,
        }
    }

    /// Whether the dataset covers the requested active range.
    pub fn covers(&self, active: &DateRange) -> bool {
        match self.range() {
            Some(own) => active.is_subset_of(&own),
            None => true, // undated datasets (grids) are time-invariant
        }
    }

    /// Materialize this dataset into `target_dir` for the given active range.
    pub async fn get(
        &mut self,
        stager: &Stager,
        target_dir: &Path,
        active: &DateRange,
        force: bool,
    ) -> Result<()> {
        if !self.covers(active) {
            return Err(CstarError::Validation(format!(
                "dataset {} covers {} but the simulation needs {active}",
                self.source.resource().location,
                self.range().map(|r| r.to_string()).unwrap_or_default()
            )));
        }

        let policy = if self.source.resource().location.is_remote() {
            HashPolicy::Enforce
        } else {
            HashPolicy::Advisory
        };

        match &mut self.source {
            DatasetSource::NetcdfFile { resource } => {
                let staged = stager.stage_file(resource, target_dir, policy, force).await?;
                self.working_files = vec![staged];
            }
            DatasetSource::YamlRecipe { resource } => {
                let yaml = stager.stage_file(resource, target_dir, policy, force).await?;
                self.working_files = materialize_recipe(&yaml, active).await?;
            }
        }
        Ok(())
    }

    /// Split each working file across ranks with the model's partit tool.
    ///
    /// Per-rank files land in `PARTITIONED/` beside the inputs; `post_run`
    /// removes them after the joined outputs are verified.
    pub async fn partition(&self, n_procs_x: u32, n_procs_y: u32) -> Result<Vec<PathBuf>> {
        let mut produced = Vec::new();
        for file in &self.working_files {
            let dir = file.parent().ok_or_else(|| CstarError::Dataset {
                path: file.clone(),
                message: "dataset file has no parent directory".to_string(),
            })?;
            let part_dir = dir.join("PARTITIONED");
            tokio::fs::create_dir_all(&part_dir)
                .await
                .map_err(|e| CstarError::io(&part_dir, e))?;

            let output = Command::new("partit")
                .arg(n_procs_x.to_string())
                .arg(n_procs_y.to_string())
                .arg(file)
                .current_dir(&part_dir)
                .output()
                .await
                .map_err(|e| CstarError::Dataset {
                    path: file.clone(),
                    message: format!("failed to run partit: {e}"),
                })?;
            if !output.status.success() {
                return Err(CstarError::Dataset {
                    path: file.clone(),
                    message: format!(
                        "partit exited with {}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr)
                    ),
                });
            }
            produced.push(part_dir);
        }
        Ok(produced)
    }
}

/// Invoke the external grid/forcing generator on a staged recipe.
///
/// The produced netCDF files are written next to the YAML. The generator is
/// a black box: any failure surfaces as a [`CstarError::Dataset`] carrying
/// the recipe path, the requested range, and the underlying message.
async fn materialize_recipe(yaml: &Path, active: &DateRange) -> Result<Vec<PathBuf>> {
    let argv = converter_command();
    let (exe, fixed_args) = argv
        .split_first()
        .ok_or_else(|| CstarError::Configuration("empty converter command".to_string()))?;

    debug!(recipe = %yaml.display(), %active, command = %argv.join(" "), "materializing dataset recipe");
    let output = Command::new(exe)
        .args(fixed_args)
        .arg("--input")
        .arg(yaml)
        .arg("--start")
        .arg(active.start.to_string())
        .arg("--end")
        .arg(active.end.to_string())
        .output()
        .await
        .map_err(|e| CstarError::Dataset {
            path: yaml.to_path_buf(),
            message: format!("failed to run {exe} for range {active}: {e}"),
        })?;

    if !output.status.success() {
        return Err(CstarError::Dataset {
            path: yaml.to_path_buf(),
            message: format!(
                "generator exited with {} for range {active}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }

    let produced = produced_netcdf_files(yaml)?;
    if produced.is_empty() {
        return Err(CstarError::Dataset {
            path: yaml.to_path_buf(),
            message: format!("generator produced no netCDF files for range {active}"),
        });
    }
    info!(recipe = %yaml.display(), count = produced.len(), "materialized dataset");
    Ok(produced)
}

/// `<stem>*.nc` files beside the recipe, sorted by name.
fn produced_netcdf_files(yaml: &Path) -> Result<Vec<PathBuf>> {
    let dir = yaml.parent().unwrap_or_else(|| Path::new("."));
    let stem = yaml
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut found = BTreeMap::new();
    let entries = std::fs::read_dir(dir).map_err(|e| CstarError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| CstarError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&stem) && name.ends_with(".nc") {
            found.insert(name, entry.path());
        }
    }
    Ok(found.into_values().collect())
}

/// The generator command line: `CSTAR_CMD_CONVERTER_OVERRIDE` (test hook,
/// whitespace-split) or the stock `roms-tools` CLI.
fn converter_command() -> Vec<String> {
    match std::env::var("CSTAR_CMD_CONVERTER_OVERRIDE") {
        Ok(v) if !v.trim().is_empty() => v.split_whitespace().map(str::to_string).collect(),
        _ => vec!["roms-tools".to_string(), "generate".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileHash;

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::parse(start, end).unwrap()
    }

    #[test]
    fn covers_checks_subset() {
        let mut ds = InputDataset::netcdf(Resource::file("/data/bry.nc"));
        ds.start_date = Some(SimDate::parse("2012-01-01").unwrap());
        ds.end_date = Some(SimDate::parse("2012-12-31").unwrap());

        assert!(ds.covers(&range("2012-02-01", "2012-03-01")));
        assert!(!ds.covers(&range("2011-12-01", "2012-03-01")));
    }

    #[test]
    fn undated_dataset_is_time_invariant() {
        let ds = InputDataset::netcdf(Resource::file("/data/grid.nc"));
        assert!(ds.covers(&range("1900-01-01", "2100-01-01")));
    }

    #[tokio::test]
    async fn get_stages_netcdf_file() {
        let src = tempfile::tempdir().unwrap();
        let path = src.path().join("grid.nc");
        std::fs::write(&path, b"grid").unwrap();

        let target = tempfile::tempdir().unwrap();
        let mut ds = InputDataset::netcdf(
            Resource::file(path.to_str().unwrap()).with_hash(FileHash::from_bytes(b"grid")),
        );
        ds.get(
            &Stager::default(),
            target.path(),
            &range("2012-01-01", "2012-02-01"),
            false,
        )
        .await
        .unwrap();
        assert_eq!(ds.working_files, vec![target.path().join("grid.nc")]);
    }

    #[tokio::test]
    async fn out_of_range_get_rejected() {
        let mut ds = InputDataset::netcdf(Resource::file("/data/bry.nc"));
        ds.start_date = Some(SimDate::parse("2012-01-01").unwrap());
        ds.end_date = Some(SimDate::parse("2012-06-01").unwrap());

        let target = tempfile::tempdir().unwrap();
        let err = ds
            .get(
                &Stager::default(),
                target.path(),
                &range("2012-01-01", "2012-12-31"),
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn yaml_recipe_materializes_via_override() {
        let src = tempfile::tempdir().unwrap();
        let recipe = src.path().join("surface.yaml");
        std::fs::write(&recipe, b"recipe: {}\n").unwrap();

        let target = tempfile::tempdir().unwrap();
        // Fake generator: ignores its arguments and drops the product file
        // where the real one would, next to the staged recipe.
        let product = target.path().join("surface.nc");
        let fake = src.path().join("fake-roms-tools");
        std::fs::write(
            &fake,
            format!("#!/bin/sh\ntouch {}\n", product.display()),
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        std::env::set_var("CSTAR_CMD_CONVERTER_OVERRIDE", fake.to_str().unwrap());

        let mut ds = InputDataset::yaml_recipe(Resource::file(recipe.to_str().unwrap()));
        let result = ds
            .get(
                &Stager::default(),
                target.path(),
                &range("2012-01-01", "2012-02-01"),
                false,
            )
            .await;
        std::env::remove_var("CSTAR_CMD_CONVERTER_OVERRIDE");

        result.unwrap();
        assert_eq!(ds.working_files, vec![product]);
    }
}
