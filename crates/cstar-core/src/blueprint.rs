//! Blueprint codec: declarative YAML for one simulation.
//!
//! Two schema generations parse to the same normalized [`Blueprint`]: the
//! legacy `components:` list with `namelists`, and the modern single
//! `ROMSSimulation:` root with `runtime_code`. Rendering reconstructs the
//! flavor the document was authored in, so a parse/render/parse round trip
//! is loss-free for recognized fields.
//!
//! `<input_datasets_location>` and `<additional_code_location>` placeholders
//! are substituted against the blueprint's own directory (or URL) in a
//! single pre-parse pass.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::code::AdditionalCode;
use crate::codebase::ExternalCodeBase;
use crate::dataset::{DatasetRole, InputDataset};
use crate::domain::error::{CstarError, Result};
use crate::domain::{DateRange, Discretization, FileHash, SimDate};
use crate::resource::{Location, Resource};
use crate::simulation::Simulation;

/// Which schema generation a blueprint was authored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFlavor {
    /// `components:` list, `namelists:` runtime code.
    Legacy,
    /// Single `ROMSSimulation:` root, `runtime_code:`.
    Modern,
}

/// Normalized, validated form of a blueprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    pub name: String,
    pub valid_date_range: DateRange,
    /// Pinned model codebases in document order (e.g. MARBL then ROMS).
    pub codebases: Vec<ExternalCodeBase>,
    pub discretization: Discretization,
    pub runtime_code: Option<AdditionalCode>,
    pub compile_time_code: Option<AdditionalCode>,
    pub datasets: BTreeMap<DatasetRole, Vec<InputDataset>>,
    /// Simulation window; defaults to the full valid range.
    pub start_date: Option<SimDate>,
    pub end_date: Option<SimDate>,
    flavor: SchemaFlavor,
}

impl Blueprint {
    /// Parse blueprint text. `base` (directory or URL prefix of the document
    /// itself) anchors placeholder substitution.
    pub fn parse_str(text: &str, base: Option<&str>) -> Result<Blueprint> {
        let text = substitute_placeholders(text, base);
        let doc: BlueprintDoc = serde_yaml::from_str(&text)?;
        normalize(doc)
    }

    /// Load a blueprint from a filesystem path.
    pub fn from_path(path: &Path) -> Result<Blueprint> {
        let path = cstar_store::absolutize(path)?;
        let text = std::fs::read_to_string(&path).map_err(|e| CstarError::io(&path, e))?;
        let base = path.parent().map(|p| p.display().to_string());
        Self::parse_str(&text, base.as_deref())
    }

    /// Load a blueprint from a path or an HTTP(S) URL.
    pub async fn from_location(location: &str) -> Result<Blueprint> {
        match Location::classify(location) {
            Location::Path(path) => Self::from_path(&path),
            Location::Url(url) => {
                let text = reqwest::get(&url)
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| CstarError::Network {
                        url: url.clone(),
                        message: e.to_string(),
                    })?
                    .text()
                    .await
                    .map_err(|e| CstarError::Network {
                        url: url.clone(),
                        message: e.to_string(),
                    })?;
                let base = url.rsplit_once('/').map(|(prefix, _)| prefix.to_string());
                Self::parse_str(&text, base.as_deref())
            }
        }
    }

    pub fn flavor(&self) -> SchemaFlavor {
        self.flavor
    }

    /// Render back to YAML in the authored flavor.
    pub fn render(&self) -> Result<String> {
        let doc = denormalize(self);
        Ok(serde_yaml::to_string(&doc)?)
    }

    /// All datasets flattened, with their roles.
    pub fn dataset_entries(&self) -> Vec<(DatasetRole, &InputDataset)> {
        self.datasets
            .iter()
            .flat_map(|(role, list)| list.iter().map(move |ds| (*role, ds)))
            .collect()
    }

    /// Apply workplan `blueprint_overrides`. Recognized keys: `name`,
    /// `start_date`, `end_date`, `initial_conditions` (mapping with
    /// `location` and optional `file_hash`). Anything else is a shape error.
    pub fn apply_overrides(&mut self, overrides: &serde_yaml::Mapping) -> Result<()> {
        for (key, value) in overrides {
            let key = key.as_str().ok_or_else(|| {
                CstarError::Validation("blueprint override keys must be strings".to_string())
            })?;
            match key {
                "name" => {
                    self.name = yaml_str(value, "name")?;
                }
                "start_date" => {
                    self.start_date = Some(SimDate::parse(&yaml_str(value, "start_date")?)?);
                }
                "end_date" => {
                    self.end_date = Some(SimDate::parse(&yaml_str(value, "end_date")?)?);
                }
                "initial_conditions" => {
                    let mapping = value.as_mapping().ok_or_else(|| {
                        CstarError::Validation(
                            "initial_conditions override must be a mapping".to_string(),
                        )
                    })?;
                    let doc: DatasetDoc = serde_yaml::from_value(serde_yaml::Value::Mapping(
                        mapping.clone(),
                    ))?;
                    let ds = dataset_from_doc(&doc, DatasetRole::InitialConditions)?;
                    self.datasets
                        .insert(DatasetRole::InitialConditions, vec![ds]);
                }
                other => {
                    return Err(CstarError::Validation(format!(
                        "unrecognized blueprint override key {other:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Materialize a [`Simulation`] rooted at `directory`.
    pub fn to_simulation(&self, directory: &Path) -> Result<Simulation> {
        for role in DatasetRole::required() {
            if !self.datasets.contains_key(role) {
                return Err(CstarError::Validation(format!(
                    "blueprint {} has no {role} dataset",
                    self.name
                )));
            }
        }
        let start = self.start_date.unwrap_or(self.valid_date_range.start);
        let end = self.end_date.unwrap_or(self.valid_date_range.end);
        let mut sim = Simulation::new(
            self.name.clone(),
            directory,
            self.valid_date_range,
            start,
            end,
            self.codebases.clone(),
            self.discretization,
        )?;
        sim.runtime_code = self.runtime_code.clone();
        sim.compile_time_code = self.compile_time_code.clone();
        sim.datasets = self.datasets.clone();
        Ok(sim)
    }
}

// ---------------------------------------------------------------------------
// Document schema (serde view of the YAML)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlueprintDoc {
    registry_attrs: RegistryAttrsDoc,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    components: Option<Vec<ComponentDoc>>,

    #[serde(rename = "ROMSSimulation", default, skip_serializing_if = "Option::is_none")]
    roms_simulation: Option<RomsSimulationDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryAttrsDoc {
    name: String,
    valid_date_range: DateRangeDoc,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DateRangeDoc {
    start_date: SimDate,
    end_date: SimDate,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BaseModelDoc {
    source_repo: String,
    checkout_target: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ComponentDoc {
    component_type: String,
    base_model: BaseModelDoc,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    discretization: Option<Discretization>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    namelists: Option<CodeDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    runtime_code: Option<CodeDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    additional_source_code: Option<CodeDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_grid: Option<DatasetDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    initial_conditions: Option<DatasetDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    tidal_forcing: Option<DatasetDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    boundary_forcing: Option<Vec<DatasetDoc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    surface_forcing: Option<Vec<DatasetDoc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    river_forcing: Option<Vec<DatasetDoc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    forcing_corrections: Option<DatasetDoc>,
}

/// Modern single-root schema: the ROMS component absorbed the top level and
/// MARBL became `marbl_base_model`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RomsSimulationDoc {
    base_model: BaseModelDoc,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    marbl_base_model: Option<BaseModelDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    discretization: Option<Discretization>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    runtime_code: Option<CodeDoc>,

    // Legacy name accepted on input, never emitted by this schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namelists: Option<CodeDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    compile_time_code: Option<CodeDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    additional_source_code: Option<CodeDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_grid: Option<DatasetDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    initial_conditions: Option<DatasetDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    tidal_forcing: Option<DatasetDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    boundary_forcing: Option<Vec<DatasetDoc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    surface_forcing: Option<Vec<DatasetDoc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    river_forcing: Option<Vec<DatasetDoc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    forcing_corrections: Option<DatasetDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CodeDoc {
    location: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    checkout_target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    subdir: Option<PathBuf>,

    files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatasetDoc {
    location: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_hash: Option<FileHash>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_date: Option<SimDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_date: Option<SimDate>,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn normalize(doc: BlueprintDoc) -> Result<Blueprint> {
    let valid_date_range = DateRange::new(
        doc.registry_attrs.valid_date_range.start_date,
        doc.registry_attrs.valid_date_range.end_date,
    )?;

    match (doc.components, doc.roms_simulation) {
        (Some(components), None) => {
            normalize_legacy(doc.registry_attrs.name, valid_date_range, components)
        }
        (None, Some(root)) => normalize_modern(doc.registry_attrs.name, valid_date_range, root),
        (Some(_), Some(_)) => Err(CstarError::Validation(
            "blueprint declares both components and ROMSSimulation".to_string(),
        )),
        (None, None) => Err(CstarError::Validation(
            "blueprint declares neither components nor ROMSSimulation".to_string(),
        )),
    }
}

fn normalize_legacy(
    name: String,
    valid_date_range: DateRange,
    components: Vec<ComponentDoc>,
) -> Result<Blueprint> {
    let mut codebases = Vec::new();
    let mut primary: Option<ComponentDoc> = None;
    for component in components {
        codebases.push(ExternalCodeBase::new(
            &component.component_type,
            &component.base_model.source_repo,
            &component.base_model.checkout_target,
        ));
        if component.component_type.eq_ignore_ascii_case("ROMS") {
            if primary.is_some() {
                return Err(CstarError::Validation(
                    "blueprint has more than one ROMS component".to_string(),
                ));
            }
            primary = Some(component);
        }
    }
    let primary = primary.ok_or_else(|| {
        CstarError::Validation("blueprint has no ROMS component".to_string())
    })?;

    let discretization = primary.discretization.ok_or_else(|| {
        CstarError::Validation("ROMS component is missing discretization".to_string())
    })?;
    if primary.namelists.is_some() && primary.runtime_code.is_some() {
        return Err(CstarError::Validation(
            "component declares both namelists and runtime_code".to_string(),
        ));
    }
    let runtime_code = primary
        .namelists
        .as_ref()
        .or(primary.runtime_code.as_ref())
        .map(code_from_doc)
        .transpose()?;
    let compile_time_code = primary
        .additional_source_code
        .as_ref()
        .map(code_from_doc)
        .transpose()?;
    let datasets = collect_datasets(
        primary.model_grid.as_ref(),
        primary.initial_conditions.as_ref(),
        primary.tidal_forcing.as_ref(),
        primary.boundary_forcing.as_deref(),
        primary.surface_forcing.as_deref(),
        primary.river_forcing.as_deref(),
        primary.forcing_corrections.as_ref(),
    )?;

    Ok(Blueprint {
        name,
        valid_date_range,
        codebases,
        discretization,
        runtime_code,
        compile_time_code,
        datasets,
        start_date: None,
        end_date: None,
        flavor: SchemaFlavor::Legacy,
    })
}

fn normalize_modern(
    name: String,
    valid_date_range: DateRange,
    root: RomsSimulationDoc,
) -> Result<Blueprint> {
    let mut codebases = vec![ExternalCodeBase::new(
        "ROMS",
        &root.base_model.source_repo,
        &root.base_model.checkout_target,
    )];
    if let Some(marbl) = &root.marbl_base_model {
        codebases.push(ExternalCodeBase::new(
            "MARBL",
            &marbl.source_repo,
            &marbl.checkout_target,
        ));
    }

    let discretization = root.discretization.ok_or_else(|| {
        CstarError::Validation("ROMSSimulation is missing discretization".to_string())
    })?;
    if root.runtime_code.is_some() && root.namelists.is_some() {
        return Err(CstarError::Validation(
            "ROMSSimulation declares both runtime_code and namelists".to_string(),
        ));
    }
    let runtime_code = root
        .runtime_code
        .as_ref()
        .or(root.namelists.as_ref())
        .map(code_from_doc)
        .transpose()?;
    let compile_time_code = root
        .compile_time_code
        .as_ref()
        .or(root.additional_source_code.as_ref())
        .map(code_from_doc)
        .transpose()?;
    let datasets = collect_datasets(
        root.model_grid.as_ref(),
        root.initial_conditions.as_ref(),
        root.tidal_forcing.as_ref(),
        root.boundary_forcing.as_deref(),
        root.surface_forcing.as_deref(),
        root.river_forcing.as_deref(),
        root.forcing_corrections.as_ref(),
    )?;

    Ok(Blueprint {
        name,
        valid_date_range,
        codebases,
        discretization,
        runtime_code,
        compile_time_code,
        datasets,
        start_date: None,
        end_date: None,
        flavor: SchemaFlavor::Modern,
    })
}

#[allow(clippy::too_many_arguments)]
fn collect_datasets(
    model_grid: Option<&DatasetDoc>,
    initial_conditions: Option<&DatasetDoc>,
    tidal_forcing: Option<&DatasetDoc>,
    boundary_forcing: Option<&[DatasetDoc]>,
    surface_forcing: Option<&[DatasetDoc]>,
    river_forcing: Option<&[DatasetDoc]>,
    forcing_corrections: Option<&DatasetDoc>,
) -> Result<BTreeMap<DatasetRole, Vec<InputDataset>>> {
    let mut datasets: BTreeMap<DatasetRole, Vec<InputDataset>> = BTreeMap::new();
    let mut push_one = |role: DatasetRole, doc: Option<&DatasetDoc>| -> Result<()> {
        if let Some(doc) = doc {
            datasets.entry(role).or_default().push(dataset_from_doc(doc, role)?);
        }
        Ok(())
    };
    push_one(DatasetRole::ModelGrid, model_grid)?;
    push_one(DatasetRole::InitialConditions, initial_conditions)?;
    push_one(DatasetRole::TidalForcing, tidal_forcing)?;
    push_one(DatasetRole::ForcingCorrections, forcing_corrections)?;

    let mut push_many = |role: DatasetRole, docs: Option<&[DatasetDoc]>| -> Result<()> {
        for doc in docs.unwrap_or_default() {
            datasets.entry(role).or_default().push(dataset_from_doc(doc, role)?);
        }
        Ok(())
    };
    push_many(DatasetRole::BoundaryForcing, boundary_forcing)?;
    push_many(DatasetRole::SurfaceForcing, surface_forcing)?;
    push_many(DatasetRole::RiverForcing, river_forcing)?;

    Ok(datasets)
}

fn dataset_from_doc(doc: &DatasetDoc, role: DatasetRole) -> Result<InputDataset> {
    let location = Location::classify(&doc.location);
    if location.is_remote() && doc.file_hash.is_none() {
        return Err(CstarError::Validation(format!(
            "remote {role} dataset {} must declare a file_hash",
            doc.location
        )));
    }

    let mut resource = Resource::file(&doc.location);
    resource.file_hash = doc.file_hash.clone();

    let is_recipe = doc.location.ends_with(".yaml") || doc.location.ends_with(".yml");
    let mut dataset = if is_recipe {
        InputDataset::yaml_recipe(resource)
    } else {
        InputDataset::netcdf(resource)
    };
    dataset.start_date = doc.start_date;
    dataset.end_date = doc.end_date;
    Ok(dataset)
}

fn code_from_doc(doc: &CodeDoc) -> Result<AdditionalCode> {
    if doc.files.is_empty() {
        return Err(CstarError::Validation(format!(
            "code entry {} lists no files",
            doc.location
        )));
    }
    let mut resource = Resource::file(&doc.location);
    resource.checkout_target = doc.checkout_target.clone();
    resource.subdir = doc.subdir.clone();
    Ok(AdditionalCode::new(resource, doc.files.clone()))
}

// ---------------------------------------------------------------------------
// Denormalization (render)
// ---------------------------------------------------------------------------

fn denormalize(bp: &Blueprint) -> BlueprintDoc {
    let registry_attrs = RegistryAttrsDoc {
        name: bp.name.clone(),
        valid_date_range: DateRangeDoc {
            start_date: bp.valid_date_range.start,
            end_date: bp.valid_date_range.end,
        },
    };

    match bp.flavor {
        SchemaFlavor::Legacy => {
            let mut components = Vec::new();
            for codebase in &bp.codebases {
                let base_model = BaseModelDoc {
                    source_repo: codebase.source_repo.clone(),
                    checkout_target: codebase.checkout_target.clone(),
                };
                if codebase.name.eq_ignore_ascii_case("ROMS") {
                    components.push(ComponentDoc {
                        component_type: codebase.name.clone(),
                        base_model,
                        discretization: Some(bp.discretization),
                        namelists: bp.runtime_code.as_ref().map(code_to_doc),
                        additional_source_code: bp.compile_time_code.as_ref().map(code_to_doc),
                        ..dataset_fields(bp)
                    });
                } else {
                    components.push(ComponentDoc {
                        component_type: codebase.name.clone(),
                        base_model,
                        ..Default::default()
                    });
                }
            }
            BlueprintDoc {
                registry_attrs,
                components: Some(components),
                roms_simulation: None,
            }
        }
        SchemaFlavor::Modern => {
            let roms = bp
                .codebases
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case("ROMS"));
            let marbl = bp
                .codebases
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case("MARBL"));
            let fields = dataset_fields(bp);
            BlueprintDoc {
                registry_attrs,
                components: None,
                roms_simulation: Some(RomsSimulationDoc {
                    base_model: BaseModelDoc {
                        source_repo: roms.map(|c| c.source_repo.clone()).unwrap_or_default(),
                        checkout_target: roms
                            .map(|c| c.checkout_target.clone())
                            .unwrap_or_default(),
                    },
                    marbl_base_model: marbl.map(|c| BaseModelDoc {
                        source_repo: c.source_repo.clone(),
                        checkout_target: c.checkout_target.clone(),
                    }),
                    discretization: Some(bp.discretization),
                    runtime_code: bp.runtime_code.as_ref().map(code_to_doc),
                    namelists: None,
                    compile_time_code: bp.compile_time_code.as_ref().map(code_to_doc),
                    additional_source_code: None,
                    model_grid: fields.model_grid,
                    initial_conditions: fields.initial_conditions,
                    tidal_forcing: fields.tidal_forcing,
                    boundary_forcing: fields.boundary_forcing,
                    surface_forcing: fields.surface_forcing,
                    river_forcing: fields.river_forcing,
                    forcing_corrections: fields.forcing_corrections,
                }),
            }
        }
    }
}

/// Dataset fields shared by both schema shapes, prefilled into a
/// `ComponentDoc` for struct-update syntax.
fn dataset_fields(bp: &Blueprint) -> ComponentDoc {
    let one = |role: DatasetRole| -> Option<DatasetDoc> {
        bp.datasets
            .get(&role)
            .and_then(|list| list.first())
            .map(dataset_to_doc)
    };
    let many = |role: DatasetRole| -> Option<Vec<DatasetDoc>> {
        bp.datasets
            .get(&role)
            .filter(|list| !list.is_empty())
            .map(|list| list.iter().map(dataset_to_doc).collect())
    };
    ComponentDoc {
        model_grid: one(DatasetRole::ModelGrid),
        initial_conditions: one(DatasetRole::InitialConditions),
        tidal_forcing: one(DatasetRole::TidalForcing),
        boundary_forcing: many(DatasetRole::BoundaryForcing),
        surface_forcing: many(DatasetRole::SurfaceForcing),
        river_forcing: many(DatasetRole::RiverForcing),
        forcing_corrections: one(DatasetRole::ForcingCorrections),
        ..Default::default()
    }
}

fn dataset_to_doc(ds: &InputDataset) -> DatasetDoc {
    let resource = ds.source.resource();
    DatasetDoc {
        location: resource.location.to_string(),
        file_hash: resource.file_hash.clone(),
        start_date: ds.start_date,
        end_date: ds.end_date,
    }
}

fn code_to_doc(code: &AdditionalCode) -> CodeDoc {
    CodeDoc {
        location: code.source.location.to_string(),
        checkout_target: code.source.checkout_target.clone(),
        subdir: code.source.subdir.clone(),
        files: code.files.clone(),
    }
}

// ---------------------------------------------------------------------------
// Placeholders
// ---------------------------------------------------------------------------

/// Resolve `<input_datasets_location>` / `<additional_code_location>`
/// against the document's own directory or URL prefix.
fn substitute_placeholders(text: &str, base: Option<&str>) -> String {
    let Some(base) = base else {
        return text.to_string();
    };
    let base = base.trim_end_matches('/');
    debug!(base, "substituting blueprint location placeholders");
    text.replace("<input_datasets_location>", &format!("{base}/input_datasets"))
        .replace(
            "<additional_code_location>",
            &format!("{base}/additional_code"),
        )
}

fn yaml_str(value: &serde_yaml::Value, key: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CstarError::Validation(format!("override {key} must be a string")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetSource;

    const LEGACY: &str = r#"
registry_attrs:
  name: roms_marbl_example
  valid_date_range:
    start_date: "2012-01-01 12:00:00"
    end_date: "2012-12-31 12:00:00"
components:
  - component_type: MARBL
    base_model:
      source_repo: https://github.com/marbl-ecosys/MARBL.git
      checkout_target: marbl0.45.0
  - component_type: ROMS
    base_model:
      source_repo: https://github.com/CESR-lab/ucla-roms.git
      checkout_target: main
    discretization:
      n_procs_x: 2
      n_procs_y: 3
      time_step: 60
    namelists:
      location: <additional_code_location>/roms_marbl
      files:
        - roms.in
        - marbl_in
    additional_source_code:
      location: <additional_code_location>/source_mods
      files:
        - bgc.opt
        - Makefile
    model_grid:
      location: <input_datasets_location>/roms_grd.yaml
    initial_conditions:
      location: <input_datasets_location>/roms_ini.yaml
    tidal_forcing:
      location: <input_datasets_location>/roms_tides.yaml
    boundary_forcing:
      - location: <input_datasets_location>/roms_bry.yaml
        start_date: "2012-01-01 12:00:00"
        end_date: "2012-12-31 12:00:00"
      - location: <input_datasets_location>/roms_bry_bgc.yaml
    surface_forcing:
      - location: <input_datasets_location>/roms_frc.yaml
"#;

    #[test]
    fn legacy_template_parses_and_normalizes() {
        let bp = Blueprint::parse_str(LEGACY, Some("/bp")).unwrap();
        assert_eq!(bp.name, "roms_marbl_example");
        assert_eq!(bp.flavor(), SchemaFlavor::Legacy);
        assert_eq!(bp.codebases[0].name, "MARBL");
        assert_eq!(bp.codebases[1].name, "ROMS");
        assert_eq!(bp.discretization.n_procs_x, 2);
        assert_eq!(bp.dataset_entries().len(), 6);

        // Placeholder substitution anchored at the blueprint directory.
        let grid = &bp.datasets[&DatasetRole::ModelGrid][0];
        assert_eq!(
            grid.source.resource().location.to_string(),
            "/bp/input_datasets/roms_grd.yaml"
        );
        assert!(matches!(grid.source, DatasetSource::YamlRecipe { .. }));
    }

    #[test]
    fn round_trip_is_semantically_stable() {
        let bp = Blueprint::parse_str(LEGACY, Some("/bp")).unwrap();
        let rendered = bp.render().unwrap();
        let again = Blueprint::parse_str(&rendered, Some("/bp")).unwrap();
        assert_eq!(bp, again);
    }

    #[test]
    fn modern_schema_parses_to_same_shape() {
        let modern = r#"
registry_attrs:
  name: roms_marbl_example
  valid_date_range:
    start_date: "2012-01-01 12:00:00"
    end_date: "2012-12-31 12:00:00"
ROMSSimulation:
  base_model:
    source_repo: https://github.com/CESR-lab/ucla-roms.git
    checkout_target: main
  marbl_base_model:
    source_repo: https://github.com/marbl-ecosys/MARBL.git
    checkout_target: marbl0.45.0
  discretization:
    n_procs_x: 2
    n_procs_y: 3
    time_step: 60
  runtime_code:
    location: /bp/additional_code/roms_marbl
    files: [roms.in, marbl_in]
  model_grid:
    location: /bp/input_datasets/roms_grd.yaml
"#;
        let bp = Blueprint::parse_str(modern, None).unwrap();
        assert_eq!(bp.flavor(), SchemaFlavor::Modern);
        assert_eq!(bp.discretization.n_procs_x, 2);
        assert!(bp.runtime_code.is_some());

        let rendered = bp.render().unwrap();
        assert!(rendered.contains("ROMSSimulation"));
        assert!(rendered.contains("runtime_code"));
        assert!(!rendered.contains("namelists"));
        let again = Blueprint::parse_str(&rendered, None).unwrap();
        assert_eq!(bp, again);
    }

    #[test]
    fn modern_schema_accepts_legacy_namelists_key() {
        let text = r#"
registry_attrs:
  name: x
  valid_date_range:
    start_date: "2012-01-01"
    end_date: "2012-12-31"
ROMSSimulation:
  base_model:
    source_repo: https://github.com/CESR-lab/ucla-roms.git
    checkout_target: main
  discretization:
    n_procs_x: 1
    n_procs_y: 1
    time_step: 60
  namelists:
    location: /bp/code
    files: [roms.in]
"#;
        let bp = Blueprint::parse_str(text, None).unwrap();
        assert!(bp.runtime_code.is_some());
    }

    #[test]
    fn unknown_fields_rejected() {
        let text = LEGACY.replace("components:", "surprise: 1\ncomponents:");
        let err = Blueprint::parse_str(&text, Some("/bp")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn remote_dataset_without_hash_rejected() {
        let text = r#"
registry_attrs:
  name: x
  valid_date_range:
    start_date: "2012-01-01"
    end_date: "2012-12-31"
components:
  - component_type: ROMS
    base_model:
      source_repo: https://github.com/CESR-lab/ucla-roms.git
      checkout_target: main
    discretization:
      n_procs_x: 1
      n_procs_y: 1
      time_step: 60
    model_grid:
      location: https://example.org/grid.nc
"#;
        let err = Blueprint::parse_str(text, None).unwrap_err();
        assert!(err.to_string().contains("file_hash"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn overrides_apply_and_reject_unknown_keys() {
        let mut bp = Blueprint::parse_str(LEGACY, Some("/bp")).unwrap();
        let overrides: serde_yaml::Mapping = serde_yaml::from_str(
            r#"
start_date: "2012-02-01"
end_date: "2012-02-29"
initial_conditions:
  location: /restarts/chunk01_rst.nc
"#,
        )
        .unwrap();
        bp.apply_overrides(&overrides).unwrap();
        assert_eq!(bp.start_date.unwrap(), SimDate::parse("2012-02-01").unwrap());
        assert_eq!(
            bp.datasets[&DatasetRole::InitialConditions][0]
                .source
                .resource()
                .location
                .to_string(),
            "/restarts/chunk01_rst.nc"
        );

        let bad: serde_yaml::Mapping =
            serde_yaml::from_str("n_procs_x: 4\n").unwrap();
        assert!(bp.apply_overrides(&bad).is_err());
    }

    #[test]
    fn to_simulation_defaults_to_valid_range() {
        let bp = Blueprint::parse_str(LEGACY, Some("/bp")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let sim = bp.to_simulation(&dir.path().join("case")).unwrap();
        assert_eq!(sim.start_date, bp.valid_date_range.start);
        assert_eq!(sim.end_date, bp.valid_date_range.end);
        assert_eq!(sim.codebases.len(), 2);
    }
}
