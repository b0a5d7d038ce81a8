//! Workplan model: a DAG of blueprint-executing steps.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use cstar_core::domain::error::{CstarError, Result};

use crate::dag;

/// Authoring state of a workplan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkplanState {
    Draft,
    Validated,
}

/// One blueprint-executing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub name: String,

    /// Application the blueprint drives (e.g. `roms-marbl`).
    pub application: String,

    /// Path or URL of the step's blueprint.
    pub blueprint: String,

    /// Names of sibling steps that must complete first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint_overrides: Option<serde_yaml::Mapping>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_overrides: Option<serde_yaml::Mapping>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_overrides: Option<serde_yaml::Mapping>,
}

/// A declarative DAG of simulations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workplan {
    pub name: String,

    pub description: String,

    pub state: WorkplanState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_environment: Option<String>,

    /// Free-form substitution map; `${key}` in step fields expands to the
    /// mapped value. The only place unknown keys are welcome.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtime_vars: BTreeMap<String, String>,

    pub steps: Vec<Step>,
}

/// Blueprint-override keys the launcher understands.
const KNOWN_BLUEPRINT_OVERRIDES: &[&str] = &["name", "start_date", "end_date", "initial_conditions"];

/// Compute-override keys mapped onto run options.
const KNOWN_COMPUTE_OVERRIDES: &[&str] = &["account_key", "queue_name", "walltime", "job_name"];

impl Workplan {
    /// Parse workplan text and expand `${var}` references from
    /// `runtime_vars` into step fields.
    pub fn parse_str(text: &str) -> Result<Workplan> {
        let mut plan: Workplan = serde_yaml::from_str(text)?;
        plan.expand_runtime_vars();
        Ok(plan)
    }

    pub fn from_path(path: &Path) -> Result<Workplan> {
        let text = std::fs::read_to_string(path).map_err(|e| CstarError::io(path, e))?;
        Self::parse_str(&text)
    }

    /// Render back to YAML.
    pub fn render(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn expand_runtime_vars(&mut self) {
        if self.runtime_vars.is_empty() {
            return;
        }
        let expand = |s: &mut String, vars: &BTreeMap<String, String>| {
            for (key, value) in vars {
                let needle = format!("${{{key}}}");
                if s.contains(&needle) {
                    *s = s.replace(&needle, value);
                }
            }
        };
        let vars = self.runtime_vars.clone();
        for step in &mut self.steps {
            expand(&mut step.blueprint, &vars);
            expand(&mut step.application, &vars);
        }
    }

    /// Schema-level validation: unique step names, resolvable dependencies,
    /// acyclic graph, recognized override keys.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(CstarError::Validation(format!(
                "workplan {} has no steps",
                self.name
            )));
        }

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(CstarError::Validation(format!(
                    "duplicate step name {:?}",
                    step.name
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.name {
                    return Err(CstarError::Validation(format!(
                        "step {:?} depends on itself",
                        step.name
                    )));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(CstarError::Validation(format!(
                        "step {:?} depends on unknown step {dep:?}",
                        step.name
                    )));
                }
            }
            check_override_keys(
                step.blueprint_overrides.as_ref(),
                KNOWN_BLUEPRINT_OVERRIDES,
                &step.name,
                "blueprint_overrides",
            )?;
            check_override_keys(
                step.compute_overrides.as_ref(),
                KNOWN_COMPUTE_OVERRIDES,
                &step.name,
                "compute_overrides",
            )?;
        }

        // Cycle check; the returned order is discarded here.
        dag::topo_order(&self.steps)?;
        Ok(())
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}

fn check_override_keys(
    overrides: Option<&serde_yaml::Mapping>,
    known: &[&str],
    step: &str,
    field: &str,
) -> Result<()> {
    let Some(overrides) = overrides else {
        return Ok(());
    };
    for key in overrides.keys() {
        let key = key.as_str().ok_or_else(|| {
            CstarError::Validation(format!("step {step:?}: {field} keys must be strings"))
        })?;
        if !known.contains(&key) {
            return Err(CstarError::Validation(format!(
                "step {step:?}: unrecognized {field} key {key:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: three_jobs
description: one chain plus an independent step
state: draft
runtime_vars:
  blueprints: /plans
steps:
  - name: job1
    application: roms-marbl
    blueprint: ${blueprints}/first.yaml
  - name: job2
    application: roms-marbl
    blueprint: ${blueprints}/second.yaml
    depends_on: [job1]
  - name: job3
    application: roms-marbl
    blueprint: ${blueprints}/third.yaml
"#;

    #[test]
    fn parse_and_expand_runtime_vars() {
        let plan = Workplan::parse_str(SAMPLE).unwrap();
        assert_eq!(plan.name, "three_jobs");
        assert_eq!(plan.state, WorkplanState::Draft);
        assert_eq!(plan.steps[0].blueprint, "/plans/first.yaml");
        assert_eq!(plan.steps[1].depends_on, vec!["job1"]);
        plan.validate().unwrap();
    }

    #[test]
    fn duplicate_names_rejected() {
        let text = SAMPLE.replace("name: job3", "name: job1");
        let plan = Workplan::parse_str(&text).unwrap();
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn unknown_dependency_rejected() {
        let text = SAMPLE.replace("depends_on: [job1]", "depends_on: [job9]");
        let plan = Workplan::parse_str(&text).unwrap();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn cycle_rejected() {
        let text = r#"
name: loop
description: cyclic
state: draft
steps:
  - name: a
    application: x
    blueprint: /p/a.yaml
    depends_on: [b]
  - name: b
    application: x
    blueprint: /p/b.yaml
    depends_on: [a]
"#;
        let plan = Workplan::parse_str(text).unwrap();
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn unknown_top_level_field_rejected() {
        let text = SAMPLE.replace("description:", "surprise: 1\ndescription:");
        assert!(Workplan::parse_str(&text).is_err());
    }

    #[test]
    fn unrecognized_override_key_rejected() {
        let text = r#"
name: x
description: y
state: draft
steps:
  - name: a
    application: x
    blueprint: /p/a.yaml
    blueprint_overrides:
      n_procs_x: 4
"#;
        let plan = Workplan::parse_str(text).unwrap();
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("n_procs_x"));
    }

    #[test]
    fn render_round_trip() {
        let plan = Workplan::parse_str(SAMPLE).unwrap();
        let rendered = plan.render().unwrap();
        let again = Workplan::parse_str(&rendered).unwrap();
        assert_eq!(plan, again);
    }
}
