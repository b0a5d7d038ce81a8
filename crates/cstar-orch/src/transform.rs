//! Time-splitting transform: one long simulation into a restart-coupled
//! chain of shorter ones.
//!
//! Each chunk's initial conditions point at the previous chunk's restart
//! output, and the chunks form a linear `depends_on` sub-DAG appended in
//! place of the original step.

use std::path::Path;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use tracing::info;

use cstar_core::domain::error::{CstarError, Result};
use cstar_core::domain::{DateRange, SimDate};
use cstar_core::Blueprint;

use crate::workplan::{Step, Workplan};

/// Split granularity, from `CSTAR_ORCH_TRX_FREQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitFrequency {
    Monthly,
    Weekly,
    Daily,
}

impl FromStr for SplitFrequency {
    type Err = CstarError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(SplitFrequency::Monthly),
            "weekly" => Ok(SplitFrequency::Weekly),
            "daily" => Ok(SplitFrequency::Daily),
            other => Err(CstarError::Configuration(format!(
                "CSTAR_ORCH_TRX_FREQ must be monthly, weekly or daily, not {other:?}"
            ))),
        }
    }
}

impl SplitFrequency {
    /// Read the feature flag; unset means the transform is off.
    pub fn from_env() -> Result<Option<SplitFrequency>> {
        match std::env::var("CSTAR_ORCH_TRX_FREQ") {
            Ok(v) if !v.trim().is_empty() => Ok(Some(v.parse()?)),
            _ => Ok(None),
        }
    }
}

/// Chunk a range at calendar boundaries. Chunk N starts where chunk N-1
/// ends, so restarts line up exactly; the union covers the whole range.
pub fn split_range(range: &DateRange, freq: SplitFrequency) -> Vec<DateRange> {
    let mut chunks = Vec::new();
    let mut cursor = range.start;
    while cursor < range.end {
        let boundary = next_boundary(&cursor, freq);
        let end = boundary.min(range.end);
        chunks.push(DateRange { start: cursor, end });
        cursor = end;
    }
    if chunks.is_empty() {
        chunks.push(*range);
    }
    chunks
}

fn next_boundary(date: &SimDate, freq: SplitFrequency) -> SimDate {
    let dt = date.inner();
    let next = match freq {
        SplitFrequency::Monthly => {
            let (year, month) = if dt.month() == 12 {
                (dt.year() + 1, 1)
            } else {
                (dt.year(), dt.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1)
                .expect("first of month is always valid")
                .and_hms_opt(0, 0, 0)
                .expect("midnight is valid")
        }
        SplitFrequency::Weekly => midnight_after(dt.date(), 7),
        SplitFrequency::Daily => midnight_after(dt.date(), 1),
    };
    SimDate::new(next)
}

fn midnight_after(date: NaiveDate, days: u64) -> chrono::NaiveDateTime {
    date.checked_add_days(Days::new(days))
        .expect("dates stay in range")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
}

/// Expand one step into its restart-coupled chain.
///
/// `outputs_root` is the directory the orchestrator places step working
/// directories under; chunk N's initial conditions resolve to chunk N-1's
/// restart file there. A range that fits inside one chunk yields the step
/// unchanged.
pub fn expand_step(
    step: &Step,
    blueprint: &Blueprint,
    freq: SplitFrequency,
    outputs_root: &Path,
) -> Result<Vec<Step>> {
    let range = DateRange {
        start: blueprint.start_date.unwrap_or(blueprint.valid_date_range.start),
        end: blueprint.end_date.unwrap_or(blueprint.valid_date_range.end),
    };
    let chunks = split_range(&range, freq);
    if chunks.len() < 2 {
        return Ok(vec![step.clone()]);
    }

    let mut steps = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let chunk_name = format!("{}_{:02}", step.name, i + 1);
        let sim_name = format!("{}_{:02}", blueprint.name, i + 1);

        let mut overrides = step.blueprint_overrides.clone().unwrap_or_default();
        let mut set = |key: &str, value: serde_yaml::Value| {
            overrides.insert(serde_yaml::Value::String(key.to_string()), value);
        };
        set("name", serde_yaml::Value::String(sim_name));
        set(
            "start_date",
            serde_yaml::Value::String(chunk.start.to_string()),
        );
        set("end_date", serde_yaml::Value::String(chunk.end.to_string()));

        let depends_on = if i == 0 {
            step.depends_on.clone()
        } else {
            let prev_step = format!("{}_{:02}", step.name, i);
            let prev_sim = format!("{}_{:02}", blueprint.name, i);
            let restart = outputs_root
                .join(&prev_step)
                .join("output")
                .join(format!("{prev_sim}_rst.nc"));
            let mut ic = serde_yaml::Mapping::new();
            ic.insert(
                serde_yaml::Value::String("location".to_string()),
                serde_yaml::Value::String(restart.display().to_string()),
            );
            set("initial_conditions", serde_yaml::Value::Mapping(ic));
            vec![prev_step]
        };

        steps.push(Step {
            name: chunk_name,
            application: step.application.clone(),
            blueprint: step.blueprint.clone(),
            depends_on,
            blueprint_overrides: Some(overrides),
            compute_overrides: step.compute_overrides.clone(),
            workflow_overrides: step.workflow_overrides.clone(),
        });
    }

    info!(step = %step.name, chunks = steps.len(), "split step into restart chain");
    Ok(steps)
}

/// Apply the transform to every step of a workplan, loading each step's
/// blueprint to learn its date range.
pub async fn expand_workplan(
    plan: &Workplan,
    freq: SplitFrequency,
    outputs_root: &Path,
) -> Result<Workplan> {
    let mut expanded = plan.clone();
    let mut steps = Vec::new();
    for step in &plan.steps {
        let mut blueprint = Blueprint::from_location(&step.blueprint).await?;
        if let Some(overrides) = &step.blueprint_overrides {
            blueprint.apply_overrides(overrides)?;
        }
        steps.extend(expand_step(step, &blueprint, freq, outputs_root)?);
    }
    expanded.steps = steps;
    Ok(expanded)
}
