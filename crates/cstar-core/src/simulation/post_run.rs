//! Joining per-rank model outputs into global files.
//!
//! ROMS writes one netCDF per rank (`<stem>.NNN.nc`). The join fans out
//! across worker tasks bounded by `CSTAR_NPROCS_POST`; each stem is merged
//! serially by one `ncjoin` invocation, and the per-rank intermediates are
//! removed once their join succeeds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::domain::error::{CstarError, Result};

/// Worker cap: `CSTAR_NPROCS_POST`, defaulting to a third of the CPUs.
pub fn nprocs_post() -> usize {
    std::env::var("CSTAR_NPROCS_POST")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| (num_cpus::get() / 3).max(1))
}

/// Group `<stem>.NNN.nc` files by stem, rank order within each group.
pub fn partitioned_groups(output_dir: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut groups: BTreeMap<String, Vec<(u32, PathBuf)>> = BTreeMap::new();
    let entries = match std::fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(CstarError::io(output_dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| CstarError::io(output_dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some((stem, rank)) = split_rank_name(&name) {
            groups
                .entry(stem.to_string())
                .or_default()
                .push((rank, entry.path()));
        }
    }
    Ok(groups
        .into_iter()
        .map(|(stem, mut files)| {
            files.sort_by_key(|(rank, _)| *rank);
            (stem, files.into_iter().map(|(_, p)| p).collect())
        })
        .collect())
}

/// `stem.NNN.nc` → `(stem, NNN)`.
fn split_rank_name(name: &str) -> Option<(&str, u32)> {
    let body = name.strip_suffix(".nc")?;
    let (stem, rank) = body.rsplit_once('.')?;
    if stem.is_empty() || rank.is_empty() || !rank.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((stem, rank.parse().ok()?))
}

/// Join every partitioned group under `output_dir`; returns the joined
/// file paths. Partitioned intermediates are deleted per group on success.
pub async fn join_partitioned_outputs(output_dir: &Path, workers: usize) -> Result<Vec<PathBuf>> {
    let groups = partitioned_groups(output_dir)?;
    if groups.is_empty() {
        debug!(dir = %output_dir.display(), "no partitioned outputs to join");
        return Ok(Vec::new());
    }

    let limit = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    for (stem, files) in groups {
        let limit = limit.clone();
        let output_dir = output_dir.to_path_buf();
        tasks.spawn(async move {
            let _permit = limit.acquire_owned().await.expect("semaphore never closed");
            join_group(&output_dir, &stem, &files).await
        });
    }

    let mut joined = Vec::new();
    while let Some(result) = tasks.join_next().await {
        let path = result.map_err(|e| CstarError::Dataset {
            path: output_dir.to_path_buf(),
            message: format!("join worker panicked: {e}"),
        })??;
        joined.push(path);
    }
    joined.sort();
    info!(count = joined.len(), dir = %output_dir.display(), "joined partitioned outputs");
    Ok(joined)
}

/// One `ncjoin` invocation producing `<stem>.nc`, then cleanup.
async fn join_group(output_dir: &Path, stem: &str, files: &[PathBuf]) -> Result<PathBuf> {
    let output = Command::new("ncjoin")
        .args(files)
        .current_dir(output_dir)
        .output()
        .await
        .map_err(|e| CstarError::Dataset {
            path: output_dir.join(format!("{stem}.nc")),
            message: format!("failed to run ncjoin: {e}"),
        })?;
    if !output.status.success() {
        return Err(CstarError::Dataset {
            path: output_dir.join(format!("{stem}.nc")),
            message: format!(
                "ncjoin exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }

    let joined = output_dir.join(format!("{stem}.nc"));
    for file in files {
        tokio::fs::remove_file(file)
            .await
            .map_err(|e| CstarError::io(file, e))?;
    }
    Ok(joined)
}
