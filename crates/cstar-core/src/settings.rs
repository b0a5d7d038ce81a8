//! The ROMS runtime-control (`.in`) file.
//!
//! Line-block format: a `keyword:` line opens a block; values are
//! whitespace-separated tokens on the same line and on indented continuation
//! lines. Comments (`!` or `#`) and unrecognized lines pass through verbatim,
//! and untouched blocks re-render byte-identically, so a parse/render
//! round-trip only canonicalizes the blocks the simulation actually edits.
//!
//! Values stay strings end to end; numeric tokens keep their printed
//! precision.

use std::path::Path;

use crate::domain::error::{CstarError, Result};
use crate::domain::SimDate;

#[derive(Debug, Clone, PartialEq)]
enum Block {
    /// `key:` line plus its values. `raw` holds the original text and is
    /// dropped the moment the block is mutated.
    Entry {
        key: String,
        values: Vec<String>,
        raw: Option<String>,
    },
    /// Comment, blank, or unrecognized line, kept verbatim.
    Passthrough(String),
}

/// Parsed runtime-settings document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuntimeSettings {
    blocks: Vec<Block>,
}

impl RuntimeSettings {
    /// Parse the line-block text format.
    pub fn parse(text: &str) -> Self {
        let mut blocks: Vec<Block> = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim_start();
            let is_comment = trimmed.starts_with('!') || trimmed.starts_with('#');
            let indented = line.starts_with(' ') || line.starts_with('\t');

            if trimmed.is_empty() || is_comment {
                blocks.push(Block::Passthrough(line.to_string()));
                continue;
            }

            if indented {
                // Continuation of the most recent entry, if any.
                if let Some(Block::Entry { values, raw, .. }) = blocks
                    .iter_mut()
                    .rev()
                    .find(|b| matches!(b, Block::Entry { .. }))
                {
                    values.extend(trimmed.split_whitespace().map(str::to_string));
                    if let Some(raw) = raw {
                        raw.push('\n');
                        raw.push_str(line);
                    }
                    continue;
                }
                blocks.push(Block::Passthrough(line.to_string()));
                continue;
            }

            match split_key_line(trimmed) {
                Some((key, rest)) => {
                    blocks.push(Block::Entry {
                        key: key.to_string(),
                        values: rest.split_whitespace().map(str::to_string).collect(),
                        raw: Some(line.to_string()),
                    });
                }
                None => blocks.push(Block::Passthrough(line.to_string())),
            }
        }
        RuntimeSettings { blocks }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CstarError::io(path, e))?;
        Ok(Self::parse(&text))
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render()).map_err(|e| CstarError::io(path, e))
    }

    /// Values of a block, when present.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.blocks.iter().find_map(|b| match b {
            Block::Entry { key: k, values, .. } if k == key => Some(values.as_slice()),
            _ => None,
        })
    }

    /// First value of a block.
    pub fn get_single(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// Replace (or append) a block's values. Mutated blocks render in
    /// canonical single-line form.
    pub fn set<I, S>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        for block in &mut self.blocks {
            if let Block::Entry { key: k, values: v, raw } = block {
                if k == key {
                    *v = values;
                    *raw = None;
                    return;
                }
            }
        }
        self.blocks.push(Block::Entry {
            key: key.to_string(),
            values,
            raw: None,
        });
    }

    pub fn set_single(&mut self, key: &str, value: impl Into<String>) {
        self.set(key, [value.into()]);
    }

    /// Set a date value in the canonical `YYYY-MM-DD HH:MM:SS` form.
    pub fn set_date(&mut self, key: &str, date: &SimDate) {
        self.set_single(key, date.to_string());
    }

    /// Keys present, in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Entry { key, .. } => Some(key.as_str()),
            _ => None,
        })
    }

    /// Render back to text. Untouched blocks are byte-exact.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            match block {
                Block::Passthrough(line) => {
                    out.push_str(line);
                    out.push('\n');
                }
                Block::Entry { raw: Some(raw), .. } => {
                    out.push_str(raw);
                    out.push('\n');
                }
                Block::Entry { key, values, raw: None } => {
                    out.push_str(key);
                    out.push(':');
                    for v in values {
                        out.push(' ');
                        out.push_str(v);
                    }
                    out.push('\n');
                }
            }
        }
        out
    }
}

/// Split a `keyword: rest` line. ROMS keywords are single tokens ending in
/// `:` (possibly with trailing values on the line).
fn split_key_line(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let key = &line[..colon];
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, &line[colon + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
title:
   Roses are red

! baroclinic time stepping
time_stepping: NTIMES dt[sec] NDTFAST NINFO
               8640   60      30      1

S-coord: 5.0 2.0 300.0

grid: input_datasets/grid.nc
";

    #[test]
    fn parse_blocks_and_continuations() {
        let s = RuntimeSettings::parse(SAMPLE);
        assert_eq!(s.get("title").unwrap(), &["Roses", "are", "red"]);
        assert_eq!(
            s.get("time_stepping").unwrap(),
            &["NTIMES", "dt[sec]", "NDTFAST", "NINFO", "8640", "60", "30", "1"]
        );
        assert_eq!(s.get_single("grid"), Some("input_datasets/grid.nc"));
        assert_eq!(s.get("absent"), None);
    }

    #[test]
    fn untouched_document_round_trips_exactly() {
        let s = RuntimeSettings::parse(SAMPLE);
        assert_eq!(s.render(), SAMPLE);
    }

    #[test]
    fn mutated_block_renders_canonically_others_exact() {
        let mut s = RuntimeSettings::parse(SAMPLE);
        s.set("grid", ["input_datasets/new_grid.nc"]);
        let out = s.render();
        assert!(out.contains("grid: input_datasets/new_grid.nc\n"));
        // The comment and the untouched multi-line block are preserved.
        assert!(out.contains("! baroclinic time stepping\n"));
        assert!(out.contains("               8640   60      30      1\n"));
    }

    #[test]
    fn set_appends_missing_key() {
        let mut s = RuntimeSettings::parse(SAMPLE);
        s.set("MARBL_biogeochemistry", ["marbl_in"]);
        assert_eq!(s.get_single("MARBL_biogeochemistry"), Some("marbl_in"));
        assert!(s.render().ends_with("MARBL_biogeochemistry: marbl_in\n"));
    }

    #[test]
    fn reparse_of_render_is_stable() {
        let mut s = RuntimeSettings::parse(SAMPLE);
        s.set("time_stepping", ["720", "120", "30", "1"]);
        let once = s.render();
        let again = RuntimeSettings::parse(&once).render();
        assert_eq!(once, again);
    }

    #[test]
    fn date_formatting() {
        let mut s = RuntimeSettings::default();
        s.set_date("start_date", &SimDate::parse("2012-01-01 12:00:00").unwrap());
        assert_eq!(s.get("start_date").unwrap(), &["2012-01-01", "12:00:00"]);
        assert!(s.render().contains("start_date: 2012-01-01 12:00:00\n"));
    }

    #[test]
    fn numeric_precision_preserved() {
        let s = RuntimeSettings::parse("S-coord: 5.00 2.0e0 300.000\n");
        assert_eq!(s.get("S-coord").unwrap(), &["5.00", "2.0e0", "300.000"]);
        assert_eq!(s.render(), "S-coord: 5.00 2.0e0 300.000\n");
    }
}
