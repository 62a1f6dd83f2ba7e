//! Jobfile reading: line filtering and field splitting.
//!
//! A jobfile is plain text, one job per line. Blank lines and lines starting
//! with `#` are ignored; every other line is split on [`FIELD_SEPARATOR`]
//! without any quoting rules.

use std::io::Read;
use std::path::{Path, PathBuf};

use jobrunner_types::Origin;

use crate::error::{RunError, RunResult};

/// Separator between job line fields.
pub const FIELD_SEPARATOR: char = ',';

/// One job line together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLine {
    pub origin: Origin,
    pub fields: Vec<String>,
}

/// Split a line into fields. Empty fields are kept.
pub fn split_fields(line: &str) -> Vec<String> {
    line.split(FIELD_SEPARATOR).map(str::to_string).collect()
}

/// Blank (whitespace only) and comment lines carry no job.
pub fn is_skippable(line: &str) -> bool {
    line.trim().is_empty() || line.starts_with('#')
}

/// Extract job lines from jobfile text.
///
/// Line numbers are physical, so skipped lines still count.
pub fn parse_jobfile(file_index: usize, path: &Path, content: &str) -> Vec<JobLine> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !is_skippable(line))
        .map(|(i, line)| JobLine {
            origin: Origin::new(file_index, path, i + 1),
            fields: split_fields(line),
        })
        .collect()
}

/// Open and read one jobfile.
pub fn read_jobfile(file_index: usize, path: &Path) -> RunResult<Vec<JobLine>> {
    let mut file = std::fs::File::open(path).map_err(|source| RunError::JobfileOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|source| RunError::JobfileRead {
            path: path.to_path_buf(),
            source,
        })?;

    let content = String::from_utf8_lossy(&bytes);
    let lines = parse_jobfile(file_index, path, &content);
    tracing::debug!(file = %path.display(), jobs = lines.len(), "read jobfile");
    Ok(lines)
}

/// Read every jobfile in order. The first unopenable file aborts the run.
pub fn read_jobfiles(paths: &[PathBuf]) -> RunResult<Vec<JobLine>> {
    let mut lines = Vec::new();
    for (file_index, path) in paths.iter().enumerate() {
        lines.extend(read_jobfile(file_index, path)?);
    }
    Ok(lines)
}
