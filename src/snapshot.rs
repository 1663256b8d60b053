//! Persisted hourly snapshots as CSV files.
//!
//! Snapshots store hours as naive timestamps (`%Y-%m-%dT%H:%M:%S`) in one
//! consistent convention; an offset-carrying timestamp inside a snapshot is
//! rejected as an input error rather than silently coerced. Batch inputs may
//! be individual files or directories of `.csv` files.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PipelineError;

/// Expand a mix of file and directory inputs into a sorted list of CSV files.
/// A directory contributes every `.csv` file directly inside it.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, PipelineError> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
                .collect();
            found.sort();
            paths.extend(found);
        } else if input.exists() {
            paths.push(input.clone());
        } else {
            return Err(PipelineError::MissingInput(input.clone()));
        }
    }
    Ok(paths)
}

/// Read every row of a snapshot file. Unknown columns are ignored, which lets
/// callers read a projection (e.g. the trip-count triple out of the wider
/// feature snapshot).
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()));
    }

    let mut reader = csv::Reader::from_path(path).map_err(|e| PipelineError::snapshot(path, e))?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        rows.push(result.map_err(|e| PipelineError::snapshot(path, e))?);
    }
    Ok(rows)
}

/// Write rows to a snapshot file, creating parent directories as needed. The
/// file only appears once every row has serialized.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path).map_err(|e| PipelineError::snapshot(path, e))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| PipelineError::snapshot(path, e))?;
    }
    writer.flush()?;
    Ok(())
}
