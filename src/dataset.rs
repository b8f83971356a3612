//! Embedded datasets
//!
//! Callers may hand over tabular data inline instead of as a file. It is
//! written to disk before the run starts so generated code can load it.

use crate::error::SetupError;
use crate::session::{create_unique_dir, session_dir_name};
use chrono::Local;
use std::path::{Path, PathBuf};

/// File name used for a materialized dataset
pub const DATASET_FILE_NAME: &str = "input_data.csv";

/// Subdirectory of the output root holding uploaded datasets
pub const UPLOADS_DIR: &str = "uploads";

fn header_row(csv_text: &str) -> Result<&str, SetupError> {
    let header = csv_text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| SetupError::Dataset("dataset is empty".to_string()))?;

    if header.split(',').all(|column| column.trim().is_empty()) {
        return Err(SetupError::Dataset("dataset has no header row".to_string()));
    }
    Ok(header)
}

/// Write an uploaded dataset to a directory of its own under
/// `output_root/uploads/` and return the file path.
///
/// The directory is named like a session directory for `goal`, so uploads
/// made for concurrent runs never overwrite each other.
pub fn materialize_upload(csv_text: &str, output_root: &Path, goal: &str) -> Result<PathBuf, SetupError> {
    header_row(csv_text)?;

    let uploads = output_root.join(UPLOADS_DIR);
    let name = session_dir_name(goal, &Local::now());
    let dir = create_unique_dir(&uploads, &name).map_err(|source| SetupError::DatasetWrite {
        path: uploads.join(&name),
        source,
    })?;
    materialize_csv(csv_text, &dir)
}

/// Write `csv_text` to `dir/input_data.csv` and return the path.
///
/// The text must have a non-empty header row. `dir` is created if missing.
pub fn materialize_csv(csv_text: &str, dir: &Path) -> Result<PathBuf, SetupError> {
    let header = header_row(csv_text)?;

    std::fs::create_dir_all(dir).map_err(|source| SetupError::DatasetWrite {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(DATASET_FILE_NAME);
    std::fs::write(&path, csv_text).map_err(|source| SetupError::DatasetWrite {
        path: path.clone(),
        source,
    })?;

    tracing::info!(
        path = %path.display(),
        columns = header.split(',').count(),
        bytes = csv_text.len(),
        "Dataset materialized"
    );
    Ok(path)
}
