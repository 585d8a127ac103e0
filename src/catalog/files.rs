//! Enumeration of data files in the data root.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::error::ToolError;

/// Extensions recognised as CSV files (lowercase).
const CSV_EXTENSIONS: &[&str] = &["csv"];

/// Extensions recognised as spreadsheet containers (lowercase).
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods"];

/// Kind of a tabular data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Comma-separated values.
    Csv,
    /// Workbook with one or more sheets.
    Spreadsheet,
}

impl DataKind {
    /// Classifies a path by its extension, case-insensitively.
    ///
    /// Returns `None` for anything that is not a tabular data file.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if CSV_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Csv)
        } else if SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Spreadsheet)
        } else {
            None
        }
    }
}

/// A data file found directly under the data root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataFile {
    /// File name relative to the data root.
    pub name: String,
    /// CSV or spreadsheet.
    pub kind: DataKind,
    /// Size on disk.
    pub size_bytes: u64,
}

/// Lists the CSV and spreadsheet files directly under `root`, ordered by name.
///
/// The scan is not recursive. Only regular files with UTF-8 names are reported;
/// directories and symlinks are skipped so every entry is a file that lives
/// under the root.
/// A missing root is created and reported as empty.
///
/// # Errors
///
/// Returns `ToolError::Io` if the root exists but cannot be read, or cannot be
/// created.
#[instrument(fields(root = %root.display()))]
pub fn list_data_files(root: &Path) -> Result<Vec<DataFile>, ToolError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Data directory missing, creating it");
            fs::create_dir_all(root)
                .map_err(|e| ToolError::io("cannot create data directory", e))?;
            return Ok(Vec::new());
        }
        Err(e) => return Err(ToolError::io("cannot read data directory", e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ToolError::io("cannot read data directory", e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| ToolError::io("cannot read data directory entry", e))?;
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();
        // Callers pass names back as UTF-8 strings; a lossy name could never be resolved.
        let Ok(name) = entry.file_name().into_string() else {
            trace!(path = %path.display(), "Skipping file with a non UTF-8 name");
            continue;
        };
        let Some(kind) = DataKind::from_path(&path) else {
            trace!(path = %path.display(), "Skipping non-tabular file");
            continue;
        };

        let size_bytes = entry
            .metadata()
            .map_err(|e| ToolError::io("cannot read file metadata", e))?
            .len();

        files.push(DataFile {
            name,
            kind,
            size_bytes,
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(count = files.len(), "Listed data files");
    Ok(files)
}
