//! Resolution of caller-supplied file names against the data root.
//!
//! Caller input is validated lexically before the filesystem is touched:
//! absolute paths and any `..` component are rejected outright. Names that
//! pass are then canonicalized so that a symlink pointing outside the root is
//! rejected as well.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, instrument};

use crate::error::ToolError;

/// Rejects file names that could address anything outside the data root.
///
/// Performs no filesystem access.
///
/// # Errors
///
/// Returns `ToolError::InvalidInput` for empty names, absolute paths, and names
/// containing `..` or a path prefix.
pub fn check_relative_name(file_name: &str) -> Result<&Path, ToolError> {
    if file_name.trim().is_empty() {
        return Err(ToolError::InvalidInput(
            "file name cannot be empty".to_string(),
        ));
    }

    let path = Path::new(file_name);
    if path.is_absolute() {
        return Err(ToolError::InvalidInput(format!(
            "'{file_name}' must be relative to the data directory"
        )));
    }

    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ToolError::InvalidInput(format!(
                    "'{file_name}' escapes the data directory"
                )));
            }
        }
    }

    Ok(path)
}

/// Resolves `file_name` to a canonical path inside `root`.
///
/// # Errors
///
/// - `ToolError::InvalidInput` if the name is not a plain relative path or
///   resolves (through symlinks) outside the root
/// - `ToolError::NotFound` if nothing exists at the resolved location
/// - `ToolError::Io` if the root or the file cannot be resolved
#[instrument(skip(root), fields(root = %root.display()))]
pub fn resolve_in_root(root: &Path, file_name: &str) -> Result<PathBuf, ToolError> {
    let relative = check_relative_name(file_name)?;

    let canonical_root = fs::canonicalize(root)
        .map_err(|e| ToolError::io("cannot resolve data directory", e))?;

    let candidate = canonical_root.join(relative);
    let canonical = match fs::canonicalize(&candidate) {
        Ok(path) => path,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ToolError::NotFound(file_name.to_string()));
        }
        Err(e) => return Err(ToolError::io(format!("cannot resolve '{file_name}'"), e)),
    };

    if !canonical.starts_with(&canonical_root) {
        return Err(ToolError::InvalidInput(format!(
            "'{file_name}' resolves outside the data directory"
        )));
    }

    debug!(resolved = %canonical.display(), "Resolved file name");
    Ok(canonical)
}
