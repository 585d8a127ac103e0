//! File catalog for the data root.
//!
//! Enumerates CSV and spreadsheet files and reads spreadsheet structure. Nothing
//! is cached: every call re-reads the directory, so results always describe
//! files that exist at call time.
//!
//! # Example
//!
//! ```no_run
//! use tabular_data_mcp::catalog::DataCatalog;
//!
//! let catalog = DataCatalog::open("./data").unwrap();
//! for file in catalog.list_data_files().unwrap() {
//!     println!("{} ({:?})", file.name, file.kind);
//! }
//! ```

mod files;
mod paths;
mod sheets;

pub use files::{DataFile, DataKind, list_data_files};
pub use paths::{check_relative_name, resolve_in_root};
pub use sheets::{SheetDescriptor, list_sheets};

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::error::{ConfigError, ToolError};

/// Read-only view of the data root.
#[derive(Debug, Clone)]
pub struct DataCatalog {
    root: PathBuf,
}

impl DataCatalog {
    /// Opens the catalog, creating the data root if it does not exist.
    ///
    /// The root is canonicalized once here so later calls are independent of
    /// the process working directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DataRoot` if the directory cannot be created or
    /// resolved.
    #[instrument(skip(root), fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|source| ConfigError::DataRoot {
            path: root.to_path_buf(),
            source,
        })?;
        let root = fs::canonicalize(root).map_err(|source| ConfigError::DataRoot {
            path: root.to_path_buf(),
            source,
        })?;
        debug!(canonical = %root.display(), "Data root ready");
        Ok(Self { root })
    }

    /// Returns the canonical data root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists data files directly under the root.
    ///
    /// # Errors
    ///
    /// See [`list_data_files`].
    pub fn list_data_files(&self) -> Result<Vec<DataFile>, ToolError> {
        list_data_files(&self.root)
    }

    /// Lists the sheets of a spreadsheet under the root.
    ///
    /// # Errors
    ///
    /// See [`list_sheets`].
    pub fn list_sheets(&self, file_name: &str) -> Result<Vec<SheetDescriptor>, ToolError> {
        list_sheets(&self.root, file_name)
    }
}
