//! Per-execution scratch directory.
//!
//! Each execution gets a fresh private directory holding the bootstrap, the
//! code, and whatever artifacts the code produces. It is bind-mounted into the
//! sandbox at [`WORK_MOUNT_POINT`] and removed when the workspace is dropped,
//! so nothing outlives the call.
//!
//! ```text
//! {tmp}/tdm-exec-XXXXXX/     -> /sandbox (read-write)
//! ├── bootstrap.py
//! ├── main.py
//! └── artifacts/
//!     └── figure_01.png
//! ```

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tempfile::TempDir;
use tracing::{debug, instrument, trace};

use super::Artifact;
use super::prelude::{ARTIFACTS_DIR, BOOTSTRAP_FILE, CODE_FILE};
use crate::error::SandboxError;

/// Where the data root is mounted inside the sandbox (read-only).
pub const DATA_MOUNT_POINT: &str = "/data";

/// Where the scratch directory is mounted inside the sandbox (read-write).
pub const WORK_MOUNT_POINT: &str = "/sandbox";

/// Directory permissions: owner read/write/execute only (0700).
const DIR_PERMISSIONS: u32 = 0o700;

/// Artifact extensions collected after execution, with their MIME types.
const ARTIFACT_TYPES: &[(&str, &str)] = &[("png", "image/png")];

/// Scratch directory for one execution. Deleted on drop.
#[derive(Debug)]
pub struct ExecutionWorkspace {
    dir: TempDir,
}

impl ExecutionWorkspace {
    /// Creates the scratch directory and writes the bootstrap and code into it.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Workspace` if the directory or files cannot be
    /// created.
    #[instrument(skip(bootstrap, code), fields(code_len = code.len()))]
    pub fn create(
        base: Option<&Path>,
        bootstrap: &str,
        code: &str,
    ) -> Result<Self, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tdm-exec-");
        let dir = match base {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
        .map_err(|source| SandboxError::Workspace {
            context: "failed to create scratch directory".to_string(),
            source,
        })?;

        let workspace = Self { dir };
        workspace.write(BOOTSTRAP_FILE, bootstrap)?;
        workspace.write(CODE_FILE, code)?;

        let artifacts = workspace.artifacts_dir();
        fs::create_dir(&artifacts).map_err(|source| SandboxError::Workspace {
            context: format!("failed to create {}", artifacts.display()),
            source,
        })?;
        fs::set_permissions(workspace.path(), fs::Permissions::from_mode(DIR_PERMISSIONS))
            .map_err(|source| SandboxError::Workspace {
                context: "failed to set scratch directory permissions".to_string(),
                source,
            })?;

        debug!(path = %workspace.path().display(), "Scratch directory ready");
        Ok(workspace)
    }

    /// Host path of the scratch directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the bootstrap as seen from inside the sandbox.
    #[must_use]
    pub fn sandbox_bootstrap_path() -> String {
        format!("{WORK_MOUNT_POINT}/{BOOTSTRAP_FILE}")
    }

    /// Reads every artifact the code produced, ordered by file name.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Workspace` if the artifact directory cannot be read.
    pub fn collect_artifacts(&self) -> Result<Vec<Artifact>, SandboxError> {
        let dir = self.artifacts_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let read_err = |source| SandboxError::Workspace {
            context: format!("failed to read {}", dir.display()),
            source,
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            if entry.file_type().map_err(read_err)?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut artifacts = Vec::new();
        for path in paths {
            let Some(mime_type) = mime_type_for(&path) else {
                trace!(path = %path.display(), "Ignoring unknown artifact type");
                continue;
            };
            let bytes = fs::read(&path).map_err(read_err)?;
            artifacts.push(Artifact {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                mime_type: mime_type.to_string(),
                data: STANDARD.encode(bytes),
            });
        }

        debug!(count = artifacts.len(), "Collected artifacts");
        Ok(artifacts)
    }

    fn artifacts_dir(&self) -> std::path::PathBuf {
        self.dir.path().join(ARTIFACTS_DIR)
    }

    fn write(&self, name: &str, contents: &str) -> Result<(), SandboxError> {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).map_err(|source| SandboxError::Workspace {
            context: format!("failed to write {}", path.display()),
            source,
        })
    }
}

fn mime_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    ARTIFACT_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}
