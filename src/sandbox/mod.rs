//! Sandboxed Python execution.
//!
//! This module does not implement isolation itself. It forwards code to an
//! execution collaborator behind the [`CodeSandbox`] trait and relays back what
//! the collaborator reports. Any security property of the server is exactly as
//! strong as the collaborator's guarantees.
//!
//! The default collaborator, [`PythonSandbox`], runs the interpreter in Linux
//! namespaces via hakoniwa:
//! - no network (fresh network namespace, loopback only)
//! - host filesystem hidden except system directories, mounted read-only
//! - the data root mounted read-only at `/data` and used as working directory
//! - imports from executed code limited to the permitted library set
//!
//! # Example
//!
//! ```no_run
//! use tabular_data_mcp::libraries::LibraryRegistry;
//! use tabular_data_mcp::sandbox::{CodeSandbox, ExecutionRequest, PythonSandbox, SandboxConfig};
//!
//! let sandbox = PythonSandbox::new(SandboxConfig::default()).unwrap();
//! let request = ExecutionRequest::new("print(1 + 1)", "/srv/data")
//!     .with_libraries(&LibraryRegistry::builtin());
//!
//! let result = sandbox.execute(&request).unwrap();
//! assert!(result.success);
//! assert_eq!(result.stdout, "2\n");
//! ```

mod config;
mod container;
mod prelude;
mod security;
mod workspace;

pub use config::SandboxConfig;
pub use container::{CommandOutput, PythonSandbox};
pub use prelude::{ARTIFACTS_DIR, BOOTSTRAP_FILE, CODE_FILE, bootstrap_script};
pub use security::{MountPolicyGuard, is_path_forbidden};
pub use workspace::{DATA_MOUNT_POINT, ExecutionWorkspace, WORK_MOUNT_POINT};

use std::path::PathBuf;

use serde::Serialize;

use crate::error::SandboxError;
use crate::libraries::LibraryRegistry;

/// A global name bound to an imported module before executed code runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preload {
    /// Name visible to executed code.
    pub alias: String,
    /// Dotted module path to import.
    pub module: String,
}

impl Preload {
    /// Creates a preload binding.
    pub fn new(alias: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            module: module.into(),
        }
    }
}

/// One code execution. Never retained after the call returns.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Source code to run.
    pub code: String,
    /// Host directory exposed to the code as its working directory.
    pub data_root: PathBuf,
    /// Top-level modules the code may import.
    pub permitted_imports: Vec<String>,
    /// Names bound before the code runs.
    pub preloads: Vec<Preload>,
}

impl ExecutionRequest {
    /// Creates a request with no permitted imports.
    pub fn new(code: impl Into<String>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            code: code.into(),
            data_root: data_root.into(),
            permitted_imports: Vec::new(),
            preloads: Vec::new(),
        }
    }

    /// Permits and preloads the libraries of `registry`.
    #[must_use]
    pub fn with_libraries(mut self, registry: &LibraryRegistry) -> Self {
        self.permitted_imports = registry.permitted_imports();
        self.preloads = registry.preloads();
        self
    }
}

/// A non-textual output of executed code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// File name the artifact was saved under, e.g. `figure_01.png`.
    pub name: String,
    /// MIME type of `data`.
    pub mime_type: String,
    /// Base64-encoded content.
    pub data: String,
}

/// What the sandbox reported for one execution.
///
/// `stdout` and `stderr` are not exclusive: a failure can follow partial output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error, including tracebacks and sandbox messages.
    pub stderr: String,
    /// Whether the code ran to completion without error.
    pub success: bool,
    /// Images and other files produced by the code.
    pub artifacts: Vec<Artifact>,
}

impl ExecutionResult {
    /// Successful result with no output.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Failed result carrying only an explanatory message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            stderr: message.into(),
            success: false,
            ..Self::default()
        }
    }
}

/// Capability interface to an external code execution sandbox.
///
/// Implementations run the code with `request.data_root` as working directory,
/// restrict imports to `request.permitted_imports`, and report what happened.
/// Failures of the code itself (exceptions, denied imports, timeouts) are
/// reported in-band as a failed [`ExecutionResult`]; `Err` means the sandbox
/// could not run the code at all.
pub trait CodeSandbox: Send + Sync {
    /// Runs `request` to completion or timeout.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError` if the sandbox cannot be set up or the
    /// interpreter cannot be started.
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, SandboxError>;
}
