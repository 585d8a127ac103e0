//! Configuration for the Python sandbox.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::DEFAULT_PYTHON;

/// Default cap on captured bytes per output stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Configuration for a Python sandbox.
///
/// Use the builder methods to customize the sandbox behavior.
///
/// # Example
///
/// ```
/// use tabular_data_mcp::sandbox::SandboxConfig;
/// use std::time::Duration;
///
/// let config = SandboxConfig::default()
///     .with_python_path("/usr/local/bin/python3")
///     .with_env("TZ", "UTC")
///     .with_timeout(Duration::from_secs(60))
///     .with_hostname("analysis");
/// ```
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Interpreter path. Must exist on the host under a directory that is
    /// mounted into the sandbox (e.g. `/usr`).
    pub python_path: PathBuf,

    /// Extra environment variables for the interpreter.
    pub env_vars: HashMap<String, String>,

    /// Maximum time allowed for one execution.
    pub timeout: Duration,

    /// Hostname for the sandbox (UTS namespace).
    pub hostname: String,

    /// Captured bytes per stream before truncation.
    pub max_output_bytes: usize,

    /// Where per-execution scratch directories are created. System temp dir if unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python_path: PathBuf::from(DEFAULT_PYTHON),
            env_vars: HashMap::new(),
            timeout: Duration::from_secs(30),
            hostname: String::from("sandbox"),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            scratch_dir: None,
        }
    }
}

impl SandboxConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interpreter path.
    #[must_use]
    pub fn with_python_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.python_path = path.into();
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Sets the execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the sandbox hostname (UTS namespace).
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Sets the per-stream output cap.
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Sets where scratch directories are created.
    #[must_use]
    pub fn with_scratch_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_server_defaults() {
        let config = SandboxConfig::new();
        assert_eq!(config.python_path, PathBuf::from(DEFAULT_PYTHON));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
        assert!(config.env_vars.is_empty());
        assert!(config.scratch_dir.is_none());
    }

    #[test]
    fn test_later_env_value_wins() {
        let config = SandboxConfig::new()
            .with_env("TZ", "UTC")
            .with_env("TZ", "Europe/Berlin");
        assert_eq!(config.env_vars.len(), 1);
        assert_eq!(config.env_vars["TZ"], "Europe/Berlin");
    }

    #[test]
    fn test_builder_overrides() {
        let config = SandboxConfig::default()
            .with_python_path("/opt/conda/bin/python")
            .with_timeout(Duration::from_millis(1500))
            .with_hostname("analysis")
            .with_max_output_bytes(4096)
            .with_scratch_dir("/var/tmp/tdm");

        assert_eq!(config.python_path, PathBuf::from("/opt/conda/bin/python"));
        assert_eq!(config.timeout.as_millis(), 1500);
        assert_eq!(config.hostname, "analysis");
        assert_eq!(config.max_output_bytes, 4096);
        assert_eq!(config.scratch_dir.as_deref(), Some(std::path::Path::new("/var/tmp/tdm")));
    }
}
