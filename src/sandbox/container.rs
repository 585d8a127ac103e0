//! Python execution in a hakoniwa container.
//!
//! A fresh container is built for every call. It unshares the user, mount and
//! PID namespaces (hakoniwa defaults) plus network, IPC and UTS, so executed
//! code sees only loopback and its own hostname.
//!
//! # Filesystem
//!
//! `rootfs("/")` exposes the host system directories (`/usr`, `/lib`, `/bin`,
//! `/etc`, ...) read-only, which is where the interpreter and its site-packages
//! live. On top of that the container gets:
//! - the data root, read-only, at `/data` (working directory)
//! - the per-execution scratch directory, read-write, at `/sandbox`
//! - fresh `/proc` and `/dev`, and a tmpfs `/tmp` (matplotlib cache, HOME)
//!
//! # Output and timeouts
//!
//! stdout and stderr are drained on their own threads while the interpreter
//! runs; a child blocked on a full pipe would otherwise never exit. Each stream
//! keeps at most `max_output_bytes` and discards the rest.
//!
//! The timeout is polled every 10ms and enforced with SIGKILL. Whatever the
//! code printed before the kill is returned together with the timeout message.

use std::io::{self, Read};
use std::sync::mpsc;
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use hakoniwa::{Container, Namespace, Stdio};
use tracing::{debug, instrument, trace, warn};

use super::prelude::bootstrap_script;
use super::security::MountPolicyGuard;
use super::workspace::{DATA_MOUNT_POINT, ExecutionWorkspace, WORK_MOUNT_POINT};
use super::{CodeSandbox, ExecutionRequest, ExecutionResult, SandboxConfig};
use crate::error::SandboxError;

/// Serializes container setup across concurrent executions.
///
/// Namespace creation and the mount storm that follows contend on kernel locks
/// when many run at once. Only build + spawn hold it; the interpreter itself
/// runs unserialized.
static SETUP_SEMAPHORE: OnceLock<Mutex<()>> = OnceLock::new();

/// Process-wide setup lock.
fn setup_semaphore() -> &'static Mutex<()> {
    SETUP_SEMAPHORE.get_or_init(|| Mutex::new(()))
}

/// Raw output of one interpreter run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, possibly truncated.
    pub stdout: String,
    /// Standard error, possibly truncated.
    pub stderr: String,
    /// Exit code (meaningless if `timed_out`).
    pub exit_code: i32,
    /// Whether the run was killed for exceeding the timeout.
    pub timed_out: bool,
}

impl CommandOutput {
    /// Returns `true` if the command exited with code 0 before the timeout.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Runs Python code in a hakoniwa container.
///
/// # Example
///
/// ```no_run
/// use tabular_data_mcp::sandbox::{CodeSandbox, ExecutionRequest, PythonSandbox, SandboxConfig};
///
/// let sandbox = PythonSandbox::new(SandboxConfig::default()).unwrap();
/// let result = sandbox.execute(&ExecutionRequest::new("print('hi')", "/srv/data")).unwrap();
/// assert_eq!(result.stdout, "hi\n");
/// ```
pub struct PythonSandbox {
    config: SandboxConfig,
    guard: MountPolicyGuard,
}

impl PythonSandbox {
    /// Creates a new sandbox with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::CreationFailed` if the interpreter path is not an
    /// absolute path to an existing file.
    #[instrument(skip(config), fields(python = %config.python_path.display()))]
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        if !config.python_path.is_absolute() || !config.python_path.is_file() {
            return Err(SandboxError::CreationFailed(format!(
                "python interpreter not found: {}",
                config.python_path.display()
            )));
        }
        debug!("Creating Python sandbox");
        Ok(Self {
            config,
            guard: MountPolicyGuard::new(),
        })
    }

    /// Returns a reference to the sandbox configuration.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Builds a hakoniwa container with the configured namespace isolation.
    ///
    /// Rebuilt for each execution because hakoniwa consumes it when creating a Command.
    #[instrument(skip(self))]
    fn build_container(&self, data_root: &str, work_dir: &str) -> Result<Container, SandboxError> {
        trace!("Building hakoniwa container");
        let mut container = Container::new();

        container
            .unshare(Namespace::Ipc)
            .unshare(Namespace::Network)
            .unshare(Namespace::Uts);

        container.hostname(&self.config.hostname);

        container
            .rootfs("/")
            .map_err(|e| SandboxError::CreationFailed(format!("failed to set rootfs: {e}")))?;

        container
            .procfsmount("/proc")
            .devfsmount("/dev")
            .tmpfsmount("/tmp");

        container.bindmount_ro(data_root, DATA_MOUNT_POINT);
        container.bindmount_rw(work_dir, WORK_MOUNT_POINT);

        trace!("Container build complete");
        Ok(container)
    }

    /// Builds default environment variables for the interpreter.
    ///
    /// These are merged with configured env vars, with configured vars taking precedence.
    fn default_env_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("PATH", "/usr/local/bin:/usr/bin:/bin"),
            ("HOME", "/tmp"),
            ("LANG", "C.UTF-8"),
            ("PYTHONIOENCODING", "utf-8"),
            ("PYTHONDONTWRITEBYTECODE", "1"),
            ("MPLBACKEND", "Agg"),
            ("MPLCONFIGDIR", "/tmp/matplotlib"),
        ]
    }

    /// Runs the bootstrap for a prepared workspace and captures its output.
    #[instrument(skip_all, fields(timeout_ms = %self.config.timeout.as_millis()))]
    fn run_interpreter(
        &self,
        workspace: &ExecutionWorkspace,
        data_root: &str,
    ) -> Result<CommandOutput, SandboxError> {
        trace!("Acquiring setup semaphore");
        // A poisoned lock only means another setup panicked; the guarded data is ().
        let setup_guard = setup_semaphore()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let work_dir = workspace.path().to_string_lossy().into_owned();
        let container = self.build_container(data_root, &work_dir)?;

        let python = self.config.python_path.to_string_lossy().into_owned();
        let bootstrap = ExecutionWorkspace::sandbox_bootstrap_path();
        let mut cmd = container.command(&python);
        cmd.args(&["-s", bootstrap.as_str()]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.current_dir(DATA_MOUNT_POINT);

        for (key, value) in Self::default_env_vars() {
            cmd.env(key, value);
        }
        for (key, value) in &self.config.env_vars {
            cmd.env(key, value);
        }

        trace!("Spawning interpreter");
        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::ExecutionFailed(format!("failed to spawn python: {e}")))?;

        // Stagger the mount-heavy phase of concurrent sandboxes.
        thread::sleep(Duration::from_millis(5));
        drop(setup_guard);
        trace!("Setup semaphore released, interpreter running");

        let limit = self.config.max_output_bytes;
        let stdout_reader = child.stdout.take();
        let stderr_reader = child.stderr.take();

        let (stdout_tx, stdout_rx) = mpsc::channel::<Vec<u8>>();
        let (stderr_tx, stderr_rx) = mpsc::channel::<Vec<u8>>();

        let stdout_join = thread::spawn(move || {
            let buf = stdout_reader
                .map(|r| drain_capped(r, limit))
                .unwrap_or_default();
            let _ = stdout_tx.send(buf);
        });

        let stderr_join = thread::spawn(move || {
            let buf = stderr_reader
                .map(|r| drain_capped(r, limit))
                .unwrap_or_default();
            let _ = stderr_tx.send(buf);
        });

        let start = Instant::now();
        let mut timed_out = false;
        let exit_code = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status.code,
                Ok(None) => {
                    if start.elapsed() > self.config.timeout {
                        warn!(elapsed_ms = %start.elapsed().as_millis(), "Execution timed out, sending SIGKILL");
                        let _ = child.kill();
                        let _ = child.wait();
                        timed_out = true;
                        break -1;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = stdout_join.join();
                    let _ = stderr_join.join();
                    return Err(SandboxError::ExecutionFailed(format!(
                        "failed to wait for python: {e}"
                    )));
                }
            }
        };

        let stdout_bytes = stdout_rx.recv().unwrap_or_default();
        let stderr_bytes = stderr_rx.recv().unwrap_or_default();

        let _ = stdout_join.join();
        let _ = stderr_join.join();

        debug!(exit_code, timed_out, elapsed_ms = %start.elapsed().as_millis(), "Interpreter finished");
        Ok(CommandOutput {
            stdout: decode_capped(stdout_bytes, limit),
            stderr: decode_capped(stderr_bytes, limit),
            exit_code,
            timed_out,
        })
    }
}

impl CodeSandbox for PythonSandbox {
    #[instrument(skip_all, fields(data_root = %request.data_root.display(), code_len = request.code.len()))]
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        if request.code.trim().is_empty() {
            debug!("Empty code, nothing to execute");
            return Ok(ExecutionResult::empty());
        }

        for (i, line) in request.code.lines().enumerate() {
            debug!("{:3} | {}", i + 1, line);
        }

        let data_root = self.guard.validate_mount_source(&request.data_root)?;
        let bootstrap = bootstrap_script(&request.permitted_imports, &request.preloads)?;
        let workspace = ExecutionWorkspace::create(
            self.config.scratch_dir.as_deref(),
            &bootstrap,
            &request.code,
        )?;

        let output = self.run_interpreter(&workspace, &data_root.to_string_lossy())?;
        let artifacts = workspace.collect_artifacts()?;

        let success = output.success();
        let mut stderr = output.stderr;
        if output.timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "execution timed out after {}s and was terminated",
                self.config.timeout.as_secs_f32()
            ));
        }

        Ok(ExecutionResult {
            stdout: output.stdout,
            stderr,
            success,
            artifacts,
        })
    }
}

impl std::fmt::Debug for PythonSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonSandbox")
            .field("config", &self.config)
            .finish()
    }
}

/// Reads up to `limit + 1` bytes, then discards the rest so the writer never blocks.
fn drain_capped(mut reader: impl Read, limit: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let _ = (&mut reader).take(cap).read_to_end(&mut buf);
    let _ = io::copy(&mut reader, &mut io::sink());
    buf
}

/// Decodes captured bytes, truncating to `limit` with a marker line.
fn decode_capped(mut bytes: Vec<u8>, limit: usize) -> String {
    if bytes.len() <= limit {
        return String::from_utf8_lossy(&bytes).into_owned();
    }
    bytes.truncate(limit);
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&format!("[output truncated at {limit} bytes]\n"));
    text
}
