//! System requirements checking implementation.

#![allow(unsafe_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::error::{Result, SystemRequirementsError};

/// Results of all system requirements checks.
#[derive(Debug, Clone)]
pub struct SystemRequirements {
    /// Whether unprivileged user namespaces are enabled
    pub user_namespaces: bool,
    /// Interpreter used inside the sandbox
    pub python_path: PathBuf,
}

/// Check all requirements for running sandboxed code.
///
/// Returns `Ok(SystemRequirements)` with all check results, or
/// `Err` with the first failing requirement.
#[instrument(fields(python = %python_path.display()))]
pub fn check_all(python_path: &Path) -> Result<SystemRequirements> {
    let user_namespaces = check_user_namespaces()?;
    let python_path = check_python_interpreter(python_path)?;

    Ok(SystemRequirements {
        user_namespaces,
        python_path,
    })
}

/// Check the interpreter exists and is executable.
///
/// # Errors
///
/// Returns error if the path is not an executable regular file.
pub fn check_python_interpreter(path: &Path) -> Result<PathBuf> {
    let missing = || SystemRequirementsError::PythonMissing {
        path: path.to_path_buf(),
    };

    let metadata = fs::metadata(path).map_err(|_| missing())?;
    if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
        return Err(missing().into());
    }

    debug!(path = %path.display(), "Python interpreter found");
    Ok(path.to_path_buf())
}

/// Sysctl present on Debian-derived kernels. Absent elsewhere.
const USERNS_SYSCTL: &str = "/proc/sys/kernel/unprivileged_userns_clone";

/// Check unprivileged user namespaces are enabled.
///
/// Trusts the Debian sysctl when the kernel has it; otherwise probes by
/// creating a user namespace in a forked child.
///
/// # Errors
///
/// Returns error if user namespaces are disabled.
#[instrument]
pub fn check_user_namespaces() -> Result<bool> {
    let enabled = match fs::read_to_string(USERNS_SYSCTL) {
        Ok(content) => userns_flag_enabled(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => probe_user_namespace()?,
        Err(source) => {
            return Err(SystemRequirementsError::ReadFailed {
                context: USERNS_SYSCTL.to_string(),
                source,
            }
            .into());
        }
    };

    if !enabled {
        return Err(SystemRequirementsError::UserNamespacesDisabled.into());
    }
    debug!("Unprivileged user namespaces available");
    Ok(true)
}

fn userns_flag_enabled(content: &str) -> bool {
    content.trim() == "1"
}

/// Forks a child that unshares CLONE_NEWUSER and reports success via its exit code.
fn probe_user_namespace() -> Result<bool> {
    use nix::sched::{CloneFlags, unshare};
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::{ForkResult, fork};

    // SAFETY: the child only calls unshare and exits, no allocation or locking.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            let code = i32::from(unshare(CloneFlags::CLONE_NEWUSER).is_err());
            std::process::exit(code);
        }
        Ok(ForkResult::Parent { child }) => Ok(matches!(
            waitpid(child, None),
            Ok(WaitStatus::Exited(_, 0))
        )),
        Err(errno) => Err(SystemRequirementsError::ReadFailed {
            context: "fork for user namespace probe".to_string(),
            source: std::io::Error::from(errno),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn test_userns_flag_parsing() {
        assert!(userns_flag_enabled("1\n"));
        assert!(userns_flag_enabled(" 1 "));
        assert!(!userns_flag_enabled("0\n"));
        assert!(!userns_flag_enabled("garbage"));
    }

    #[test]
    fn test_missing_interpreter() {
        let result = check_python_interpreter(Path::new("/nonexistent/bin/python3"));
        assert!(matches!(
            result,
            Err(Error::SystemRequirements(SystemRequirementsError::PythonMissing { .. }))
        ));
    }

    #[test]
    fn test_non_executable_interpreter() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let fake = dir.path().join("python3");
        fs::write(&fake, "#!/bin/sh\n").expect("write");
        fs::set_permissions(&fake, fs::Permissions::from_mode(0o644)).expect("chmod");

        assert!(check_python_interpreter(&fake).is_err());

        fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).expect("chmod");
        assert_eq!(check_python_interpreter(&fake).expect("executable"), fake);
    }

    #[test]
    fn test_directory_is_not_an_interpreter() {
        let dir = TempDir::new().expect("failed to create temp dir");
        assert!(check_python_interpreter(dir.path()).is_err());
    }

    #[test]
    #[ignore = "requires unprivileged user namespaces"]
    fn test_check_user_namespaces_real() {
        let result = check_user_namespaces();
        assert!(result.is_ok(), "User namespaces check failed: {result:?}");
    }
}
