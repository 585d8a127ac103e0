//! Policy checks for host paths mounted into the sandbox.
//!
//! Beyond the read-only system directories, the data root is the only host
//! path bind-mounted into the sandbox that the server does not create itself.
//! It is checked at startup and again before every mount. A path is refused
//! when it is, lies under, or contains a credential location (pointing the
//! data root at `$HOME` would otherwise expose `~/.ssh` to executed code), or
//! when it is a host pseudo-filesystem.

use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::error::MountError;

/// Credential locations relative to the home directory.
const HOME_CREDENTIALS: &[&str] = &[
    ".ssh",
    ".gnupg",
    ".aws",
    ".azure",
    ".config/gcloud",
    ".config/gh",
    ".kube",
    ".docker",
    ".kaggle",
    ".databrickscfg",
    ".pgpass",
    ".my.cnf",
    ".netrc",
    ".git-credentials",
    ".pypirc",
    ".npmrc",
    ".cargo/credentials.toml",
];

/// Credential locations outside the home directory.
const SYSTEM_CREDENTIALS: &[&str] = &[
    "/etc/ssh",
    "/etc/shadow",
    "/etc/gshadow",
    "/etc/sudoers",
    "/run/secrets",
];

/// Host pseudo-filesystems. Their contents describe the host, not data.
const PSEUDO_FILESYSTEMS: &[&str] = &["/proc", "/sys", "/dev", "/run"];

/// Name fragments that mark a path as holding secrets.
const SECRET_MARKERS: &[&str] = &["keyring", "credential"];

/// Why a path was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Refusal {
    Relative,
    Unresolvable(String),
    NotADirectory,
    FilesystemRoot,
    PseudoFilesystem(PathBuf),
    InsideCredentials(PathBuf),
    ContainsCredentials(PathBuf),
    SecretMarker(&'static str),
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relative => f.write_str("must be an absolute path"),
            Self::Unresolvable(e) => write!(f, "cannot be resolved ({e})"),
            Self::NotADirectory => f.write_str("must be a directory"),
            Self::FilesystemRoot => f.write_str("cannot be the filesystem root"),
            Self::PseudoFilesystem(p) => write!(f, "is under host filesystem {}", p.display()),
            Self::InsideCredentials(p) => write!(f, "is under credential path {}", p.display()),
            Self::ContainsCredentials(p) => write!(f, "contains credential path {}", p.display()),
            Self::SecretMarker(m) => write!(f, "has '{m}' in its name"),
        }
    }
}

/// Policy guard for validating paths before mounting.
#[derive(Debug, Clone)]
pub struct MountPolicyGuard {
    /// Credential locations, canonicalized where they exist.
    credentials: Vec<PathBuf>,
}

impl MountPolicyGuard {
    /// Creates a guard for the current user's home directory.
    #[must_use]
    pub fn new() -> Self {
        Self::for_home(std::env::var_os("HOME").map(PathBuf::from).as_deref())
    }

    /// Creates a guard for an explicit home directory.
    #[must_use]
    pub fn for_home(home: Option<&Path>) -> Self {
        let mut credentials: Vec<PathBuf> = SYSTEM_CREDENTIALS.iter().map(PathBuf::from).collect();
        if let Some(home) = home {
            credentials.extend(HOME_CREDENTIALS.iter().map(|p| home.join(p)));
        }
        for path in &mut credentials {
            if let Ok(canonical) = fs::canonicalize(&*path) {
                *path = canonical;
            }
        }
        Self { credentials }
    }

    /// Validates a directory is safe to mount into a sandbox.
    ///
    /// Returns the canonical path to mount.
    ///
    /// # Errors
    ///
    /// Returns `MountError::SecurityViolation` naming the first rule the path
    /// breaks.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn validate_mount_source(&self, path: &Path) -> Result<PathBuf, MountError> {
        self.check(path).map_err(|refusal| {
            warn!(%refusal, "Refusing mount source");
            MountError::SecurityViolation(format!("{} {refusal}", path.display()))
        })
    }

    fn check(&self, path: &Path) -> Result<PathBuf, Refusal> {
        if !path.is_absolute() {
            return Err(Refusal::Relative);
        }
        let canonical =
            fs::canonicalize(path).map_err(|e| Refusal::Unresolvable(e.to_string()))?;
        debug!(canonical = %canonical.display(), "Resolved mount source");

        if !canonical.is_dir() {
            return Err(Refusal::NotADirectory);
        }
        if canonical.parent().is_none() {
            return Err(Refusal::FilesystemRoot);
        }
        if let Some(pseudo) = PSEUDO_FILESYSTEMS
            .iter()
            .map(Path::new)
            .find(|p| canonical.starts_with(p))
        {
            return Err(Refusal::PseudoFilesystem(pseudo.to_path_buf()));
        }
        for credential in &self.credentials {
            if canonical.starts_with(credential) {
                return Err(Refusal::InsideCredentials(credential.clone()));
            }
            if credential.starts_with(&canonical) && credential.exists() {
                return Err(Refusal::ContainsCredentials(credential.clone()));
            }
        }

        let lowered = canonical.to_string_lossy().to_lowercase();
        if let Some(marker) = SECRET_MARKERS.iter().copied().find(|m| lowered.contains(m)) {
            return Err(Refusal::SecretMarker(marker));
        }

        if let Ok(metadata) = fs::metadata(&canonical) {
            let mode = metadata.permissions().mode();
            if mode & 0o002 != 0 {
                warn!(path = %canonical.display(), mode = format!("{mode:o}"), "Mount source is world-writable");
            }
        }

        Ok(canonical)
    }
}

impl Default for MountPolicyGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns true if `path` would be rejected as a mount source.
pub fn is_path_forbidden(path: &Path) -> bool {
    MountPolicyGuard::new().validate_mount_source(path).is_err()
}
