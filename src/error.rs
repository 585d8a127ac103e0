//! Error types for the tabular data MCP server.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.
//!
//! Errors fall in two groups:
//! - Startup errors ([`ConfigError`], [`SystemRequirementsError`], [`ServerError`])
//!   are fatal and prevent the server from accepting calls.
//! - Call errors ([`ToolError`]) are recovered at the tool server boundary and
//!   converted to a structured MCP error for the caller.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the application.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Invalid startup configuration
    #[error("Configuration error")]
    #[diagnostic(code(tdm::config))]
    Config(#[from] ConfigError),

    /// System requirements not met
    #[error("System requirements check failed")]
    #[diagnostic(code(tdm::system::requirements))]
    SystemRequirements(#[from] SystemRequirementsError),

    /// MCP server error
    #[error("MCP server error")]
    #[diagnostic(code(tdm::server))]
    Server(#[from] ServerError),

    /// I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(tdm::io))]
    Io(#[from] std::io::Error),
}

/// Errors detected while validating startup configuration.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// The data root could not be created or resolved.
    #[error("Data directory {} is not usable", .path.display())]
    #[diagnostic(
        code(tdm::config::data_root),
        help("Point --data-dir (or DATA_DIR) at a directory the server can create and read")
    )]
    DataRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The data root resolves to a location that must never be exposed.
    #[error("Data directory is not allowed: {0}")]
    #[diagnostic(
        code(tdm::config::data_root_forbidden),
        help("The data directory is mounted into the sandbox; pick a directory without credentials")
    )]
    DataRootForbidden(#[from] MountError),

    /// The static library registry is malformed.
    #[error("Library registry is malformed: {0}")]
    #[diagnostic(code(tdm::config::library_registry))]
    LibraryRegistry(String),

    /// The network bind address could not be parsed.
    #[error("Invalid bind address {0}")]
    #[diagnostic(
        code(tdm::config::bind_address),
        help("Use a host name or IP address with --host and a port number with --port")
    )]
    InvalidBindAddress(String),

    /// Unknown transport name.
    #[error("Unknown transport '{0}'")]
    #[diagnostic(
        code(tdm::config::transport),
        help("Use 'stdio' or 'streamable-http'")
    )]
    InvalidTransport(String),

    /// An environment variable holds a value that does not parse.
    #[error("Invalid value '{value}' in {name}")]
    #[diagnostic(code(tdm::config::env))]
    InvalidEnv { name: String, value: String },
}

/// Errors related to system requirements validation.
#[derive(Error, Debug, Diagnostic)]
pub enum SystemRequirementsError {
    /// Unprivileged user namespaces not enabled
    #[error("Unprivileged user namespaces are not enabled")]
    #[diagnostic(
        code(tdm::system::userns),
        help("Enable with: sysctl -w kernel.unprivileged_userns_clone=1")
    )]
    UserNamespacesDisabled,

    /// The Python interpreter used inside the sandbox is missing
    #[error("Python interpreter not found at {}", .path.display())]
    #[diagnostic(
        code(tdm::system::python),
        help("Install python3 with pandas and matplotlib, or point --python at an interpreter")
    )]
    PythonMissing { path: PathBuf },

    /// Failed to read system information
    #[error("Failed to read system information: {context}")]
    #[diagnostic(code(tdm::system::read_failed))]
    ReadFailed {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors related to the MCP server.
#[derive(Error, Debug, Diagnostic)]
pub enum ServerError {
    /// Failed to initialize server
    #[error("Failed to initialize MCP server: {0}")]
    #[diagnostic(code(tdm::server::init))]
    InitializationFailed(String),

    /// Transport error
    #[error("Transport error: {0}")]
    #[diagnostic(code(tdm::server::transport))]
    Transport(String),
}

/// Errors returned by individual tool calls.
///
/// Every variant maps to one entry of the wire-visible error taxonomy, see
/// [`ToolError::kind`].
#[derive(Error, Debug, Diagnostic)]
pub enum ToolError {
    /// The referenced file does not exist under the data root.
    #[error("File '{0}' not found in data directory")]
    #[diagnostic(code(tdm::tool::not_found))]
    NotFound(String),

    /// Malformed arguments, wrong file kind, or a path escaping the data root.
    #[error("Invalid input: {0}")]
    #[diagnostic(code(tdm::tool::invalid_input))]
    InvalidInput(String),

    /// A directory or file could not be read or parsed.
    #[error("{context}: {source}")]
    #[diagnostic(code(tdm::tool::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The requested tool is not registered.
    #[error("Unknown tool: {0}")]
    #[diagnostic(code(tdm::tool::unknown))]
    UnknownTool(String),

    /// The sandbox could not run the code at all.
    #[error("Sandbox failure: {0}")]
    #[diagnostic(code(tdm::tool::sandbox))]
    SandboxFailure(String),
}

impl ToolError {
    /// Builds an [`ToolError::Io`] with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wire-visible name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFoundError",
            Self::InvalidInput(_) => "InvalidInputError",
            Self::Io { .. } => "IOError",
            Self::UnknownTool(_) => "UnknownToolError",
            Self::SandboxFailure(_) => "SandboxFailure",
        }
    }
}

/// Errors raised while preparing or running the sandbox.
#[derive(Error, Debug, Diagnostic)]
pub enum SandboxError {
    /// The container could not be configured.
    #[error("Failed to create sandbox: {0}")]
    #[diagnostic(code(tdm::sandbox::creation))]
    CreationFailed(String),

    /// The interpreter could not be spawned or waited on.
    #[error("Failed to execute in sandbox: {0}")]
    #[diagnostic(code(tdm::sandbox::execution))]
    ExecutionFailed(String),

    /// The per-execution scratch directory could not be prepared or read.
    #[error("Sandbox workspace error: {context}")]
    #[diagnostic(code(tdm::sandbox::workspace))]
    Workspace {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A host path failed mount validation.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Mount(#[from] MountError),
}

impl From<SandboxError> for ToolError {
    fn from(err: SandboxError) -> Self {
        Self::SandboxFailure(err.to_string())
    }
}

/// Errors related to mount validation.
#[derive(Error, Debug, Diagnostic)]
pub enum MountError {
    /// The path must not be exposed to sandboxed code.
    #[error("Mount security violation: {0}")]
    #[diagnostic(code(tdm::mount::security))]
    SecurityViolation(String),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
