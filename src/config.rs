//! Server configuration.
//!
//! The binary parses command-line flags and environment variables with clap and
//! converts them into a [`ServerConfig`]; the library only sees this type.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default directory holding caller-supplied data files.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default bind host for the network transport.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port for the network transport.
pub const DEFAULT_PORT: u16 = 8000;

/// Default interpreter path used inside the sandbox.
pub const DEFAULT_PYTHON: &str = "/usr/bin/python3";

/// Transport the MCP server is exposed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// JSON-RPC over stdin/stdout. One consumer, process lifetime = server lifetime.
    #[default]
    Stdio,
    /// Streamable HTTP endpoint at `/mcp`. Many concurrent consumers.
    StreamableHttp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::StreamableHttp => f.write_str("streamable-http"),
        }
    }
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "streamable-http" | "streamable_http" | "http" => Ok(Self::StreamableHttp),
            other => Err(ConfigError::InvalidTransport(other.to_string())),
        }
    }
}

/// Variables read when neither a flag nor its `MCP_*` variable is set.
pub const FALLBACK_TRANSPORT_ENV: &str = "FASTMCP_TRANSPORT";
/// See [`FALLBACK_TRANSPORT_ENV`].
pub const FALLBACK_HOST_ENV: &str = "FASTMCP_HOST";
/// See [`FALLBACK_TRANSPORT_ENV`].
pub const FALLBACK_PORT_ENV: &str = "FASTMCP_PORT";

/// Network settings taken from the `FASTMCP_*` variables of existing deployments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackEnv {
    pub transport: Option<Transport>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl FallbackEnv {
    /// Reads the process environment.
    ///
    /// # Errors
    ///
    /// See [`FallbackEnv::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the variables through `lookup`. Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnv` if a transport or port value does not
    /// parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let invalid = |name: &str, value: &str| ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
        };

        let transport = get(FALLBACK_TRANSPORT_ENV)
            .map(|v| v.parse().map_err(|_| invalid(FALLBACK_TRANSPORT_ENV, &v)))
            .transpose()?;
        let port = get(FALLBACK_PORT_ENV)
            .map(|v| v.trim().parse().map_err(|_| invalid(FALLBACK_PORT_ENV, &v)))
            .transpose()?;

        Ok(Self {
            transport,
            host: get(FALLBACK_HOST_ENV),
            port,
        })
    }
}

/// Configuration for the tool server.
///
/// # Example
///
/// ```
/// use tabular_data_mcp::config::{ServerConfig, Transport};
/// use std::time::Duration;
///
/// let config = ServerConfig::default()
///     .with_data_dir("/srv/data")
///     .with_transport(Transport::StreamableHttp)
///     .with_port(9000)
///     .with_timeout(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding the data files. Created at startup if missing.
    pub data_dir: PathBuf,

    /// Selected transport.
    pub transport: Transport,

    /// Bind host for the network transport.
    pub host: String,

    /// Bind port for the network transport.
    pub port: u16,

    /// Interpreter used inside the sandbox.
    pub python_path: PathBuf,

    /// Maximum wall-clock time for one code execution.
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            transport: Transport::default(),
            host: String::from(DEFAULT_HOST),
            port: DEFAULT_PORT,
            python_path: PathBuf::from(DEFAULT_PYTHON),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the bind host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the bind port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the interpreter used inside the sandbox.
    #[must_use]
    pub fn with_python_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.python_path = path.into();
        self
    }

    /// Sets the code execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolves the network bind address.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidBindAddress` if host and port do not resolve.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let display = format!("{}:{}", self.host, self.port);
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| ConfigError::InvalidBindAddress(display.clone()))?
            .next()
            .ok_or(ConfigError::InvalidBindAddress(display))
    }
}
