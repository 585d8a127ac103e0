//! Tabular Data MCP - Entry Point
//!
//! This is the main entry point for the MCP server binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use tabular_data_mcp::config::{
    DEFAULT_DATA_DIR, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_PYTHON, FallbackEnv, ServerConfig,
    Transport,
};
use tabular_data_mcp::{server, system};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportArg {
    Stdio,
    StreamableHttp,
}

impl From<TransportArg> for Transport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Stdio => Transport::Stdio,
            TransportArg::StreamableHttp => Transport::StreamableHttp,
        }
    }
}

/// Tabular Data MCP - Analyse CSV and spreadsheet files with sandboxed Python.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Transport to serve MCP over [default: stdio, or FASTMCP_TRANSPORT]
    #[arg(long, env = "MCP_TRANSPORT", value_enum)]
    transport: Option<TransportArg>,

    /// Bind host for the streamable HTTP transport [default: 0.0.0.0, or FASTMCP_HOST]
    #[arg(long, env = "MCP_HOST")]
    host: Option<String>,

    /// Bind port for the streamable HTTP transport [default: 8000, or FASTMCP_PORT]
    #[arg(long, env = "MCP_PORT")]
    port: Option<u16>,

    /// Directory holding the data files (created if missing)
    #[arg(long, env = "DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Python interpreter used inside the sandbox
    #[arg(long, env = "SANDBOX_PYTHON", default_value = DEFAULT_PYTHON)]
    python: PathBuf,

    /// Maximum seconds one code execution may run
    #[arg(long, env = "SANDBOX_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Skip sandbox requirements checks (NOT RECOMMENDED - code execution may fail at call time)
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

impl Args {
    /// Flags and `MCP_*` variables win over the `FASTMCP_*` fallbacks.
    fn server_config(&self, fallback: FallbackEnv) -> ServerConfig {
        let transport = self
            .transport
            .map(Transport::from)
            .or(fallback.transport)
            .unwrap_or_default();
        let host = self
            .host
            .clone()
            .or(fallback.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = self.port.or(fallback.port).unwrap_or(DEFAULT_PORT);

        ServerConfig::default()
            .with_data_dir(&self.data_dir)
            .with_transport(transport)
            .with_host(host)
            .with_port(port)
            .with_python_path(&self.python)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // MCP requires that logs go to stderr (stdout is for JSON-RPC on stdio)
    let level = if args.verbose { Level::DEBUG } else { args.log_level };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!("Tabular Data MCP v{}", env!("CARGO_PKG_VERSION"));

    let fallback = FallbackEnv::from_env()?;
    let config = args.server_config(fallback);
    info!(transport = %config.transport, "Configuration loaded");

    if args.skip_checks {
        warn!("Skipping sandbox requirements checks (--skip-checks). This is NOT recommended!");
        warn!("Code execution will fail at call time if the sandbox cannot be created.");
    } else {
        info!("Checking system requirements...");

        match system::check_all(&config.python_path) {
            Ok(reqs) => {
                info!(
                    "System requirements satisfied: userns: {}, python: {}",
                    reqs.user_namespaces,
                    reqs.python_path.display()
                );
            }
            Err(e) => {
                error!("System requirements check failed");
                return Err(e).into_diagnostic();
            }
        }
    }

    server::run(config).await.into_diagnostic()
}
