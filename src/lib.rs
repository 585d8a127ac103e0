//! Tabular Data MCP - MCP server for analysing CSV and spreadsheet files.
//!
//! This crate exposes one data directory to AI agents over the Model Context
//! Protocol. Agents can list data files, inspect spreadsheet sheets, list the
//! permitted Python libraries, and run Python code against the files in a
//! sandbox built on Linux namespaces.
//!
//! # Platform Requirements
//!
//! - Linux with unprivileged user namespaces enabled
//! - Python 3 with pandas, numpy, matplotlib and openpyxl installed
//!
//! # Example
//!
//! ```no_run
//! use tabular_data_mcp::{config::ServerConfig, server, system};
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let config = ServerConfig::default().with_data_dir("./data");
//!
//!     // Validate system requirements
//!     system::check_all(&config.python_path)?;
//!
//!     // Start MCP server
//!     server::run(config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod libraries;
pub mod sandbox;
pub mod server;
pub mod system;

// Re-export commonly used types
pub use catalog::{DataCatalog, DataFile, DataKind, SheetDescriptor};
pub use config::{ServerConfig, Transport};
pub use error::{Error, Result, ToolError};
pub use libraries::LibraryRegistry;
pub use sandbox::{CodeSandbox, ExecutionRequest, ExecutionResult, PythonSandbox, SandboxConfig};
pub use server::TabularServer;
