//! MCP server implementation.
//!
//! This module provides the MCP server that handles tool calls from clients,
//! and the stdio and streamable HTTP transports it is served over.

mod handler;
mod transport;

pub use handler::{ListSheetsArgs, NoArgs, RunPythonCodeArgs, TabularServer, to_mcp_error};
pub use transport::{MCP_PATH, run};
