//! Transports the tool server is exposed over.

use std::sync::Arc;

use rmcp::{
    ServiceExt,
    transport::{
        stdio,
        streamable_http_server::{
            StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
        },
    },
};
use tracing::{debug, info};

use super::TabularServer;
use crate::config::{ServerConfig, Transport};
use crate::error::ServerError;

/// Path the streamable HTTP endpoint is served at.
pub const MCP_PATH: &str = "/mcp";

/// Run the MCP server on the configured transport.
///
/// Returns when stdin closes (stdio) or on Ctrl-C (streamable HTTP).
///
/// # Errors
///
/// Returns error if startup validation, server initialization or the transport fails.
pub async fn run(config: ServerConfig) -> crate::error::Result<()> {
    info!(transport = %config.transport, "Starting tabular data MCP server");

    let server = TabularServer::from_config(&config)?;

    match config.transport {
        Transport::Stdio => serve_stdio(server).await,
        Transport::StreamableHttp => serve_http(server, &config).await,
    }
}

async fn serve_stdio(server: TabularServer) -> crate::error::Result<()> {
    debug!("Using stdio transport");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| ServerError::InitializationFailed(e.to_string()))?;

    info!("Server initialized, waiting for requests");

    service
        .waiting()
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;

    info!("Server shutdown complete");
    Ok(())
}

async fn serve_http(server: TabularServer, config: &ServerConfig) -> crate::error::Result<()> {
    let addr = config.bind_addr()?;
    debug!(%addr, path = MCP_PATH, "Using streamable HTTP transport");

    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );
    let router = axum::Router::new().nest_service(MCP_PATH, service);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::InitializationFailed(format!("cannot bind {addr}: {e}")))?;

    info!(%addr, "Server listening on http://{addr}{MCP_PATH}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;

    info!("Server shutdown complete");
    Ok(())
}
