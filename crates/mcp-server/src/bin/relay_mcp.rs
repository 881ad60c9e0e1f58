//! Relay MCP Server
//!
//! Routes natural-language requests to MCP tool servers: intent analysis,
//! semantic candidate ranking over the server registry, LLM-validated
//! selection, launch-template resolution, and dispatch.
//!
//! ## Tools
//!
//! - `route` - select the best tool server for a request
//! - `invoke` - execute a tool on a selected server
//! - `list_servers` - browse the registry catalog
//! - `reindex` / `reload_settings` - administrative reloads
//! - `doctor` - service health
//!
//! ## Usage
//!
//! Add to your MCP client configuration:
//! ```json
//! {
//!   "mcpServers": {
//!     "relay": {
//!       "command": "relay-mcp"
//!     }
//!   }
//! }
//! ```

use anyhow::Result;
use relay_mcp::{RelayService, ServiceConfig};
use rmcp::transport::stdio;
use rmcp::ServiceExt;

#[tokio::main]
async fn main() -> Result<()> {
    // Configure logging to stderr only (stdout is for MCP protocol)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    log::info!("Starting Relay MCP server");

    let config = ServiceConfig::from_env()?;
    let service = RelayService::initialize(config).await?;
    let server = service.clone().serve(stdio()).await?;

    // Wait for shutdown
    server.waiting().await?;
    service.shutdown().await;

    log::info!("Relay MCP server stopped");
    Ok(())
}
