//! mcp-bridge - MCP capability client library
//!
//! This library connects an application to a single Model Context Protocol
//! server and exposes the server's tools, resources and prompts in shapes a
//! chat-completion engine can consume directly.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: transports, JSON-RPC client, session lifecycle, capability client
//!   and content resolution
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//! - `commands`: Handlers behind the CLI subcommands
//!
//! # Example
//!
//! ```no_run
//! use mcp_bridge::mcp::capability::CapabilityClient;
//! use mcp_bridge::mcp::config::McpServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = McpServerConfig::stdio("users", "python", vec!["-m".into(), "users_mcp".into()]);
//!     let mut client = CapabilityClient::connect(config).await?;
//!     let reply = client
//!         .call_tool("add_user", serde_json::json!({ "name": "Jane" }))
//!         .await?;
//!     if let Some(output) = reply {
//!         println!("{}", output);
//!     }
//!     client.close().await
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;

// Re-export commonly used types
pub use config::Config;
pub use error::{BridgeError, Result};
pub use mcp::capability::CapabilityClient;
pub use mcp::resolver::{ResourceContent, ToolOutput};
pub use mcp::session::SessionState;
