//! Command-line interface definition for mcp-bridge
//!
//! This module defines the CLI structure using clap's derive API: one
//! discovery command and one command per addressed capability call.

use clap::{Parser, Subcommand};

/// mcp-bridge - inspect and drive an MCP capability server
///
/// Connects to a server over stdio or Streamable HTTP and exposes its tools,
/// resources and prompts in the shapes a completion engine consumes.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/mcp-bridge.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Connect to this Streamable HTTP endpoint instead of the configured server
    #[arg(long, env = "MCP_BRIDGE_SERVER_URL")]
    pub server_url: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mcp-bridge
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List resources, tools and prompts, then fetch every prompt
    Inspect,

    /// Invoke a tool and print its result
    Call {
        /// Tool name
        #[arg(short, long)]
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Read a resource and print its content
    Read {
        /// Resource URI
        #[arg(short, long)]
        uri: String,
    },

    /// Expand a prompt and print the flattened text
    Prompt {
        /// Prompt name
        #[arg(short, long)]
        name: String,

        /// Prompt argument as key=value (repeatable)
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        arguments: Vec<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
