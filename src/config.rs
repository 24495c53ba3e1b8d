//! Configuration management for mcp-bridge
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//! Precedence, lowest first: defaults, YAML file, environment, CLI.

use crate::error::{BridgeError, Result};
use crate::mcp::config::{McpServerConfig, TransportConfig};
use crate::mcp::types::Implementation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main configuration structure for mcp-bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// The server to connect to
    #[serde(default)]
    pub server: McpServerConfig,
    /// How this client identifies itself during the handshake
    #[serde(default)]
    pub client: ClientConfig,
}

/// Client identity sent in `initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Implementation name
    #[serde(default = "default_client_name")]
    pub name: String,
    /// Implementation version
    #[serde(default = "default_client_version")]
    pub version: String,
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
        }
    }
}

impl ClientConfig {
    /// The handshake identity.
    pub fn implementation(&self) -> Implementation {
        Implementation {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)).into())
    }

    /// `MCP_BRIDGE_SERVER_COMMAND` selects stdio, `MCP_BRIDGE_SERVER_URL`
    /// selects HTTP; when both are set the URL wins.
    fn apply_env_vars(&mut self) {
        if let Ok(command_line) = std::env::var("MCP_BRIDGE_SERVER_COMMAND") {
            let mut parts = command_line.split_whitespace().map(str::to_string);
            match parts.next() {
                Some(command) => {
                    self.server.transport = TransportConfig::Stdio {
                        command,
                        args: parts.collect(),
                        env: HashMap::new(),
                        working_dir: None,
                    };
                }
                None => tracing::warn!("Ignoring empty MCP_BRIDGE_SERVER_COMMAND"),
            }
        }

        if let Ok(url) = std::env::var("MCP_BRIDGE_SERVER_URL") {
            self.use_http_endpoint(url);
        }

        if let Ok(timeout) = std::env::var("MCP_BRIDGE_REQUEST_TIMEOUT") {
            match timeout.parse() {
                Ok(value) => self.server.request_timeout_seconds = value,
                Err(_) => tracing::warn!("Invalid MCP_BRIDGE_REQUEST_TIMEOUT: {}", timeout),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(url) = &cli.server_url {
            self.use_http_endpoint(url.clone());
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Point the server at an HTTP endpoint, keeping configured headers when
    /// the transport was already HTTP.
    fn use_http_endpoint(&mut self, url: String) {
        let headers = match &self.server.transport {
            TransportConfig::Http { headers, .. } => headers.clone(),
            TransportConfig::Stdio { .. } => HashMap::new(),
        };
        self.server.transport = TransportConfig::Http { url, headers };
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if any check fails
    pub fn validate(&self) -> Result<()> {
        if self.client.name.trim().is_empty() {
            return Err(BridgeError::Config("client.name cannot be empty".to_string()).into());
        }
        self.server.validate()
    }
}
