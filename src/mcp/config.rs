//! MCP server connection configuration
//!
//! These types describe *how* to reach a server. The session and capability
//! layers never look inside them; they are handed to
//! [`crate::mcp::transport::TransportHandle::open`] as-is.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Default per-request deadline in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Connection parameters for one MCP server.
///
/// # Examples
///
/// ```
/// use mcp_bridge::mcp::config::{McpServerConfig, TransportConfig};
///
/// let cfg = McpServerConfig::http("users", "http://localhost:8005/mcp");
/// assert!(matches!(cfg.transport, TransportConfig::Http { .. }));
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Display name, used in logs and timeout errors
    #[serde(default = "default_server_name")]
    pub name: String,

    /// How to reach the server
    #[serde(default)]
    pub transport: TransportConfig,

    /// Deadline for every request sent to this server
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_server_name() -> String {
    "default".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            transport: TransportConfig::default(),
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
        }
    }
}

impl McpServerConfig {
    /// Server launched as a child process speaking stdio.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
                working_dir: None,
            },
            ..Self::default()
        }
    }

    /// Server reached over Streamable HTTP.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Http {
                url: url.into(),
                headers: HashMap::new(),
            },
            ..Self::default()
        }
    }

    /// Request deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Validate the connection parameters.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for an empty name, a zero timeout, or
    /// transport parameters that cannot be opened.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BridgeError::Config("server.name cannot be empty".to_string()).into());
        }
        if self.request_timeout_seconds == 0 {
            return Err(BridgeError::Config(
                "server.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }
        self.transport.validate()
    }
}

/// Transport selection, tagged by `type` in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Spawn `command` and exchange newline-delimited JSON over its stdio
    Stdio {
        /// Executable to launch
        command: String,
        /// Arguments passed to the executable
        #[serde(default)]
        args: Vec<String>,
        /// Extra environment variables for the child
        #[serde(default)]
        env: HashMap<String, String>,
        /// Working directory for the child
        #[serde(default)]
        working_dir: Option<PathBuf>,
    },
    /// POST JSON-RPC messages to a Streamable HTTP endpoint
    Http {
        /// Endpoint URL
        url: String,
        /// Headers added to every request
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Http {
            url: "http://localhost:8005/mcp".to_string(),
            headers: HashMap::new(),
        }
    }
}

impl TransportConfig {
    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Http { .. } => "http",
        }
    }

    /// Check that the parameters describe something a transport can open.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for an empty stdio command or an HTTP
    /// URL that does not parse or does not use `http`/`https`.
    pub fn validate(&self) -> Result<()> {
        match self {
            TransportConfig::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(BridgeError::Config(
                        "stdio transport requires a non-empty command".to_string(),
                    )
                    .into());
                }
                Ok(())
            }
            TransportConfig::Http { url, .. } => {
                parse_endpoint(url)?;
                Ok(())
            }
        }
    }
}

/// Parse and scheme-check an HTTP endpoint.
pub(crate) fn parse_endpoint(raw: &str) -> Result<url::Url> {
    let url = url::Url::parse(raw)
        .map_err(|e| BridgeError::Config(format!("invalid server url '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(BridgeError::Config(format!(
            "unsupported url scheme '{}' in '{}'",
            other, raw
        ))
        .into()),
    }
}
