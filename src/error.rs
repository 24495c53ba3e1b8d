//! Error types for mcp-bridge
//!
//! This module defines the error taxonomy shared by the transport, session,
//! and capability layers, using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for mcp-bridge operations
///
/// Fallible functions return [`Result`] (an `anyhow::Result`); callers that
/// need to branch on the failure kind use
/// `err.downcast_ref::<BridgeError>()`.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration errors, including unrecognized transport parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation was attempted outside the `Connected` session state
    #[error("MCP client not connected")]
    NotConnected,

    /// The duplex stream to the server could not be established or was lost
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// The server answered with a JSON-RPC error or a malformed result
    #[error("MCP error: {0}")]
    Mcp(String),

    /// A request did not receive a response before its deadline
    #[error("MCP timeout: server={server}, method={method}")]
    McpTimeout {
        /// Name of the server the request was sent to
        server: String,
        /// The JSON-RPC method that timed out
        method: String,
    },

    /// The server selected a protocol revision this client does not speak
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got {got}")]
    McpProtocolVersion {
        /// Revisions this client accepts
        expected: Vec<String>,
        /// Revision the server selected
        got: String,
    },

    /// A resource read returned zero content entries
    #[error("Resource {0} returned no contents")]
    NoContent(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BridgeError {
    /// Returns `true` when the error means the underlying stream is gone and
    /// the session can no longer be used.
    pub fn is_transport(&self) -> bool {
        matches!(self, BridgeError::McpTransport(_))
    }
}

/// Result type alias for mcp-bridge operations
///
/// Uses `anyhow::Error` so context can be attached while the typed
/// [`BridgeError`] stays recoverable through `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;

/// Returns the [`BridgeError`] inside an `anyhow::Error`, if there is one.
pub fn bridge_error(err: &anyhow::Error) -> Option<&BridgeError> {
    err.downcast_ref::<BridgeError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = BridgeError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_not_connected_display() {
        assert_eq!(
            BridgeError::NotConnected.to_string(),
            "MCP client not connected"
        );
    }

    #[test]
    fn test_no_content_display_names_the_resource() {
        let error = BridgeError::NoContent("users://schema".to_string());
        assert_eq!(
            error.to_string(),
            "Resource users://schema returned no contents"
        );
    }

    #[test]
    fn test_timeout_display() {
        let error = BridgeError::McpTimeout {
            server: "users".to_string(),
            method: "tools/list".to_string(),
        };
        let s = error.to_string();
        assert!(s.contains("server=users"));
        assert!(s.contains("tools/list"));
    }

    #[test]
    fn test_protocol_version_display() {
        let error = BridgeError::McpProtocolVersion {
            expected: vec!["2025-06-18".to_string()],
            got: "1999-01-01".to_string(),
        };
        assert!(error.to_string().contains("1999-01-01"));
    }

    #[test]
    fn test_is_transport_only_for_transport_variant() {
        assert!(BridgeError::McpTransport("gone".into()).is_transport());
        assert!(!BridgeError::Mcp("bad".into()).is_transport());
        assert!(!BridgeError::NotConnected.is_transport());
    }

    #[test]
    fn test_bridge_error_downcasts_through_anyhow() {
        let err: anyhow::Error = BridgeError::NotConnected.into();
        assert!(matches!(bridge_error(&err), Some(BridgeError::NotConnected)));

        let plain = anyhow::anyhow!("something else");
        assert!(bridge_error(&plain).is_none());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: BridgeError = json_error.into();
        assert!(matches!(error, BridgeError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: BridgeError = yaml_error.into();
        assert!(matches!(error, BridgeError::Yaml(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BridgeError>();
    }
}
