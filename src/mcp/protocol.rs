//! Typed MCP lifecycle wrapper over [`JsonRpcClient`]
//!
//! Two types represent the two phases of a protocol session:
//!
//! - [`McpProtocol`] -- not yet initialized. [`McpProtocol::initialize`]
//!   performs the `initialize` / `notifications/initialized` handshake and
//!   returns an [`InitializedMcpProtocol`].
//! - [`InitializedMcpProtocol`] -- negotiated. Exposes `tools/*`,
//!   `resources/*`, `prompts/*` and `ping` as typed async methods.
//!
//! List methods follow `nextCursor` until the server stops returning one, or
//! hands back a cursor it already sent, and return the accumulated result.
//! Neither type owns a transport.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::mcp::client::JsonRpcClient;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, GetPromptParams, GetPromptResponse,
    Implementation, InitializeParams, InitializeResponse, ListPromptsResponse,
    ListResourcesResponse, ListToolsResponse, McpTool, PaginatedParams, Prompt,
    ReadResourceParams, ReadResourceResponse, Resource, LATEST_PROTOCOL_VERSION,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING, METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST,
    METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// A capability a server may advertise during the handshake.
///
/// # Examples
///
/// ```no_run
/// use mcp_bridge::mcp::capability::CapabilityClient;
/// use mcp_bridge::mcp::config::McpServerConfig;
/// use mcp_bridge::mcp::protocol::ServerCapabilityFlag;
///
/// # async fn run() -> mcp_bridge::Result<()> {
/// let mut client =
///     CapabilityClient::new(McpServerConfig::stdio("users", "users-mcp", vec![]));
/// client.open().await?;
/// if client.capable(ServerCapabilityFlag::Resources) {
///     for resource in client.list_resources().await? {
///         println!("{}", resource.uri);
///     }
/// }
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCapabilityFlag {
    /// `tools/list` and `tools/call`
    Tools,
    /// `resources/list` and `resources/read`
    Resources,
    /// `prompts/list` and `prompts/get`
    Prompts,
    /// Log notifications
    Logging,
    /// `completion/complete`
    Completions,
    /// Experimental extensions
    Experimental,
}

/// An uninitialized MCP protocol session.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use mcp_bridge::mcp::client::JsonRpcClient;
/// use mcp_bridge::mcp::protocol::McpProtocol;
///
/// let (tx, _rx) = mpsc::unbounded_channel::<String>();
/// let _proto = McpProtocol::new(Arc::new(JsonRpcClient::new("users", tx)));
/// ```
#[derive(Debug)]
pub struct McpProtocol {
    client: Arc<JsonRpcClient>,
}

impl McpProtocol {
    /// Wrap a channel-wired client. The caller must already have started
    /// [`crate::mcp::client::start_read_loop`] on the same `Arc`.
    pub fn new(client: Arc<JsonRpcClient>) -> Self {
        Self { client }
    }

    /// Perform the `initialize` / `notifications/initialized` handshake.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::McpProtocolVersion`] if the server picked a revision
    ///   outside [`SUPPORTED_PROTOCOL_VERSIONS`].
    /// - Any error from the underlying request (transport, timeout, protocol).
    pub async fn initialize(self, client_info: Implementation) -> Result<InitializedMcpProtocol> {
        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities: ClientCapabilities::default(),
                    client_info,
                },
                None,
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(BridgeError::McpProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: response.protocol_version,
            }
            .into());
        }

        self.client
            .notify(METHOD_INITIALIZED, serde_json::json!({}))?;

        Ok(InitializedMcpProtocol {
            client: self.client,
            initialize_response: response,
        })
    }
}

/// A negotiated MCP protocol session.
#[derive(Debug)]
pub struct InitializedMcpProtocol {
    /// The underlying JSON-RPC client, shared with the read loop.
    pub client: Arc<JsonRpcClient>,
    /// The server's answer to `initialize`.
    pub initialize_response: InitializeResponse,
}

impl InitializedMcpProtocol {
    /// Whether the server advertised `capability` during the handshake.
    pub fn capable(&self, capability: ServerCapabilityFlag) -> bool {
        let caps = &self.initialize_response.capabilities;
        match capability {
            ServerCapabilityFlag::Tools => caps.tools.is_some(),
            ServerCapabilityFlag::Resources => caps.resources.is_some(),
            ServerCapabilityFlag::Prompts => caps.prompts.is_some(),
            ServerCapabilityFlag::Logging => caps.logging.is_some(),
            ServerCapabilityFlag::Completions => caps.completions.is_some(),
            ServerCapabilityFlag::Experimental => caps.experimental.is_some(),
        }
    }

    /// All tools, across every page.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let resp: ListToolsResponse = self
                .client
                .request(METHOD_TOOLS_LIST, PaginatedParams { cursor }, None)
                .await?;
            tools.extend(resp.tools);

            cursor = next_page(
                &mut seen,
                resp.next_cursor,
                METHOD_TOOLS_LIST,
                self.client.server(),
            );
            if cursor.is_none() {
                break;
            }
        }

        Ok(tools)
    }

    /// Invoke a tool by name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        self.client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                },
                None,
            )
            .await
    }

    /// All resources, across every page.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let resp: ListResourcesResponse = self
                .client
                .request(METHOD_RESOURCES_LIST, PaginatedParams { cursor }, None)
                .await?;
            resources.extend(resp.resources);

            cursor = next_page(
                &mut seen,
                resp.next_cursor,
                METHOD_RESOURCES_LIST,
                self.client.server(),
            );
            if cursor.is_none() {
                break;
            }
        }

        Ok(resources)
    }

    /// Read a resource by URI. The raw content entries are returned untouched.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResponse> {
        self.client
            .request(
                METHOD_RESOURCES_READ,
                ReadResourceParams {
                    uri: uri.to_string(),
                },
                None,
            )
            .await
    }

    /// All prompts, across every page.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let mut prompts = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let resp: ListPromptsResponse = self
                .client
                .request(METHOD_PROMPTS_LIST, PaginatedParams { cursor }, None)
                .await?;
            prompts.extend(resp.prompts);

            cursor = next_page(
                &mut seen,
                resp.next_cursor,
                METHOD_PROMPTS_LIST,
                self.client.server(),
            );
            if cursor.is_none() {
                break;
            }
        }

        Ok(prompts)
    }

    /// Expand a prompt template, optionally with arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResponse> {
        self.client
            .request(
                METHOD_PROMPTS_GET,
                GetPromptParams {
                    name: name.to_string(),
                    arguments,
                },
                None,
            )
            .await
    }

    /// Liveness round-trip. The server answers with an empty object.
    pub async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .request(METHOD_PING, serde_json::json!({}), None)
            .await?;
        Ok(())
    }
}

/// The cursor for the next page, or `None` once pagination is over.
///
/// A cursor seen before ends pagination.
fn next_page(
    seen: &mut HashSet<String>,
    next_cursor: Option<String>,
    method: &str,
    server: &str,
) -> Option<String> {
    let cursor = next_cursor.filter(|c| !c.is_empty())?;
    if !seen.insert(cursor.clone()) {
        tracing::warn!(
            server,
            method,
            cursor = %cursor,
            "MCP server repeated a page cursor; stopping pagination"
        );
        return None;
    }
    Some(cursor)
}
