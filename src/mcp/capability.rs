//! Capability client: the public face of the bridge
//!
//! [`CapabilityClient`] owns a transport and a session and exposes the three
//! capability families a server offers (tools, resources, prompts) as
//! application values:
//!
//! - tools come back in the function-calling envelope a completion engine
//!   expects ([`FunctionTool`]);
//! - resource reads resolve to [`ResourceContent`];
//! - tool calls resolve to an optional [`ToolOutput`];
//! - prompts flatten to one trimmed string.
//!
//! # Lifecycle
//!
//! [`CapabilityClient::open`] opens the transport, then the session.
//! [`CapabilityClient::close`] releases them in reverse order. A session-level
//! teardown failure is logged and swallowed so the transport is always
//! released; a transport-level failure is what the caller sees.
//!
//! # Failure policy
//!
//! Listing resources or prompts is optional server functionality, so those
//! two operations recover to an empty list. Every other request propagates
//! its error. All operations fail with [`BridgeError::NotConnected`] before a
//! successful `open` and after `close`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::mcp::config::McpServerConfig;
use crate::mcp::protocol::ServerCapabilityFlag;
use crate::mcp::resolver::{
    flatten_prompt, normalize_schema, resolve_resource_content, resolve_tool_content,
    ResourceContent, ToolOutput,
};
use crate::mcp::session::{Session, SessionState};
use crate::mcp::transport::{Transport, TransportHandle, TransportStreams};
use crate::mcp::types::{
    FunctionTool, Implementation, InitializeResponse, McpTool, PromptDescriptor,
    ResourceDescriptor, ToolDescriptor,
};

/// Where the transport comes from when the client opens.
#[derive(Debug)]
enum TransportSource {
    /// Build from connection parameters
    Config(McpServerConfig),
    /// Use an already-constructed transport (consumed by the first open)
    Prebuilt(Option<Arc<dyn Transport>>),
}

/// Client for one MCP server.
///
/// # Examples
///
/// ```no_run
/// use mcp_bridge::mcp::capability::CapabilityClient;
/// use mcp_bridge::mcp::config::McpServerConfig;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let mut client = CapabilityClient::new(McpServerConfig::http("users", "http://localhost:8005/mcp"));
/// client.open().await?;
/// for tool in client.list_tools().await? {
///     println!("{}: {}", tool.function.name, tool.function.description);
/// }
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CapabilityClient {
    server: String,
    source: TransportSource,
    client_info: Implementation,
    session: Session,
    transport: Option<TransportHandle>,
    initialize_response: Option<InitializeResponse>,
}

/// Identity sent during the handshake unless overridden.
pub fn default_client_info() -> Implementation {
    Implementation {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

impl CapabilityClient {
    /// Client that will open the transport described by `config`.
    pub fn new(config: McpServerConfig) -> Self {
        let session = Session::new(config.name.clone(), config.request_timeout());
        Self {
            server: config.name.clone(),
            source: TransportSource::Config(config),
            client_info: default_client_info(),
            session,
            transport: None,
            initialize_response: None,
        }
    }

    /// Client over an already-constructed transport.
    pub fn with_transport(
        server: impl Into<String>,
        transport: Arc<dyn Transport>,
        request_timeout: std::time::Duration,
    ) -> Self {
        let server = server.into();
        Self {
            session: Session::new(server.clone(), request_timeout),
            server,
            source: TransportSource::Prebuilt(Some(transport)),
            client_info: default_client_info(),
            transport: None,
            initialize_response: None,
        }
    }

    /// Override the identity sent during the handshake.
    pub fn with_client_info(mut self, client_info: Implementation) -> Self {
        self.client_info = client_info;
        self
    }

    /// Build and open a client in one step.
    pub async fn connect(config: McpServerConfig) -> Result<Self> {
        let mut client = Self::new(config);
        client.open().await?;
        Ok(client)
    }

    /// Name of the server this client talks to.
    pub fn server_name(&self) -> &str {
        &self.server
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The server's handshake answer, once open.
    pub fn initialize_response(&self) -> Option<&InitializeResponse> {
        self.initialize_response.as_ref()
    }

    /// Open the transport, then perform the session handshake.
    ///
    /// No retries. If the handshake fails the transport is released before
    /// the handshake error is returned.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::NotConnected`] if the client was already closed.
    /// - [`BridgeError::Config`] for unopenable transport parameters.
    /// - Transport or protocol errors from the handshake.
    pub async fn open(&mut self) -> Result<InitializeResponse> {
        match self.session.state() {
            SessionState::Unconnected => {}
            SessionState::Connected => {
                return Err(BridgeError::Mcp(format!(
                    "client for {} is already open",
                    self.server
                ))
                .into())
            }
            SessionState::Closed => return Err(BridgeError::NotConnected.into()),
        }

        let streams = self.open_transport()?;

        match self.session.connect(streams, self.client_info.clone()).await {
            Ok(response) => {
                self.initialize_response = Some(response.clone());
                Ok(response)
            }
            Err(e) => {
                if let Some(transport) = self.transport.as_mut() {
                    if let Err(close_err) = transport.close().await {
                        tracing::warn!(
                            server = %self.server,
                            "failed to release transport after handshake failure: {:#}",
                            close_err
                        );
                    }
                }
                Err(e)
            }
        }
    }

    fn open_transport(&mut self) -> Result<TransportStreams> {
        let (handle, streams) = match &mut self.source {
            TransportSource::Config(config) => TransportHandle::open(config)?,
            TransportSource::Prebuilt(slot) => {
                let transport = slot.take().ok_or(BridgeError::NotConnected)?;
                TransportHandle::attach(transport)
            }
        };
        self.transport = Some(handle);
        Ok(streams)
    }

    /// Tear down the session, then the transport.
    ///
    /// Safe to call more than once, and safe after a failed `open`.
    ///
    /// # Errors
    ///
    /// Only a transport-level failure is returned; a session-level failure
    /// is logged.
    pub async fn close(&mut self) -> Result<()> {
        let session_outcome = self.session.disconnect().await;
        let transport_outcome = match self.transport.as_mut() {
            Some(transport) => transport.close().await,
            None => Ok(()),
        };
        release_outcome(&self.server, session_outcome, transport_outcome)
    }

    /// Whether the server advertised `flag`. `false` when not connected.
    pub fn capable(&self, flag: ServerCapabilityFlag) -> bool {
        self.session
            .protocol()
            .map(|protocol| protocol.capable(flag))
            .unwrap_or(false)
    }

    /// Liveness round-trip.
    pub async fn ping(&self) -> Result<()> {
        self.session.call(|protocol| protocol.ping()).await
    }

    /// Register a handler for a server notification.
    pub async fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) -> Result<()> {
        self.session.on_notification(method, f).await
    }

    /// Every tool the server offers, in function-calling form.
    ///
    /// Each schema is normalized to a concrete object; a tool without one
    /// gets `{"type": "object", "properties": {}}`.
    pub async fn list_tools(&self) -> Result<Vec<FunctionTool>> {
        let tools = self.session.call(|protocol| protocol.list_tools()).await?;
        Ok(tools
            .into_iter()
            .map(|tool| FunctionTool::from(tool_descriptor(tool)))
            .collect())
    }

    /// Invoke a tool.
    ///
    /// Only the first content entry is resolved. `Ok(None)` means the tool
    /// returned no content, which is not an error. A result flagged
    /// `isError` is logged and still resolved.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<Option<ToolOutput>> {
        let arguments = match arguments {
            serde_json::Value::Null => None,
            other => Some(other),
        };

        let response = self
            .session
            .call(|protocol| protocol.call_tool(name, arguments))
            .await?;

        if response.is_error == Some(true) {
            tracing::warn!(server = %self.server, tool = name, "MCP tool reported an error");
        }

        let output = resolve_tool_content(&response.content);
        tracing::info!(
            server = %self.server,
            tool = name,
            entries = response.content.len(),
            result = ?output,
            "MCP tool called"
        );
        Ok(output)
    }

    /// Every resource the server offers. Any request failure yields an empty
    /// list and a warning.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        self.session.protocol()?;
        match self.session.call(|protocol| protocol.list_resources()).await {
            Ok(resources) => Ok(resources.into_iter().map(ResourceDescriptor::from).collect()),
            Err(e) => {
                tracing::warn!(server = %self.server, "listing resources failed: {:#}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Read a resource and resolve its first content entry.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NoContent`] when the server returns zero entries, in
    /// addition to request failures.
    pub async fn get_resource(&self, uri: &str) -> Result<ResourceContent> {
        let response = self
            .session
            .call(|protocol| protocol.read_resource(uri))
            .await?;
        resolve_resource_content(uri, &response.contents)
    }

    /// Every prompt the server offers. Any request failure yields an empty
    /// list and a warning.
    pub async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>> {
        self.session.protocol()?;
        match self.session.call(|protocol| protocol.list_prompts()).await {
            Ok(prompts) => Ok(prompts.into_iter().map(PromptDescriptor::from).collect()),
            Err(e) => {
                tracing::warn!(server = %self.server, "listing prompts failed: {:#}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Expand a prompt and flatten every message into one trimmed string.
    pub async fn get_prompt(&self, name: &str) -> Result<String> {
        self.fetch_prompt(name, None).await
    }

    /// Like [`get_prompt`](Self::get_prompt), with template arguments.
    pub async fn get_prompt_with_arguments(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<String> {
        self.fetch_prompt(name, Some(arguments)).await
    }

    async fn fetch_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<String> {
        let response = self
            .session
            .call(|protocol| protocol.get_prompt(name, arguments))
            .await?;
        Ok(flatten_prompt(&response.messages))
    }
}

fn tool_descriptor(tool: McpTool) -> ToolDescriptor {
    ToolDescriptor {
        input_schema: normalize_schema(tool.input_schema.as_ref()),
        description: tool.description.unwrap_or_default(),
        name: tool.name,
    }
}

/// Combine the two teardown outcomes: the session error is logged, the
/// transport outcome is returned.
pub(crate) fn release_outcome(
    server: &str,
    session_outcome: Result<()>,
    transport_outcome: Result<()>,
) -> Result<()> {
    if let Err(e) = session_outcome {
        tracing::warn!(server, "session teardown failed: {:#}", e);
    }
    transport_outcome
}
