//! Streamable HTTP transport for MCP
//!
//! [`HttpTransport`] sends every outbound JSON-RPC message as an HTTP POST.
//! The server may reply with:
//!
//! - `application/json` -- a direct JSON response body
//! - `text/event-stream` -- an SSE stream carrying one or more messages
//! - `202 Accepted` -- an acknowledgement with no body (notifications)
//!
//! # Session management
//!
//! When a response carries an `Mcp-Session-Id` header the value is stored and
//! attached to every later request. [`Transport::close`] ends the session with
//! an HTTP DELETE. A `404` while a session is active means the server dropped
//! it; the id is cleared and the send fails.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::mcp::transport::{channel_stream, closed_error, MessageStream, Transport};
use crate::mcp::types::LATEST_PROTOCOL_VERSION;

const SESSION_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_HEADER: &str = "MCP-Protocol-Version";

/// Streamable HTTP transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use mcp_bridge::mcp::transport::http::HttpTransport;
///
/// # fn main() -> anyhow::Result<()> {
/// let transport = HttpTransport::new(
///     url::Url::parse("http://localhost:8005/mcp")?,
///     HashMap::new(),
///     Duration::from_secs(30),
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: url::Url,
    session_id: Arc<RwLock<Option<String>>>,
    /// Static headers merged into every request (e.g. Authorization).
    headers: HashMap<String, String>,
    response_tx: mpsc::UnboundedSender<String>,
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    closed: CancellationToken,
}

impl HttpTransport {
    /// Construct a transport targeting `endpoint`. No network I/O happens
    /// here.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::McpTransport`] if the HTTP client cannot be
    /// built (TLS initialisation failure).
    pub fn new(endpoint: url::Url, headers: HashMap<String, String>, timeout: Duration) -> Result<Self> {
        // The timeout bounds connection setup only; SSE replies may stay open
        // longer than a single request deadline.
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| BridgeError::McpTransport(format!("failed to build HTTP client: {}", e)))?;

        let (response_tx, response_rx) = mpsc::unbounded_channel();

        Ok(Self {
            http_client,
            endpoint,
            session_id: Arc::new(RwLock::new(None)),
            headers,
            response_tx,
            response_rx: Arc::new(Mutex::new(response_rx)),
            closed: CancellationToken::new(),
        })
    }

    /// The session id captured from the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    /// POST one message and route whatever comes back onto the receive
    /// stream.
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }

        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header(PROTOCOL_HEADER, LATEST_PROTOCOL_VERSION)
            .body(message);

        if let Some(id) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, id);
        }
        req = self.apply_headers(req);

        let response = req
            .send()
            .await
            .map_err(|e| BridgeError::McpTransport(format!("HTTP POST failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(BridgeError::McpTransport(format!(
                "server requires authorization: {}",
                challenge
            ))
            .into());
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            let expired = self.session_id.write().await.take().is_some();
            let detail = if expired {
                "MCP session expired"
            } else {
                "HTTP 404 Not Found"
            };
            return Err(BridgeError::McpTransport(detail.to_string()).into());
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            return Err(BridgeError::McpTransport(format!(
                "HTTP POST returned status {}",
                status
            ))
            .into());
        }

        if let Some(new_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        {
            let mut sid = self.session_id.write().await;
            if sid.is_none() {
                tracing::debug!(session_id = %new_id, "MCP HTTP session established");
                *sid = Some(new_id);
            }
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let byte_stream = response.bytes_stream();
            let response_tx = self.response_tx.clone();
            let closed = self.closed.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = closed.cancelled() => {}
                    _ = parse_sse_stream(byte_stream, response_tx) => {}
                }
            });
        } else {
            let body = response.text().await.map_err(|e| {
                BridgeError::McpTransport(format!("failed to read response body: {}", e))
            })?;
            let body = body.trim();
            if !body.is_empty() {
                let _ = self.response_tx.send(body.to_string());
            }
        }

        Ok(())
    }

    fn receive(&self) -> MessageStream<'_> {
        channel_stream(Arc::clone(&self.response_rx), self.closed.clone())
    }

    /// End the server-side session with a DELETE, if one was established.
    ///
    /// A `405 Method Not Allowed` means the server does not support explicit
    /// termination and is not an error.
    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();

        let Some(sid) = self.session_id.write().await.take() else {
            return Ok(());
        };

        let req = self
            .http_client
            .delete(self.endpoint.as_str())
            .header(SESSION_HEADER, sid.as_str())
            .timeout(Duration::from_secs(5));
        let response = self
            .apply_headers(req)
            .send()
            .await
            .map_err(|e| BridgeError::McpTransport(format!("HTTP DELETE failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::METHOD_NOT_ALLOWED {
            tracing::warn!(%status, "MCP session DELETE was not accepted");
        }
        Ok(())
    }
}

impl Drop for HttpTransport {
    /// Fire-and-forget DELETE when the transport is dropped without `close`.
    fn drop(&mut self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        let Ok(guard) = self.session_id.try_read() else {
            return;
        };
        let Some(sid) = guard.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let mut req = self
            .http_client
            .delete(self.endpoint.as_str())
            .header(SESSION_HEADER, sid)
            .timeout(Duration::from_secs(5));
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        runtime.spawn(async move {
            let _ = req.send().await;
        });
    }
}

/// Parse an SSE byte stream and forward each event's `data:` payload.
///
/// - `event: ping` and `data: [PING]` are discarded.
/// - Multi-line `data:` fields are joined with `\n`.
/// - `id:` and `retry:` are ignored; this client does not resume streams.
pub async fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    response_tx: mpsc::UnboundedSender<String>,
) {
    use futures::StreamExt;

    let mut buffer = String::new();

    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let Ok(chunk) = chunk_result else {
            break;
        };
        let Ok(text) = std::str::from_utf8(&chunk) else {
            continue;
        };

        buffer.push_str(&text.replace("\r\n", "\n"));

        while let Some(pos) = buffer.find("\n\n") {
            let event_block: String = buffer.drain(..pos + 2).collect();
            process_sse_event(&event_block, &response_tx);
        }
    }

    if !buffer.trim().is_empty() {
        process_sse_event(&buffer, &response_tx);
    }
}

fn process_sse_event(event_block: &str, response_tx: &mpsc::UnboundedSender<String>) {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event_type: Option<&str> = None;

    for line in event_block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        }
    }

    if event_type.is_some_and(|et| et.eq_ignore_ascii_case("ping")) {
        return;
    }

    let data = data_lines.join("\n");
    if data.is_empty() || data.eq_ignore_ascii_case("[ping]") {
        return;
    }

    let _ = response_tx.send(data);
}
