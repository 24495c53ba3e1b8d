//! Transport-agnostic async JSON-RPC 2.0 client
//!
//! This module provides [`JsonRpcClient`], a channel-backed JSON-RPC 2.0 client
//! that is decoupled from the underlying transport. The session wires up two
//! [`tokio::sync::mpsc`] channels (outbound and inbound serialized messages)
//! and calls [`start_read_loop`] to dispatch responses and server traffic.
//!
//! # Design
//!
//! - Outbound messages are written to `outbound_tx` as newline-free JSON
//!   strings. Framing is the transport's job.
//! - Inbound messages arrive as JSON strings. The read loop classifies each
//!   one as a response, a server-initiated request, or a notification.
//! - In-flight requests live in a `pending` map keyed by `u64` request ID.
//!   When the read loop exits, including by a panicking handler, the map is
//!   cleared so awaiting callers get a transport error instead of hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::mcp::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, METHOD_PING};

/// Default timeout applied to every request when the caller does not specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Called with the raw `params` value when a matching server notification arrives.
type NotificationHandler = Box<dyn Fn(serde_json::Value) + Send + Sync + 'static>;

type PendingMap =
    HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// Channel-backed JSON-RPC 2.0 client.
///
/// Shared as `Arc<JsonRpcClient>` between the request issuer and the read
/// loop so both operate on the same pending map.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
/// use mcp_bridge::mcp::client::{start_read_loop, JsonRpcClient};
///
/// #[tokio::main]
/// async fn main() {
///     let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
///     let (_in_tx, in_rx) = mpsc::unbounded_channel::<String>();
///     let token = CancellationToken::new();
///     let client = Arc::new(JsonRpcClient::new("users", out_tx));
///     let _handle = start_read_loop(in_rx, token, Arc::clone(&client));
/// }
/// ```
pub struct JsonRpcClient {
    /// Server name used in timeout errors and log lines.
    server: String,
    /// Deadline used when `request` is called without an explicit timeout.
    default_timeout: Duration,
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
    outbound_tx: mpsc::UnboundedSender<String>,
    notification_handlers: Mutex<HashMap<String, NotificationHandler>>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("server", &self.server)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a new client writing serialized messages to `outbound_tx`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use mcp_bridge::mcp::client::JsonRpcClient;
    ///
    /// let (tx, _rx) = mpsc::unbounded_channel::<String>();
    /// let client = JsonRpcClient::new("users", tx);
    /// assert_eq!(client.server(), "users");
    /// ```
    pub fn new(server: impl Into<String>, outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            server: server.into(),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound_tx,
            notification_handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the default request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Name of the server this client talks to.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Send a JSON-RPC request and await the typed response.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::McpTransport`] if the outbound channel is closed or the
    ///   read loop exits before the response arrives.
    /// - [`BridgeError::McpTimeout`] if no response arrives within the deadline.
    /// - [`BridgeError::Mcp`] if the server returns a JSON-RPC error or the
    ///   result does not deserialize into `R`.
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register before sending so the response can never outrun the slot.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: method.to_string(),
            params: Some(serde_json::to_value(params)?),
        })?;

        if self.outbound_tx.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(BridgeError::McpTransport("outbound channel closed".to_string()).into());
        }

        let deadline = timeout.unwrap_or(self.default_timeout);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(BridgeError::McpTimeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                }
                .into());
            }
        };

        let rpc_result = outcome.map_err(|_| {
            BridgeError::McpTransport("read loop exited before response arrived".to_string())
        })?;

        let value = match rpc_result.map_err(|e| BridgeError::Mcp(e.to_string()))? {
            // A null or missing result decodes like an empty object.
            serde_json::Value::Null => serde_json::json!({}),
            value => value,
        };

        serde_json::from_value(value).map_err(|e| {
            BridgeError::Mcp(format!("malformed `{method}` result: {e}")).into()
        })
    }

    /// Send a JSON-RPC notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::McpTransport`] if the outbound channel is closed.
    pub fn notify<P: serde::Serialize + Send>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": serde_json::to_value(params)?
        }))?;

        self.outbound_tx
            .send(message)
            .map_err(|_| BridgeError::McpTransport("outbound channel closed".to_string()))?;

        Ok(())
    }

    /// Register a handler for a server-sent notification. A second handler for
    /// the same method replaces the first.
    pub async fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.notification_handlers
            .lock()
            .await
            .insert(method.into(), Box::new(f));
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Start the JSON-RPC read loop as a background Tokio task.
///
/// - **Response** (`id` plus `result` or `error`): resolves the pending sender.
/// - **Server request** (`id` plus `method`): `ping` is answered with `{}`,
///   anything else with `-32601 Method not found`.
/// - **Notification** (`method`, no `id`): runs the registered handler, if any.
///
/// The loop stops when `cancellation` fires, the inbound channel closes, or a
/// handler panics. In every case each pending sender is dropped; check
/// [`tokio::task::JoinHandle::is_finished`] to tell that the loop is gone.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut guard = PendingGuard {
            client: Arc::clone(&client),
            completed: false,
        };
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    client.pending.lock().await.clear();
                    break;
                }

                maybe_msg = inbound_rx.recv() => {
                    let Some(raw) = maybe_msg else {
                        tracing::debug!(server = %client.server, "MCP inbound stream closed");
                        client.pending.lock().await.clear();
                        break;
                    };
                    dispatch_message(&raw, &client).await;
                }
            }
        }
        guard.completed = true;
    })
}

/// Fails every in-flight request when the read loop goes away, panics included.
struct PendingGuard {
    client: Arc<JsonRpcClient>,
    completed: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.completed {
            tracing::error!(server = %self.client.server, "MCP read loop stopped abnormally");
        }
        match self.client.pending.try_lock() {
            Ok(mut pending) => pending.clear(),
            Err(_) => tracing::warn!(
                server = %self.client.server,
                "MCP read loop exited while the pending map was locked"
            ),
        }
    }
}

async fn dispatch_message(raw: &str, client: &Arc<JsonRpcClient>) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("MCP read loop: failed to parse inbound JSON: {e}");
            return;
        }
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    if has_id && (has_result || has_error) && !has_method {
        handle_response(value, client).await;
    } else if has_id && has_method {
        handle_server_request(value, client).await;
    } else if has_method {
        handle_notification(value, client).await;
    } else {
        tracing::debug!(
            "MCP read loop: unclassifiable message ignored \
             (has_id={has_id} has_method={has_method} has_result={has_result} has_error={has_error})"
        );
    }
}

async fn handle_response(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let id_val = &value["id"];
    let id = match id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse().ok()))
    {
        Some(id) => id,
        None => {
            tracing::warn!("MCP read loop: response has non-integer id: {id_val}");
            return;
        }
    };

    let Some(tx) = client.pending.lock().await.remove(&id) else {
        tracing::debug!("MCP read loop: response for unknown id {id} ignored");
        return;
    };

    let outcome = match value.get("error") {
        Some(error_val) => Err(serde_json::from_value::<JsonRpcError>(error_val.clone())
            .unwrap_or_else(|_| JsonRpcError {
                code: -32603,
                message: format!("malformed error object: {error_val}"),
                data: None,
            })),
        None => Ok(value
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null)),
    };

    // The caller may already have timed out.
    let _ = tx.send(outcome);
}

async fn handle_server_request(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
        return;
    };
    let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);

    let response = if method == METHOD_PING {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(serde_json::json!({})),
            error: None,
        }
    } else {
        tracing::debug!(server = %client.server, "MCP server request '{method}' not supported");
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(JsonRpcError {
                code: -32601,
                message: format!("Method not found: {method}"),
                data: None,
            }),
        }
    };

    if let Ok(serialized) = serde_json::to_string(&response) {
        let _ = client.outbound_tx.send(serialized);
    }
}

async fn handle_notification(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
        return;
    };
    let params = value
        .get("params")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    let handlers = client.notification_handlers.lock().await;
    match handlers.get(method) {
        Some(handler) => handler(params),
        None => tracing::debug!("MCP read loop: no handler for notification '{method}'"),
    }
}
