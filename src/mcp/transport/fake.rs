//! In-process fake transport for MCP unit tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. The transport goes into the code under test; the test keeps the
//! handle to:
//!
//! - read what the client sent: `handle.outbound_rx.recv().await`
//! - inject server messages: `handle.inbound_tx.send(json_string)`
//! - count how many times the transport was closed: `handle.close_calls`
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx -> inbound channel -> receive()   (client reads)
//! ```
//!
//! [`FakeTransportHandle::serve`] turns the handle into a scripted server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::mcp::transport::{channel_stream, closed_error, MessageStream, Transport};

/// In-process fake transport backed by in-memory channels.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    inbound_inject_tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
    close_calls: Arc<AtomicUsize>,
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let close_calls = Arc::new(AtomicUsize::new(0));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            inbound_inject_tx: inbound_tx.clone(),
            closed: CancellationToken::new(),
            close_calls: Arc::clone(&close_calls),
        };

        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            close_calls,
        };

        (transport, handle)
    }

    /// Serialize `message` and push it onto the inbound channel.
    pub fn inject_response(&self, message: serde_json::Value) {
        let serialized =
            serde_json::to_string(&message).expect("FakeTransport: failed to serialize message");
        self.inbound_inject_tx
            .send(serialized)
            .expect("FakeTransport: inbound channel closed before inject_response");
    }
}

/// The test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Messages the client sent via [`Transport::send`]
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Feeds the client's [`Transport::receive`] stream
    pub inbound_tx: mpsc::UnboundedSender<String>,
    /// Number of times [`Transport::close`] ran to completion
    pub close_calls: Arc<AtomicUsize>,
}

/// What a scripted server does with one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with `result`
    Result(serde_json::Value),
    /// Answer with a JSON-RPC error
    Error(i64, String),
    /// Send nothing
    Silent,
}

impl FakeTransportHandle {
    /// Run a scripted server on this handle.
    ///
    /// Every request read from `outbound_rx` is passed to `respond` as
    /// `(method, params, inbound_tx)`; notifications and responses from the
    /// client are skipped. The sender lets a script push extra server
    /// traffic. The task ends when the client side goes away.
    pub fn serve<F>(self, respond: F) -> JoinHandle<()>
    where
        F: Fn(&str, &serde_json::Value, &mpsc::UnboundedSender<String>) -> Reply + Send + 'static,
    {
        let FakeTransportHandle {
            mut outbound_rx,
            inbound_tx,
            ..
        } = self;

        tokio::spawn(async move {
            while let Some(raw) = outbound_rx.recv().await {
                let Ok(message) = serde_json::from_str::<serde_json::Value>(&raw) else {
                    continue;
                };
                let (Some(id), Some(method)) = (
                    message.get("id").cloned(),
                    message.get("method").and_then(|m| m.as_str()),
                ) else {
                    continue;
                };
                let params = message
                    .get("params")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);

                let reply = match respond(method, &params, &inbound_tx) {
                    Reply::Result(result) => {
                        serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
                    }
                    Reply::Error(code, text) => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": code, "message": text }
                    }),
                    Reply::Silent => continue,
                };
                if inbound_tx.send(reply.to_string()).is_err() {
                    break;
                }
            }
        })
    }
}

/// A minimal `initialize` result for scripted servers.
pub fn initialize_result() -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": crate::mcp::types::LATEST_PROTOCOL_VERSION,
        "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
        "serverInfo": { "name": "fake", "version": "0.0.1" }
    })
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }
        self.outbound_tx.send(message).map_err(|e| {
            BridgeError::McpTransport(format!("FakeTransport outbound channel closed: {}", e))
                .into()
        })
    }

    fn receive(&self) -> MessageStream<'_> {
        channel_stream(Arc::clone(&self.inbound_rx), self.closed.clone())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_delivers_to_handle_outbound_rx() {
        let (transport, mut handle) = FakeTransport::new();

        transport
            .send(r#"{"jsonrpc":"2.0","method":"ping"}"#.to_string())
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), handle.outbound_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(received, r#"{"jsonrpc":"2.0","method":"ping"}"#);
    }

    #[tokio::test]
    async fn test_inject_response_and_handle_share_channel() {
        let (transport, handle) = FakeTransport::new();

        handle
            .inbound_tx
            .send(r#"{"via":"handle"}"#.to_string())
            .unwrap();
        transport.inject_response(serde_json::json!({"via": "inject_response"}));

        let mut stream = transport.receive();
        let m1: serde_json::Value =
            serde_json::from_str(&stream.next().await.unwrap()).unwrap();
        let m2: serde_json::Value =
            serde_json::from_str(&stream.next().await.unwrap()).unwrap();
        assert_eq!(m1["via"], "handle");
        assert_eq!(m2["via"], "inject_response");
    }

    #[tokio::test]
    async fn test_close_ends_receive_and_rejects_send() {
        let (transport, handle) = FakeTransport::new();
        let mut stream = transport.receive();

        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("stream did not end after close");
        assert!(next.is_none());
        assert!(transport.send("late".to_string()).await.is_err());
        assert_eq!(handle.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_serve_answers_requests_and_skips_notifications() {
        let (transport, handle) = FakeTransport::new();
        let _server = handle.serve(|method, _params, _tx| match method {
            "ping" => Reply::Result(serde_json::json!({})),
            _ => Reply::Error(-32601, "Method not found".to_string()),
        });

        transport
            .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
            .await
            .unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":3,"method":"ping","params":{}}"#.to_string())
            .await
            .unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":4,"method":"nope","params":{}}"#.to_string())
            .await
            .unwrap();

        let mut stream = transport.receive();
        let first: serde_json::Value =
            serde_json::from_str(&stream.next().await.unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&stream.next().await.unwrap()).unwrap();
        assert_eq!(first["id"], 3);
        assert_eq!(first["result"], serde_json::json!({}));
        assert_eq!(second["id"], 4);
        assert_eq!(second["error"]["code"], -32601);
    }

    #[test]
    fn test_fake_transport_is_object_safe() {
        let (transport, _handle) = FakeTransport::new();
        let _boxed: Box<dyn Transport> = Box::new(transport);
    }
}
