//! Session state machine layered over transport streams
//!
//! A [`Session`] moves through `Unconnected → Connected → Closed`. The
//! handshake happens exactly once, on the first transition. `Closed` is
//! terminal: it is reached by [`Session::disconnect`], a failed handshake, a
//! transport failure observed by any request, or a read loop that stopped.
//!
//! Every operation checks the state locally before touching the wire, so a
//! request on a session that is not `Connected` fails with
//! [`BridgeError::NotConnected`] and sends nothing.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::mcp::client::{start_read_loop, JsonRpcClient};
use crate::mcp::protocol::{InitializedMcpProtocol, McpProtocol};
use crate::mcp::transport::TransportStreams;
use crate::mcp::types::{
    Implementation, InitializeResponse, NOTIF_MESSAGE, NOTIF_PROMPTS_LIST_CHANGED,
    NOTIF_RESOURCES_LIST_CHANGED, NOTIF_TOOLS_LIST_CHANGED,
};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Created, no handshake yet
    Unconnected = 0,
    /// Handshake completed; requests allowed
    Connected = 1,
    /// Terminal
    Closed = 2,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Unconnected,
            1 => SessionState::Connected,
            _ => SessionState::Closed,
        }
    }
}

#[derive(Debug)]
struct ReadLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Protocol session bound to one server.
#[derive(Debug)]
pub struct Session {
    server: String,
    request_timeout: Duration,
    state: AtomicU8,
    protocol: Option<InitializedMcpProtocol>,
    read_loop: Option<ReadLoop>,
}

impl Session {
    /// Create an unconnected session for the named server.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use mcp_bridge::mcp::session::{Session, SessionState};
    ///
    /// let session = Session::new("users", Duration::from_secs(30));
    /// assert_eq!(session.state(), SessionState::Unconnected);
    /// ```
    pub fn new(server: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            server: server.into(),
            request_timeout,
            state: AtomicU8::new(SessionState::Unconnected as u8),
            protocol: None,
            read_loop: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Shorthand for `state() == Connected`.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Perform the handshake over `streams` and enter `Connected`.
    ///
    /// The diagnostics channel, if any, is dropped unread. The returned
    /// capabilities descriptor is logged and otherwise left to the caller.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::NotConnected`] if the session is already `Closed`.
    /// - [`BridgeError::Mcp`] if the session is already `Connected`.
    /// - Any handshake failure; the session is then `Closed`.
    pub async fn connect(
        &mut self,
        streams: TransportStreams,
        client_info: Implementation,
    ) -> Result<InitializeResponse> {
        match self.state() {
            SessionState::Unconnected => {}
            SessionState::Connected => {
                return Err(BridgeError::Mcp("session is already connected".to_string()).into())
            }
            SessionState::Closed => return Err(BridgeError::NotConnected.into()),
        }

        let TransportStreams {
            inbound, outbound, ..
        } = streams;

        let client = Arc::new(
            JsonRpcClient::new(self.server.clone(), outbound).with_timeout(self.request_timeout),
        );
        register_default_handlers(&client).await;

        let cancel = CancellationToken::new();
        let task = start_read_loop(inbound, cancel.clone(), Arc::clone(&client));

        let protocol = match McpProtocol::new(client).initialize(client_info).await {
            Ok(protocol) => protocol,
            Err(e) => {
                cancel.cancel();
                let _ = task.await;
                self.set_state(SessionState::Closed);
                tracing::warn!(server = %self.server, "MCP handshake failed: {:#}", e);
                return Err(e);
            }
        };

        let response = protocol.initialize_response.clone();
        tracing::info!(
            server = %self.server,
            protocol_version = %response.protocol_version,
            server_name = %response.server_info.name,
            server_version = %response.server_info.version,
            capabilities = ?response.capabilities,
            "MCP session established"
        );

        self.protocol = Some(protocol);
        self.read_loop = Some(ReadLoop { cancel, task });
        self.set_state(SessionState::Connected);
        Ok(response)
    }

    /// The negotiated protocol, if the session is `Connected`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotConnected`] in any other state.
    pub fn protocol(&self) -> Result<&InitializedMcpProtocol> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected.into());
        }
        self.protocol
            .as_ref()
            .ok_or_else(|| BridgeError::NotConnected.into())
    }

    /// Run one protocol operation with the precondition check in front and
    /// transport-failure tracking behind.
    ///
    /// A transport error moves the session to `Closed` before it is returned.
    pub async fn call<'a, T, Fut>(
        &'a self,
        op: impl FnOnce(&'a InitializedMcpProtocol) -> Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let protocol = self.protocol()?;
        if self
            .read_loop
            .as_ref()
            .is_some_and(|read_loop| read_loop.task.is_finished())
        {
            let lost = BridgeError::McpTransport(format!(
                "read loop for {} is no longer running",
                self.server
            ));
            return self.track(Err(lost.into()));
        }
        let outcome = op(protocol).await;
        self.track(outcome)
    }

    /// Issue a raw request by method name.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotConnected`] outside `Connected`, otherwise whatever
    /// the request fails with.
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        self.call(|protocol| protocol.client.request(method, params, None))
            .await
    }

    /// Register a handler for a server notification.
    pub async fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) -> Result<()> {
        self.protocol()?.client.on_notification(method, f).await;
        Ok(())
    }

    fn track<T>(&self, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            if e.downcast_ref::<BridgeError>()
                .is_some_and(BridgeError::is_transport)
                && self.state() == SessionState::Connected
            {
                tracing::warn!(server = %self.server, "MCP session lost: {:#}", e);
                self.set_state(SessionState::Closed);
            }
        }
        outcome
    }

    /// Tear down the session layer and enter `Closed`.
    ///
    /// Stops the read loop and waits for it. Calling this again, or on a
    /// session that never connected, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Mcp`] if the read loop terminated abnormally.
    /// The session is `Closed` either way.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.set_state(SessionState::Closed);
        self.protocol = None;

        let Some(ReadLoop { cancel, task }) = self.read_loop.take() else {
            return Ok(());
        };

        cancel.cancel();
        task.await.map_err(|e| {
            BridgeError::Mcp(format!(
                "session read loop for {} terminated abnormally: {}",
                self.server, e
            ))
        })?;

        tracing::debug!(server = %self.server, "MCP session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(read_loop) = &self.read_loop {
            read_loop.cancel.cancel();
        }
    }
}

async fn register_default_handlers(client: &Arc<JsonRpcClient>) {
    let server = client.server().to_string();
    client
        .on_notification(NOTIF_MESSAGE, move |params| log_server_message(&server, &params))
        .await;

    for method in [
        NOTIF_TOOLS_LIST_CHANGED,
        NOTIF_RESOURCES_LIST_CHANGED,
        NOTIF_PROMPTS_LIST_CHANGED,
    ] {
        let server = client.server().to_string();
        client
            .on_notification(method, move |_params| {
                tracing::debug!(server = %server, notification = method, "MCP list changed");
            })
            .await;
    }
}

/// Re-emit a `notifications/message` log entry through `tracing`.
fn log_server_message(server: &str, params: &serde_json::Value) {
    let level = params
        .get("level")
        .and_then(|l| l.as_str())
        .unwrap_or("info");
    let logger = params
        .get("logger")
        .and_then(|l| l.as_str())
        .unwrap_or("");
    let data = params.get("data").cloned().unwrap_or_default();

    match level {
        "debug" => tracing::debug!(server, logger, %data, "MCP server log"),
        "info" | "notice" => tracing::info!(server, logger, %data, "MCP server log"),
        "warning" => tracing::warn!(server, logger, %data, "MCP server log"),
        _ => tracing::error!(server, logger, %data, "MCP server log"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::fake::{initialize_result, FakeTransport, Reply};
    use crate::mcp::transport::TransportHandle;

    fn client_info() -> Implementation {
        Implementation {
            name: "mcp-bridge".to_string(),
            version: "0.1.0".to_string(),
        }
    }

    /// Session wired to a scripted server answering `initialize` and `ping`.
    async fn connected_session() -> (Session, TransportHandle) {
        let (transport, handle) = FakeTransport::new();
        handle.serve(|method, _params, _tx| match method {
            "initialize" => Reply::Result(initialize_result()),
            "ping" => Reply::Result(serde_json::json!({})),
            _ => Reply::Error(-32601, format!("Method not found: {method}")),
        });
        let (owner, streams) = TransportHandle::attach(Arc::new(transport));
        let mut session = Session::new("fake", Duration::from_secs(5));
        session.connect(streams, client_info()).await.unwrap();
        (session, owner)
    }

    #[tokio::test]
    async fn test_connect_transitions_to_connected() {
        let (session, _owner) = connected_session().await;
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.protocol().is_ok());
    }

    #[tokio::test]
    async fn test_request_before_connect_is_not_connected_and_sends_nothing() {
        let session = Session::new("fake", Duration::from_secs(5));
        let err = session
            .request::<_, serde_json::Value>("ping", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::NotConnected)
        ));
        assert_eq!(session.state(), SessionState::Unconnected);
    }

    #[tokio::test]
    async fn test_raw_request_by_method_name() {
        let (session, _owner) = connected_session().await;
        let pong: serde_json::Value = session
            .request("ping", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(pong, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_session_connected() {
        let (session, _owner) = connected_session().await;
        let err = session
            .request::<_, serde_json::Value>("resources/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BridgeError>(), Some(BridgeError::Mcp(_))));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_transport_loss_closes_session() {
        let (session, mut owner) = connected_session().await;
        owner.close().await.unwrap();

        let err = session
            .request::<_, serde_json::Value>("ping", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err
            .downcast_ref::<BridgeError>()
            .is_some_and(BridgeError::is_transport));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let (mut session, _owner) = connected_session().await;
        let (transport, _handle) = FakeTransport::new();
        let (_other, streams) = TransportHandle::attach(Arc::new(transport));
        assert!(session.connect(streams, client_info()).await.is_err());
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_session() {
        let (transport, handle) = FakeTransport::new();
        handle.serve(|_method, _params, _tx| Reply::Error(-32603, "boom".to_string()));
        let (_owner, streams) = TransportHandle::attach(Arc::new(transport));

        let mut session = Session::new("fake", Duration::from_secs(5));
        assert!(session.connect(streams, client_info()).await.is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_disconnect_is_terminal_and_idempotent() {
        let (mut session, _owner) = connected_session().await;

        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        let err = session
            .request::<_, serde_json::Value>("ping", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::NotConnected)
        ));

        let (transport, _handle) = FakeTransport::new();
        let (_other, streams) = TransportHandle::attach(Arc::new(transport));
        let err = session.connect(streams, client_info()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_reports_crashed_read_loop() {
        let (transport, handle) = FakeTransport::new();
        let inbound = handle.inbound_tx.clone();
        handle.serve(|method, _params, _tx| match method {
            "initialize" => Reply::Result(initialize_result()),
            _ => Reply::Silent,
        });
        let (_owner, streams) = TransportHandle::attach(Arc::new(transport));
        let mut session = Session::new("fake", Duration::from_secs(5));
        session.connect(streams, client_info()).await.unwrap();

        session
            .on_notification("test/explode", |_| panic!("handler failure"))
            .await
            .unwrap();
        inbound
            .send(serde_json::json!({ "jsonrpc": "2.0", "method": "test/explode" }).to_string())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = session.disconnect().await.unwrap_err();
        assert!(err.to_string().contains("terminated abnormally"));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_dead_read_loop_closes_session_without_waiting_for_timeout() {
        let (transport, handle) = FakeTransport::new();
        let inbound = handle.inbound_tx.clone();
        handle.serve(|method, _params, _tx| match method {
            "initialize" => Reply::Result(initialize_result()),
            _ => Reply::Silent,
        });
        let (_owner, streams) = TransportHandle::attach(Arc::new(transport));
        let mut session = Session::new("fake", Duration::from_secs(30));
        session.connect(streams, client_info()).await.unwrap();

        session
            .on_notification("test/explode", |_| panic!("handler failure"))
            .await
            .unwrap();
        inbound
            .send(serde_json::json!({ "jsonrpc": "2.0", "method": "test/explode" }).to_string())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            session.request::<_, serde_json::Value>("tools/list", serde_json::json!({})),
        )
        .await
        .expect("request should not wait for the request timeout")
        .unwrap_err();
        assert!(err
            .downcast_ref::<BridgeError>()
            .is_some_and(BridgeError::is_transport));
        assert_eq!(session.state(), SessionState::Closed);

        let err = session
            .request::<_, serde_json::Value>("ping", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_server_ping_answered_while_connected() {
        let (transport, handle) = FakeTransport::new();
        let inbound = handle.inbound_tx.clone();
        let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let forward = reply_tx.clone();
        tokio::spawn(async move {
            let mut outbound_rx = handle.outbound_rx;
            while let Some(raw) = outbound_rx.recv().await {
                let msg: serde_json::Value = serde_json::from_str(&raw).unwrap();
                if msg["method"] == "initialize" {
                    let resp = serde_json::json!({
                        "jsonrpc": "2.0", "id": msg["id"], "result": initialize_result()
                    });
                    handle.inbound_tx.send(resp.to_string()).unwrap();
                } else {
                    let _ = forward.send(raw);
                }
            }
        });
        drop(reply_tx);

        let (_owner, streams) = TransportHandle::attach(Arc::new(transport));
        let mut session = Session::new("fake", Duration::from_secs(5));
        session.connect(streams, client_info()).await.unwrap();

        inbound
            .send(serde_json::json!({ "jsonrpc": "2.0", "id": "srv-1", "method": "ping" }).to_string())
            .unwrap();

        // Skip the initialized notification, then expect the ping reply.
        let mut ping_reply = None;
        for _ in 0..2 {
            let raw = tokio::time::timeout(Duration::from_secs(2), reply_rx.recv())
                .await
                .unwrap()
                .unwrap();
            let msg: serde_json::Value = serde_json::from_str(&raw).unwrap();
            if msg["id"] == "srv-1" {
                ping_reply = Some(msg);
                break;
            }
        }
        let ping_reply = ping_reply.expect("no reply to server ping");
        assert_eq!(ping_reply["result"], serde_json::json!({}));
    }
}
