//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that all MCP transport
//! implementations must satisfy, plus [`TransportHandle`], which owns an open
//! transport and exposes it to the session as plain channels. Concrete
//! implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and communicates
//!   over its stdin/stdout pipes (newline-delimited JSON).
//! - [`http::HttpTransport`] -- Streamable HTTP transport (POST per message,
//!   JSON or SSE replies).
//! - `fake::FakeTransport` -- in-process fake used in tests (cfg(test) only).
//!
//! # Streams
//!
//! Opening a transport yields [`TransportStreams`]: an inbound receiver, an
//! outbound sender, and an optional diagnostics receiver. The diagnostics
//! channel (child stderr for stdio) is informational only and the session
//! never reads it.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::mcp::config::{parse_endpoint, McpServerConfig, TransportConfig};

pub mod http;
pub mod stdio;

#[cfg(test)]
pub mod fake;

/// Boxed stream of serialized JSON-RPC messages.
pub type MessageStream<'a> = Pin<Box<dyn Stream<Item = String> + Send + 'a>>;

/// Abstraction over MCP transport implementations.
///
/// Implementations exist for stdio (child process) and Streamable HTTP.
/// Used polymorphically through `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send a complete JSON-RPC message string to the remote peer.
    ///
    /// The transport is responsible for any framing required by the
    /// underlying medium (a trailing newline for stdio, a POST for HTTP).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::McpTransport`] if the transport is closed or the
    /// underlying I/O operation fails.
    async fn send(&self, message: String) -> Result<()>;

    /// Returns a stream of inbound JSON-RPC message strings.
    ///
    /// The stream ends when the transport is closed or the peer disconnects.
    fn receive(&self) -> MessageStream<'_>;

    /// Returns the diagnostic stream, if this transport has one.
    ///
    /// Diagnostic output must never be treated as an error condition.
    fn receive_err(&self) -> Option<MessageStream<'_>> {
        None
    }

    /// Release the underlying process or connection.
    ///
    /// Must be idempotent: a second call is a no-op returning `Ok(())`.
    async fn close(&self) -> Result<()>;
}

/// The channel ends a session needs from an open transport.
#[derive(Debug)]
pub struct TransportStreams {
    /// Messages received from the server
    pub inbound: mpsc::UnboundedReceiver<String>,
    /// Messages to deliver to the server
    pub outbound: mpsc::UnboundedSender<String>,
    /// Auxiliary diagnostic channel; absent for transports without one
    pub diagnostics: Option<mpsc::UnboundedReceiver<String>>,
}

/// Owner of an open transport and the tasks pumping its channels.
///
/// Closing is idempotent: only the first [`close`](Self::close) reaches the
/// transport. Dropping an unclosed handle stops the pumps and leaves process
/// cleanup to the transport's own `Drop`.
#[derive(Debug)]
pub struct TransportHandle {
    transport: Option<Arc<dyn Transport>>,
    cancel: CancellationToken,
    pumps: Vec<JoinHandle<()>>,
}

impl TransportHandle {
    /// Open the transport described by `config`.
    ///
    /// No retries: a failure is returned immediately.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Config`] if the parameters are not openable (empty
    ///   command, bad URL).
    /// - [`BridgeError::McpTransport`] if the process or HTTP client cannot be
    ///   created.
    pub fn open(config: &McpServerConfig) -> Result<(Self, TransportStreams)> {
        config.transport.validate()?;

        let transport: Arc<dyn Transport> = match &config.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                working_dir,
            } => Arc::new(stdio::StdioTransport::spawn(
                command.into(),
                args.clone(),
                env.clone(),
                working_dir.clone(),
            )?),
            TransportConfig::Http { url, headers } => Arc::new(http::HttpTransport::new(
                parse_endpoint(url)?,
                headers.clone(),
                config.request_timeout(),
            )?),
        };

        tracing::debug!(
            server = %config.name,
            transport = config.transport.kind(),
            "MCP transport opened"
        );

        Ok(Self::attach(transport))
    }

    /// Wrap an already-constructed transport and start its pumps.
    pub fn attach(transport: Arc<dyn Transport>) -> (Self, TransportStreams) {
        let cancel = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();

        let mut pumps = vec![
            spawn_read_pump(Arc::clone(&transport), inbound_tx, cancel.clone()),
            spawn_write_pump(Arc::clone(&transport), outbound_rx, cancel.clone()),
        ];

        let diagnostics = if transport.receive_err().is_some() {
            let (diag_tx, diag_rx) = mpsc::unbounded_channel::<String>();
            pumps.push(spawn_diagnostic_pump(
                Arc::clone(&transport),
                diag_tx,
                cancel.clone(),
            ));
            Some(diag_rx)
        } else {
            None
        };

        let handle = Self {
            transport: Some(transport),
            cancel,
            pumps,
        };
        let streams = TransportStreams {
            inbound: inbound_rx,
            outbound: outbound_tx,
            diagnostics,
        };
        (handle, streams)
    }

    /// Whether [`close`](Self::close) has already run.
    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Stop the pumps and release the transport.
    ///
    /// # Errors
    ///
    /// Propagates the transport's own close error. A second call always
    /// returns `Ok(())` without touching the transport.
    pub async fn close(&mut self) -> Result<()> {
        let Some(transport) = self.transport.take() else {
            return Ok(());
        };

        self.cancel.cancel();
        for pump in self.pumps.drain(..) {
            let _ = pump.await;
        }

        transport.close().await
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_read_pump(
    transport: Arc<dyn Transport>,
    inbound_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = transport.receive();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(message) => {
                        if inbound_tx.send(message).is_err() {
                            break;
                        }
                    }
                    None => {
                        tracing::debug!("MCP transport inbound stream ended");
                        break;
                    }
                },
            }
        }
    })
}

/// A failed send is unrecoverable: the pump cancels the shared token so the
/// read side shuts down too and in-flight requests fail fast.
fn spawn_write_pump(
    transport: Arc<dyn Transport>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = outbound_rx.recv() => {
                    let Some(message) = next else { break };
                    if let Err(e) = transport.send(message).await {
                        tracing::warn!("MCP transport send failed: {:#}", e);
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    })
}

/// Keeps draining after the receiver is gone so the transport's buffer does
/// not grow.
fn spawn_diagnostic_pump(
    transport: Arc<dyn Transport>,
    diag_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut stream) = transport.receive_err() else {
            return;
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(line) => {
                        let _ = diag_tx.send(line);
                    }
                    None => break,
                },
            }
        }
    })
}

/// Stream over a shared receiver that also ends once `closed` fires.
///
/// Concrete transports keep a sender alive internally, so the channel alone
/// would never report end-of-stream after close.
pub(crate) fn channel_stream(
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    closed: CancellationToken,
) -> MessageStream<'static> {
    Box::pin(futures::stream::unfold(
        (rx, closed),
        |(rx, closed)| async move {
            let item = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    _ = closed.cancelled() => None,
                    item = guard.recv() => item,
                }
            }?;
            Some((item, (rx, closed)))
        },
    ))
}

/// Error returned by `send` once a transport has been closed.
pub(crate) fn closed_error() -> anyhow::Error {
    BridgeError::McpTransport("transport is closed".to_string()).into()
}
