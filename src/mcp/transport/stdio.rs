//! Stdio transport for MCP child-process servers
//!
//! [`StdioTransport`] spawns a child process and talks to it over its
//! stdin/stdout pipes using newline-delimited JSON.
//!
//! - Outbound messages are written to the child's stdin followed by `\n`.
//! - Inbound messages are read from the child's stdout, one per line.
//! - The child's stderr is forwarded to the diagnostic stream and logged at
//!   `DEBUG`. It is never treated as an error.
//!
//! # Lifecycle
//!
//! [`Transport::close`] closes the child's stdin, waits up to
//! [`SHUTDOWN_GRACE`] for it to exit, then kills it. Dropping a transport
//! that was never closed sends a best-effort SIGTERM (Unix) or `start_kill`
//! (elsewhere).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::mcp::transport::{channel_stream, closed_error, MessageStream, Transport};

/// Variables inherited from the parent environment; everything else is
/// dropped before the child starts.
pub const INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

/// How long `close` waits for the child to exit after stdin is closed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use mcp_bridge::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::spawn(
///     "python".into(),
///     vec!["-m".into(), "users_mcp".into()],
///     HashMap::new(),
///     None,
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    /// Queue drained by the stdin writer task.
    stdin_tx: mpsc::UnboundedSender<String>,
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    stderr_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    child: Arc<Mutex<Child>>,
    /// Fired on close; stops the writer (closing stdin) and ends the streams.
    closed: CancellationToken,
}

/// Build the child environment: the inherited allowlist plus `extra`, with
/// `extra` winning on conflicts.
pub fn child_environment(extra: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = INHERITED_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect();
    env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

impl StdioTransport {
    /// Spawn a child process and wire up its stdio pipes.
    ///
    /// The inherited environment is cleared and replaced by
    /// [`child_environment`]. Three background tasks start immediately: a
    /// stdin writer, a stdout reader, and a stderr reader.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::McpTransport`] if the process cannot be spawned
    /// or a pipe is unavailable.
    pub fn spawn(
        executable: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let mut cmd = Command::new(&executable);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .envs(child_environment(&env));
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::McpTransport(format!(
                "failed to spawn MCP server `{}`: {}",
                executable.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::McpTransport("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::McpTransport("child stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::McpTransport("child stderr unavailable".into()))?;

        let closed = CancellationToken::new();
        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel::<String>();

        // Writer owns stdin; dropping it on close is what signals EOF.
        let writer_closed = closed.clone();
        tokio::spawn(async move {
            let mut stdin = stdin;
            loop {
                tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    next = stdin_rx.recv() => {
                        let Some(message) = next else { break };
                        let line = format!("{}\n", message);
                        if stdin.write_all(line.as_bytes()).await.is_err()
                            || stdin.flush().await.is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if stdout_tx.send(line.to_string()).is_err() {
                    break;
                }
            }
        });

        let pid = child.id();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(pid, "mcp server stderr: {}", line);
                if stderr_tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            stdin_tx,
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            stderr_rx: Arc::new(Mutex::new(stderr_rx)),
            child: Arc::new(Mutex::new(child)),
            closed,
        })
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }
        self.stdin_tx.send(message).map_err(|e| {
            BridgeError::McpTransport(format!("stdin channel closed: {}", e)).into()
        })
    }

    fn receive(&self) -> MessageStream<'_> {
        channel_stream(Arc::clone(&self.stdout_rx), self.closed.clone())
    }

    fn receive_err(&self) -> Option<MessageStream<'_>> {
        Some(channel_stream(
            Arc::clone(&self.stderr_rx),
            self.closed.clone(),
        ))
    }

    /// Close stdin, give the child [`SHUTDOWN_GRACE`] to exit, then kill it.
    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(%status, "MCP server process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(BridgeError::McpTransport(format!(
                "failed to wait for MCP server process: {}",
                e
            ))
            .into()),
            Err(_) => {
                tracing::debug!("MCP server did not exit within grace period; killing");
                child.kill().await.map_err(|e| {
                    BridgeError::McpTransport(format!("failed to kill MCP server process: {}", e))
                        .into()
                })
            }
        }
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination when the transport was never closed. Must not
    /// block.
    fn drop(&mut self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        if let Ok(mut child) = self.child.try_lock() {
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid comes from a live tokio::process::Child.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = child.start_kill();
            }
        }
    }
}
