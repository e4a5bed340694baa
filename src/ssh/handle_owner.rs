//! Handle Owner Task
//!
//! This module implements the "single owner" pattern for the russh Handle.
//!
//! Only one task owns the `Handle<ClientHandler>`. Everything else talks to
//! it through a cloneable [`HandleController`] which sends commands over an
//! mpsc channel. Gateways use it to open `direct-tcpip` tunnels for the
//! sessions behind them, sessions use it to open exec channels.

use std::time::Duration;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;
use super::transport::{ExecOutput, RemoteHandle};

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (for exec)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Open a direct-tcpip channel (for tunneling another session)
    ChannelOpenDirectTcpip {
        host: String,
        port: u32,
        originator_host: String,
        originator_port: u32,
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
///
/// Cloning is cheap (copies a Sender). Any holder has full control over
/// the connection, including disconnecting it, so controllers never leave
/// the registry's sessions.
#[derive(Clone, Debug)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
}

impl HandleController {
    /// Wrap a raw sender. Production code uses `spawn_handle_owner_task`.
    pub fn new(cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Open a session channel
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Open a direct-tcpip channel to `host:port` as seen from this connection
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenDirectTcpip {
                host: host.to_string(),
                port,
                originator_host: originator_host.to_string(),
                originator_port,
                reply_tx,
            })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Ask the owner task to disconnect
    ///
    /// Fails with `Disconnected` if the task is already gone.
    pub async fn disconnect(&self) -> Result<(), SshError> {
        self.cmd_tx
            .send(HandleCommand::Disconnect)
            .await
            .map_err(|_| SshError::Disconnected)
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

#[async_trait]
impl RemoteHandle for HandleController {
    async fn execute(&self, command: &str, timeout_secs: u64) -> Result<ExecOutput, SshError> {
        let mut channel = self.open_session_channel().await?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(format!("Failed to execute command: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code: Option<u32> = None;

        let timeout = Duration::from_secs(timeout_secs);
        let drained = tokio::time::timeout(timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                    // ext=1 is stderr
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                        stderr.extend_from_slice(&data)
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = Some(exit_status),
                    // Exit status may arrive after EOF, so keep reading until close
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Command timed out after {:?}: {}", timeout, command);
            let _ = channel.close().await;
            return Err(SshError::Timeout(format!(
                "Command timed out after {} seconds",
                timeout.as_secs()
            )));
        }

        debug!(
            "Exec completed: exit={:?} stdout_len={} stderr_len={}",
            exit_code,
            stdout.len(),
            stderr.len()
        );

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    async fn close(&self) -> Result<(), SshError> {
        self.disconnect().await
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns a controller for it.
/// `label` only appears in logs.
pub fn spawn_handle_owner_task(handle: Handle<ClientHandler>, label: String) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);

    tokio::spawn(async move {
        info!("Handle owner task started for {}", label);

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                HandleCommand::ChannelOpenSession { reply_tx } => {
                    let result = handle.channel_open_session().await;
                    if reply_tx.send(result).is_err() {
                        warn!("Caller dropped before receiving channel_open_session result");
                    }
                }

                HandleCommand::ChannelOpenDirectTcpip {
                    host,
                    port,
                    originator_host,
                    originator_port,
                    reply_tx,
                } => {
                    let result = handle
                        .channel_open_direct_tcpip(&host, port, &originator_host, originator_port)
                        .await;
                    if reply_tx.send(result).is_err() {
                        warn!("Caller dropped before receiving direct_tcpip result");
                    }
                }

                HandleCommand::Disconnect => {
                    info!("Disconnect requested for {}", label);
                    break;
                }
            }
        }

        drain_pending_commands(&mut cmd_rx);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        info!("Handle owner task terminated for {}", label);
    });

    HandleController { cmd_tx }
}

/// Drain all pending commands, returning a disconnect error to each
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::ChannelOpenDirectTcpip { reply_tx, .. } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disconnect_reaches_owner() {
        let (tx, mut rx) = mpsc::channel(4);
        let controller = HandleController::new(tx);

        controller.disconnect().await.unwrap();
        assert!(matches!(rx.recv().await, Some(HandleCommand::Disconnect)));
    }

    #[tokio::test]
    async fn test_disconnect_after_owner_gone() {
        let (tx, rx) = mpsc::channel(4);
        let controller = HandleController::new(tx);
        drop(rx);

        assert!(!controller.is_connected());
        assert!(matches!(
            controller.disconnect().await,
            Err(SshError::Disconnected)
        ));
        assert!(matches!(
            controller.close().await,
            Err(SshError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_open_channel_when_reply_dropped() {
        let (tx, mut rx) = mpsc::channel(4);
        let controller = HandleController::new(tx);

        // Owner receives the request but never answers
        let owner = tokio::spawn(async move {
            if let Some(HandleCommand::ChannelOpenSession { reply_tx }) = rx.recv().await {
                drop(reply_tx);
            }
        });

        let result = controller.open_session_channel().await;
        owner.await.unwrap();
        assert!(matches!(result, Err(SshError::Disconnected)));
    }

    #[tokio::test]
    async fn test_execute_when_owner_gone() {
        let (tx, rx) = mpsc::channel(4);
        let controller = HandleController::new(tx);
        drop(rx);

        assert!(matches!(
            controller.execute("true", 5).await,
            Err(SshError::Disconnected)
        ));
    }
}
