//! Named Session
//!
//! One live connection to one `host:port`, carrying the display identity
//! used in command traces. The transport handle stays private: callers can
//! run commands, only the registry can close it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use super::error::SshError;
use super::transport::{ExecOutput, RemoteHandle, Transport};
use crate::config::{ConnectionKey, TargetDescriptor};

/// Command timeout when `RunOptions` does not set one
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Which output streams a caller wants hidden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hide {
    Stdout,
    Stderr,
    /// Hide both streams; also suppresses the command trace line
    Both,
}

/// Per-command options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub hide: Option<Hide>,
    /// Return non-zero exits as output instead of `CommandFailed`
    pub warn: bool,
    pub timeout_secs: Option<u64>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hide(mut self, hide: Hide) -> Self {
        self.hide = Some(hide);
        self
    }

    pub fn warn(mut self) -> Self {
        self.warn = true;
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Whether the command trace line should be emitted
    pub fn echoes(&self) -> bool {
        self.hide != Some(Hide::Both)
    }
}

/// Serializable snapshot of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub name: String,
    pub key: String,
    pub user: String,
    pub cwd: String,
    /// Key of the session this one is tunneled through
    pub gateway: Option<String>,
    pub created_at: String,
}

/// `[<user>@<name> <cwd>]$ <command>`
pub fn format_command_trace(user: &str, name: &str, cwd: &str, command: &str) -> String {
    format!("[{}@{} {}]$ {}", user, name, cwd, command)
}

fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

pub struct NamedSession<H> {
    name: String,
    key: ConnectionKey,
    user: String,
    gateway_key: Option<ConnectionKey>,
    cwd: RwLock<String>,
    created_at: DateTime<Utc>,
    handle: H,
}

impl<H: RemoteHandle> NamedSession<H> {
    /// Connect to `target`, through `gateway` when given
    ///
    /// The display name defaults to `host:port`.
    pub async fn establish<T>(
        transport: &T,
        target: &TargetDescriptor,
        gateway: Option<&NamedSession<H>>,
        display_name: Option<String>,
    ) -> Result<Self, SshError>
    where
        T: Transport<Handle = H>,
    {
        let key = target.connection_key();
        let handle = transport
            .establish(target, gateway.map(|g| &g.handle))
            .await?;

        Ok(Self::from_handle(
            handle,
            key.clone(),
            target.user.clone(),
            display_name.unwrap_or_else(|| key.to_string()),
            gateway.map(|g| g.key.clone()),
        ))
    }

    fn from_handle(
        handle: H,
        key: ConnectionKey,
        user: String,
        name: String,
        gateway_key: Option<ConnectionKey>,
    ) -> Self {
        Self {
            name,
            key,
            user,
            gateway_key,
            cwd: RwLock::new(String::new()),
            created_at: Utc::now(),
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn gateway_key(&self) -> Option<&ConnectionKey> {
        self.gateway_key.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current working directory prefix (empty = login directory)
    pub fn cwd(&self) -> String {
        self.cwd.read().clone()
    }

    /// Change the working directory for later commands
    ///
    /// Absolute paths replace the current one, relative paths are joined
    /// onto it, an empty path resets to the login directory.
    pub fn cd(&self, path: &str) {
        let mut cwd = self.cwd.write();
        if path.is_empty() {
            cwd.clear();
        } else if path.starts_with('/') || cwd.is_empty() {
            *cwd = path.to_string();
        } else {
            let joined = format!("{}/{}", cwd.trim_end_matches('/'), path);
            *cwd = joined;
        }
    }

    /// Run a command and wait for it to finish
    ///
    /// Unless both streams are hidden, a trace line is logged first.
    pub async fn run(&self, command: &str, options: &RunOptions) -> Result<ExecOutput, SshError> {
        let cwd = self.cwd();

        if options.echoes() {
            info!(
                "{}",
                format_command_trace(&self.user, &self.name, &cwd, command)
            );
        }

        let full_command = if cwd.is_empty() {
            command.to_string()
        } else {
            format!("cd {} && {}", shell_escape(&cwd), command)
        };

        let timeout = options
            .timeout_secs
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
        let output = self.handle.execute(&full_command, timeout).await?;

        if !output.success() && !options.warn {
            debug!(
                "Command on {} exited with {:?}",
                self.name, output.exit_code
            );
            return Err(SshError::CommandFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        Ok(output)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            name: self.name.clone(),
            key: self.key.to_string(),
            user: self.user.clone(),
            cwd: self.cwd(),
            gateway: self.gateway_key.as_ref().map(ToString::to_string),
            created_at: self.created_at.to_rfc3339(),
        }
    }

    /// Close the transport. Only the registry calls this.
    pub(crate) async fn close(&self) -> Result<(), SshError> {
        self.handle.close().await
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> &H {
        &self.handle
    }
}
