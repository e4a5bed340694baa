//! Transport seam
//!
//! The registry never touches the SSH protocol directly. It asks a
//! [`Transport`] for a [`RemoteHandle`], optionally relayed through the
//! handle of an already established gateway session.

use async_trait::async_trait;
use serde::Serialize;

use super::error::SshError;
use crate::config::TargetDescriptor;

/// Output of a finished remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the server closed the channel without an exit status
    pub exit_code: Option<u32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A live, authenticated connection to one host
#[async_trait]
pub trait RemoteHandle: Send + Sync + 'static {
    /// Run a command to completion
    async fn execute(&self, command: &str, timeout_secs: u64) -> Result<ExecOutput, SshError>;

    /// Close the underlying connection
    async fn close(&self) -> Result<(), SshError>;
}

/// Factory for [`RemoteHandle`]s
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Handle: RemoteHandle;

    /// Connect and authenticate, tunneling through `gateway` when given
    async fn establish(
        &self,
        target: &TargetDescriptor,
        gateway: Option<&Self::Handle>,
    ) -> Result<Self::Handle, SshError>;
}
