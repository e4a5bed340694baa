//! In-memory transport for tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error::SshError;
use super::transport::{ExecOutput, RemoteHandle, Transport};
use crate::config::TargetDescriptor;

/// One recorded `establish` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Established {
    pub key: String,
    pub user: String,
    pub via: Option<String>,
}

#[derive(Default)]
struct Shared {
    established: Mutex<Vec<Established>>,
    failing_hosts: Mutex<HashSet<String>>,
    failing_close: Mutex<HashSet<String>>,
    closed: Mutex<Vec<String>>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connection to `host` fail
    pub fn fail_host(&self, host: &str) {
        self.shared.failing_hosts.lock().insert(host.to_string());
    }

    /// Make closing the session with `key` fail
    pub fn fail_close(&self, key: &str) {
        self.shared.failing_close.lock().insert(key.to_string());
    }

    pub fn established(&self) -> Vec<Established> {
        self.shared.established.lock().clone()
    }

    pub fn established_count(&self) -> usize {
        self.shared.established.lock().len()
    }

    /// Keys of closed sessions, in close order
    pub fn closed(&self) -> Vec<String> {
        self.shared.closed.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Handle = MockHandle;

    async fn establish(
        &self,
        target: &TargetDescriptor,
        gateway: Option<&MockHandle>,
    ) -> Result<MockHandle, SshError> {
        if self.shared.failing_hosts.lock().contains(&target.host) {
            return Err(SshError::ConnectionFailed(format!(
                "{} unreachable",
                target.host
            )));
        }

        let key = target.connection_key().to_string();
        let via = gateway.map(|g| g.key.clone());
        self.shared.established.lock().push(Established {
            key: key.clone(),
            user: target.user.clone(),
            via: via.clone(),
        });

        Ok(MockHandle {
            key,
            via,
            commands: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            shared: self.shared.clone(),
        })
    }
}

pub struct MockHandle {
    pub key: String,
    pub via: Option<String>,
    commands: Mutex<Vec<String>>,
    timeouts: Mutex<Vec<u64>>,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

impl MockHandle {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn timeouts(&self) -> Vec<u64> {
        self.timeouts.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteHandle for MockHandle {
    /// Commands ending in `false` exit with 1, everything else with 0
    async fn execute(&self, command: &str, timeout_secs: u64) -> Result<ExecOutput, SshError> {
        if self.is_closed() {
            return Err(SshError::Disconnected);
        }
        self.commands.lock().push(command.to_string());
        self.timeouts.lock().push(timeout_secs);

        let failed = command.trim_end().ends_with("false");
        Ok(ExecOutput {
            stdout: format!("{}\n", self.key),
            stderr: if failed { "failed\n".to_string() } else { String::new() },
            exit_code: Some(if failed { 1 } else { 0 }),
        })
    }

    async fn close(&self) -> Result<(), SshError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(SshError::Disconnected);
        }
        self.shared.closed.lock().push(self.key.clone());
        if self.shared.failing_close.lock().contains(&self.key) {
            return Err(SshError::ConnectionFailed("close failed".to_string()));
        }
        Ok(())
    }
}
