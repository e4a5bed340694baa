//! SSH Connection Registry
//!
//! Keyed cache of live sessions, built from a hosts file.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  ConnectionRegistry                                       │
//! │  ├── hosts: HostsFile          (resolution source)        │
//! │  ├── connections: DashMap<"host:port", Arc<NamedSession>> │
//! │  ├── gateway: Option<Arc<NamedSession>>  (jump_server)    │
//! │  └── targets: Vec<Arc<NamedSession>>     (file order)     │
//! └───────────────────────────────────────────────────────────┘
//!          │
//!          │  connect(name | table | descriptor, gateway)
//!          ▼
//!   cache hit?  ── yes ──▶ existing session (gateway ignored)
//!      │
//!      no
//!      ▼
//!   NamedSession::establish ──▶ insert ──▶ new session
//! ```
//!
//! # Bootstrap
//!
//! 1. Gateway: connect `[jump_server]`. Any failure means "no gateway".
//! 2. Targets: connect every other section in file order. Any failure
//!    aborts construction.
//!
//! # Identity
//!
//! Sessions are keyed by `host:port` only. Two targets with the same
//! address but different credentials share a session, and a cache hit
//! never re-routes an existing session through a different gateway.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::client::RusshTransport;
use super::error::SshError;
use super::session::{NamedSession, RunOptions, SessionInfo};
use super::transport::{ExecOutput, Transport};
use crate::config::{
    ConfigError, ConnectionKey, GatewayPolicy, HostsFile, TargetSpec, JUMP_SERVER_SECTION,
};

/// Shared handle to a registered session
pub type Session<T> = Arc<NamedSession<<T as Transport>::Handle>>;

/// Upper bound when walking gateway links
const MAX_GATEWAY_DEPTH: usize = 64;

/// Connection registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connectivity error: {0}")]
    Connectivity(#[from] SshError),
}

pub struct ConnectionRegistry<T: Transport = RusshTransport> {
    hosts: HostsFile,

    transport: T,

    /// Live sessions by `host:port`
    connections: DashMap<ConnectionKey, Session<T>>,

    /// Serializes check-then-insert in `connect`
    connect_lock: Mutex<()>,

    /// Default gateway, established from `[jump_server]`
    gateway: RwLock<Option<Session<T>>>,

    /// One session per declared target, in file order
    targets: RwLock<Vec<Session<T>>>,
}

impl ConnectionRegistry<RusshTransport> {
    /// Load a hosts file and bootstrap over russh
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        Self::from_path(path, RusshTransport::new()).await
    }
}

impl<T: Transport> ConnectionRegistry<T> {
    /// Empty registry, no connections made
    pub fn new(hosts: HostsFile, transport: T) -> Self {
        Self {
            hosts,
            transport,
            connections: DashMap::new(),
            connect_lock: Mutex::new(()),
            gateway: RwLock::new(None),
            targets: RwLock::new(Vec::new()),
        }
    }

    /// Load a hosts file from disk and bootstrap
    pub async fn from_path(path: impl AsRef<Path>, transport: T) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        info!("Loading hosts from {}", path.display());
        let hosts = HostsFile::load(path).await?;
        Self::bootstrap(hosts, transport).await
    }

    /// Connect the gateway (best effort), then every target (fatal on error)
    ///
    /// Either every target is live or an error is returned and every
    /// session opened so far is closed again.
    pub async fn bootstrap(hosts: HostsFile, transport: T) -> Result<Self, RegistryError> {
        let registry = Self::new(hosts, transport);

        match registry.connect_jump_server().await {
            Ok(gateway) => {
                info!("Default jump server: {}", gateway.key());
                *registry.gateway.write() = Some(gateway);
            }
            Err(e) => {
                debug!("No default jump server configured: {}", e);
            }
        }

        let names: Vec<String> = registry
            .hosts
            .sections()
            .map(|s| s.name().to_string())
            .filter(|name| name != JUMP_SERVER_SECTION)
            .collect();

        let mut targets = Vec::with_capacity(names.len());
        for name in names {
            match registry.connect_target(&name).await {
                Ok(session) => {
                    info!("Connected target {} ({})", name, session.key());
                    targets.push(session);
                }
                Err(e) => {
                    warn!("Target {} failed, aborting bootstrap: {}", name, e);
                    registry.disconnect_all().await;
                    return Err(e);
                }
            }
        }

        *registry.targets.write() = targets;
        Ok(registry)
    }

    async fn connect_jump_server(&self) -> Result<Session<T>, RegistryError> {
        if !self.hosts.has_section(JUMP_SERVER_SECTION) {
            return Err(ConfigError::UnknownSection(JUMP_SERVER_SECTION.to_string()).into());
        }
        self.connect_target(JUMP_SERVER_SECTION).await
    }

    /// Connect or reuse a session
    ///
    /// `target` may be a section name, an inline table or a resolved
    /// descriptor. On a cache hit the existing session is returned and
    /// `gateway` is ignored.
    pub async fn connect(
        &self,
        target: impl Into<TargetSpec>,
        gateway: Option<&Session<T>>,
    ) -> Result<Session<T>, RegistryError> {
        let descriptor = self.hosts.resolve(target)?;
        let key = descriptor.connection_key();

        let _guard = self.connect_lock.lock().await;

        if let Some(existing) = self.connections.get(&key) {
            debug!("Reusing connection {}", key);
            return Ok(existing.value().clone());
        }

        info!(
            "Creating SSH connection {} -> {}@{}{}",
            descriptor.name.as_deref().unwrap_or("<inline>"),
            descriptor.user,
            key,
            gateway
                .map(|g| format!(" via {}", g.key()))
                .unwrap_or_default()
        );

        let session = Arc::new(
            NamedSession::establish(
                &self.transport,
                &descriptor,
                gateway.map(|g| &**g),
                descriptor.name.clone(),
            )
            .await?,
        );

        self.connections.insert(key, session.clone());
        Ok(session)
    }

    /// Connect a section, honoring its `gateway` key
    ///
    /// Gateways named by `gateway = <section>` are connected first,
    /// recursively, so chains of any depth work.
    pub async fn connect_target(&self, name: &str) -> Result<Session<T>, RegistryError> {
        self.connect_chain(name, &mut Vec::new()).await
    }

    async fn connect_chain(
        &self,
        name: &str,
        visiting: &mut Vec<String>,
    ) -> Result<Session<T>, RegistryError> {
        if visiting.iter().any(|n| n == name) {
            visiting.push(name.to_string());
            return Err(ConfigError::GatewayCycle(visiting.join(" -> ")).into());
        }

        let descriptor = self.hosts.resolve(name)?;
        if let Some(existing) = self.get(&descriptor.connection_key()) {
            return Ok(existing);
        }

        visiting.push(name.to_string());
        let gateway = match &descriptor.gateway {
            GatewayPolicy::Inherit if name == JUMP_SERVER_SECTION => None,
            GatewayPolicy::Inherit => self.gateway(),
            GatewayPolicy::Direct => None,
            // `[DEFAULT] gateway = x` also reaches `[x]` itself
            GatewayPolicy::Via(next) if next == name => None,
            GatewayPolicy::Via(next) => Some(Box::pin(self.connect_chain(next, visiting)).await?),
        };
        visiting.pop();

        self.connect(descriptor, gateway.as_ref()).await
    }

    /// Session for the target named by `[DEFAULT] target`
    ///
    /// Routed like any other section: through the registry gateway unless
    /// the section sets its own `gateway`.
    pub async fn get_default_connection(&self) -> Result<Session<T>, RegistryError> {
        let name = self
            .hosts
            .default_target()
            .ok_or(ConfigError::MissingDefaultTarget)?
            .to_string();
        self.connect_target(&name).await
    }

    /// Forget and close a session
    ///
    /// Every cache entry holding this exact session is removed. Close
    /// errors are swallowed. Sessions tunneled through it are left alone.
    pub async fn drop_connection(&self, session: &Session<T>) {
        let before = self.connections.len();
        self.connections.retain(|_, v| !Arc::ptr_eq(v, session));
        let removed = before - self.connections.len();

        {
            let mut gateway = self.gateway.write();
            if gateway.as_ref().is_some_and(|g| Arc::ptr_eq(g, session)) {
                *gateway = None;
            }
        }

        let dependents = self
            .connections
            .iter()
            .filter(|e| e.value().gateway_key() == Some(session.key()))
            .count();
        if dependents > 0 {
            warn!(
                "Dropping {} while {} session(s) still tunnel through it",
                session.key(),
                dependents
            );
        }

        if let Err(e) = session.close().await {
            debug!("Ignoring close error for {}: {}", session.key(), e);
        }

        info!(
            "Connection {} dropped ({} cache entr{} removed)",
            session.key(),
            removed,
            if removed == 1 { "y" } else { "ies" }
        );
    }

    /// Close everything, most deeply tunneled sessions first
    pub async fn disconnect_all(&self) {
        let mut unique: Vec<Session<T>> = Vec::new();
        for entry in self.connections.iter() {
            if !unique.iter().any(|s| Arc::ptr_eq(s, entry.value())) {
                unique.push(entry.value().clone());
            }
        }
        let mut sessions: Vec<(usize, Session<T>)> =
            unique.into_iter().map(|s| (self.depth(&s), s)).collect();
        sessions.sort_by(|a, b| b.0.cmp(&a.0));

        info!("Disconnecting {} SSH connection(s)", sessions.len());

        self.connections.clear();
        self.targets.write().clear();
        *self.gateway.write() = None;

        for (_, session) in sessions {
            if let Err(e) = session.close().await {
                debug!("Ignoring close error for {}: {}", session.key(), e);
            }
        }
    }

    /// Number of gateway hops between us and `session`
    fn depth(&self, session: &Session<T>) -> usize {
        let mut depth = 0;
        let mut current = session.gateway_key().cloned();
        while let Some(key) = current {
            depth += 1;
            if depth >= MAX_GATEWAY_DEPTH {
                break;
            }
            current = self
                .connections
                .get(&key)
                .and_then(|e| e.value().gateway_key().cloned());
        }
        depth
    }

    /// Run a command on every target in order, stopping at the first error
    pub async fn run_all(
        &self,
        command: &str,
        options: &RunOptions,
    ) -> Result<Vec<(Session<T>, ExecOutput)>, SshError> {
        let targets = self.targets();
        let mut results = Vec::with_capacity(targets.len());
        for session in targets {
            let output = session.run(command, options).await?;
            results.push((session, output));
        }
        Ok(results)
    }

    pub fn hosts(&self) -> &HostsFile {
        &self.hosts
    }

    pub fn gateway(&self) -> Option<Session<T>> {
        self.gateway.read().clone()
    }

    pub fn targets(&self) -> Vec<Session<T>> {
        self.targets.read().clone()
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<Session<T>> {
        self.connections.get(key).map(|e| e.value().clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of every cached session, sorted by key
    pub fn list_connections(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> =
            self.connections.iter().map(|e| e.value().info()).collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }
}
