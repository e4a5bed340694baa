//! SSH transport implementation using russh
//!
//! Direct connections go over TCP. Tunneled connections open a
//! `direct-tcpip` channel on the gateway and run SSH over it:
//!
//! ```text
//! Client --SSH--> [Gateway] --direct-tcpip--> [Target]
//! ```
//!
//! Gateways may themselves be tunneled, so chains nest naturally.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::agent;
use super::error::SshError;
use super::handle_owner::{spawn_handle_owner_task, HandleController};
use super::transport::Transport;
use crate::config::TargetDescriptor;

/// Keepalive interval for every connection
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Disconnect after this many missed keepalives
const KEEPALIVE_MAX: usize = 3;

/// Production [`Transport`] backed by russh
#[derive(Debug, Clone)]
pub struct RusshTransport {
    keepalive_interval: Duration,
    keepalive_max: usize,
}

impl Default for RusshTransport {
    fn default() -> Self {
        Self {
            keepalive_interval: KEEPALIVE_INTERVAL,
            keepalive_max: KEEPALIVE_MAX,
        }
    }
}

impl RusshTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_config(&self) -> Arc<client::Config> {
        Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(self.keepalive_interval),
            keepalive_max: self.keepalive_max,
            ..Default::default()
        })
    }

    async fn connect_direct(
        &self,
        target: &TargetDescriptor,
        handler: ClientHandler,
    ) -> Result<Handle<ClientHandler>, SshError> {
        let addr = target.connection_key();
        let socket_addr = tokio::net::lookup_host((target.host.as_str(), target.port))
            .await
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed(format!("No address found for {}", addr)))?;

        info!("Connecting to SSH server at {}", addr);

        tokio::time::timeout(
            Duration::from_secs(target.timeout_secs),
            client::connect(self.client_config(), socket_addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(format!("Connection to {} timed out", addr)))?
        .map_err(connect_error)
    }

    async fn connect_tunneled(
        &self,
        target: &TargetDescriptor,
        gateway: &HandleController,
        handler: ClientHandler,
    ) -> Result<Handle<ClientHandler>, SshError> {
        info!(
            "Connecting to {}:{} through gateway tunnel",
            target.host, target.port
        );

        let channel = gateway
            .open_direct_tcpip(&target.host, target.port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| {
                SshError::ConnectionFailed(format!("Failed to open direct-tcpip channel: {}", e))
            })?;

        debug!(
            "Direct-tcpip channel opened to {}:{}",
            target.host, target.port
        );

        tokio::time::timeout(
            Duration::from_secs(target.timeout_secs),
            client::connect_stream(self.client_config(), channel.into_stream(), handler),
        )
        .await
        .map_err(|_| {
            SshError::Timeout(format!(
                "Connection to {}:{} via tunnel timed out",
                target.host, target.port
            ))
        })?
        .map_err(connect_error)
    }
}

/// Host key failures stay distinguishable, everything else is a connect failure
fn connect_error(err: SshError) -> SshError {
    match err {
        SshError::HostKeyMismatch(_) => err,
        other => SshError::ConnectionFailed(other.to_string()),
    }
}

#[async_trait]
impl Transport for RusshTransport {
    type Handle = HandleController;

    async fn establish(
        &self,
        target: &TargetDescriptor,
        gateway: Option<&HandleController>,
    ) -> Result<HandleController, SshError> {
        let handler = ClientHandler::new(
            target.host.clone(),
            target.port,
            target.strict_host_key_checking,
        );

        let mut handle = match gateway {
            Some(gateway) => self.connect_tunneled(target, gateway, handler).await?,
            None => self.connect_direct(target, handler).await?,
        };

        debug!("SSH handshake completed");

        authenticate(&mut handle, target).await?;

        info!(
            "SSH authentication successful for {}@{}:{}",
            target.user, target.host, target.port
        );

        Ok(spawn_handle_owner_task(
            handle,
            target.connection_key().to_string(),
        ))
    }
}

/// One way of proving identity to the server
enum AuthMethod {
    PublicKey {
        path: String,
        key: PrivateKeyWithHashAlg,
    },
    Password(String),
    Agent,
}

/// Credentials to try, in order: private key, then password
///
/// The system agent is used only when neither is configured. A key that
/// cannot be loaded is skipped when a password can take over.
fn auth_methods(target: &TargetDescriptor) -> Result<Vec<AuthMethod>, SshError> {
    let mut methods = Vec::new();

    if let Some(path) = &target.key_path {
        match russh::keys::load_secret_key(path, target.passphrase.as_deref()) {
            Ok(key) => methods.push(AuthMethod::PublicKey {
                path: path.clone(),
                key: PrivateKeyWithHashAlg::new(Arc::new(key), None),
            }),
            Err(e) if target.password.is_some() => {
                debug!("Cannot load key {} ({}), falling back to password", path, e);
            }
            Err(e) => return Err(SshError::KeyError(format!("{}: {}", path, e))),
        }
    }

    if let Some(password) = &target.password {
        methods.push(AuthMethod::Password(password.clone()));
    }

    if target.key_path.is_none() && target.password.is_none() {
        methods.push(AuthMethod::Agent);
    }

    Ok(methods)
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    target: &TargetDescriptor,
) -> Result<(), SshError> {
    for method in auth_methods(target)? {
        match method {
            AuthMethod::PublicKey { path, key } => {
                info!("Authenticating with key: {}", path);
                let result = handle
                    .authenticate_publickey(&target.user, key)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;
                if result.success() {
                    return Ok(());
                }
                debug!("Key {} rejected by server", path);
            }
            AuthMethod::Password(password) => {
                info!("Authenticating with password");
                let result = handle
                    .authenticate_password(&target.user, password)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;
                if result.success() {
                    return Ok(());
                }
                debug!("Password rejected by server");
            }
            AuthMethod::Agent => return agent::authenticate(handle, target).await,
        }
    }

    Err(rejected(target))
}

/// The server turned down every credential we had
pub(crate) fn rejected(target: &TargetDescriptor) -> SshError {
    SshError::AuthenticationFailed(format!(
        "Authentication to {}@{}:{} rejected by server",
        target.user, target.host, target.port
    ))
}

/// Client handler for russh callbacks
///
/// Verifies the server key against ~/.ssh/known_hosts:
/// - known and matching: accept
/// - changed: always reject
/// - unknown: accept unless `strict`
pub struct ClientHandler {
    host: String,
    port: u16,
    strict: bool,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, strict: bool) -> Self {
        Self { host, port, strict }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match russh::keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            Ok(false) if self.strict => {
                warn!(
                    "Unknown host key for {}:{}. Strict mode enabled, rejecting.",
                    self.host, self.port
                );
                Err(SshError::HostKeyMismatch(format!(
                    "unknown host {}:{}. Add it to known_hosts or disable strict_host_key_checking.",
                    self.host, self.port
                )))
            }
            Ok(false) => {
                info!(
                    "New host {}:{}, accepting for this session",
                    self.host, self.port
                );
                Ok(true)
            }
            Err(russh::keys::Error::KeyChanged { line }) => {
                warn!(
                    "HOST KEY CHANGED for {}:{} (known_hosts line {})! POSSIBLE MITM ATTACK!",
                    self.host, self.port, line
                );
                Err(SshError::HostKeyMismatch(format!(
                    "key for {}:{} has changed (known_hosts line {}). \
                     If the change is legitimate, remove the old key from ~/.ssh/known_hosts",
                    self.host, self.port, line
                )))
            }
            Err(e) => {
                // Unreadable known_hosts behaves like an unknown host
                debug!("known_hosts check failed for {}: {}", self.host, e);
                if self.strict {
                    Err(SshError::HostKeyMismatch(format!(
                        "cannot verify {}:{}: {}",
                        self.host, self.port, e
                    )))
                } else {
                    Ok(true)
                }
            }
        }
    }
}
