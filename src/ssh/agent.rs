//! ssh-agent fallback
//!
//! Targets that declare neither `key` nor `password` authenticate with
//! whatever identities the local agent holds.

use std::future::Future;

use russh::client::Handle;
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::ssh_key::{HashAlg, PublicKey};
use russh::{AgentAuthError, CryptoVec, Signer};
use tracing::{debug, info};

use super::client::{rejected, ClientHandler};
use super::error::SshError;
use crate::config::TargetDescriptor;

type Agent = AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>;

/// Lets russh ask the agent to sign the auth challenge
struct AgentSignature<'a>(&'a mut Agent);

impl Signer for AgentSignature<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &PublicKey,
        hash_alg: Option<HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = Result<CryptoVec, Self::Error>> + Send {
        // Owned copy so the future does not borrow the caller's key
        let key = key.clone();
        async move {
            self.0
                .sign_request(&key, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

#[cfg(unix)]
async fn open_agent() -> Result<Agent, SshError> {
    AgentClient::connect_env()
        .await
        .map(AgentClient::dynamic)
        .map_err(|e| SshError::AgentNotAvailable(format!("SSH_AUTH_SOCK: {}", e)))
}

#[cfg(windows)]
async fn open_agent() -> Result<Agent, SshError> {
    AgentClient::connect_named_pipe(r"\\.\pipe\openssh-ssh-agent")
        .await
        .map(AgentClient::dynamic)
        .map_err(|e| SshError::AgentNotAvailable(format!("openssh-ssh-agent pipe: {}", e)))
}

#[cfg(not(any(unix, windows)))]
async fn open_agent() -> Result<Agent, SshError> {
    Err(SshError::AgentNotAvailable(
        "no agent transport on this platform".to_string(),
    ))
}

/// Offer every agent identity for `target.user` until one is accepted
pub(crate) async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    target: &TargetDescriptor,
) -> Result<(), SshError> {
    let mut agent = open_agent().await?;
    let identities = agent
        .request_identities()
        .await
        .map_err(|e| SshError::AgentError(e.to_string()))?;

    if identities.is_empty() {
        return Err(SshError::AgentError(format!(
            "agent holds no identities for {}@{}",
            target.user,
            target.connection_key()
        )));
    }

    debug!(
        "Offering {} agent identities for {}@{}",
        identities.len(),
        target.user,
        target.connection_key()
    );

    for identity in identities {
        let comment = identity.comment().to_string();
        let result = handle
            .authenticate_publickey_with(
                &target.user,
                identity,
                None,
                &mut AgentSignature(&mut agent),
            )
            .await
            .map_err(|e| SshError::AgentError(e.to_string()))?;
        if result.success() {
            info!("Authenticated with agent identity {}", comment);
            return Ok(());
        }
        debug!("Agent identity {} rejected", comment);
    }

    Err(rejected(target))
}

/// Whether an agent endpoint is advertised; connecting may still fail
pub fn is_agent_available() -> bool {
    if cfg!(unix) {
        std::env::var_os("SSH_AUTH_SOCK").is_some()
    } else {
        cfg!(windows)
    }
}
