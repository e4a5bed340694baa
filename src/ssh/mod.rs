//! SSH module - connections, sessions and the connection registry
//!
//! This module provides the core SSH functionality using russh library.
//!
//! # Features
//! - Direct and gateway-tunneled (`direct-tcpip`) connections
//! - Key, password and SSH agent authentication
//! - Host key verification via ~/.ssh/known_hosts
//! - Keyed session cache built from a hosts file (see `connection_registry`)

mod agent;
mod client;
pub mod connection_registry;
mod error;
mod handle_owner;
#[cfg(test)]
mod mock;
mod session;
mod transport;

pub use agent::is_agent_available;
pub use client::{ClientHandler, RusshTransport};
pub use connection_registry::{ConnectionRegistry, RegistryError, Session};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use session::{
    format_command_trace, Hide, NamedSession, RunOptions, SessionInfo,
    DEFAULT_COMMAND_TIMEOUT_SECS,
};
pub use transport::{ExecOutput, RemoteHandle, Transport};
