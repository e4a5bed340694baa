//! hostpool - named SSH sessions from a hosts file
//!
//! Reads an INI hosts file, connects an optional `[jump_server]` gateway,
//! then keeps one live session per declared target. Sessions are cached by
//! `host:port` and reused on every later request.

pub mod config;
pub mod ssh;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{ConfigError, ConnectionKey, HostsFile, TargetDescriptor, TargetSpec};
pub use ssh::{
    ConnectionRegistry, ExecOutput, Hide, NamedSession, RegistryError, RunOptions,
    RusshTransport, SessionInfo, SshError,
};

/// Initialize logging
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` when verbose.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
