//! Configuration Module
//!
//! Loads the hosts file and resolves targets into connection parameters.

pub mod error;
pub mod hosts_file;
pub mod resolver;
pub mod storage;

pub use error::ConfigError;
pub use hosts_file::{HostsFile, Section, DEFAULT_SECTION};
pub use resolver::{
    expand_tilde, ConnectionKey, GatewayPolicy, TargetDescriptor, TargetSpec,
    DEFAULT_TARGET_KEY, JUMP_SERVER_SECTION,
};
pub use storage::{config_dir, hosts_file, HOSTS_FILE_ENV};
