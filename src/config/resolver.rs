//! Target Resolution
//!
//! Turns a section name (or an inline table) into the connection
//! parameters needed to open a session.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::hosts_file::{HostsFile, Section};

/// Section whose `target` key names the default target
pub const DEFAULT_TARGET_KEY: &str = "target";

/// Section name reserved for the default jump server
pub const JUMP_SERVER_SECTION: &str = "jump_server";

fn default_timeout() -> u64 {
    30
}

/// Expand ~ to home directory
/// russh::keys does not understand tilde paths
pub fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped).to_string_lossy().into_owned();
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

/// Cache identity of a session: `"<host>:<port>"`
///
/// Credentials are deliberately not part of the key, two targets with the
/// same address share one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    pub fn new(host: &str, port: u16) -> Self {
        Self(format!("{}:{}", host, port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a target reaches the network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "section", rename_all = "snake_case")]
pub enum GatewayPolicy {
    /// Use whatever gateway the registry was bootstrapped with
    #[default]
    Inherit,
    /// Connect without a gateway
    Direct,
    /// Tunnel through the named section
    Via(String),
}

impl GatewayPolicy {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None => GatewayPolicy::Inherit,
            Some(v) if v.is_empty() => GatewayPolicy::Direct,
            Some(v) if v.eq_ignore_ascii_case("none") || v.eq_ignore_ascii_case("direct") => {
                GatewayPolicy::Direct
            }
            Some(v) => GatewayPolicy::Via(v.to_string()),
        }
    }
}

/// Fully resolved connection parameters for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Section this descriptor came from (None for inline tables)
    #[serde(default)]
    pub name: Option<String>,

    pub host: String,

    pub port: u16,

    pub user: String,

    /// Private key path, tilde already expanded
    #[serde(default)]
    pub key_path: Option<String>,

    #[serde(default)]
    pub passphrase: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub gateway: GatewayPolicy,

    /// Connection timeout passed through to the transport
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Reject hosts missing from known_hosts
    #[serde(default)]
    pub strict_host_key_checking: bool,
}

impl TargetDescriptor {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            name: None,
            host: host.into(),
            port,
            user: user.into(),
            key_path: None,
            passphrase: None,
            password: None,
            gateway: GatewayPolicy::Inherit,
            timeout_secs: default_timeout(),
            strict_host_key_checking: false,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_key(mut self, key_path: impl Into<String>, passphrase: Option<String>) -> Self {
        self.key_path = Some(key_path.into());
        self.passphrase = passphrase;
        self
    }

    pub fn connection_key(&self) -> ConnectionKey {
        ConnectionKey::new(&self.host, self.port)
    }
}

/// Anything `resolve` accepts
#[derive(Debug, Clone)]
pub enum TargetSpec {
    /// A section name in the hosts file
    Named(String),
    /// A table of fields, `[DEFAULT]` still applies as fallback
    Inline(Section),
    /// Already resolved, passed through untouched
    Resolved(TargetDescriptor),
}

impl From<&str> for TargetSpec {
    fn from(name: &str) -> Self {
        TargetSpec::Named(name.to_string())
    }
}

impl From<String> for TargetSpec {
    fn from(name: String) -> Self {
        TargetSpec::Named(name)
    }
}

impl From<&String> for TargetSpec {
    fn from(name: &String) -> Self {
        TargetSpec::Named(name.clone())
    }
}

impl From<Section> for TargetSpec {
    fn from(section: Section) -> Self {
        TargetSpec::Inline(section)
    }
}

impl From<TargetDescriptor> for TargetSpec {
    fn from(descriptor: TargetDescriptor) -> Self {
        TargetSpec::Resolved(descriptor)
    }
}

impl HostsFile {
    /// Resolve a section name or inline table into a [`TargetDescriptor`]
    pub fn resolve(&self, target: impl Into<TargetSpec>) -> Result<TargetDescriptor, ConfigError> {
        match target.into() {
            TargetSpec::Named(name) => {
                let section = self
                    .section(&name)
                    .ok_or_else(|| ConfigError::UnknownSection(name.clone()))?;
                self.describe(section, Some(name.clone()))
            }
            TargetSpec::Inline(section) => self.describe(&section, None),
            TargetSpec::Resolved(descriptor) => Ok(descriptor),
        }
    }

    /// Resolve the section named by `[DEFAULT] target`
    pub fn resolve_default(&self) -> Result<TargetDescriptor, ConfigError> {
        let target = self
            .default_target()
            .ok_or(ConfigError::MissingDefaultTarget)?;
        self.resolve(target)
    }

    /// Name of the default target, if declared
    pub fn default_target(&self) -> Option<&str> {
        self.defaults()
            .get(DEFAULT_TARGET_KEY)
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    fn describe(
        &self,
        section: &Section,
        name: Option<String>,
    ) -> Result<TargetDescriptor, ConfigError> {
        let label = if section.name().is_empty() {
            "<inline>".to_string()
        } else {
            section.name().to_string()
        };

        // Empty values count as absent
        let optional = |key: &str| {
            self.lookup(section, key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let required = |key: &str| {
            optional(key).ok_or_else(|| ConfigError::MissingField {
                section: label.clone(),
                field: key.to_string(),
            })
        };
        let invalid = |field: &str, value: &str| ConfigError::InvalidValue {
            section: label.clone(),
            field: field.to_string(),
            value: value.to_string(),
        };

        let host = required("host")?;
        let port_str = required("port")?;
        let port: u16 = port_str
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid("port", &port_str))?;
        let user = required("user")?;

        let timeout_secs = match optional("timeout") {
            Some(t) => t
                .parse::<u64>()
                .ok()
                .filter(|t| *t > 0)
                .ok_or_else(|| invalid("timeout", &t))?,
            None => default_timeout(),
        };

        let strict_host_key_checking = match optional("strict_host_key_checking") {
            Some(v) => parse_bool(&v).ok_or_else(|| invalid("strict_host_key_checking", &v))?,
            None => false,
        };

        Ok(TargetDescriptor {
            name,
            host,
            port,
            user,
            key_path: optional("key").map(|k| expand_tilde(&k)),
            passphrase: optional("passphrase"),
            password: optional("password"),
            gateway: GatewayPolicy::parse(self.lookup(section, "gateway")),
            timeout_secs,
            strict_host_key_checking,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOSTS: &str = r#"
[DEFAULT]
target = web1

[jump_server]
host = bastion
port = 22
user = ops

[web1]
host = 10.0.0.5
port = 22
user = ops
key = /keys/id_ed25519
passphrase = hunter2

[db1]
host = 10.0.1.5
port = 5432
user = dba
password = secret
gateway = none
timeout = 5
strict_host_key_checking = yes
"#;

    fn hosts() -> HostsFile {
        HostsFile::parse(HOSTS).unwrap()
    }

    #[test]
    fn test_resolve_named_section() {
        let d = hosts().resolve("web1").unwrap();
        assert_eq!(d.name.as_deref(), Some("web1"));
        assert_eq!(d.host, "10.0.0.5");
        assert_eq!(d.port, 22);
        assert_eq!(d.user, "ops");
        assert_eq!(d.key_path.as_deref(), Some("/keys/id_ed25519"));
        assert_eq!(d.passphrase.as_deref(), Some("hunter2"));
        assert_eq!(d.password, None);
        assert_eq!(d.gateway, GatewayPolicy::Inherit);
        assert_eq!(d.timeout_secs, 30);
        assert!(!d.strict_host_key_checking);
    }

    #[test]
    fn test_resolve_optional_keys() {
        let d = hosts().resolve("db1").unwrap();
        assert_eq!(d.password.as_deref(), Some("secret"));
        assert_eq!(d.key_path, None);
        assert_eq!(d.gateway, GatewayPolicy::Direct);
        assert_eq!(d.timeout_secs, 5);
        assert!(d.strict_host_key_checking);
    }

    #[test]
    fn test_resolve_inline_table() {
        let table = Section::new("adhoc")
            .with("host", "10.9.9.9")
            .with("port", "2222")
            .with("user", "root")
            .with("gateway", "jump_server");
        let d = hosts().resolve(table).unwrap();
        assert_eq!(d.name, None);
        assert_eq!(d.connection_key().as_str(), "10.9.9.9:2222");
        assert_eq!(d.gateway, GatewayPolicy::Via("jump_server".to_string()));
    }

    #[test]
    fn test_inline_table_uses_default_fallback() {
        let file = HostsFile::parse("[DEFAULT]\nuser = ops\nport = 22\n").unwrap();
        let d = file.resolve(Section::default().with("host", "h")).unwrap();
        assert_eq!(d.user, "ops");
        assert_eq!(d.port, 22);
    }

    #[test]
    fn test_resolved_descriptor_passes_through() {
        let d = TargetDescriptor::new("h", 22, "u").with_password("p");
        assert_eq!(hosts().resolve(d.clone()).unwrap(), d);
    }

    #[test]
    fn test_resolve_default() {
        let d = hosts().resolve_default().unwrap();
        assert_eq!(d.name.as_deref(), Some("web1"));
        assert_eq!(d.host, "10.0.0.5");
    }

    #[test]
    fn test_resolve_default_missing_pointer() {
        let file = HostsFile::parse("[web1]\nhost = h\nport = 22\nuser = u\n").unwrap();
        assert!(matches!(
            file.resolve_default(),
            Err(ConfigError::MissingDefaultTarget)
        ));
    }

    #[test]
    fn test_resolve_default_dangling_pointer() {
        let file = HostsFile::parse("[DEFAULT]\ntarget = gone\n").unwrap();
        match file.resolve_default() {
            Err(ConfigError::UnknownSection(name)) => assert_eq!(name, "gone"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_section() {
        assert!(matches!(
            hosts().resolve("nope"),
            Err(ConfigError::UnknownSection(_))
        ));
    }

    #[test]
    fn test_missing_required_field() {
        let file = HostsFile::parse("[web]\nhost = h\nport = 22\n").unwrap();
        match file.resolve("web") {
            Err(ConfigError::MissingField { section, field }) => {
                assert_eq!(section, "web");
                assert_eq!(field, "user");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_empty_required_field_is_missing() {
        let file = HostsFile::parse("[web]\nhost =\nport = 22\nuser = u\n").unwrap();
        assert!(matches!(
            file.resolve("web"),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_invalid_port() {
        for port in ["ssh", "70000", "0", "-1"] {
            let content = format!("[web]\nhost = h\nport = {}\nuser = u\n", port);
            let file = HostsFile::parse(&content).unwrap();
            assert!(
                matches!(file.resolve("web"), Err(ConfigError::InvalidValue { .. })),
                "port {} should be rejected",
                port
            );
        }
    }

    #[test]
    fn test_invalid_strict_flag() {
        let file = HostsFile::parse(
            "[web]\nhost = h\nport = 22\nuser = u\nstrict_host_key_checking = maybe\n",
        )
        .unwrap();
        assert!(matches!(
            file.resolve("web"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_gateway_policy_parse() {
        assert_eq!(GatewayPolicy::parse(None), GatewayPolicy::Inherit);
        assert_eq!(GatewayPolicy::parse(Some("")), GatewayPolicy::Direct);
        assert_eq!(GatewayPolicy::parse(Some("None")), GatewayPolicy::Direct);
        assert_eq!(GatewayPolicy::parse(Some("direct")), GatewayPolicy::Direct);
        assert_eq!(
            GatewayPolicy::parse(Some(" bastion ")),
            GatewayPolicy::Via("bastion".to_string())
        );
    }

    #[test]
    fn test_connection_key_ignores_credentials() {
        let a = TargetDescriptor::new("10.0.0.5", 22, "ops").with_password("a");
        let b = TargetDescriptor::new("10.0.0.5", 22, "root").with_key("/k", None);
        assert_eq!(a.connection_key(), b.connection_key());
        assert_eq!(a.connection_key().to_string(), "10.0.0.5:22");
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/key"), "/abs/key");
        if let Some(home) = dirs::home_dir() {
            let expanded = expand_tilde("~/.ssh/id_rsa");
            assert!(expanded.starts_with(&*home.to_string_lossy()));
            assert!(expanded.ends_with("id_rsa"));
        }
    }
}
