//! Hosts File Parser
//!
//! Parses the section-based hosts file that declares remote targets.
//! The format follows the familiar INI conventions:
//! - `[section]` headers, `key = value` or `key: value` pairs
//! - `#` and `;` full-line comments
//! - Indented lines continue the previous value
//! - Keys are case-insensitive, section names are not
//! - Values in `[DEFAULT]` act as fallbacks for every other section
//!
//! ```text
//! [DEFAULT]
//! target = web1
//! user = ops
//!
//! [jump_server]
//! host = bastion.example.com
//! port = 22
//!
//! [web1]
//! host = 10.0.0.5
//! port = 22
//! key = ~/.ssh/id_ed25519
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use super::error::ConfigError;

/// Name of the fallback section
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// A named table of key/value pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    name: String,
    values: BTreeMap<String, String>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style insert, handy for inline tables
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_lowercase(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a key in this section only
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(&key.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parsed hosts file
#[derive(Debug, Clone, Default)]
pub struct HostsFile {
    defaults: Section,
    /// Sections in file order, `DEFAULT` excluded
    sections: Vec<Section>,
}

/// Where key/value lines currently land
enum Cursor {
    Nowhere,
    Defaults,
    Section(usize),
}

impl HostsFile {
    /// Load and parse a hosts file from disk
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).await?;
        Self::parse(&content)
    }

    /// Parse hosts file content
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut file = HostsFile {
            defaults: Section::new(DEFAULT_SECTION),
            sections: Vec::new(),
        };
        let mut cursor = Cursor::Nowhere;
        let mut last_key: Option<String> = None;

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();

            if line.is_empty() {
                last_key = None;
                continue;
            }
            if line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            // Continuation of the previous value
            if raw.starts_with(char::is_whitespace) {
                if let Some(ref key) = last_key {
                    if let Some(section) = file.section_at_mut(&cursor) {
                        if let Some(value) = section.values.get_mut(key) {
                            if !value.is_empty() {
                                value.push('\n');
                            }
                            value.push_str(line);
                            continue;
                        }
                    }
                }
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .ok_or_else(|| ConfigError::Parse {
                        line: line_no,
                        message: format!("unterminated section header: {}", line),
                    })?
                    .trim();

                if name.is_empty() {
                    return Err(ConfigError::Parse {
                        line: line_no,
                        message: "empty section name".to_string(),
                    });
                }

                last_key = None;
                if name == DEFAULT_SECTION {
                    cursor = Cursor::Defaults;
                    continue;
                }
                if file.section(name).is_some() {
                    return Err(ConfigError::Parse {
                        line: line_no,
                        message: format!("duplicate section [{}]", name),
                    });
                }
                file.sections.push(Section::new(name));
                cursor = Cursor::Section(file.sections.len() - 1);
                continue;
            }

            // "key = value" or "key: value", whichever delimiter comes first
            let delim = line.find(|c: char| c == '=' || c == ':').ok_or_else(|| ConfigError::Parse {
                line: line_no,
                message: format!("expected 'key = value', got: {}", line),
            })?;
            let key = line[..delim].trim().to_lowercase();
            let value = line[delim + 1..].trim().to_string();

            if key.is_empty() {
                return Err(ConfigError::Parse {
                    line: line_no,
                    message: "empty key".to_string(),
                });
            }

            let section = file
                .section_at_mut(&cursor)
                .ok_or_else(|| ConfigError::Parse {
                    line: line_no,
                    message: format!("'{}' appears before any section header", key),
                })?;

            if section.values.contains_key(&key) {
                return Err(ConfigError::Parse {
                    line: line_no,
                    message: format!("duplicate key '{}' in [{}]", key, section.name),
                });
            }
            section.values.insert(key.clone(), value);
            last_key = Some(key);
        }

        Ok(file)
    }

    fn section_at_mut(&mut self, cursor: &Cursor) -> Option<&mut Section> {
        match cursor {
            Cursor::Nowhere => None,
            Cursor::Defaults => Some(&mut self.defaults),
            Cursor::Section(i) => self.sections.get_mut(*i),
        }
    }

    /// The `[DEFAULT]` section (empty if the file has none)
    pub fn defaults(&self) -> &Section {
        &self.defaults
    }

    /// All non-default sections, in file order
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn section_names(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.name.clone()).collect()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// Look up a key in `section`, falling back to `[DEFAULT]`
    pub fn lookup<'a>(&'a self, section: &'a Section, key: &str) -> Option<&'a str> {
        section.get(key).or_else(|| self.defaults.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let content = r#"
# Comment
[DEFAULT]
target = web1

[web1]
host = 10.0.0.5
port = 22
user = ops

; another comment
[db1]
host: 10.0.1.5
port: 5432
user: dba
"#;

        let file = HostsFile::parse(content).unwrap();
        assert_eq!(file.section_names(), vec!["web1", "db1"]);
        assert_eq!(file.defaults().get("target"), Some("web1"));

        let web1 = file.section("web1").unwrap();
        assert_eq!(web1.get("host"), Some("10.0.0.5"));
        assert_eq!(web1.get("port"), Some("22"));

        let db1 = file.section("db1").unwrap();
        assert_eq!(db1.get("host"), Some("10.0.1.5"));
        assert_eq!(db1.get("user"), Some("dba"));
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let file = HostsFile::parse("[web]\nHost = a\nUSER = b\n").unwrap();
        let web = file.section("web").unwrap();
        assert_eq!(web.get("host"), Some("a"));
        assert_eq!(web.get("User"), Some("b"));
    }

    #[test]
    fn test_section_names_are_case_sensitive() {
        let file = HostsFile::parse("[Web]\nhost = a\n[web]\nhost = b\n").unwrap();
        assert_eq!(file.section_names(), vec!["Web", "web"]);
    }

    #[test]
    fn test_default_fallback() {
        let content = r#"
[DEFAULT]
user = ops

[web1]
host = 10.0.0.5

[web2]
host = 10.0.0.6
user = root
"#;
        let file = HostsFile::parse(content).unwrap();
        let web1 = file.section("web1").unwrap();
        let web2 = file.section("web2").unwrap();
        assert_eq!(file.lookup(web1, "user"), Some("ops"));
        assert_eq!(file.lookup(web2, "user"), Some("root"));
        assert_eq!(file.lookup(web1, "password"), None);
    }

    #[test]
    fn test_continuation_lines() {
        let content = "[web]\nbanner = first\n  second\n\tthird\nhost = h\n";
        let file = HostsFile::parse(content).unwrap();
        let web = file.section("web").unwrap();
        assert_eq!(web.get("banner"), Some("first\nsecond\nthird"));
        assert_eq!(web.get("host"), Some("h"));
    }

    #[test]
    fn test_value_may_contain_delimiters() {
        let file = HostsFile::parse("[web]\npassword = a=b:c\n").unwrap();
        assert_eq!(file.section("web").unwrap().get("password"), Some("a=b:c"));
    }

    #[test]
    fn test_duplicate_section_rejected() {
        let err = HostsFile::parse("[a]\nhost = x\n[a]\nhost = y\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = HostsFile::parse("[a]\nhost = x\nHOST = y\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_key_before_section_rejected() {
        let err = HostsFile::parse("host = x\n[a]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_malformed_lines_rejected() {
        assert!(matches!(
            HostsFile::parse("[a\nhost = x\n").unwrap_err(),
            ConfigError::Parse { line: 1, .. }
        ));
        assert!(matches!(
            HostsFile::parse("[a]\njust words\n").unwrap_err(),
            ConfigError::Parse { line: 2, .. }
        ));
        assert!(matches!(
            HostsFile::parse("[ ]\n").unwrap_err(),
            ConfigError::Parse { line: 1, .. }
        ));
    }

    #[test]
    fn test_empty_content() {
        let file = HostsFile::parse("").unwrap();
        assert_eq!(file.sections().count(), 0);
        assert!(file.defaults().is_empty());
    }

    #[tokio::test]
    async fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.ini");
        std::fs::write(&path, "[web1]\nhost = 10.0.0.5\nport = 22\nuser = ops\n").unwrap();

        let file = HostsFile::load(&path).await.unwrap();
        assert!(file.has_section("web1"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = HostsFile::load(dir.path().join("nope.ini")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
