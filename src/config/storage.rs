//! Configuration Storage
//!
//! Default locations for the hosts file.
//! Config location: ~/.hostpool on macOS/Linux, %APPDATA%\hostpool on Windows

use std::path::PathBuf;

use super::error::ConfigError;

/// Environment variable overriding the hosts file location
pub const HOSTS_FILE_ENV: &str = "HOSTPOOL_HOSTS";

/// Get the hostpool configuration directory
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("hostpool"));
        }
        dirs::home_dir()
            .map(|home| home.join(".hostpool"))
            .ok_or(ConfigError::NoHomeDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".hostpool"))
            .ok_or(ConfigError::NoHomeDir)
    }
}

/// Get the hosts file path, honoring `HOSTPOOL_HOSTS`
pub fn hosts_file() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(HOSTS_FILE_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(config_dir()?.join("hosts.ini"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosts_file_in_config_dir() {
        if std::env::var_os(HOSTS_FILE_ENV).is_some() {
            return;
        }
        if let (Ok(dir), Ok(file)) = (config_dir(), hosts_file()) {
            assert_eq!(file, dir.join("hosts.ini"));
        }
    }
}
