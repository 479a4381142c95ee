//! Configuration for the RFS server

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::protocol::DEFAULT_PORT;
use crate::{Error, Result};

/// RFS server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Data root; each user's home is `<root_dir>/<username>`
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Credential table: username to lowercase hex SHA-256 of the password
    ///
    /// NIST 800-53: IA-5 (Authenticator Management)
    /// An empty table accepts any password for a user whose home exists.
    #[serde(default)]
    pub users: HashMap<String, String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
///
/// NIST 800-53: AU-2 (Audit Events), AU-9 (Protection of Audit Information), AU-12 (Audit Generation)
/// STIG: V-222648 (Audit Records)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
    /// Emit structured audit events for connections, logins and commands
    pub audit_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            audit_enabled: true,
        }
    }
}

/// Log format options
///
/// NIST 800-53: AU-9 (Protection of Audit Information)
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for SIEM integration
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            root_dir: default_root_dir(),
            users: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config: {e}")))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the root is missing or not a directory,
    /// the bind address does not parse, or a credential is not a SHA-256 hex digest.
    pub fn validate(&self) -> Result<()> {
        if !self.root_dir.exists() {
            return Err(Error::Config(format!(
                "Root directory does not exist: {}",
                self.root_dir.display()
            )));
        }

        if !self.root_dir.is_dir() {
            return Err(Error::Config(format!(
                "Root path is not a directory: {}",
                self.root_dir.display()
            )));
        }

        self.socket_addr()?;

        // NIST 800-53: IA-5 - Only digests are stored, never plaintext
        for (user, digest) in &self.users {
            let valid = digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit());
            if !valid {
                return Err(Error::Config(format!(
                    "Password for user '{user}' must be a 64-character SHA-256 hex digest"
                )));
            }
        }

        Ok(())
    }

    /// Socket address the server listens on
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `bind_address` is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .or_else(|_| format!("[{}]:{}", self.bind_address, self.port).parse())
            .map_err(|_| Error::Config(format!("Invalid bind address: {}", self.bind_address)))
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./DATA")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 980);
        assert_eq!(config.root_dir, PathBuf::from("./DATA"));
        assert!(config.users.is_empty());
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.logging.audit_enabled);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            port = 9000

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_missing_root() {
        let config = Config {
            root_dir: PathBuf::from("/nonexistent/rfs/data"),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_plaintext_password() {
        let temp = TempDir::new().unwrap();
        let mut config = Config {
            root_dir: temp.path().to_path_buf(),
            ..Config::default()
        };
        config.users.insert("alice".into(), "hunter2".into());
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.users.insert("alice".into(), "a".repeat(64));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_socket_addr() {
        let mut config = Config::default();
        assert_eq!(config.socket_addr().unwrap().port(), 980);

        config.bind_address = "::1".into();
        config.port = 2000;
        assert_eq!(
            config.socket_addr().unwrap(),
            "[::1]:2000".parse::<SocketAddr>().unwrap()
        );

        config.bind_address = "not an address".into();
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rfs.toml");
        std::fs::write(
            &path,
            format!(
                "root_dir = {:?}\n[users]\nalice = \"{}\"\n",
                temp.path().display().to_string(),
                "0".repeat(64)
            ),
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.root_dir, temp.path());
        assert_eq!(config.users.len(), 1);
        assert!(config.validate().is_ok());

        assert!(matches!(
            Config::from_file(temp.path().join("missing.toml")),
            Err(Error::Config(_))
        ));
    }
}
