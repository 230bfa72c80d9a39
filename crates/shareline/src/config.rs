//! Configuration for the Shareline server and client

use crate::protocol::DEFAULT_PORT;
use crate::session::DEFAULT_MAX_SESSIONS;
use crate::{Error, Result};
use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared directory served to clients
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// User directory file (TOML)
    #[serde(default = "default_users_file")]
    pub users_file: PathBuf,

    /// Number of session slots (NIST 800-53: AC-10)
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// INFO audit log (default `server_audit.log`)
    ///
    /// `audit_log = false` or an empty path disables it.
    #[serde(default = "default_audit_log", deserialize_with = "deserialize_audit_log")]
    pub audit_log: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
///
/// NIST 800-53: AU-9 (Protection of Audit Information), AU-12 (Audit Generation)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file; logs go to stderr when unset
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text for humans
    Text,
    /// One JSON object per line for log aggregators
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            root_dir: default_root_dir(),
            users_file: default_users_file(),
            max_sessions: default_max_sessions(),
            audit_log: default_audit_log(),
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
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if !self.root_dir.is_dir() {
            return Err(Error::Config(format!(
                "Shared directory does not exist or is not a directory: {:?}",
                self.root_dir
            )));
        }

        if !self.users_file.is_file() {
            return Err(Error::Config(format!(
                "Users file not found: {:?}",
                self.users_file
            )));
        }

        if self.max_sessions == 0 {
            return Err(Error::Config("max_sessions must be at least 1".to_string()));
        }

        if let Some(parent) = self
            .audit_log
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
        {
            if !parent.is_dir() {
                return Err(Error::Config(format!(
                    "Audit log directory does not exist: {:?}",
                    parent
                )));
            }
        }

        Ok(())
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./shared")
}

fn default_users_file() -> PathBuf {
    PathBuf::from("./users.toml")
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_audit_log() -> Option<PathBuf> {
    Some(PathBuf::from("server_audit.log"))
}

/// Accepted forms of the `audit_log` setting
#[derive(Deserialize)]
#[serde(untagged)]
enum AuditLogSetting {
    Enabled(bool),
    Path(PathBuf),
}

fn deserialize_audit_log<'de, D>(deserializer: D) -> std::result::Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match AuditLogSetting::deserialize(deserializer)? {
        AuditLogSetting::Enabled(true) => default_audit_log(),
        AuditLogSetting::Enabled(false) => None,
        AuditLogSetting::Path(path) if path.as_os_str().is_empty() => None,
        AuditLogSetting::Path(path) => Some(path),
    })
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// 32-byte key used to decrypt downloads
    pub key_file: Option<PathBuf>,
    /// Wait for each chunk of a prompt-terminated reply
    pub prompt_timeout_ms: u64,
    /// Wait for each chunk of a file transfer
    pub transfer_timeout_ms: u64,
    /// Largest text reply buffered
    pub max_response_bytes: usize,
    /// Largest GET reply buffered
    pub max_download_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            key_file: None,
            prompt_timeout_ms: 5_000,
            transfer_timeout_ms: 10_000,
            max_response_bytes: 64 * 1024,
            max_download_bytes: 256 * 1024 * 1024,
        }
    }
}

impl ClientConfig {
    /// Load client configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read client config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse client config: {}", e)))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must not be 0".to_string()));
        }
        if self.prompt_timeout_ms == 0 || self.transfer_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be greater than 0".to_string()));
        }
        if self.max_response_bytes == 0 || self.max_download_bytes == 0 {
            return Err(Error::Config("read limits must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Wait for a menu or text reply
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    /// Idle wait while a GET payload streams
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 9876);
        assert_eq!(config.max_sessions, 10);
        assert_eq!(config.logging.format, LogFormat::Text);

        let client = ClientConfig::default();
        assert_eq!(client.prompt_timeout(), Duration::from_secs(5));
        assert_eq!(client.transfer_timeout(), Duration::from_secs(10));
        assert!(client.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
                port = 4000
                root_dir = "/srv/share"

                [logging]
                format = "json"
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.root_dir, PathBuf::from("/srv/share"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
    }

    #[test]
    fn test_audit_log_setting() {
        let parse = |text: &str| toml::from_str::<Config>(text).unwrap().audit_log;

        assert_eq!(parse(""), Some(PathBuf::from("server_audit.log")));
        assert_eq!(parse("audit_log = false"), None);
        assert_eq!(parse("audit_log = \"\""), None);
        assert_eq!(parse("audit_log = true"), Some(PathBuf::from("server_audit.log")));
        assert_eq!(parse("audit_log = \"/var/log/share.log\""), Some(PathBuf::from("/var/log/share.log")));
        assert!(toml::from_str::<Config>("audit_log = 5").is_err());
    }

    #[test]
    fn test_validate() {
        let dir = TempDir::new().unwrap();
        let users = dir.path().join("users.toml");
        std::fs::write(&users, "").unwrap();

        let mut config = Config {
            root_dir: dir.path().to_path_buf(),
            users_file: users,
            audit_log: Some(dir.path().join("audit.log")),
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        config.max_sessions = 0;
        assert!(config.validate().is_err());
        config.max_sessions = 1;

        config.root_dir = dir.path().join("missing");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_client_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "host = \"files.local\"\ntransfer_timeout_ms = 500\n").unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.host, "files.local");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.transfer_timeout(), Duration::from_millis(500));

        let bad = ClientConfig {
            prompt_timeout_ms: 0,
            ..ClientConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
