//! Configuration management for Roost services.
//!
//! All services share a single configuration file at `~/.roost/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables (ROOST_* prefix)
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `ROOST_BIND_ADDRESS` → network.bind
//! - `ROOST_PORT` → network.port
//! - `ROOST_JWT_SECRET` → auth.jwt_secret
//! - `ROOST_CREDENTIALS_DIR` → sessions.credentials_dir
//! - `ROOST_BRIDGE_URL` → sessions.bridge_url
//! - `ROOST_SMTP_HOST` → smtp.host
//! - `ROOST_SMTP_USERNAME` / `ROOST_SMTP_PASSWORD` → smtp credentials

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".roost"),
        |dirs| dirs.home_dir().join(".roost"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Network configuration for the HTTP gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address. Default: "127.0.0.1" (local only).
    /// Set to "0.0.0.0" for remote access.
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Gateway listen port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

const fn default_port() -> u16 {
    8090
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret used to sign JWT tokens. Must be set for production.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Token lifetime in seconds.
    #[serde(default = "default_token_expiry")]
    pub token_expiry_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_expiry_secs: default_token_expiry(),
        }
    }
}

const fn default_token_expiry() -> u64 {
    86400
}

/// Bot session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Base directory for per-session credential storage.
    /// Default: `~/.roost/credentials`.
    #[serde(default)]
    pub credentials_dir: Option<PathBuf>,

    /// Websocket URL of the messaging-protocol daemon.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// How long to wait for the first pairing artifact before failing
    /// session creation.
    #[serde(default = "default_pairing_timeout")]
    pub pairing_timeout_secs: u64,

    /// Fixed delay between reconnect attempts after a transient close.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Consecutive failed reconnects before a session is given up on.
    #[serde(default = "default_max_reconnects")]
    pub max_reconnect_attempts: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            credentials_dir: None,
            bridge_url: default_bridge_url(),
            pairing_timeout_secs: default_pairing_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnects(),
        }
    }
}

impl SessionsConfig {
    /// Resolve the credential storage directory.
    pub fn credentials_dir(&self) -> PathBuf {
        self.credentials_dir
            .clone()
            .unwrap_or_else(|| config_dir().join("credentials"))
    }
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:9091/ws".into()
}

const fn default_pairing_timeout() -> u64 {
    10
}

const fn default_reconnect_delay() -> u64 {
    5
}

const fn default_max_reconnects() -> u32 {
    20
}

/// Coin economy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinsConfig {
    /// Coins credited to a freshly registered account.
    #[serde(default = "default_signup_bonus")]
    pub signup_bonus: i64,

    /// Coins debited when a bot is deployed.
    #[serde(default = "default_deploy_cost")]
    pub deploy_cost: i64,
}

impl Default for CoinsConfig {
    fn default() -> Self {
        Self {
            signup_bonus: default_signup_bonus(),
            deploy_cost: default_deploy_cost(),
        }
    }
}

const fn default_signup_bonus() -> i64 {
    100
}

const fn default_deploy_cost() -> i64 {
    10
}

/// SMTP configuration for verification emails.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// From address for outgoing mail.
    #[serde(default)]
    pub from: Option<String>,
}

const fn default_smtp_port() -> u16 {
    587
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Root configuration for all Roost services.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub coins: CoinsConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path, applying environment
    /// variable overrides. A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config at {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config at {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Persist the configuration back to the default path as pretty JSON.
    pub fn save(&self) -> Result<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&path, raw)
            .with_context(|| format!("Failed to write config at {}", path.display()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("ROOST_BIND_ADDRESS") {
            self.network.bind = bind;
        }
        if let Ok(port) = std::env::var("ROOST_PORT") {
            if let Ok(port) = port.parse() {
                self.network.port = port;
            }
        }
        if let Ok(secret) = std::env::var("ROOST_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }
        if let Ok(dir) = std::env::var("ROOST_CREDENTIALS_DIR") {
            self.sessions.credentials_dir = Some(PathBuf::from(dir));
        }
        if let Ok(url) = std::env::var("ROOST_BRIDGE_URL") {
            self.sessions.bridge_url = url;
        }
        if let Ok(host) = std::env::var("ROOST_SMTP_HOST") {
            self.smtp.host = Some(host);
        }
        if let Ok(username) = std::env::var("ROOST_SMTP_USERNAME") {
            self.smtp.username = Some(username);
        }
        if let Ok(password) = std::env::var("ROOST_SMTP_PASSWORD") {
            self.smtp.password = Some(password);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.bind, "127.0.0.1");
        assert_eq!(config.network.port, 8090);
        assert_eq!(config.sessions.pairing_timeout_secs, 10);
        assert_eq!(config.sessions.reconnect_delay_secs, 5);
        assert_eq!(config.sessions.max_reconnect_attempts, 20);
        assert_eq!(config.coins.signup_bonus, 100);
        assert_eq!(config.coins.deploy_cost, 10);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.network.port, 8090);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "network": { "port": 9999 }, "coins": { "deploy_cost": 25 } }"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.network.port, 9999);
        assert_eq!(config.coins.deploy_cost, 25);
        // untouched sections keep defaults
        assert_eq!(config.sessions.pairing_timeout_secs, 10);
    }

    #[test]
    fn test_credentials_dir_override() {
        let mut sessions = SessionsConfig::default();
        sessions.credentials_dir = Some(PathBuf::from("/tmp/roost-creds"));
        assert_eq!(sessions.credentials_dir(), PathBuf::from("/tmp/roost-creds"));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
