//! Configuration module for fedwatch.
//!
//! Loads a TOML configuration file, applies defaults, and validates required
//! fields. Configuration problems are fatal at startup; the rest of the
//! system treats the loaded values as already validated.

use serde::Deserialize;
use std::env;
use std::fs;
use thiserror::Error;

/// Default configuration file path, overridable via `FEDWATCH_CONFIG`.
pub const DEFAULT_CONFIG_PATH: &str = "fedwatch.toml";

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("missing required field: {0}")]
    Missing(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Instance configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Instance name, shown to peers in health responses.
    #[serde(default)]
    pub name: String,
    /// Default alert recipient.
    #[serde(default)]
    pub admin_email: String,
    /// HTTP port for the peer protocol endpoint.
    #[serde(default)]
    pub port: u16,
    /// Public base URL of this instance.
    #[serde(default)]
    pub base_url: String,
    /// Probe log retention window in days.
    #[serde(default = "default_max_days_logs")]
    pub max_days_logs: i64,
    /// Optional shared key tagged onto health responses and checked (softly)
    /// on peer responses.
    #[serde(default)]
    pub notify_key: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: String,
    #[serde(default)]
    pub smtp_password: String,
    #[serde(default)]
    pub from_email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Probe interval for services that do not set their own, in seconds.
    #[serde(default = "default_check_interval")]
    pub default_check_interval: i64,
    /// Per-attempt request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Additional probe attempts after the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed sleep between attempts, in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Consecutive failures required before a DOWN alert.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: i64,
    /// Shared interval for all peer checks, in seconds.
    #[serde(default = "default_peer_check_interval")]
    pub peer_check_interval: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            default_check_interval: default_check_interval(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            failure_threshold: default_failure_threshold(),
            peer_check_interval: default_peer_check_interval(),
        }
    }
}

/// One monitored service from the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEntry {
    pub url: String,
    pub check_interval: Option<i64>,
    pub notify_email: Option<String>,
}

/// One trusted peer instance.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerEntry {
    pub url: String,
    pub admin_email: String,
}

fn default_max_days_logs() -> i64 {
    30
}

fn default_db_path() -> String {
    "fedwatch.db".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_check_interval() -> i64 {
    60
}

fn default_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    2
}

fn default_failure_threshold() -> i64 {
    3
}

fn default_peer_check_interval() -> u64 {
    60
}

impl Config {
    /// Load and validate the configuration file.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("FEDWATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let data = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::parse(&data, &path)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(data: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(data).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Missing("name"));
        }
        if self.admin_email.is_empty() {
            return Err(ConfigError::Missing("admin_email"));
        }
        if self.port == 0 {
            return Err(ConfigError::Missing("port"));
        }
        if self.base_url.is_empty() {
            return Err(ConfigError::Missing("base_url"));
        }
        if self.email.smtp_server.is_empty() {
            return Err(ConfigError::Missing("email.smtp_server"));
        }
        if self.email.from_email.is_empty() {
            return Err(ConfigError::Missing("email.from_email"));
        }

        for service in &self.services {
            validate_url("services.url", &service.url)?;
        }
        for peer in &self.peers {
            validate_url("peers.url", &peer.url)?;
            if peer.admin_email.is_empty() {
                return Err(ConfigError::Missing("peers.admin_email"));
            }
        }
        Ok(())
    }
}

fn validate_url(field: &'static str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{} is not an http(s) URL", url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        name = "test-instance"
        admin_email = "ops@example.com"
        port = 3015
        base_url = "https://up.example.com"

        [email]
        smtp_server = "smtp.example.com"
        from_email = "monitor@example.com"
    "#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let cfg = Config::parse(MINIMAL, "test").unwrap();
        assert_eq!(cfg.name, "test-instance");
        assert_eq!(cfg.max_days_logs, 30);
        assert_eq!(cfg.database.path, "fedwatch.db");
        assert_eq!(cfg.monitoring.default_check_interval, 60);
        assert_eq!(cfg.monitoring.timeout, 10);
        assert_eq!(cfg.monitoring.max_retries, 2);
        assert_eq!(cfg.monitoring.failure_threshold, 3);
        assert_eq!(cfg.monitoring.peer_check_interval, 60);
        assert!(cfg.services.is_empty());
        assert!(cfg.peers.is_empty());
        assert!(cfg.notify_key.is_none());
    }

    #[test]
    fn test_full_config() {
        let cfg = Config::parse(
            r#"
            name = "test-instance"
            admin_email = "ops@example.com"
            port = 3015
            base_url = "https://up.example.com"
            max_days_logs = 7
            notify_key = "sekrit"

            [database]
            path = "/var/lib/fedwatch/state.db"

            [email]
            smtp_server = "smtp.example.com"
            smtp_port = 465
            smtp_user = "monitor"
            smtp_password = "hunter2"
            from_email = "monitor@example.com"

            [monitoring]
            default_check_interval = 30
            failure_threshold = 5

            [[services]]
            url = "https://svc.example.com"
            check_interval = 15
            notify_email = "svc-owner@example.com"

            [[services]]
            url = "https://other.example.com"

            [[peers]]
            url = "https://peer.example.com"
            admin_email = "peer-admin@example.com"
            "#,
            "test",
        )
        .unwrap();

        assert_eq!(cfg.max_days_logs, 7);
        assert_eq!(cfg.notify_key.as_deref(), Some("sekrit"));
        assert_eq!(cfg.email.smtp_port, 465);
        assert_eq!(cfg.monitoring.failure_threshold, 5);
        assert_eq!(cfg.services.len(), 2);
        assert_eq!(cfg.services[0].check_interval, Some(15));
        assert!(cfg.services[1].check_interval.is_none());
        assert_eq!(cfg.peers[0].admin_email, "peer-admin@example.com");
    }

    #[test]
    fn test_missing_name_is_fatal() {
        let err = Config::parse(
            r#"
            admin_email = "ops@example.com"
            port = 3015
            base_url = "https://up.example.com"
            "#,
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("name")));
    }

    #[test]
    fn test_missing_smtp_server_is_fatal() {
        let err = Config::parse(
            r#"
            name = "test-instance"
            admin_email = "ops@example.com"
            port = 3015
            base_url = "https://up.example.com"
            "#,
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("email.smtp_server")));
    }

    #[test]
    fn test_bad_service_url_is_fatal() {
        let err = Config::parse(
            &format!("{}\n[[services]]\nurl = \"ftp://files.example.com\"\n", MINIMAL),
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "services.url", .. }));
    }

    #[test]
    fn test_smtp_server_requires_from_email() {
        let err = Config::parse(
            r#"
            name = "test-instance"
            admin_email = "ops@example.com"
            port = 3015
            base_url = "https://up.example.com"

            [email]
            smtp_server = "smtp.example.com"
            "#,
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("email.from_email")));
    }
}
