//! Controller configuration
//!
//! Read once from a TOML file at startup, then overridden by environment
//! variables for the booking service credentials and URL.

use crate::error::ControllerError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file read when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "cloud-scheduler.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub authentication: AuthenticationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub stopping: StoppingConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthenticationConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for AuthenticationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationConfig")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host name of this scheduler, used for the default mail sender
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Base URL of the booking service scripts
    #[serde(default)]
    pub base_url: String,
    /// Root of the `dag-{reservation_id}` descriptor directories
    #[serde(default = "default_dag_dir")]
    pub dag_dir: PathBuf,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            base_url: String::new(),
            dag_dir: default_dag_dir(),
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to a daily rolling file instead of stdout
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoppingConfig {
    /// Seconds before the reservation end at which the cluster is stopped
    #[serde(default)]
    pub reservation_secs_left: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisioningConfig {
    /// Operator key appended to every cluster's authorized keys
    #[serde(default = "default_operator_public_key")]
    pub operator_public_key: PathBuf,
    /// `ssh` binary; located on `PATH` when unset
    #[serde(default)]
    pub ssh_binary: Option<PathBuf>,
    /// `scp` binary; located on `PATH` when unset
    #[serde(default)]
    pub scp_binary: Option<PathBuf>,
    #[serde(default = "default_thirty")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_thirty")]
    pub reachability_timeout_secs: u64,
    /// Pause after launching a cluster
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
    /// Warn when a site has been starting for longer than this
    #[serde(default = "default_starting_alert")]
    pub starting_alert_secs: i64,
}

impl ProvisioningConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_secs(self.reachability_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            operator_public_key: default_operator_public_key(),
            ssh_binary: None,
            scp_binary: None,
            connect_timeout_secs: default_thirty(),
            reachability_timeout_secs: default_thirty(),
            settle_delay_secs: default_settle_delay(),
            starting_alert_secs: default_starting_alert(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sendmail")]
    pub sendmail: PathBuf,
    /// Sender address; `root@{server.hostname}` when unset
    #[serde(default)]
    pub from: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sendmail: default_sendmail(),
            from: None,
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_dag_dir() -> PathBuf {
    PathBuf::from("dags")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_operator_public_key() -> PathBuf {
    PathBuf::from("/root/.ssh/id_rsa.pub")
}

fn default_thirty() -> u64 {
    30
}

fn default_settle_delay() -> u64 {
    10
}

fn default_starting_alert() -> i64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_sendmail() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

impl Config {
    /// Load, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self, ControllerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "cannot read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ControllerError> {
        toml::from_str(content)
            .map_err(|e| ControllerError::InvalidConfig(format!("cannot parse config: {}", e)))
    }

    /// Apply `BOOKING_USERNAME`, `BOOKING_PASSWORD` and `BOOKING_URL`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(username) = lookup("BOOKING_USERNAME") {
            self.authentication.username = username;
        }
        if let Some(password) = lookup("BOOKING_PASSWORD") {
            self.authentication.password = password;
        }
        if let Some(url) = lookup("BOOKING_URL") {
            self.server.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.authentication.username.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "authentication.username is required (or set BOOKING_USERNAME)".to_string(),
            ));
        }
        if self.authentication.password.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "authentication.password is required (or set BOOKING_PASSWORD)".to_string(),
            ));
        }
        if self.server.base_url.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "server.base_url is required (or set BOOKING_URL)".to_string(),
            ));
        }
        if self.stopping.reservation_secs_left < 0 {
            return Err(ControllerError::InvalidConfig(format!(
                "stopping.reservation_secs_left must not be negative, got {}",
                self.stopping.reservation_secs_left
            )));
        }
        Ok(())
    }

    /// Sender address for notifications
    pub fn mail_from(&self) -> String {
        self.notification
            .from
            .clone()
            .unwrap_or_else(|| format!("root@{}", self.server.hostname))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[authentication]
username = "scheduler"
password = "secret"

[server]
hostname = "scheduler.example.org"
base_url = "https://booking.example.org/api"
dag_dir = "/var/lib/cloud-scheduler/dags"
accept_invalid_certs = true

[logging]
level = "debug"
file = "/var/log/cloud-scheduler/controller.log"

[stopping]
reservation_secs_left = 1800

[provisioning]
settle_delay_secs = 0
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(FULL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.base_url, "https://booking.example.org/api");
        assert_eq!(config.server.dag_dir, PathBuf::from("/var/lib/cloud-scheduler/dags"));
        assert!(config.server.accept_invalid_certs);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.stopping.reservation_secs_left, 1800);
        assert_eq!(config.provisioning.settle_delay(), Duration::ZERO);
        assert_eq!(config.provisioning.connect_timeout_secs, 30);
        assert_eq!(config.provisioning.starting_alert_secs, 3600);
        assert!(config.notification.enabled);
        assert_eq!(config.mail_from(), "root@scheduler.example.org");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_toml(FULL).unwrap();
        config.apply_env(|name| match name {
            "BOOKING_URL" => Some("https://other.example.org/api".to_string()),
            "BOOKING_PASSWORD" => Some("rotated".to_string()),
            _ => None,
        });
        assert_eq!(config.server.base_url, "https://other.example.org/api");
        assert_eq!(config.authentication.password, "rotated");
        assert_eq!(config.authentication.username, "scheduler");
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let config = Config::from_toml("[server]\nbase_url = \"https://b/api\"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("authentication.username"));
    }

    #[test]
    fn test_negative_lead_rejected() {
        let text = FULL.replace("reservation_secs_left = 1800", "reservation_secs_left = -5");
        let config = Config::from_toml(&text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::from_toml("[server]\nbaseUrl = \"x\"\n").is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let config = Config::from_toml(FULL).unwrap();
        assert!(!format!("{:?}", config).contains("secret"));
    }
}
