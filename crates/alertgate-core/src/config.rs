//! Configuration management for Alertgate
//!
//! Settings are read fresh on every evaluation through [`ConfigProvider`], so
//! threshold changes take effect without restarting the engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::AlertLevel;

/// Environment variable prefix for overrides (`ALERTGATE__ALERTING__GC_TIME_THRESHOLD_MS=3000`)
pub const ENV_PREFIX: &str = "ALERTGATE";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Alert rules and suppression settings
    pub alerting: AlertingConfig,

    /// Notification transport settings
    pub email: EmailConfig,

    /// Dispatch worker settings
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!(path = %path.display(), "Reading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?.try_deserialize()?;
        Ok(config)
    }
}

/// Alert rules and suppression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Master switch for sending alerts
    pub email_alert_enabled: bool,

    /// Minimum level to send (0: INFO, 1: WARN, 2: ERROR, 3: FATAL)
    pub min_alert_level: u8,

    /// Comma-separated glob patterns matched against the subject name
    pub ignore_name_patterns: String,

    /// Comma-separated glob patterns matched against the alert title
    pub ignore_title_patterns: String,

    /// Comma-separated glob patterns matched against the alert message
    pub ignore_message_patterns: String,

    /// Drop repeats of the last sent alert (same subject and title)
    pub ignore_continuous_duplicates: bool,

    /// How long a sent alert suppresses its repeats
    #[serde(with = "humantime_serde")]
    pub duplicate_window: Duration,

    /// Trace elapsed time threshold in milliseconds (0 disables)
    pub elapsed_time_threshold_ms: u64,

    /// GC time threshold (0 disables)
    pub gc_time_threshold_ms: u64,

    /// Live thread count threshold (0 disables)
    pub thread_count_threshold: u64,

    /// Object family eligible for GC time and thread count rules
    pub managed_runtime_family: String,

    /// Thread count polling interval
    #[serde(with = "humantime_serde")]
    pub thread_poll_interval: Duration,

    /// Timeout for fetching a subject's thread list
    #[serde(with = "humantime_serde")]
    pub remote_call_timeout: Duration,

    /// Log dispatch outcomes at info instead of debug
    pub debug_logging: bool,
}

impl AlertingConfig {
    /// Minimum level as an [`AlertLevel`]
    pub fn min_level(&self) -> AlertLevel {
        AlertLevel::from_code(self.min_alert_level)
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            email_alert_enabled: false,
            min_alert_level: 0,
            ignore_name_patterns: String::new(),
            ignore_title_patterns: String::new(),
            ignore_message_patterns: String::new(),
            ignore_continuous_duplicates: false,
            duplicate_window: Duration::from_secs(60 * 60),
            elapsed_time_threshold_ms: 0,
            gc_time_threshold_ms: 0,
            thread_count_threshold: 0,
            managed_runtime_family: "javaee".to_string(),
            thread_poll_interval: Duration::from_secs(5),
            remote_call_timeout: Duration::from_secs(3),
            debug_logging: false,
        }
    }
}

/// Which transport delivers notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// SMTP email
    #[default]
    Smtp,
    /// JSON POST to a webhook
    Webhook,
    /// Write notifications to the log only
    Log,
}

/// Notification transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Transport to use
    pub transport: TransportKind,

    /// SMTP server settings
    pub smtp: SmtpConfig,

    /// Sender address
    pub from_address: Option<String>,

    /// Comma-separated recipients
    pub to_address: Option<String>,

    /// Comma-separated carbon-copy recipients
    pub cc_address: Option<String>,

    /// Target URL when `transport = "webhook"`
    pub webhook_url: Option<String>,

    /// Upper bound on a single send
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
}

impl EmailConfig {
    /// Parsed `to_address` list
    pub fn recipients(&self) -> Vec<String> {
        split_addresses(self.to_address.as_deref())
    }

    /// Parsed `cc_address` list
    pub fn cc_recipients(&self) -> Vec<String> {
        split_addresses(self.cc_address.as_deref())
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            smtp: SmtpConfig::default(),
            from_address: None,
            to_address: None,
            cc_address: None,
            webhook_url: None,
            send_timeout: Duration::from_secs(30),
        }
    }
}

fn split_addresses(list: Option<&str>) -> Vec<String> {
    list.map(|l| {
        l.split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// SMTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// SMTP host
    pub host: String,
    /// SMTP port
    pub port: u16,
    /// Authenticate with username/password
    pub auth: bool,
    /// Username for authentication
    pub username: Option<String>,
    /// Password for authentication
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Use implicit TLS (SMTPS); only applies when `starttls` is off
    pub ssl: bool,
    /// Upgrade with STARTTLS; takes precedence over `ssl`
    pub starttls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            auth: true,
            username: None,
            password: None,
            ssl: true,
            starttls: true,
        }
    }
}

/// Dispatch worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Pending alerts held before new ones are dropped
    pub queue_capacity: usize,
    /// Sends allowed in flight at once
    pub max_concurrent_sends: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_concurrent_sends: 8,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Source of the current configuration.
///
/// Implementations must be cheap to call; the engine asks on every event.
pub trait ConfigProvider: Send + Sync {
    /// Snapshot of the configuration in effect right now
    fn current(&self) -> Arc<Config>;
}

/// Swappable in-memory configuration, optionally backed by a file
pub struct LiveConfig {
    current: RwLock<Arc<Config>>,
    source: Option<PathBuf>,
}

impl LiveConfig {
    /// Wrap a fixed configuration
    pub fn new(config: Config) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            source: None,
        }
    }

    /// Load from a file (plus environment) and remember the path for reloads
    pub fn from_file(path: Option<&Path>) -> Result<Self> {
        let config = Config::load(path)?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
            source: path.map(Path::to_path_buf),
        })
    }

    /// Replace the active configuration
    pub fn replace(&self, config: Config) {
        *self.current.write() = Arc::new(config);
    }

    /// Re-read the backing file and environment. The old value stays on error.
    pub fn reload(&self) -> Result<()> {
        let config = Config::load(self.source.as_deref())?;
        self.replace(config);
        info!("Configuration reloaded");
        Ok(())
    }
}

impl ConfigProvider for LiveConfig {
    fn current(&self) -> Arc<Config> {
        self.current.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_disable_every_rule() {
        let config = Config::default();
        assert!(!config.alerting.email_alert_enabled);
        assert_eq!(config.alerting.elapsed_time_threshold_ms, 0);
        assert_eq!(config.alerting.gc_time_threshold_ms, 0);
        assert_eq!(config.alerting.thread_count_threshold, 0);
        assert_eq!(config.alerting.duplicate_window, Duration::from_secs(3600));
        assert_eq!(config.email.smtp.host, "smtp.gmail.com");
        assert_eq!(config.email.smtp.port, 587);
    }

    #[test]
    fn test_address_lists_are_split_and_trimmed() {
        let email = EmailConfig {
            to_address: Some("ops@example.com, dev@example.com,".to_string()),
            cc_address: None,
            ..EmailConfig::default()
        };
        assert_eq!(
            email.recipients(),
            vec!["ops@example.com".to_string(), "dev@example.com".to_string()]
        );
        assert!(email.cc_recipients().is_empty());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[alerting]
email_alert_enabled = true
min_alert_level = 2
gc_time_threshold_ms = 3000
thread_poll_interval = "10s"
ignore_title_patterns = "xlog*"

[email]
transport = "log"
to_address = "ops@example.com"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert!(config.alerting.email_alert_enabled);
        assert_eq!(config.alerting.min_level(), AlertLevel::Error);
        assert_eq!(config.alerting.gc_time_threshold_ms, 3000);
        assert_eq!(config.alerting.thread_poll_interval, Duration::from_secs(10));
        assert_eq!(config.alerting.ignore_title_patterns, "xlog*");
        assert_eq!(config.email.transport, TransportKind::Log);
        // untouched sections keep defaults
        assert_eq!(config.dispatch.queue_capacity, 1024);
    }

    #[test]
    fn test_live_config_replace_is_visible() {
        let live = LiveConfig::new(Config::default());
        let before = live.current();

        let mut next = Config::default();
        next.alerting.thread_count_threshold = 200;
        live.replace(next);

        assert_eq!(before.alerting.thread_count_threshold, 0);
        assert_eq!(live.current().alerting.thread_count_threshold, 200);
    }
}
