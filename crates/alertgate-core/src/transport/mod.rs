//! Notification transports
//!
//! A transport delivers one rendered [`Notification`]. It reports failure
//! instead of retrying; delivery is at most once.

mod smtp;
mod webhook;

pub use smtp::SmtpTransport;
pub use webhook::WebhookTransport;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::{Config, TransportKind};
use crate::error::Result;
use crate::models::{AlertLevel, SubjectId};

/// A rendered alert ready for delivery
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Id of the originating alert
    pub alert_id: Uuid,
    /// Severity level
    pub level: AlertLevel,
    /// Subject id
    pub subject_id: SubjectId,
    /// Resolved subject type
    pub subject_type: String,
    /// Resolved subject display name
    pub name: String,
    /// Display title
    pub title: String,
    /// Display message
    pub message: String,
    /// When the alert was raised
    pub triggered_at: DateTime<Utc>,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// Primary recipients
    pub recipients: Vec<String>,
    /// Carbon-copy recipients
    pub cc_recipients: Vec<String>,
}

/// Delivers notifications
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Deliver one notification using the settings in `config`
    async fn send(&self, config: &Config, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait::async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, _config: &Config, notification: &Notification) -> Result<()> {
        info!(
            alert_id = %notification.alert_id,
            level = %notification.level,
            recipients = ?notification.recipients,
            subject = %notification.subject,
            "{}",
            notification.body
        );
        Ok(())
    }
}

/// Picks SMTP, webhook or log delivery from the live `email.transport`
/// setting on every send
pub struct ConfiguredTransport {
    smtp: SmtpTransport,
    webhook: WebhookTransport,
    log: LogTransport,
}

impl ConfiguredTransport {
    /// Create the transport set
    pub fn new() -> Result<Self> {
        Ok(Self {
            smtp: SmtpTransport::new(),
            webhook: WebhookTransport::new()?,
            log: LogTransport,
        })
    }

    fn select(&self, kind: TransportKind) -> &dyn Transport {
        match kind {
            TransportKind::Smtp => &self.smtp,
            TransportKind::Webhook => &self.webhook,
            TransportKind::Log => &self.log,
        }
    }
}

#[async_trait::async_trait]
impl Transport for ConfiguredTransport {
    fn name(&self) -> &'static str {
        "configured"
    }

    async fn send(&self, config: &Config, notification: &Notification) -> Result<()> {
        self.select(config.email.transport)
            .send(config, notification)
            .await
    }
}
