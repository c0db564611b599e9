//! SMTP email delivery

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use crate::config::{Config, SmtpConfig};
use crate::error::{Error, Result};

use super::{Notification, Transport};

/// Sends notifications as plain-text email.
///
/// The mailer is built per send so SMTP setting changes apply immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmtpTransport;

impl SmtpTransport {
    /// Create an SMTP transport
    pub fn new() -> Self {
        Self
    }

    fn build_mailer(smtp: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        if smtp.host.is_empty() {
            return Err(Error::config("email.smtp.host is not set"));
        }

        let credentials = if smtp.auth {
            let (Some(username), Some(password)) = (&smtp.username, &smtp.password) else {
                return Err(Error::config(
                    "email.smtp.username and email.smtp.password are required when auth is enabled",
                ));
            };
            Some(Credentials::new(username.clone(), password.clone()))
        } else {
            None
        };

        let builder = match Security::of(smtp) {
            Security::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                .map_err(|e| Error::transport(e.to_string()))?,
            Security::ImplicitTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
                .map_err(|e| Error::transport(e.to_string()))?,
            Security::Plain => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host),
        };

        let mut builder = builder.port(smtp.port);
        if let Some(credentials) = credentials {
            builder = builder.credentials(credentials);
        }

        Ok(builder.build())
    }
}

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Security {
    /// Plain connect, then upgrade (submission port 587)
    StartTls,
    /// TLS from the first byte (SMTPS, port 465)
    ImplicitTls,
    Plain,
}

impl Security {
    /// STARTTLS wins when both flags are set; implicit TLS only applies to
    /// `ssl` without `starttls`
    fn of(smtp: &SmtpConfig) -> Self {
        match (smtp.starttls, smtp.ssl) {
            (true, _) => Self::StartTls,
            (false, true) => Self::ImplicitTls,
            (false, false) => Self::Plain,
        }
    }
}

fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse::<Mailbox>()
        .map_err(|e| Error::config(format!("invalid address '{address}': {e}")))
}

/// Build the email for a notification
pub(crate) fn build_message(config: &Config, notification: &Notification) -> Result<Message> {
    let from = config
        .email
        .from_address
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| Error::config("email.from_address is not set"))?;

    if notification.recipients.is_empty() {
        return Err(Error::config("email.to_address is not set"));
    }

    let mut builder = Message::builder()
        .from(mailbox(from.trim())?)
        .subject(notification.subject.clone())
        .header(ContentType::TEXT_PLAIN);

    for to in &notification.recipients {
        builder = builder.to(mailbox(to)?);
    }
    for cc in &notification.cc_recipients {
        builder = builder.cc(mailbox(cc)?);
    }

    builder
        .body(notification.body.clone())
        .map_err(|e| Error::transport(e.to_string()))
}

#[async_trait::async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, config: &Config, notification: &Notification) -> Result<()> {
        let message = build_message(config, notification)?;
        let mailer = Self::build_mailer(&config.email.smtp)?;

        mailer
            .send(message)
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        debug!(
            host = %config.email.smtp.host,
            recipients = ?notification.recipients,
            "Email sent"
        );
        Ok(())
    }
}
