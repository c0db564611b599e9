//! Generic webhook delivery

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

use super::{Notification, Transport};

/// Posts notifications as JSON to `email.webhook_url`
#[derive(Clone)]
pub struct WebhookTransport {
    client: Client,
}

impl WebhookTransport {
    /// Create a webhook transport
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    alert_id: String,
    level: &'a str,
    subject_id: i32,
    subject_type: &'a str,
    name: &'a str,
    title: &'a str,
    message: &'a str,
    subject: &'a str,
    triggered_at: DateTime<Utc>,
    recipients: &'a [String],
    cc_recipients: &'a [String],
}

impl<'a> From<&'a Notification> for WebhookPayload<'a> {
    fn from(n: &'a Notification) -> Self {
        Self {
            alert_id: n.alert_id.to_string(),
            level: n.level.as_str(),
            subject_id: n.subject_id.0,
            subject_type: &n.subject_type,
            name: &n.name,
            title: &n.title,
            message: &n.message,
            subject: &n.subject,
            triggered_at: n.triggered_at,
            recipients: &n.recipients,
            cc_recipients: &n.cc_recipients,
        }
    }
}

#[async_trait::async_trait]
impl Transport for WebhookTransport {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, config: &Config, notification: &Notification) -> Result<()> {
        let url = config
            .email
            .webhook_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::config("email.webhook_url is not set"))?;

        let response = self
            .client
            .post(url)
            .json(&WebhookPayload::from(notification))
            .send()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(format!(
                "Webhook returned {status}: {body}"
            )));
        }

        debug!(url = %url, alert_id = %notification.alert_id, "Webhook notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::sample_notification;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> Config {
        let mut config = Config::default();
        config.email.webhook_url = Some(format!("{}/hooks/alerts", server.uri()));
        config
    }

    #[tokio::test]
    async fn test_posts_json_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/alerts"))
            .and(body_partial_json(serde_json::json!({
                "level": "WARN",
                "subject_type": "tomcat",
                "name": "/host/tomcat1",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = WebhookTransport::new().unwrap();
        transport
            .send(&config_for(&server), &sample_notification())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let transport = WebhookTransport::new().unwrap();
        let result = transport
            .send(&config_for(&server), &sample_notification())
            .await;

        match result {
            Err(Error::Transport(msg)) => assert!(msg.contains("503")),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_url_is_a_config_error() {
        let transport = WebhookTransport::new().unwrap();
        let result = transport
            .send(&Config::default(), &sample_notification())
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
