use super::Notifier;
use crate::config::AppConfig;
use crate::error::Error;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

/// Posts each message as `{"content": ...}` JSON to a chat webhook.
#[derive(Debug)]
pub struct WebhookNotifier {
    url: String,
    username: Option<String>,
    client: reqwest::blocking::Client,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        username: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            username,
            client,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        Self::new(
            config.webhook_url.clone(),
            config.webhook_username.clone(),
            Duration::from_secs(config.webhook_timeout_secs),
        )
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, message: &str) -> Result<(), Error> {
        let payload = WebhookPayload {
            content: message,
            username: self.username.as_deref(),
        };
        let response = self.client.post(&self.url).json(&payload).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Delivery(format!(
                "webhook returned {}: {}",
                status,
                body.trim()
            )));
        }
        debug!("Posted {} characters, status {}", message.chars().count(), status);
        Ok(())
    }
}
