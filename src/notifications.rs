//! Best-effort chat notifications through Slack and Discord webhooks.
//!
//! A failed post is logged and dropped; notifications never change the
//! outcome of a session.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{NotifyConfig, NotifyEvent};
use crate::{AppError, Result};

const POST_TIMEOUT: Duration = Duration::from_secs(10);

/// Chat service a webhook belongs to; decides the payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Slack incoming webhook.
    Slack,
    /// Discord channel webhook.
    Discord,
}

impl Provider {
    fn as_str(self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Discord => "discord",
        }
    }
}

/// Request body for one message.
#[must_use]
pub fn payload(provider: Provider, message: &str) -> Value {
    match provider {
        Provider::Slack => json!({ "text": message }),
        Provider::Discord => json!({ "content": message }),
    }
}

/// Posts session events to the configured webhooks.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhooks: Vec<(Provider, String)>,
    events: HashSet<NotifyEvent>,
}

impl Notifier {
    /// Build a notifier, or `None` when no webhook is configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn from_config(config: &NotifyConfig) -> Result<Option<Self>> {
        let webhooks: Vec<(Provider, String)> = [
            (Provider::Slack, &config.slack_webhook_url),
            (Provider::Discord, &config.discord_webhook_url),
        ]
        .into_iter()
        .filter_map(|(provider, url)| url.clone().map(|url| (provider, url)))
        .collect();
        if webhooks.is_empty() {
            return Ok(None);
        }

        let client = reqwest::Client::builder()
            .timeout(POST_TIMEOUT)
            .user_agent("agent-relay")
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Some(Self {
            client,
            webhooks,
            events: config.events.iter().copied().collect(),
        }))
    }

    /// Whether `event` is subscribed.
    #[must_use]
    pub fn is_enabled(&self, event: NotifyEvent) -> bool {
        self.events.contains(&event)
    }

    /// Send `message` to every webhook if `event` is subscribed.
    pub async fn notify(&self, event: NotifyEvent, message: &str) {
        if !self.is_enabled(event) {
            debug!(?event, "notification not subscribed");
            return;
        }
        for (provider, url) in &self.webhooks {
            match self.post(*provider, url, message).await {
                Ok(()) => info!(provider = provider.as_str(), ?event, "notification sent"),
                Err(err) => warn!(provider = provider.as_str(), ?event, %err, "notification failed"),
            }
        }
    }

    async fn post(&self, provider: Provider, url: &str, message: &str) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(&payload(provider, message))
            .send()
            .await
            .map_err(|err| AppError::Io(format!("webhook request failed: {err}")))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AppError::Io(format!("webhook returned {status}")))
        }
    }
}
