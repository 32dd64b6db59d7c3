//! Alert channels

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertChannel, Priority};
use crate::errors::AgentError;

/// Writes alerts to the log
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    async fn send(&self, message: &str, priority: Priority) -> Result<(), AgentError> {
        match priority {
            Priority::High => warn!(priority = %priority, "ALERT: {}", message),
            _ => info!(priority = %priority, "ALERT: {}", message),
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    source: &'static str,
    priority: Priority,
    message: &'a str,
    timestamp: String,
}

/// POSTs alerts as JSON to a webhook
pub struct WebhookChannel {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, token: Option<SecretString>, timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    async fn send(&self, message: &str, priority: Priority) -> Result<(), AgentError> {
        let payload = WebhookPayload {
            source: "phoenix",
            priority,
            message,
            timestamp: Utc::now().to_rfc3339(),
        };

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            error!("Webhook request failed: {}", e);
            AgentError::NotifyError(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::NotifyError(format!("webhook returned {}", status)));
        }

        debug!("Delivered {} alert to webhook", priority);
        Ok(())
    }
}

/// Sends every alert to each channel; delivered only if every channel accepted it
pub struct FanoutChannel {
    channels: Vec<Box<dyn AlertChannel>>,
}

impl FanoutChannel {
    pub fn new(channels: Vec<Box<dyn AlertChannel>>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl AlertChannel for FanoutChannel {
    async fn send(&self, message: &str, priority: Priority) -> Result<(), AgentError> {
        if self.channels.is_empty() {
            return Err(AgentError::NotifyError("no alert channels configured".to_string()));
        }

        let mut last_error = None;
        for channel in &self.channels {
            if let Err(e) = channel.send(message, priority).await {
                warn!("Alert channel failed: {}", e);
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
