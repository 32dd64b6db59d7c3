//! Balance of an account outside the marketplace, e.g. an inference credits API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error};

use crate::alerts::notifier::Notifier;
use crate::alerts::Priority;
use crate::errors::AgentError;

#[async_trait]
pub trait BalanceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn balance(&self) -> Result<f64, AgentError>;
}

/// Reads a balance from a JSON endpoint
pub struct HttpBalanceSource {
    name: String,
    url: String,
    client: Client,
}

impl HttpBalanceSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        Ok(Self {
            name: name.into(),
            url: url.into(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

/// Accepts a bare number or an object with a `balance` field, as number or string
pub fn parse_balance_body(body: &Value) -> Option<f64> {
    let value = match body {
        Value::Object(map) => map.get("balance")?,
        other => other,
    };
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl BalanceSource for HttpBalanceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn balance(&self) -> Result<f64, AgentError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            error!("Balance request to {} failed: {}", self.name, e);
            AgentError::RemoteError(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::RemoteError(format!("{} returned {}", self.name, status)));
        }

        let body: Value = response.json().await?;
        parse_balance_body(&body)
            .ok_or_else(|| AgentError::RemoteError(format!("{} returned no balance", self.name)))
    }
}

pub struct ExternalBalanceMonitor {
    source: Arc<dyn BalanceSource>,
    notifier: Arc<Notifier>,
    threshold: f64,
}

impl ExternalBalanceMonitor {
    pub fn new(source: Arc<dyn BalanceSource>, notifier: Arc<Notifier>, threshold: f64) -> Self {
        Self {
            source,
            notifier,
            threshold,
        }
    }

    pub async fn check(&self) -> Result<f64, AgentError> {
        let balance = self.source.balance().await?;
        debug!("{} balance: {}", self.source.name(), balance);

        if balance < self.threshold {
            self.notifier
                .notify(
                    &format!(
                        "Low {} balance: {} (threshold {})",
                        self.source.name(),
                        balance,
                        self.threshold
                    ),
                    Priority::High,
                )
                .await;
        }
        Ok(balance)
    }
}
