//! Periodic status digest

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::alerts::notifier::Notifier;
use crate::alerts::Priority;
use crate::errors::AgentError;
use crate::models::deployment::{Balance, DeploymentStatus};
use crate::providers::manager::ProviderManager;
use crate::storage::memory::{Storage, StorageStats};

/// Memory key holding the latest digest
pub const SUMMARY_KEY: &str = "heartbeat:summary";

#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub provider: String,
    pub deployment_id: Option<String>,
    pub status: DeploymentStatus,
    pub balance: Option<Balance>,
    pub storage: Option<StorageStats>,
    pub generated_at: DateTime<Utc>,
}

impl StatusSummary {
    fn message(&self) -> String {
        let balance = self
            .balance
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_else(|| "unavailable".to_string());
        format!(
            "Status: {} on {} ({}), balance {}",
            self.status,
            self.provider,
            self.deployment_id.as_deref().unwrap_or("no deployment"),
            balance
        )
    }
}

pub struct StatusSummarizer {
    manager: Arc<ProviderManager>,
    storage: Arc<dyn Storage>,
    notifier: Arc<Notifier>,
}

impl StatusSummarizer {
    pub fn new(manager: Arc<ProviderManager>, storage: Arc<dyn Storage>, notifier: Arc<Notifier>) -> Self {
        Self {
            manager,
            storage,
            notifier,
        }
    }

    /// Collect the digest without storing or sending it
    pub async fn collect(&self) -> StatusSummary {
        let provider = self.manager.active_provider();
        let deployment = self.manager.active_deployment();

        let status = match &deployment {
            Some(d) => provider.status(d).await.unwrap_or(DeploymentStatus::Unknown),
            None => DeploymentStatus::Stopped,
        };

        let balance = match provider.get_balance().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!("Balance unavailable for summary: {}", e);
                None
            }
        };

        StatusSummary {
            provider: provider.name().to_string(),
            deployment_id: deployment.map(|d| d.id),
            status,
            balance,
            storage: self.storage.stats().await.ok(),
            generated_at: Utc::now(),
        }
    }

    pub async fn run(&self) -> Result<StatusSummary, AgentError> {
        let summary = self.collect().await;
        let metadata = HashMap::from([("kind".to_string(), "summary".to_string())]);
        self.storage
            .set(SUMMARY_KEY, serde_json::to_value(&summary)?, metadata)
            .await?;

        debug!("Stored status summary");
        self.notifier.notify(&summary.message(), Priority::Low).await;
        Ok(summary)
    }
}
