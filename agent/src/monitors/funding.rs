//! Provider balance monitor

use std::sync::Arc;

use tracing::{debug, info};

use crate::alerts::notifier::Notifier;
use crate::alerts::Priority;
use crate::errors::AgentError;
use crate::models::deployment::Balance;
use crate::providers::manager::ProviderManager;

pub struct FundingMonitor {
    manager: Arc<ProviderManager>,
    notifier: Arc<Notifier>,
    threshold: f64,
}

impl FundingMonitor {
    pub fn new(manager: Arc<ProviderManager>, notifier: Arc<Notifier>, threshold: f64) -> Self {
        Self {
            manager,
            notifier,
            threshold,
        }
    }

    /// Check the active provider's balance, `None` for unmetered providers
    pub async fn check(&self) -> Result<Option<Balance>, AgentError> {
        let provider = self.manager.active_provider();
        if !provider.capabilities().metered {
            debug!("Provider {} is unmetered, skipping funding check", provider.name());
            return Ok(None);
        }

        let balance = provider.get_balance().await?;
        if balance.amount < self.threshold {
            self.notifier
                .notify(
                    &format!(
                        "Low balance on {}: {} (threshold {} {})",
                        provider.name(),
                        balance,
                        self.threshold,
                        balance.denom
                    ),
                    Priority::High,
                )
                .await;
        } else {
            info!("Balance on {}: {}", provider.name(), balance);
        }
        Ok(Some(balance))
    }
}
