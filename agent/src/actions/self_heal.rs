//! Self-healing
//!
//! The healer keeps an explicit retry budget. Each call that is not exhausted spends one
//! attempt: redeploy on the active provider, then walk every provider in priority order.
//! A success refunds the whole budget. Landing on another provider is announced as a
//! failover by the manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::alerts::notifier::Notifier;
use crate::alerts::Priority;
use crate::models::deployment::{Deployment, DeploymentConfig};
use crate::monitors::health::Healer;
use crate::providers::manager::ProviderManager;
use crate::storage::memory::Storage;

/// Memory key holding the last successful heal
pub const LAST_HEAL_KEY: &str = "heartbeat:last_heal";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HealOutcome {
    /// Workload redeployed on `provider`
    Healed { provider: String, deployment_id: String },
    /// This attempt failed on every provider
    Failed { attempt: u32, max_retries: u32 },
    /// Retry budget spent; nothing was attempted
    Exhausted,
    /// Nothing to redeploy
    Skipped,
}

pub struct SelfHealer {
    manager: Arc<ProviderManager>,
    storage: Arc<dyn Storage>,
    notifier: Arc<Notifier>,
    max_retries: u32,
    retry_count: AtomicU32,
    // one heal at a time
    in_progress: tokio::sync::Mutex<()>,
}

impl SelfHealer {
    pub fn new(
        manager: Arc<ProviderManager>,
        storage: Arc<dyn Storage>,
        notifier: Arc<Notifier>,
        max_retries: u32,
    ) -> Self {
        Self {
            manager,
            storage,
            notifier,
            max_retries,
            retry_count: AtomicU32::new(0),
            in_progress: tokio::sync::Mutex::new(()),
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Refill the retry budget
    pub fn reset(&self) {
        self.retry_count.store(0, Ordering::SeqCst);
    }

    pub async fn heal(&self) -> HealOutcome {
        let _guard = self.in_progress.lock().await;

        if self.retry_count() >= self.max_retries {
            error!("Self-heal retry budget exhausted ({})", self.max_retries);
            self.notifier
                .notify(
                    &format!(
                        "Self-heal: max retries ({}) exhausted, manual intervention required",
                        self.max_retries
                    ),
                    Priority::High,
                )
                .await;
            return HealOutcome::Exhausted;
        }

        let Some(config) = self
            .manager
            .last_config()
            .or_else(|| self.manager.active_deployment().map(|d| d.config))
        else {
            warn!("Self-heal skipped: no deployment config known");
            return HealOutcome::Skipped;
        };

        let attempt = self.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Self-heal attempt {}/{}", attempt, self.max_retries);

        if let Some(deployment) = self.redeploy(&config).await {
            return self.on_healed(deployment).await;
        }

        error!("Self-heal attempt {}/{} failed on every provider", attempt, self.max_retries);
        self.notifier
            .notify(
                &format!("Self-heal attempt {}/{} failed", attempt, self.max_retries),
                Priority::High,
            )
            .await;
        HealOutcome::Failed {
            attempt,
            max_retries: self.max_retries,
        }
    }

    async fn redeploy(&self, config: &DeploymentConfig) -> Option<Deployment> {
        let current = self.manager.active_index();

        // the stale record stays active so a failed heal is retried on later checks
        self.manager.destroy_stale().await;

        match self.manager.deploy_to(current, config).await {
            Ok(deployment) => return Some(deployment),
            Err(e) => warn!("Redeploy on current provider failed: {}", e),
        }

        for index in 0..self.manager.len() {
            match self.manager.deploy_to(index, config).await {
                Ok(deployment) => return Some(deployment),
                Err(e) => warn!("Redeploy on provider {} failed: {}", index, e),
            }
        }
        None
    }

    async fn on_healed(&self, deployment: Deployment) -> HealOutcome {
        self.reset();
        info!("Self-healed on {} ({})", deployment.provider, deployment.id);

        if let Err(e) = self.storage.sync_from_relays().await {
            warn!("Memory resync after heal failed: {}", e);
        }

        let record = serde_json::json!({
            "provider": deployment.provider,
            "deployment_id": deployment.id,
            "at": chrono::Utc::now(),
        });
        if let Err(e) = self.storage.set(LAST_HEAL_KEY, record, HashMap::new()).await {
            warn!("Failed to record heal: {}", e);
        }

        self.notifier
            .notify(
                &format!("Self-healed: workload running on {} ({})", deployment.provider, deployment.id),
                Priority::Normal,
            )
            .await;

        HealOutcome::Healed {
            provider: deployment.provider,
            deployment_id: deployment.id,
        }
    }
}

#[async_trait]
impl Healer for SelfHealer {
    async fn heal(&self) -> HealOutcome {
        SelfHealer::heal(self).await
    }
}
