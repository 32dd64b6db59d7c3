//! Deployment health monitor

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::actions::self_heal::HealOutcome;
use crate::providers::manager::ProviderManager;

/// Recovery invoked after sustained failure
#[async_trait]
pub trait Healer: Send + Sync {
    async fn heal(&self) -> HealOutcome;
}

/// Result of one health tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthTick {
    NoDeployment,
    Healthy,
    Unhealthy { failures: u32 },
    Healed(HealOutcome),
}

pub struct HealthMonitor {
    manager: Arc<ProviderManager>,
    healer: Arc<dyn Healer>,
    max_failures: u32,
    failures: AtomicU32,
}

impl HealthMonitor {
    pub fn new(manager: Arc<ProviderManager>, healer: Arc<dyn Healer>, max_failures: u32) -> Self {
        Self {
            manager,
            healer,
            max_failures: max_failures.max(1),
            failures: AtomicU32::new(0),
        }
    }

    /// Consecutive unhealthy checks since the last healthy one or heal
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub async fn check(&self) -> HealthTick {
        let Some(deployment) = self.manager.active_deployment() else {
            debug!("No active deployment, skipping health check");
            return HealthTick::NoDeployment;
        };
        let provider = self.manager.active_provider();

        let healthy = match provider.health_check(&deployment).await {
            Ok(result) if result.healthy => true,
            Ok(result) => {
                warn!(
                    "Deployment {} on {} unhealthy: {}",
                    deployment.id,
                    provider.name(),
                    result.message.as_deref().unwrap_or("no details")
                );
                false
            }
            Err(e) => {
                warn!("Health check of {} on {} failed: {}", deployment.id, provider.name(), e);
                false
            }
        };

        if healthy {
            self.failures.store(0, Ordering::SeqCst);
            return HealthTick::Healthy;
        }

        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < self.max_failures {
            return HealthTick::Unhealthy { failures };
        }

        info!("{} consecutive failed health checks, healing", failures);
        self.failures.store(0, Ordering::SeqCst);
        HealthTick::Healed(self.healer.heal().await)
    }
}
