//! Priority-ordered provider manager with failover
//!
//! `deploy` always starts from the highest-priority provider. `failover` starts from the
//! provider right after the active one so it does not immediately retry the provider that
//! just failed.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::models::deployment::{Deployment, DeploymentConfig, DeploymentStatus, HealthCheckResult};
use crate::providers::ComputeProvider;

const EVENT_CAPACITY: usize = 16;

/// A provider and its priority (lower is tried first)
#[derive(Clone)]
pub struct ProviderEntry {
    pub priority: u32,
    pub provider: Arc<dyn ComputeProvider>,
}

impl ProviderEntry {
    pub fn new(priority: u32, provider: Arc<dyn ComputeProvider>) -> Self {
        Self { priority, provider }
    }
}

/// Emitted when failover moved the workload to another provider
#[derive(Debug, Clone, Serialize)]
pub struct FailoverEvent {
    pub from: String,
    pub to: String,
    pub deployment_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ActiveState {
    index: usize,
    deployment: Option<Deployment>,
    config: Option<DeploymentConfig>,
}

/// Owns the providers and the active provider/deployment pair.
///
/// The active pair is updated atomically, but callers must not run `deploy` and
/// `failover` concurrently on the same manager.
pub struct ProviderManager {
    providers: Vec<ProviderEntry>,
    active: RwLock<ActiveState>,
    events: broadcast::Sender<FailoverEvent>,
}

impl ProviderManager {
    pub fn new(mut providers: Vec<ProviderEntry>) -> Result<Self, AgentError> {
        if providers.is_empty() {
            return Err(AgentError::ConfigError("at least one provider is required".to_string()));
        }
        providers.sort_by_key(|entry| entry.priority);

        for (i, entry) in providers.iter().enumerate() {
            let name = entry.provider.name();
            if providers[..i].iter().any(|other| other.provider.name() == name) {
                return Err(AgentError::ConfigError(format!("duplicate provider name: {}", name)));
            }
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            providers,
            active: RwLock::new(ActiveState::default()),
            events,
        })
    }

    /// Receive failover events
    pub fn subscribe(&self) -> broadcast::Receiver<FailoverEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider names in priority order
    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|entry| entry.provider.name().to_string())
            .collect()
    }

    pub fn provider(&self, index: usize) -> Option<Arc<dyn ComputeProvider>> {
        self.providers.get(index).map(|entry| entry.provider.clone())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.providers
            .iter()
            .position(|entry| entry.provider.name() == name)
    }

    pub fn active_index(&self) -> usize {
        self.read().index
    }

    pub fn active_provider(&self) -> Arc<dyn ComputeProvider> {
        let index = self.read().index;
        self.providers[index].provider.clone()
    }

    pub fn active_deployment(&self) -> Option<Deployment> {
        self.read().deployment.clone()
    }

    /// Config of the most recent successful deploy
    pub fn last_config(&self) -> Option<DeploymentConfig> {
        self.read().config.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ActiveState> {
        self.active.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_active(&self, index: usize, deployment: Deployment) {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.index = index;
        active.config = Some(deployment.config.clone());
        active.deployment = Some(deployment);
    }

    fn clear_deployment(&self) {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.deployment = None;
    }

    /// Make a fresh deployment active, announcing the move when it replaced a deployment
    /// on another provider
    fn activate(&self, index: usize, deployment: Deployment) {
        let previous = {
            let active = self.read();
            active
                .deployment
                .as_ref()
                .filter(|_| active.index != index)
                .map(|_| active.index)
        };
        self.set_active(index, deployment.clone());

        if let Some(previous) = previous {
            let from = self.providers[previous].provider.name().to_string();
            let to = self.providers[index].provider.name().to_string();
            info!("Failed over from {} to {}", from, to);
            let _ = self.events.send(FailoverEvent {
                from,
                to,
                deployment_id: deployment.id,
                at: Utc::now(),
            });
        }
    }

    /// Deploy on one provider; a `failed` deployment counts as an error
    async fn try_deploy(&self, index: usize, config: &DeploymentConfig) -> Result<Deployment, AgentError> {
        let provider = &self.providers[index].provider;
        debug!("Deploying on {} (priority {})", provider.name(), self.providers[index].priority);

        let deployment = provider.deploy(config).await?;
        if deployment.is_failed() {
            return Err(AgentError::DeployError(format!(
                "{}: {}",
                provider.name(),
                deployment.error().unwrap_or("deployment failed")
            )));
        }
        Ok(deployment)
    }

    /// Deploy on the first provider, in priority order, that succeeds
    pub async fn deploy(&self, config: &DeploymentConfig) -> Result<Deployment, AgentError> {
        let mut last_error = String::new();

        for index in 0..self.providers.len() {
            match self.try_deploy(index, config).await {
                Ok(deployment) => {
                    info!(
                        "Deployed {} on {}",
                        deployment.id,
                        self.providers[index].provider.name()
                    );
                    self.activate(index, deployment.clone());
                    return Ok(deployment);
                }
                Err(e) => {
                    warn!("Provider {} failed: {}", self.providers[index].provider.name(), e);
                    last_error = e.to_string();
                }
            }
        }

        Err(AgentError::FailoverExhausted {
            attempts: self.providers.len(),
            last_error,
        })
    }

    /// Deploy on one specific provider, making it active on success
    pub async fn deploy_to(&self, index: usize, config: &DeploymentConfig) -> Result<Deployment, AgentError> {
        if index >= self.providers.len() {
            return Err(AgentError::Internal(format!("provider index {} out of range", index)));
        }
        let deployment = self.try_deploy(index, config).await?;
        self.activate(index, deployment.clone());
        Ok(deployment)
    }

    /// Move the workload off the active provider.
    ///
    /// The old deployment stays the active record until a replacement is running.
    pub async fn failover(&self) -> Result<Deployment, AgentError> {
        let (current, deployment, config) = {
            let active = self.read();
            (active.index, active.deployment.clone(), active.config.clone())
        };
        let config = config
            .or_else(|| deployment.as_ref().map(|d| d.config.clone()))
            .ok_or(AgentError::NoActiveDeployment)?;

        self.destroy_stale().await;

        let count = self.providers.len();
        let mut last_error = String::new();
        for offset in 1..=count {
            let index = (current + offset) % count;
            match self.try_deploy(index, &config).await {
                Ok(deployment) => {
                    self.activate(index, deployment.clone());
                    return Ok(deployment);
                }
                Err(e) => {
                    warn!("Failover to {} failed: {}", self.providers[index].provider.name(), e);
                    last_error = e.to_string();
                }
            }
        }

        Err(AgentError::FailoverExhausted {
            attempts: count,
            last_error,
        })
    }

    pub async fn status(&self) -> Result<DeploymentStatus, AgentError> {
        let deployment = self.active_deployment().ok_or(AgentError::NoActiveDeployment)?;
        self.active_provider().status(&deployment).await
    }

    pub async fn health_check(&self) -> Result<HealthCheckResult, AgentError> {
        let deployment = self.active_deployment().ok_or(AgentError::NoActiveDeployment)?;
        self.active_provider().health_check(&deployment).await
    }

    /// Destroy the active deployment
    pub async fn destroy(&self) -> Result<(), AgentError> {
        let deployment = self.active_deployment().ok_or(AgentError::NoActiveDeployment)?;
        self.active_provider().destroy(&deployment).await?;
        self.clear_deployment();
        Ok(())
    }

    /// Best-effort teardown of the active deployment that keeps it as the active record,
    /// so health checks keep seeing it until a replacement succeeds
    pub async fn destroy_stale(&self) {
        let Some(deployment) = self.active_deployment() else {
            return;
        };
        let provider = self.active_provider();
        if let Err(e) = provider.destroy(&deployment).await {
            warn!("Failed to destroy stale {} on {}: {}", deployment.id, provider.name(), e);
        }
    }

    /// Re-attach a deployment recorded by an earlier process
    pub fn restore(&self, deployment: Deployment) -> Result<(), AgentError> {
        let index = self.index_of(&deployment.provider).ok_or_else(|| {
            AgentError::ConfigError(format!(
                "recorded deployment belongs to unknown provider {}",
                deployment.provider
            ))
        })?;
        self.providers[index].provider.attach(&deployment);
        info!("Restored deployment {} on {}", deployment.id, deployment.provider);
        self.set_active(index, deployment);
        Ok(())
    }
}
