//! Compute providers
//!
//! Every backend implements [`ComputeProvider`]. The [`manager::ProviderManager`] only
//! depends on the trait, so new backends plug in without touching failover logic.

pub mod direct;
pub mod manager;
pub mod marketplace;

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::models::deployment::{
    Balance, Deployment, DeploymentConfig, DeploymentStatus, FundingResult, HealthCheckResult,
};

/// What a backend supports beyond the base contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Backend has a token economy (balance/funding are meaningful)
    pub metered: bool,

    /// Backend can return container logs
    pub logs: bool,
}

/// Uniform interface of a compute backend
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Provider name, unique within a manager
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Deploy the workload.
    ///
    /// A recoverable failure such as an auction timeout is returned as a deployment with
    /// status `failed` and the reason under the `error` metadata key.
    async fn deploy(&self, config: &DeploymentConfig) -> Result<Deployment, AgentError>;

    async fn status(&self, deployment: &Deployment) -> Result<DeploymentStatus, AgentError>;

    /// Probe the workload. Unreachable endpoints yield an unhealthy result.
    async fn health_check(&self, deployment: &Deployment) -> Result<HealthCheckResult, AgentError>;

    /// Tear down the deployment. Destroying an already-gone deployment succeeds.
    async fn destroy(&self, deployment: &Deployment) -> Result<(), AgentError>;

    async fn fund(&self, amount: f64) -> Result<FundingResult, AgentError>;

    async fn get_balance(&self) -> Result<Balance, AgentError>;

    async fn get_logs(&self, _deployment: &Deployment, _lines: usize) -> Result<String, AgentError> {
        Err(AgentError::Unsupported(format!("{} does not provide logs", self.name())))
    }

    /// Re-attach a deployment this provider created in an earlier process
    fn attach(&self, _deployment: &Deployment) {}
}
