//! Direct host backend
//!
//! Runs the workload as a docker container on an operator-controlled host reached over
//! SSH. There is no auction and no token economy.

pub mod docker;
pub mod shell;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::models::deployment::{
    Balance, Deployment, DeploymentConfig, DeploymentStatus, FundingResult, HealthCheckResult,
};
use crate::providers::{Capabilities, ComputeProvider};
use crate::utils::short_id;

use shell::RemoteShell;

const KEY_CONTAINER: &str = "container";
const KEY_HOST: &str = "host";

/// Direct host provider options
#[derive(Debug, Clone)]
pub struct DirectHostOptions {
    /// Provider name
    pub name: String,

    /// Host label recorded in deployment metadata
    pub host: String,

    /// Prefix of generated container names
    pub container_prefix: String,
}

impl Default for DirectHostOptions {
    fn default() -> Self {
        Self {
            name: "direct".to_string(),
            host: String::new(),
            container_prefix: "phoenix".to_string(),
        }
    }
}

/// Backend handles of a direct host deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectHandle {
    pub container: String,
    pub host: String,
}

impl DirectHandle {
    pub fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (KEY_CONTAINER.to_string(), self.container.clone()),
            (KEY_HOST.to_string(), self.host.clone()),
        ])
    }

    pub fn from_deployment(deployment: &Deployment) -> Result<Self, AgentError> {
        Ok(Self {
            container: deployment.require(KEY_CONTAINER)?.to_string(),
            host: deployment.require(KEY_HOST)?.to_string(),
        })
    }
}

/// Compute provider running containers over SSH
pub struct DirectHostProvider {
    options: DirectHostOptions,
    shell: Arc<dyn RemoteShell>,
}

impl DirectHostProvider {
    pub fn new(options: DirectHostOptions, shell: Arc<dyn RemoteShell>) -> Self {
        Self { options, shell }
    }

    async fn run_checked(&self, command: &str) -> Result<String, AgentError> {
        let output = self.shell.exec(command).await?;
        if !output.success() {
            return Err(AgentError::DeployError(format!(
                "`{}` failed on {} (exit {}): {}",
                command, self.options.host, output.code, output.stderr
            )));
        }
        Ok(output.stdout)
    }

    /// Container state, `None` when the container does not exist
    async fn inspect(&self, container: &str) -> Result<Option<DeploymentStatus>, AgentError> {
        let output = self.shell.exec(&docker::inspect_command(container)).await?;
        if output.success() {
            return Ok(Some(docker::map_state(&output.stdout)));
        }
        if docker::is_missing_container(&output.stderr) {
            return Ok(None);
        }
        Err(AgentError::RemoteError(output.stderr))
    }
}

#[async_trait]
impl ComputeProvider for DirectHostProvider {
    fn name(&self) -> &str {
        &self.options.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            metered: false,
            logs: true,
        }
    }

    async fn deploy(&self, config: &DeploymentConfig) -> Result<Deployment, AgentError> {
        let container = format!("{}-{}", self.options.container_prefix, short_id());
        let run = docker::run_command(&container, config)?;

        info!("Pulling {} on {}", config.image, self.options.host);
        self.run_checked(&docker::pull_command(&config.image)).await?;

        info!("Starting container {} on {}", container, self.options.host);
        let container_id = self.run_checked(&run).await?;
        debug!("Container id: {}", container_id);

        let handle = DirectHandle {
            container: container.clone(),
            host: self.options.host.clone(),
        };

        Ok(Deployment {
            id: container,
            provider: self.options.name.clone(),
            status: DeploymentStatus::Running,
            created_at: Utc::now(),
            config: config.clone(),
            metadata: handle.to_metadata(),
        })
    }

    async fn status(&self, deployment: &Deployment) -> Result<DeploymentStatus, AgentError> {
        let handle = DirectHandle::from_deployment(deployment)?;
        match self.inspect(&handle.container).await {
            Ok(Some(status)) => Ok(status),
            Ok(None) => Ok(DeploymentStatus::Stopped),
            Err(e) => {
                warn!("Inspecting {} on {} failed: {}", handle.container, handle.host, e);
                Ok(DeploymentStatus::Unknown)
            }
        }
    }

    async fn health_check(&self, deployment: &Deployment) -> Result<HealthCheckResult, AgentError> {
        let handle = match DirectHandle::from_deployment(deployment) {
            Ok(handle) => handle,
            Err(e) => return Ok(HealthCheckResult::unhealthy(e.to_string())),
        };

        let started = Instant::now();
        let result = match self.inspect(&handle.container).await {
            Ok(Some(DeploymentStatus::Running)) => HealthCheckResult::healthy(started.elapsed()),
            Ok(Some(status)) => {
                HealthCheckResult::unhealthy(format!("container {} is {}", handle.container, status))
            }
            Ok(None) => HealthCheckResult::unhealthy(format!("container {} not found", handle.container)),
            Err(e) => HealthCheckResult::unhealthy(format!("host {} unreachable: {}", handle.host, e)),
        };
        Ok(result)
    }

    async fn destroy(&self, deployment: &Deployment) -> Result<(), AgentError> {
        let handle = DirectHandle::from_deployment(deployment)?;

        if self.inspect(&handle.container).await?.is_none() {
            debug!("Container {} already gone", handle.container);
            return Ok(());
        }

        for command in [
            docker::stop_command(&handle.container),
            docker::remove_command(&handle.container),
        ] {
            let output = self.shell.exec(&command).await?;
            if !output.success() && !docker::is_missing_container(&output.stderr) {
                return Err(AgentError::DeployError(format!(
                    "`{}` failed (exit {}): {}",
                    command, output.code, output.stderr
                )));
            }
        }

        info!("Removed container {} from {}", handle.container, handle.host);
        Ok(())
    }

    async fn fund(&self, _amount: f64) -> Result<FundingResult, AgentError> {
        Ok(FundingResult {
            funded: false,
            amount: 0.0,
            tx_hash: None,
            message: "direct host has no token economy".to_string(),
        })
    }

    async fn get_balance(&self) -> Result<Balance, AgentError> {
        Ok(Balance {
            amount: 0.0,
            denom: "n/a".to_string(),
            usd_estimate: None,
        })
    }

    async fn get_logs(&self, deployment: &Deployment, lines: usize) -> Result<String, AgentError> {
        let handle = DirectHandle::from_deployment(deployment)?;
        self.run_checked(&docker::logs_command(&handle.container, lines)).await
    }
}
