//! One-shot operator commands

use serde::Serialize;
use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::app::state::{direct_options, marketplace_options, AppState};
use crate::errors::AgentError;
use crate::models::deployment::{
    Balance, Deployment, DeploymentConfig, DeploymentStatus, FundingResult, HealthCheckResult,
};
use crate::providers::direct::docker;
use crate::providers::marketplace::manifest;
use crate::storage::record::clear_deployment;
use crate::storage::settings::ProviderSettings;

/// Deploy `config`, on `provider` when given, otherwise on the first provider that succeeds
pub async fn deploy(
    state: &AppState,
    config: &DeploymentConfig,
    provider: Option<&str>,
) -> Result<Deployment, AgentError> {
    if let Some(existing) = state.manager.active_deployment() {
        return Err(AgentError::DeployError(format!(
            "deployment {} is already active on {}; destroy it first",
            existing.id, existing.provider
        )));
    }

    let deployment = match provider {
        Some(name) => {
            let index = state
                .manager
                .index_of(name)
                .ok_or_else(|| AgentError::ConfigError(format!("unknown provider {}", name)))?;
            state.manager.deploy_to(index, config).await?
        }
        None => state.manager.deploy(config).await?,
    };

    state.persist().await?;
    info!("Deployed {} on {}", deployment.id, deployment.provider);
    Ok(deployment)
}

/// What a deploy would submit to one provider
#[derive(Debug, Clone, Serialize)]
pub struct DeployPlan {
    pub provider: String,
    pub priority: u32,
    pub kind: &'static str,
    /// Manifest version, for marketplace providers
    pub version: Option<String>,
    /// Manifest YAML or shell commands
    pub preview: String,
}

/// Render what each provider would receive, without touching any of them
pub fn plan(options: &AppOptions, provider: Option<&str>) -> Result<Vec<DeployPlan>, AgentError> {
    let mut providers: Vec<&ProviderSettings> = options
        .providers
        .iter()
        .filter(|p| provider.map(|name| p.name() == name).unwrap_or(true))
        .collect();
    if let (Some(name), true) = (provider, providers.is_empty()) {
        return Err(AgentError::ConfigError(format!("unknown provider {}", name)));
    }
    providers.sort_by_key(|p| p.priority());

    let config = &options.deployment;
    providers
        .into_iter()
        .map(|p| match p {
            ProviderSettings::Marketplace(s) => {
                let (marketplace, _) = marketplace_options(s);
                let rendered = manifest::render(config, &marketplace.manifest)?;
                Ok(DeployPlan {
                    provider: s.name.clone(),
                    priority: s.priority,
                    kind: "marketplace",
                    version: Some(rendered.version),
                    preview: rendered.yaml,
                })
            }
            ProviderSettings::Direct(s) => {
                let (direct, _) = direct_options(s);
                let container = format!("{}-<id>", direct.container_prefix);
                let preview = format!(
                    "{}\n{}",
                    docker::pull_command(&config.image),
                    docker::run_command(&container, config)?
                );
                Ok(DeployPlan {
                    provider: s.name.clone(),
                    priority: s.priority,
                    kind: "direct",
                    version: None,
                    preview,
                })
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub provider: String,
    pub deployment: Option<Deployment>,
    pub status: Option<DeploymentStatus>,
    pub health: Option<HealthCheckResult>,
    pub balance: Option<Balance>,
}

pub async fn status(state: &AppState) -> Result<StatusReport, AgentError> {
    let provider = state.manager.active_provider();
    let deployment = state.manager.active_deployment();

    let (status, health) = match &deployment {
        Some(d) => (
            Some(provider.status(d).await.unwrap_or(DeploymentStatus::Unknown)),
            Some(provider.health_check(d).await?),
        ),
        None => (None, None),
    };

    let balance = if provider.capabilities().metered {
        Some(provider.get_balance().await?)
    } else {
        None
    };

    Ok(StatusReport {
        provider: provider.name().to_string(),
        deployment,
        status,
        health,
        balance,
    })
}

/// Top up the active provider
pub async fn fund(state: &AppState, amount: f64) -> Result<FundingResult, AgentError> {
    if amount.is_nan() || amount <= 0.0 {
        return Err(AgentError::ConfigError(format!("invalid amount {}", amount)));
    }
    state.manager.active_provider().fund(amount).await
}

#[derive(Debug, Clone, Serialize)]
pub struct DestroyReport {
    pub deployment_id: Option<String>,
    pub destroyed: bool,
    pub memory_wiped: bool,
}

/// Tear down the active deployment.
///
/// With `force` the local record is dropped even when there is nothing to destroy or the
/// provider refuses.
pub async fn destroy(state: &AppState, wipe_memory: bool, force: bool) -> Result<DestroyReport, AgentError> {
    let deployment = state.manager.active_deployment();

    let destroyed = match &deployment {
        None if force => false,
        None => return Err(AgentError::NoActiveDeployment),
        Some(d) => match state.manager.destroy().await {
            Ok(()) => true,
            Err(e) if force => {
                warn!("Destroy of {} failed, dropping record anyway: {}", d.id, e);
                false
            }
            Err(e) => return Err(e),
        },
    };

    if destroyed {
        state.persist().await?;
    } else {
        clear_deployment(&state.deployment_file).await?;
    }

    if wipe_memory {
        state.storage.wipe().await?;
    }

    Ok(DestroyReport {
        deployment_id: deployment.map(|d| d.id),
        destroyed,
        memory_wiped: wipe_memory,
    })
}
