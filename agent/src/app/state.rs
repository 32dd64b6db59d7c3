//! Application state management

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::actions::self_heal::SelfHealer;
use crate::actions::summarizer::StatusSummarizer;
use crate::alerts::channels::{FanoutChannel, LogChannel, WebhookChannel};
use crate::alerts::notifier::Notifier;
use crate::alerts::AlertChannel;
use crate::app::options::AppOptions;
use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::heartbeat::scheduler::{job_fn, HeartbeatScheduler};
use crate::models::deployment::Deployment;
use crate::monitors::connectivity::{ConnectivityMonitor, PeerNetwork};
use crate::monitors::external_balance::{ExternalBalanceMonitor, HttpBalanceSource};
use crate::monitors::funding::FundingMonitor;
use crate::monitors::health::{HealthMonitor, HealthTick};
use crate::providers::direct::shell::{SshOptions, SshShell};
use crate::providers::direct::{DirectHostOptions, DirectHostProvider};
use crate::providers::manager::{ProviderEntry, ProviderManager};
use crate::providers::marketplace::chain::{CliOptions, ProviderServicesCli};
use crate::providers::marketplace::gateway::HttpProviderGateway;
use crate::providers::marketplace::manifest::ManifestOptions;
use crate::providers::marketplace::{MarketplaceOptions, MarketplaceProvider};
use crate::storage::layout::StorageLayout;
use crate::storage::memory::LocalStorage;
use crate::storage::record::{clear_deployment, load_deployment, save_deployment};
use crate::storage::settings::{DirectSettings, MarketplaceSettings, ProviderSettings};

pub const HEALTH_JOB: &str = "health";
pub const FUNDING_JOB: &str = "funding";
pub const SUMMARY_JOB: &str = "summary";
pub const EXTERNAL_BALANCE_JOB: &str = "external_balance";
pub const CONNECTIVITY_JOB: &str = "connectivity";

/// Main application state
pub struct AppState {
    pub version: String,

    pub layout: StorageLayout,

    /// Active deployment record
    pub deployment_file: Arc<File>,

    pub manager: Arc<ProviderManager>,

    /// Agent memory
    pub storage: Arc<LocalStorage>,

    pub notifier: Arc<Notifier>,

    pub healer: Arc<SelfHealer>,

    pub scheduler: Arc<HeartbeatScheduler>,

    /// Messaging network, when the agent runs inside one
    pub peer_network: Option<Arc<dyn PeerNetwork>>,
}

impl AppState {
    /// Build the state from configured providers and restore the recorded deployment
    pub async fn init(version: String, options: &AppOptions) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        let timeout = options.lifecycle.http_timeout;
        let providers = build_providers(&options.providers)?;
        let channel = build_alert_channel(options, timeout)?;
        let storage = Arc::new(LocalStorage::with_snapshot(options.storage.layout.memory_file()).await?);

        let state = Self::assemble(version, options, providers, channel, storage)?;
        state.restore().await?;
        Ok(state)
    }

    /// Build the state from already constructed parts
    pub fn assemble(
        version: String,
        options: &AppOptions,
        providers: Vec<ProviderEntry>,
        channel: Arc<dyn AlertChannel>,
        storage: Arc<LocalStorage>,
    ) -> Result<Self, AgentError> {
        let manager = Arc::new(ProviderManager::new(providers)?);
        let notifier = Arc::new(Notifier::new(channel));
        let healer = Arc::new(SelfHealer::new(
            manager.clone(),
            storage.clone(),
            notifier.clone(),
            options.thresholds.max_retries,
        ));

        Ok(Self {
            version,
            layout: options.storage.layout.clone(),
            deployment_file: Arc::new(options.storage.layout.deployment_file()),
            manager,
            storage,
            notifier,
            healer,
            scheduler: Arc::new(HeartbeatScheduler::new()),
            peer_network: None,
        })
    }

    pub fn with_peer_network(mut self, network: Arc<dyn PeerNetwork>) -> Self {
        self.peer_network = Some(network);
        self
    }

    /// Re-attach the deployment recorded by an earlier process
    pub async fn restore(&self) -> Result<Option<Deployment>, AgentError> {
        let Some(deployment) = load_deployment(&self.deployment_file).await? else {
            return Ok(None);
        };

        if let Err(e) = self.manager.restore(deployment.clone()) {
            warn!("Ignoring deployment record: {}", e);
            return Ok(None);
        }
        Ok(Some(deployment))
    }

    /// Write the manager's active deployment to disk, or clear the record
    pub async fn persist(&self) -> Result<(), AgentError> {
        persist_active(&self.manager, &self.deployment_file).await
    }

    /// Register the heartbeat jobs
    pub fn register_jobs(&self, options: &AppOptions) -> Result<(), AgentError> {
        let schedules = &options.schedules;
        let thresholds = options.thresholds;

        let health = Arc::new(HealthMonitor::new(
            self.manager.clone(),
            self.healer.clone(),
            thresholds.max_failures,
        ));
        let manager = self.manager.clone();
        let deployment_file = self.deployment_file.clone();
        self.scheduler.register(
            HEALTH_JOB,
            &schedules.health,
            job_fn(move || {
                let health = health.clone();
                let manager = manager.clone();
                let deployment_file = deployment_file.clone();
                async move {
                    if let HealthTick::Healed(outcome) = health.check().await {
                        debug!("Heal finished: {:?}", outcome);
                        persist_active(&manager, &deployment_file).await?;
                    }
                    Ok(())
                }
            }),
        )?;

        let funding = Arc::new(FundingMonitor::new(
            self.manager.clone(),
            self.notifier.clone(),
            thresholds.funding,
        ));
        self.scheduler.register(
            FUNDING_JOB,
            &schedules.funding,
            job_fn(move || {
                let funding = funding.clone();
                async move { funding.check().await.map(|_| ()) }
            }),
        )?;

        let summarizer = Arc::new(StatusSummarizer::new(
            self.manager.clone(),
            self.storage.clone(),
            self.notifier.clone(),
        ));
        self.scheduler.register(
            SUMMARY_JOB,
            &schedules.summary,
            job_fn(move || {
                let summarizer = summarizer.clone();
                async move { summarizer.run().await.map(|_| ()) }
            }),
        )?;

        if let Some(external) = &options.external_balance {
            let source = Arc::new(HttpBalanceSource::new(
                external.name.clone(),
                external.url.clone(),
                options.lifecycle.http_timeout,
            )?);
            let monitor = Arc::new(ExternalBalanceMonitor::new(
                source,
                self.notifier.clone(),
                external.threshold,
            ));
            self.scheduler.register(
                EXTERNAL_BALANCE_JOB,
                &schedules.external_balance,
                job_fn(move || {
                    let monitor = monitor.clone();
                    async move { monitor.check().await.map(|_| ()) }
                }),
            )?;
        }

        if let Some(network) = &self.peer_network {
            let monitor = Arc::new(ConnectivityMonitor::new(network.clone(), thresholds.min_peers));
            self.scheduler.register(
                CONNECTIVITY_JOB,
                &schedules.connectivity,
                job_fn(move || {
                    let monitor = monitor.clone();
                    async move { monitor.check().await.map(|_| ()) }
                }),
            )?;
        }

        Ok(())
    }
}

/// Record the active deployment, or remove the record when there is none
pub async fn persist_active(manager: &ProviderManager, file: &File) -> Result<(), AgentError> {
    match manager.active_deployment() {
        Some(deployment) => save_deployment(file, &deployment).await,
        None => clear_deployment(file).await,
    }
}

// ================================ CONSTRUCTION =================================== //

pub fn marketplace_options(settings: &MarketplaceSettings) -> (MarketplaceOptions, CliOptions) {
    let defaults = CliOptions::default();
    let denom = defaults.denom.clone();
    let cli = CliOptions {
        binary: settings.binary.clone(),
        owner: settings.owner.clone(),
        from: settings.key_name.clone(),
        chain_id: settings.chain_id.clone(),
        node: settings.node.clone(),
        gas_prices: settings.gas_prices.clone(),
        keyring_backend: settings.keyring_backend.clone(),
        ..defaults
    };

    let options = MarketplaceOptions {
        name: settings.name.clone(),
        manifest: ManifestOptions {
            denom,
            max_price: settings.max_price,
            ..Default::default()
        },
        deposit: settings.deposit,
        bid_poll_interval: Duration::from_secs(settings.bid_poll_interval_secs),
        bid_timeout: Duration::from_secs(settings.bid_timeout_secs),
        usd_price: settings.usd_price,
        ..Default::default()
    };
    (options, cli)
}

pub fn direct_options(settings: &DirectSettings) -> (DirectHostOptions, SshOptions) {
    let ssh = SshOptions {
        host: settings.host.clone(),
        user: settings.user.clone(),
        port: settings.port,
        identity_file: settings.identity_file.clone(),
        ..Default::default()
    };
    let options = DirectHostOptions {
        name: settings.name.clone(),
        host: settings.host.clone(),
        container_prefix: settings.container_prefix.clone(),
    };
    (options, ssh)
}

/// Instantiate the configured compute backends
pub fn build_providers(settings: &[ProviderSettings]) -> Result<Vec<ProviderEntry>, AgentError> {
    if settings.is_empty() {
        return Err(AgentError::ConfigError("no providers configured".to_string()));
    }

    settings
        .iter()
        .map(|provider| match provider {
            ProviderSettings::Marketplace(s) => {
                if s.owner.is_empty() {
                    return Err(AgentError::ConfigError(format!("provider {} has no owner", s.name)));
                }
                let gateway_timeout = Duration::from_secs(s.gateway_timeout_secs);
                let (options, cli) = marketplace_options(s);
                let marketplace = MarketplaceProvider::new(
                    options,
                    Arc::new(ProviderServicesCli::new(cli)),
                    Arc::new(HttpProviderGateway::new(gateway_timeout)?),
                );
                Ok(ProviderEntry::new(s.priority, Arc::new(marketplace)))
            }
            ProviderSettings::Direct(s) => {
                if s.host.is_empty() {
                    return Err(AgentError::ConfigError(format!("provider {} has no host", s.name)));
                }
                let (options, ssh) = direct_options(s);
                let direct = DirectHostProvider::new(options, Arc::new(SshShell::new(ssh)));
                Ok(ProviderEntry::new(s.priority, Arc::new(direct)))
            }
        })
        .collect()
}

/// Log channel, plus the webhook when one is configured
pub fn build_alert_channel(options: &AppOptions, timeout: Duration) -> Result<Arc<dyn AlertChannel>, AgentError> {
    let mut channels: Vec<Box<dyn AlertChannel>> = vec![Box::new(LogChannel)];

    if let Some(url) = &options.notifications.webhook_url {
        let token = options
            .notifications
            .webhook_token
            .clone()
            .map(SecretString::from);
        channels.push(Box::new(WebhookChannel::new(url.clone(), token, timeout)?));
    }

    Ok(Arc::new(FanoutChannel::new(channels)))
}
