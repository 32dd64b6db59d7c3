//! Auction-based marketplace backend
//!
//! A deploy opens an order on chain, waits for provider bids, leases the cheapest one and
//! pushes the manifest to the winner. Retrying a failed deploy is the manager's job, not
//! this provider's.

pub mod auction;
pub mod chain;
pub mod gateway;
pub mod manifest;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::models::deployment::{
    Balance, Deployment, DeploymentConfig, DeploymentStatus, FundingResult, HealthCheckResult,
};
use crate::models::marketplace::{Bid, LeaseId, LeaseState};
use crate::providers::{Capabilities, ComputeProvider};

use auction::{select_cheapest, AuctionEvent, AuctionFsm};
use chain::{ensure_success, MarketplaceChain};
use gateway::ProviderGateway;
use manifest::{ManifestOptions, RenderedManifest};

const KEY_OWNER: &str = "owner";
const KEY_DSEQ: &str = "dseq";
const KEY_GSEQ: &str = "gseq";
const KEY_OSEQ: &str = "oseq";
const KEY_PROVIDER: &str = "provider";
const KEY_HOST_URI: &str = "host_uri";
const KEY_LEASE_TX: &str = "lease_tx";
const KEY_VERSION: &str = "version";

/// Marketplace provider options
#[derive(Debug, Clone)]
pub struct MarketplaceOptions {
    /// Provider name
    pub name: String,

    /// Manifest naming and pricing
    pub manifest: ManifestOptions,

    /// Escrow deposit per order, in the smallest unit
    pub deposit: u64,

    /// Interval between bid queries
    pub bid_poll_interval: Duration,

    /// Total time an order waits for bids
    pub bid_timeout: Duration,

    /// Denomination shown to operators
    pub display_denom: String,

    /// Smallest units per display unit
    pub display_scale: u64,

    /// Fiat price of one display unit, for estimates
    pub usd_price: Option<f64>,
}

impl Default for MarketplaceOptions {
    fn default() -> Self {
        Self {
            name: "akash".to_string(),
            manifest: ManifestOptions::default(),
            deposit: 5_000_000,
            bid_poll_interval: Duration::from_secs(5),
            bid_timeout: Duration::from_secs(120),
            display_denom: "AKT".to_string(),
            display_scale: 1_000_000,
            usd_price: None,
        }
    }
}

/// Backend handles of a marketplace deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceHandle {
    pub lease: LeaseId,
    pub host_uri: String,
    pub lease_tx: String,
    pub version: String,
}

impl MarketplaceHandle {
    pub fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (KEY_OWNER.to_string(), self.lease.owner.clone()),
            (KEY_DSEQ.to_string(), self.lease.dseq.to_string()),
            (KEY_GSEQ.to_string(), self.lease.gseq.to_string()),
            (KEY_OSEQ.to_string(), self.lease.oseq.to_string()),
            (KEY_PROVIDER.to_string(), self.lease.provider.clone()),
            (KEY_HOST_URI.to_string(), self.host_uri.clone()),
            (KEY_LEASE_TX.to_string(), self.lease_tx.clone()),
            (KEY_VERSION.to_string(), self.version.clone()),
        ])
    }

    pub fn from_deployment(deployment: &Deployment) -> Result<Self, AgentError> {
        let number = |key: &str| -> Result<u64, AgentError> {
            deployment
                .require(key)?
                .parse()
                .map_err(|_| AgentError::MissingMetadata(format!("{} (not a number)", key)))
        };
        let sequence = |key: &str| -> Result<u32, AgentError> {
            u32::try_from(number(key)?)
                .map_err(|_| AgentError::MissingMetadata(format!("{} (out of range)", key)))
        };

        Ok(Self {
            lease: LeaseId {
                owner: deployment.require(KEY_OWNER)?.to_string(),
                dseq: number(KEY_DSEQ)?,
                gseq: sequence(KEY_GSEQ)?,
                oseq: sequence(KEY_OSEQ)?,
                provider: deployment.require(KEY_PROVIDER)?.to_string(),
            },
            host_uri: deployment.require(KEY_HOST_URI)?.to_string(),
            lease_tx: deployment.require(KEY_LEASE_TX)?.to_string(),
            version: deployment.require(KEY_VERSION)?.to_string(),
        })
    }
}

/// Compute provider backed by the auction marketplace
pub struct MarketplaceProvider {
    options: MarketplaceOptions,
    chain: Arc<dyn MarketplaceChain>,
    gateway: Arc<dyn ProviderGateway>,
    last_dseq: AtomicU64,
    funded_dseq: Mutex<Option<u64>>,
}

impl MarketplaceProvider {
    pub fn new(
        options: MarketplaceOptions,
        chain: Arc<dyn MarketplaceChain>,
        gateway: Arc<dyn ProviderGateway>,
    ) -> Self {
        Self {
            options,
            chain,
            gateway,
            last_dseq: AtomicU64::new(0),
            funded_dseq: Mutex::new(None),
        }
    }

    /// Render the manifest a deploy of `config` would submit
    pub fn render(&self, config: &DeploymentConfig) -> Result<RenderedManifest, AgentError> {
        manifest::render(config, &self.options.manifest)
    }

    /// Unique, increasing order sequence
    fn next_dseq(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut prev = self.last_dseq.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_dseq
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Escrow that `fund` tops up; only leased orders qualify
    fn remember_dseq(&self, dseq: u64) {
        let mut funded = self.funded_dseq.lock().unwrap_or_else(|e| e.into_inner());
        *funded = Some(dseq);
    }

    fn forget_dseq(&self, dseq: u64) {
        let mut funded = self.funded_dseq.lock().unwrap_or_else(|e| e.into_inner());
        if *funded == Some(dseq) {
            *funded = None;
        }
    }

    fn to_display(&self, smallest: u128) -> f64 {
        smallest as f64 / self.options.display_scale as f64
    }

    fn advance(fsm: &mut AuctionFsm, event: AuctionEvent) -> Result<(), AgentError> {
        fsm.process(event).map_err(AgentError::Internal)?;
        debug!("Auction stage: {:?}", fsm.stage());
        Ok(())
    }

    /// Poll open bids until some arrive or the bid window closes
    async fn collect_bids(&self, dseq: u64) -> Vec<Bid> {
        let deadline = Instant::now() + self.options.bid_timeout;
        let mut seen: Vec<Bid> = Vec::new();

        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.chain.open_bids(dseq)).await {
                Ok(Ok(bids)) if !bids.is_empty() => {
                    if !seen.is_empty() {
                        // Second look after one interval lets competing bids land
                        return bids;
                    }
                    debug!("{} bid(s) for order {}, waiting one interval for more", bids.len(), dseq);
                    seen = bids;
                }
                Ok(Ok(_)) => {
                    if !seen.is_empty() {
                        return seen;
                    }
                    debug!("No bids yet for order {}", dseq);
                }
                Ok(Err(e)) => warn!("Bid query for order {} failed: {}", dseq, e),
                Err(_) => break,
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.options.bid_poll_interval.min(remaining)).await;
        }

        seen
    }

    async fn lease_and_push(
        &self,
        fsm: &mut AuctionFsm,
        config: &DeploymentConfig,
        rendered: &RenderedManifest,
        dseq: u64,
        winner: &Bid,
    ) -> Result<Deployment, AgentError> {
        let lease = LeaseId::from_bid(self.chain.owner(), dseq, winner);
        let lease_tx = ensure_success(self.chain.create_lease(&lease).await?)?;
        Self::advance(fsm, AuctionEvent::LeaseCreated)?;
        info!("Lease created with {} (tx {})", lease.provider, lease_tx.hash);

        let host_uri = self.chain.provider_host_uri(&lease.provider).await?;
        self.gateway
            .send_manifest(&host_uri, dseq, &rendered.manifest)
            .await?;
        Self::advance(fsm, AuctionEvent::ManifestAccepted)?;
        info!("Manifest accepted by {}", host_uri);

        let handle = MarketplaceHandle {
            lease,
            host_uri,
            lease_tx: lease_tx.hash,
            version: rendered.version.clone(),
        };

        Ok(Deployment {
            id: dseq.to_string(),
            provider: self.options.name.clone(),
            status: DeploymentStatus::Running,
            created_at: Utc::now(),
            config: config.clone(),
            metadata: handle.to_metadata(),
        })
    }

    /// Close an order that will not be used, releasing its escrow
    async fn abandon_order(&self, dseq: u64) {
        match self.chain.close_deployment(dseq).await.and_then(ensure_success) {
            Ok(_) => info!("Closed abandoned order {}", dseq),
            Err(e) => warn!("Failed to close abandoned order {}: {}", dseq, e),
        }
    }
}

fn is_already_closed(err: &AgentError) -> bool {
    match err {
        AgentError::TransactionError { message, .. } | AgentError::RemoteError(message) => {
            let message = message.to_lowercase();
            message.contains("closed") || message.contains("not found") || message.contains("not active")
        }
        _ => false,
    }
}

#[async_trait]
impl ComputeProvider for MarketplaceProvider {
    fn name(&self) -> &str {
        &self.options.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            metered: true,
            logs: false,
        }
    }

    async fn deploy(&self, config: &DeploymentConfig) -> Result<Deployment, AgentError> {
        let mut fsm = AuctionFsm::new();
        let rendered = self.render(config)?;
        let dseq = self.next_dseq();
        info!(
            "Submitting order {} for {} (version {})",
            dseq, config.image, rendered.version
        );

        let created = self
            .chain
            .create_deployment(&rendered, dseq, self.options.deposit)
            .await
            .and_then(ensure_success);
        if let Err(e) = created {
            let _ = fsm.process(AuctionEvent::Error(e.to_string()));
            return Err(e);
        }
        Self::advance(&mut fsm, AuctionEvent::OrderCreated)?;

        let bids = self.collect_bids(dseq).await;
        let Some(winner) = select_cheapest(&bids).cloned() else {
            Self::advance(&mut fsm, AuctionEvent::BidTimeout)?;
            let err = AgentError::AuctionTimeout {
                dseq,
                waited_secs: self.options.bid_timeout.as_secs(),
            };
            warn!("{}", err);
            self.abandon_order(dseq).await;
            return Ok(Deployment::failed(
                dseq.to_string(),
                self.options.name.clone(),
                config.clone(),
                err.to_string(),
            ));
        };
        Self::advance(&mut fsm, AuctionEvent::BidSelected)?;
        info!(
            "Selected bid from {} at {} (of {} bids)",
            winner.provider,
            winner.price,
            bids.len()
        );

        match self
            .lease_and_push(&mut fsm, config, &rendered, dseq, &winner)
            .await
        {
            Ok(deployment) => {
                self.remember_dseq(dseq);
                Ok(deployment)
            }
            Err(e) => {
                let _ = fsm.process(AuctionEvent::Error(e.to_string()));
                warn!("Deploy of order {} failed: {}", dseq, e);
                self.abandon_order(dseq).await;
                Err(e)
            }
        }
    }

    async fn status(&self, deployment: &Deployment) -> Result<DeploymentStatus, AgentError> {
        let handle = MarketplaceHandle::from_deployment(deployment)?;
        let status = match self.chain.lease_state(&handle.lease).await {
            Ok(LeaseState::Active) => DeploymentStatus::Running,
            Ok(LeaseState::Closed) => DeploymentStatus::Stopped,
            Ok(LeaseState::InsufficientFunds) => DeploymentStatus::Failed,
            Ok(LeaseState::Other) => DeploymentStatus::Unknown,
            Err(e) => {
                warn!("Lease query for {} failed: {}", deployment.id, e);
                DeploymentStatus::Unknown
            }
        };
        Ok(status)
    }

    async fn health_check(&self, deployment: &Deployment) -> Result<HealthCheckResult, AgentError> {
        let handle = match MarketplaceHandle::from_deployment(deployment) {
            Ok(handle) => handle,
            Err(e) => return Ok(HealthCheckResult::unhealthy(e.to_string())),
        };

        let started = Instant::now();
        match self.gateway.lease_status(&handle.host_uri, &handle.lease).await {
            Ok(status) if status.any_available() => Ok(HealthCheckResult::healthy(started.elapsed())),
            Ok(_) => Ok(HealthCheckResult::unhealthy("no service replica is available")),
            Err(e) => Ok(HealthCheckResult::unhealthy(format!(
                "provider {} unreachable: {}",
                handle.host_uri, e
            ))),
        }
    }

    async fn destroy(&self, deployment: &Deployment) -> Result<(), AgentError> {
        let handle = MarketplaceHandle::from_deployment(deployment)?;
        self.forget_dseq(handle.lease.dseq);

        if let Err(e) = self.chain.close_lease(&handle.lease).await.and_then(ensure_success) {
            warn!("Closing lease for {} failed: {}", deployment.id, e);
        }

        match self
            .chain
            .close_deployment(handle.lease.dseq)
            .await
            .and_then(ensure_success)
        {
            Ok(tx) => {
                info!("Closed deployment {} (tx {})", deployment.id, tx.hash);
                Ok(())
            }
            Err(e) if is_already_closed(&e) => {
                debug!("Deployment {} already closed", deployment.id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fund(&self, amount: f64) -> Result<FundingResult, AgentError> {
        let dseq = *self.funded_dseq.lock().unwrap_or_else(|e| e.into_inner());
        let Some(dseq) = dseq else {
            return Ok(FundingResult {
                funded: false,
                amount: 0.0,
                tx_hash: None,
                message: "no deployment escrow to fund".to_string(),
            });
        };

        let smallest = (amount * self.options.display_scale as f64).round() as u64;
        let tx = ensure_success(self.chain.deposit(dseq, smallest).await?)?;
        info!("Deposited {} {} into order {}", amount, self.options.display_denom, dseq);
        Ok(FundingResult {
            funded: true,
            amount,
            tx_hash: Some(tx.hash),
            message: format!("deposited into escrow of order {}", dseq),
        })
    }

    async fn get_balance(&self) -> Result<Balance, AgentError> {
        let raw = self.chain.balance(&self.options.manifest.denom).await?;
        let amount = self.to_display(raw);
        Ok(Balance {
            amount,
            denom: self.options.display_denom.clone(),
            usd_estimate: self.options.usd_price.map(|price| amount * price),
        })
    }

    fn attach(&self, deployment: &Deployment) {
        if let Ok(handle) = MarketplaceHandle::from_deployment(deployment) {
            self.remember_dseq(handle.lease.dseq);
        }
    }
}
