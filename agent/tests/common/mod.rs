//! Fakes shared by the integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use phoenix::alerts::{AlertChannel, Priority};
use phoenix::errors::AgentError;
use phoenix::models::deployment::{
    Balance, Deployment, DeploymentConfig, DeploymentStatus, FundingResult, HealthCheckResult,
};
use phoenix::models::marketplace::{Bid, LeaseId, LeaseState, ProviderLeaseStatus, ServiceStatus, TxResult};
use phoenix::monitors::connectivity::PeerNetwork;
use phoenix::monitors::external_balance::BalanceSource;
use phoenix::providers::direct::shell::{RemoteShell, ShellOutput};
use phoenix::providers::marketplace::chain::MarketplaceChain;
use phoenix::providers::marketplace::gateway::ProviderGateway;
use phoenix::providers::marketplace::manifest::{Manifest, RenderedManifest};
use phoenix::providers::{Capabilities, ComputeProvider};

pub fn sample_config() -> DeploymentConfig {
    DeploymentConfig::new("img:v1", 0.5, "512Mi", "1Gi")
}

// ================================ PROVIDER ====================================== //

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployBehavior {
    Succeed,
    /// Returns a deployment with status `failed`
    ReturnFailed,
    /// Returns an error
    Error,
}

/// Scripted compute provider
pub struct FakeProvider {
    name: String,
    behavior: Mutex<DeployBehavior>,
    healthy: AtomicBool,
    metered: bool,
    balance: Mutex<f64>,
    destroy_fails: AtomicBool,
    pub deploys: AtomicUsize,
    pub destroys: AtomicUsize,
    pub attached: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new(name: &str, behavior: DeployBehavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Mutex::new(behavior),
            healthy: AtomicBool::new(true),
            metered: true,
            balance: Mutex::new(100.0),
            destroy_fails: AtomicBool::new(false),
            deploys: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            attached: Mutex::new(Vec::new()),
        })
    }

    pub fn unmetered(name: &str, behavior: DeployBehavior) -> Arc<Self> {
        let mut provider = Self::new(name, behavior);
        if let Some(p) = Arc::get_mut(&mut provider) {
            p.metered = false;
        }
        provider
    }

    pub fn set_behavior(&self, behavior: DeployBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_balance(&self, amount: f64) {
        *self.balance.lock().unwrap() = amount;
    }

    pub fn fail_destroy(&self) {
        self.destroy_fails.store(true, Ordering::SeqCst);
    }

    pub fn deploy_count(&self) -> usize {
        self.deploys.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            metered: self.metered,
            logs: false,
        }
    }

    async fn deploy(&self, config: &DeploymentConfig) -> Result<Deployment, AgentError> {
        let n = self.deploys.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-{}", self.name, n);
        match *self.behavior.lock().unwrap() {
            DeployBehavior::Succeed => Ok(Deployment {
                id: id.clone(),
                provider: self.name.clone(),
                status: DeploymentStatus::Running,
                created_at: Utc::now(),
                config: config.clone(),
                metadata: HashMap::from([("handle".to_string(), id)]),
            }),
            DeployBehavior::ReturnFailed => Ok(Deployment::failed(
                id,
                self.name.clone(),
                config.clone(),
                "no bids",
            )),
            DeployBehavior::Error => Err(AgentError::TransactionError {
                code: 11,
                message: format!("{} out of gas", self.name),
            }),
        }
    }

    async fn status(&self, _deployment: &Deployment) -> Result<DeploymentStatus, AgentError> {
        Ok(if self.healthy.load(Ordering::SeqCst) {
            DeploymentStatus::Running
        } else {
            DeploymentStatus::Unknown
        })
    }

    async fn health_check(&self, _deployment: &Deployment) -> Result<HealthCheckResult, AgentError> {
        Ok(if self.healthy.load(Ordering::SeqCst) {
            HealthCheckResult::healthy(std::time::Duration::from_millis(5))
        } else {
            HealthCheckResult::unhealthy("down")
        })
    }

    async fn destroy(&self, _deployment: &Deployment) -> Result<(), AgentError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        if self.destroy_fails.load(Ordering::SeqCst) {
            return Err(AgentError::RemoteError("host unreachable".to_string()));
        }
        Ok(())
    }

    async fn fund(&self, amount: f64) -> Result<FundingResult, AgentError> {
        *self.balance.lock().unwrap() += amount;
        Ok(FundingResult {
            funded: true,
            amount,
            tx_hash: Some("FUNDTX".to_string()),
            message: "ok".to_string(),
        })
    }

    async fn get_balance(&self) -> Result<Balance, AgentError> {
        Ok(Balance {
            amount: *self.balance.lock().unwrap(),
            denom: "AKT".to_string(),
            usd_estimate: None,
        })
    }

    fn attach(&self, deployment: &Deployment) {
        self.attached.lock().unwrap().push(deployment.id.clone());
    }
}

// ================================= ALERTS ======================================= //

/// Records every alert it is asked to send
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, Priority)>>,
    failing: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<(String, Priority)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(message, _)| message.contains(needle))
            .count()
    }
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    async fn send(&self, message: &str, priority: Priority) -> Result<(), AgentError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AgentError::NotifyError("channel down".to_string()));
        }
        self.sent.lock().unwrap().push((message.to_string(), priority));
        Ok(())
    }
}

// ================================= CHAIN ======================================== //

fn tx(hash: &str) -> TxResult {
    TxResult {
        hash: hash.to_string(),
        code: 0,
        raw_log: String::new(),
        height: 1,
    }
}

pub fn bid(provider: &str, price: u64) -> Bid {
    Bid {
        provider: provider.to_string(),
        gseq: 1,
        oseq: 1,
        price,
    }
}

/// Scripted marketplace chain
#[derive(Default)]
pub struct FakeChain {
    /// Successive answers to `open_bids`; the last one repeats
    pub bid_rounds: Mutex<VecDeque<Vec<Bid>>>,
    pub lease_state: Mutex<Option<LeaseState>>,
    pub lease_code: Mutex<u32>,
    pub created: Mutex<Vec<(u64, String)>>,
    pub leases: Mutex<Vec<LeaseId>>,
    pub closed_deployments: Mutex<Vec<u64>>,
    pub closed_leases: Mutex<Vec<LeaseId>>,
    pub deposits: Mutex<Vec<(u64, u64)>>,
    pub bid_queries: AtomicUsize,
    pub balance: Mutex<u128>,
}

impl FakeChain {
    pub fn with_bids(rounds: Vec<Vec<Bid>>) -> Arc<Self> {
        let chain = Self::default();
        *chain.bid_rounds.lock().unwrap() = rounds.into();
        *chain.lease_state.lock().unwrap() = Some(LeaseState::Active);
        Arc::new(chain)
    }

    pub fn reject_leases(&self, code: u32) {
        *self.lease_code.lock().unwrap() = code;
    }
}

#[async_trait]
impl MarketplaceChain for FakeChain {
    fn owner(&self) -> &str {
        "akash1owner"
    }

    async fn create_deployment(
        &self,
        manifest: &RenderedManifest,
        dseq: u64,
        _deposit: u64,
    ) -> Result<TxResult, AgentError> {
        self.created.lock().unwrap().push((dseq, manifest.version.clone()));
        Ok(tx("CREATETX"))
    }

    async fn open_bids(&self, _dseq: u64) -> Result<Vec<Bid>, AgentError> {
        self.bid_queries.fetch_add(1, Ordering::SeqCst);
        let mut rounds = self.bid_rounds.lock().unwrap();
        if rounds.len() > 1 {
            Ok(rounds.pop_front().unwrap_or_default())
        } else {
            Ok(rounds.front().cloned().unwrap_or_default())
        }
    }

    async fn create_lease(&self, lease: &LeaseId) -> Result<TxResult, AgentError> {
        self.leases.lock().unwrap().push(lease.clone());
        let code = *self.lease_code.lock().unwrap();
        Ok(TxResult {
            code,
            raw_log: if code == 0 { String::new() } else { "lease rejected".to_string() },
            ..tx("LEASETX")
        })
    }

    async fn lease_state(&self, _lease: &LeaseId) -> Result<LeaseState, AgentError> {
        self.lease_state
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AgentError::RemoteError("rpc unreachable".to_string()))
    }

    async fn close_lease(&self, lease: &LeaseId) -> Result<TxResult, AgentError> {
        self.closed_leases.lock().unwrap().push(lease.clone());
        Ok(tx("CLOSELEASETX"))
    }

    async fn close_deployment(&self, dseq: u64) -> Result<TxResult, AgentError> {
        self.closed_deployments.lock().unwrap().push(dseq);
        Ok(tx("CLOSETX"))
    }

    async fn deposit(&self, dseq: u64, amount: u64) -> Result<TxResult, AgentError> {
        self.deposits.lock().unwrap().push((dseq, amount));
        Ok(tx("DEPOSITTX"))
    }

    async fn balance(&self, _denom: &str) -> Result<u128, AgentError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn provider_host_uri(&self, provider: &str) -> Result<String, AgentError> {
        Ok(format!("https://{}.example:8443", provider))
    }
}

/// Scripted provider gateway
#[derive(Default)]
pub struct FakeGateway {
    pub manifests: Mutex<Vec<(String, u64)>>,
    pub available: AtomicUsize,
    pub unreachable: AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        let gateway = Self::default();
        gateway.available.store(1, Ordering::SeqCst);
        Arc::new(gateway)
    }
}

#[async_trait]
impl ProviderGateway for FakeGateway {
    async fn send_manifest(&self, host_uri: &str, dseq: u64, _manifest: &Manifest) -> Result<(), AgentError> {
        self.manifests.lock().unwrap().push((host_uri.to_string(), dseq));
        Ok(())
    }

    async fn lease_status(&self, _host_uri: &str, _lease: &LeaseId) -> Result<ProviderLeaseStatus, AgentError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AgentError::RemoteError("connection refused".to_string()));
        }
        let available = self.available.load(Ordering::SeqCst) as u32;
        Ok(ProviderLeaseStatus {
            services: HashMap::from([(
                "app".to_string(),
                ServiceStatus {
                    available,
                    total: 1,
                    uris: Vec::new(),
                },
            )]),
        })
    }
}

// ================================= SHELL ======================================== //

/// Remote shell answering by command prefix
#[derive(Default)]
pub struct FakeShell {
    pub commands: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, ShellOutput)>>,
    pub unreachable: AtomicBool,
}

impl FakeShell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer commands starting with `prefix`; later registrations win
    pub fn respond(&self, prefix: &str, code: i32, stdout: &str, stderr: &str) {
        self.responses.lock().unwrap().push((
            prefix.to_string(),
            ShellOutput {
                code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        ));
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn exec(&self, command: &str) -> Result<ShellOutput, AgentError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AgentError::RemoteError("ssh: connect to host: Connection timed out".to_string()));
        }
        self.commands.lock().unwrap().push(command.to_string());
        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}

// ================================ MONITORS ====================================== //

/// Peer network whose count rises to `after_reconnect` once reconnected
pub struct FakePeers {
    peers: AtomicUsize,
    after_reconnect: usize,
    pub reconnects: AtomicUsize,
}

impl FakePeers {
    pub fn new(peers: usize, after_reconnect: usize) -> Arc<Self> {
        Arc::new(Self {
            peers: AtomicUsize::new(peers),
            after_reconnect,
            reconnects: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PeerNetwork for FakePeers {
    async fn connected_peers(&self) -> Result<usize, AgentError> {
        Ok(self.peers.load(Ordering::SeqCst))
    }

    async fn reconnect(&self) -> Result<(), AgentError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.peers.store(self.after_reconnect, Ordering::SeqCst);
        Ok(())
    }
}

/// Fixed external balance
pub struct FakeBalanceSource {
    pub amount: Mutex<f64>,
}

impl FakeBalanceSource {
    pub fn new(amount: f64) -> Arc<Self> {
        Arc::new(Self {
            amount: Mutex::new(amount),
        })
    }
}

#[async_trait]
impl BalanceSource for FakeBalanceSource {
    fn name(&self) -> &str {
        "openai"
    }

    async fn balance(&self) -> Result<f64, AgentError> {
        Ok(*self.amount.lock().unwrap())
    }
}
