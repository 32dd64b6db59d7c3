//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::models::deployment::DeploymentConfig;

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Also write daily log files under the storage directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Workload to keep alive
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Compute backends, in any order (sorted by priority at startup)
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,

    /// Job schedules
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,

    /// Health and self-heal thresholds
    #[serde(default)]
    pub health: HealthSettings,

    /// Provider balance threshold
    #[serde(default)]
    pub funding: FundingSettings,

    /// Optional external credits source
    #[serde(default)]
    pub external_balance: Option<ExternalBalanceSettings>,

    /// Peer connectivity thresholds
    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    /// Alert delivery
    #[serde(default)]
    pub notifications: NotificationSettings,

    /// Local HTTP status server
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            log_to_file: true,
            deployment: DeploymentConfig::default(),
            providers: Vec::new(),
            heartbeat: HeartbeatSettings::default(),
            health: HealthSettings::default(),
            funding: FundingSettings::default(),
            external_balance: None,
            connectivity: ConnectivitySettings::default(),
            notifications: NotificationSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

/// One compute backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderSettings {
    Marketplace(MarketplaceSettings),
    Direct(DirectSettings),
}

impl ProviderSettings {
    pub fn name(&self) -> &str {
        match self {
            ProviderSettings::Marketplace(s) => &s.name,
            ProviderSettings::Direct(s) => &s.name,
        }
    }

    pub fn priority(&self) -> u32 {
        match self {
            ProviderSettings::Marketplace(s) => s.priority,
            ProviderSettings::Direct(s) => s.priority,
        }
    }
}

/// Auction marketplace backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceSettings {
    #[serde(default = "default_marketplace_name")]
    pub name: String,

    #[serde(default)]
    pub priority: u32,

    /// Owner address paying for deployments
    pub owner: String,

    /// Keyring entry used to sign
    #[serde(default = "default_key_name")]
    pub key_name: String,

    #[serde(default = "default_keyring_backend")]
    pub keyring_backend: String,

    #[serde(default = "default_chain_id")]
    pub chain_id: String,

    /// RPC node URL
    #[serde(default = "default_node")]
    pub node: String,

    /// Marketplace client binary
    #[serde(default = "default_binary")]
    pub binary: String,

    #[serde(default = "default_gas_prices")]
    pub gas_prices: String,

    /// Escrow deposit per order, in the smallest unit
    #[serde(default = "default_deposit")]
    pub deposit: u64,

    /// Highest accepted bid, in the smallest unit per block
    #[serde(default = "default_max_price")]
    pub max_price: u64,

    #[serde(default = "default_bid_poll_interval")]
    pub bid_poll_interval_secs: u64,

    #[serde(default = "default_bid_timeout")]
    pub bid_timeout_secs: u64,

    /// Timeout for provider API calls
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_secs: u64,

    /// Fiat price of one display unit, for balance estimates
    #[serde(default)]
    pub usd_price: Option<f64>,
}

fn default_marketplace_name() -> String {
    "akash".to_string()
}

fn default_key_name() -> String {
    "default".to_string()
}

fn default_keyring_backend() -> String {
    "os".to_string()
}

fn default_chain_id() -> String {
    "akashnet-2".to_string()
}

fn default_node() -> String {
    "https://rpc.akashnet.net:443".to_string()
}

fn default_binary() -> String {
    "provider-services".to_string()
}

fn default_gas_prices() -> String {
    "0.025uakt".to_string()
}

fn default_deposit() -> u64 {
    5_000_000
}

fn default_max_price() -> u64 {
    10_000
}

fn default_bid_poll_interval() -> u64 {
    5
}

fn default_bid_timeout() -> u64 {
    120
}

fn default_gateway_timeout() -> u64 {
    30
}

/// SSH/docker backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectSettings {
    #[serde(default = "default_direct_name")]
    pub name: String,

    #[serde(default = "default_direct_priority")]
    pub priority: u32,

    /// SSH host name or address
    pub host: String,

    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key passed to `ssh -i`
    #[serde(default)]
    pub identity_file: Option<String>,

    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,
}

fn default_direct_name() -> String {
    "direct".to_string()
}

fn default_direct_priority() -> u32 {
    10
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_container_prefix() -> String {
    "phoenix".to_string()
}

/// Schedules of the heartbeat jobs (cron or `@every <n>{s,m,h}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    #[serde(default = "default_health_schedule")]
    pub health: String,

    #[serde(default = "default_funding_schedule")]
    pub funding: String,

    #[serde(default = "default_connectivity_schedule")]
    pub connectivity: String,

    #[serde(default = "default_external_balance_schedule")]
    pub external_balance: String,

    #[serde(default = "default_summary_schedule")]
    pub summary: String,
}

fn default_health_schedule() -> String {
    "*/5 * * * *".to_string()
}

fn default_funding_schedule() -> String {
    "0 * * * *".to_string()
}

fn default_connectivity_schedule() -> String {
    "*/10 * * * *".to_string()
}

fn default_external_balance_schedule() -> String {
    "0 */6 * * *".to_string()
}

fn default_summary_schedule() -> String {
    "0 0 * * *".to_string()
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            health: default_health_schedule(),
            funding: default_funding_schedule(),
            connectivity: default_connectivity_schedule(),
            external_balance: default_external_balance_schedule(),
            summary: default_summary_schedule(),
        }
    }
}

/// Health and self-heal thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Consecutive failed checks before healing
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Heal attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_failures() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    5
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            max_retries: default_max_retries(),
        }
    }
}

/// Provider balance threshold, in display units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSettings {
    #[serde(default = "default_funding_threshold")]
    pub threshold: f64,
}

fn default_funding_threshold() -> f64 {
    5.0
}

impl Default for FundingSettings {
    fn default() -> Self {
        Self {
            threshold: default_funding_threshold(),
        }
    }
}

/// External credits endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalBalanceSettings {
    /// Label used in alerts
    pub name: String,

    /// URL returning `{"balance": <number>}`
    pub url: String,

    pub threshold: f64,
}

/// Peer connectivity threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    #[serde(default = "default_min_peers")]
    pub min_peers: usize,
}

fn default_min_peers() -> usize {
    1
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            min_peers: default_min_peers(),
        }
    }
}

/// Alert delivery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Webhook receiving JSON alerts; alerts only go to the log when absent
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Bearer token for the webhook
    #[serde(default, skip_serializing)]
    pub webhook_token: Option<String>,
}

/// Local HTTP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}
