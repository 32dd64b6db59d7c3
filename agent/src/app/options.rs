//! Application configuration options

use std::time::Duration;

use crate::models::deployment::DeploymentConfig;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{
    ExternalBalanceSettings, HeartbeatSettings, NotificationSettings, ProviderSettings, Settings,
};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Workload to keep alive
    pub deployment: DeploymentConfig,

    /// Compute backends
    pub providers: Vec<ProviderSettings>,

    /// Job schedules
    pub schedules: HeartbeatSettings,

    /// Health, healing and balance thresholds
    pub thresholds: Thresholds,

    /// Optional external credits source
    pub external_balance: Option<ExternalBalanceSettings>,

    /// Alert delivery
    pub notifications: NotificationSettings,

    /// Enable local HTTP server
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            deployment: DeploymentConfig::default(),
            providers: Vec::new(),
            schedules: HeartbeatSettings::default(),
            thresholds: Thresholds::default(),
            external_balance: None,
            notifications: NotificationSettings::default(),
            enable_server: true,
            server: ServerOptions::default(),
        }
    }
}

impl AppOptions {
    /// Runtime options for `settings` stored under `layout`
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            storage: StorageOptions { layout },
            deployment: settings.deployment.clone(),
            providers: settings.providers.clone(),
            schedules: settings.heartbeat.clone(),
            thresholds: Thresholds {
                max_failures: settings.health.max_failures,
                max_retries: settings.health.max_retries,
                funding: settings.funding.threshold,
                min_peers: settings.connectivity.min_peers,
            },
            external_balance: settings.external_balance.clone(),
            notifications: settings.notifications.clone(),
            enable_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,

    /// Timeout for outbound HTTP calls (webhooks, balance sources, provider APIs)
    pub http_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
            http_timeout: Duration::from_secs(15),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Consecutive failed health checks before healing
    pub max_failures: u32,

    /// Heal attempts before giving up
    pub max_retries: u32,

    /// Provider balance alert threshold, in display units
    pub funding: f64,

    /// Minimum connected peers
    pub min_peers: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_failures: 3,
            max_retries: 5,
            funding: 5.0,
            min_peers: 1,
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
