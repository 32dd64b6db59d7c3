//! Deployment models

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// Metadata key carrying the error message of a failed deploy
pub const META_ERROR: &str = "error";

/// A persistent volume attached to the workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolume {
    /// Volume size in unit notation, e.g. `10Gi`
    pub size: String,

    /// Mount path inside the container
    pub mount: String,
}

/// Immutable deployment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Container image reference
    pub image: String,

    /// Fractional CPU units
    pub cpu: f64,

    /// Memory limit, e.g. `512Mi`
    pub memory: String,

    /// Ephemeral storage size, e.g. `1Gi`
    pub storage: String,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Exposed container ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,

    /// Optional persistent volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<PersistentVolume>,
}

impl DeploymentConfig {
    pub fn new(image: impl Into<String>, cpu: f64, memory: impl Into<String>, storage: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            cpu,
            memory: memory.into(),
            storage: storage.into(),
            env: HashMap::new(),
            ports: Vec::new(),
            persistent: None,
        }
    }

    /// Environment variables in key order
    pub fn sorted_env(&self) -> BTreeMap<&str, &str> {
        self.env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self::new("", 0.5, "512Mi", "1Gi")
    }
}

/// Lifecycle status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Running,
    Stopped,
    Failed,
    Unknown,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One instance of the workload on a specific provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Opaque deployment ID
    pub id: String,

    /// Name of the owning provider
    pub provider: String,

    /// Status at the time the record was produced
    pub status: DeploymentStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// The request this deployment was made from
    pub config: DeploymentConfig,

    /// Provider-specific handles
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Deployment {
    /// A deployment that failed without raising, carrying the reason in metadata
    pub fn failed(
        id: impl Into<String>,
        provider: impl Into<String>,
        config: DeploymentConfig,
        error: impl Into<String>,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(META_ERROR.to_string(), error.into());
        Self {
            id: id.into(),
            provider: provider.into(),
            status: DeploymentStatus::Failed,
            created_at: Utc::now(),
            config,
            metadata,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == DeploymentStatus::Failed
    }

    /// Error message of a failed deploy
    pub fn error(&self) -> Option<&str> {
        self.metadata.get(META_ERROR).map(String::as_str)
    }

    /// Look up a metadata key the owning provider depends on
    pub fn require(&self, key: &str) -> Result<&str, AgentError> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| AgentError::MissingMetadata(key.to_string()))
    }
}

/// Wallet or account balance snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub amount: f64,
    pub denom: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usd_estimate: Option<f64>,
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} {}", self.amount, self.denom)?;
        if let Some(usd) = self.usd_estimate {
            write!(f, " (~${:.2})", usd)?;
        }
        Ok(())
    }
}

/// Result of a single health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency: Some(latency),
            message: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency: None,
            message: Some(message.into()),
            checked_at: Utc::now(),
        }
    }
}

/// Outcome of a funding request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingResult {
    pub funded: bool,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub message: String,
}
