//! Error types for the phoenix agent

use thiserror::Error;

/// Main error type for the phoenix agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Deployment error: {0}")]
    DeployError(String),

    /// A broadcast transaction was rejected or returned a non-zero code
    #[error("Transaction failed (code {code}): {message}")]
    TransactionError { code: u32, message: String },

    #[error("No bids received for deployment {dseq} within {waited_secs}s")]
    AuctionTimeout { dseq: u64, waited_secs: u64 },

    #[error("Deployment metadata is missing key '{0}'")]
    MissingMetadata(String),

    #[error("All {attempts} providers failed, last error: {last_error}")]
    FailoverExhausted { attempts: usize, last_error: String },

    #[error("No active deployment")]
    NoActiveDeployment,

    #[error("Remote host error: {0}")]
    RemoteError(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    #[error("Job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Invalid schedule '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Notification error: {0}")]
    NotifyError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
