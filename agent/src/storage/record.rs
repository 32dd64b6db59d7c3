//! Active deployment record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::models::deployment::Deployment;

/// The deployment the agent keeps alive, as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment: Deployment,

    /// Last time the record was written
    pub saved_at: DateTime<Utc>,
}

/// Persist the active deployment
pub async fn save_deployment(file: &File, deployment: &Deployment) -> Result<(), AgentError> {
    let record = DeploymentRecord {
        deployment: deployment.clone(),
        saved_at: Utc::now(),
    };
    file.write_json(&record).await?;
    debug!("Saved deployment record {}", deployment.id);
    Ok(())
}

/// Load the active deployment, `None` if nothing is recorded
pub async fn load_deployment(file: &File) -> Result<Option<Deployment>, AgentError> {
    if !file.exists().await {
        return Ok(None);
    }

    let record: DeploymentRecord = file.read_json().await.map_err(|e| {
        AgentError::StorageError(format!("Failed to read deployment record: {}", e))
    })?;
    Ok(Some(record.deployment))
}

/// Forget the active deployment
pub async fn clear_deployment(file: &File) -> Result<(), AgentError> {
    file.delete().await
}
