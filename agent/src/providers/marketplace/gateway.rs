//! HTTP access to the hosting provider's own API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error};
use url::Url;

use crate::errors::AgentError;
use crate::models::marketplace::{LeaseId, ProviderLeaseStatus};
use crate::providers::marketplace::manifest::Manifest;

/// Calls made directly against a winning provider
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Hand the manifest to the provider so it pulls and starts the image
    async fn send_manifest(&self, host_uri: &str, dseq: u64, manifest: &Manifest) -> Result<(), AgentError>;

    /// Replica status of every service in the lease
    async fn lease_status(&self, host_uri: &str, lease: &LeaseId) -> Result<ProviderLeaseStatus, AgentError>;
}

/// [`ProviderGateway`] over HTTPS
pub struct HttpProviderGateway {
    client: Client,
}

impl HttpProviderGateway {
    pub fn new(timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn endpoint(host_uri: &str, path: &str) -> Result<Url, AgentError> {
        let base = Url::parse(host_uri)
            .map_err(|e| AgentError::DeployError(format!("Invalid provider URI {}: {}", host_uri, e)))?;
        base.join(path)
            .map_err(|e| AgentError::DeployError(format!("Invalid provider path {}: {}", path, e)))
    }
}

#[async_trait]
impl ProviderGateway for HttpProviderGateway {
    async fn send_manifest(&self, host_uri: &str, dseq: u64, manifest: &Manifest) -> Result<(), AgentError> {
        let url = Self::endpoint(host_uri, &format!("/deployment/{}/manifest", dseq))?;
        debug!("PUT {}", url);

        let response = self.client.put(url).json(manifest).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Manifest push failed: {} - {}", status, body);
            return Err(AgentError::DeployError(format!(
                "Manifest rejected by provider: {} - {}",
                status, body
            )));
        }

        Ok(())
    }

    async fn lease_status(&self, host_uri: &str, lease: &LeaseId) -> Result<ProviderLeaseStatus, AgentError> {
        let url = Self::endpoint(
            host_uri,
            &format!("/lease/{}/{}/{}/status", lease.dseq, lease.gseq, lease.oseq),
        )?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::RemoteError(format!(
                "Lease status request failed: {} - {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }
}
