//! Peer connectivity monitor

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::AgentError;

/// The agent's messaging network
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    async fn connected_peers(&self) -> Result<usize, AgentError>;

    async fn reconnect(&self) -> Result<(), AgentError>;
}

/// Peer counts around a reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityReport {
    pub before: usize,
    pub after: Option<usize>,
}

pub struct ConnectivityMonitor {
    network: Arc<dyn PeerNetwork>,
    min_peers: usize,
}

impl ConnectivityMonitor {
    pub fn new(network: Arc<dyn PeerNetwork>, min_peers: usize) -> Self {
        Self { network, min_peers }
    }

    pub async fn check(&self) -> Result<ConnectivityReport, AgentError> {
        let before = self.network.connected_peers().await?;
        if before >= self.min_peers {
            debug!("{} peers connected", before);
            return Ok(ConnectivityReport { before, after: None });
        }

        warn!("Only {} peers connected (minimum {}), reconnecting", before, self.min_peers);
        self.network.reconnect().await?;
        let after = self.network.connected_peers().await?;
        info!("Peers before reconnect: {}, after: {}", before, after);

        Ok(ConnectivityReport {
            before,
            after: Some(after),
        })
    }
}
