//! Marketplace (auction/lease) domain types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A provider's price offer for an open order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    /// Bidding provider address
    pub provider: String,

    /// Group sequence of the order
    pub gseq: u32,

    /// Order sequence within the group
    pub oseq: u32,

    /// Per-block price in thousandths of the smallest unit
    pub price: u64,
}

/// Everything needed to address a lease on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseId {
    pub owner: String,
    pub dseq: u64,
    pub gseq: u32,
    pub oseq: u32,
    pub provider: String,
}

impl LeaseId {
    pub fn from_bid(owner: &str, dseq: u64, bid: &Bid) -> Self {
        Self {
            owner: owner.to_string(),
            dseq,
            gseq: bid.gseq,
            oseq: bid.oseq,
            provider: bid.provider.clone(),
        }
    }
}

/// Lease state on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    Active,
    InsufficientFunds,
    Closed,
    #[serde(other)]
    Other,
}

impl LeaseState {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => LeaseState::Active,
            "insufficient_funds" | "insufficientfunds" => LeaseState::InsufficientFunds,
            "closed" => LeaseState::Closed,
            _ => LeaseState::Other,
        }
    }
}

/// Result of a broadcast transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxResult {
    pub hash: String,
    pub code: u32,
    pub raw_log: String,
    pub height: u64,
}

impl TxResult {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Replica availability of one service in a lease
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStatus {
    #[serde(default)]
    pub available: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub uris: Vec<String>,
}

/// Lease status reported by the hosting provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderLeaseStatus {
    #[serde(default)]
    pub services: HashMap<String, ServiceStatus>,
}

impl ProviderLeaseStatus {
    /// At least one service has an available replica
    pub fn any_available(&self) -> bool {
        self.services.values().any(|s| s.available > 0)
    }
}
