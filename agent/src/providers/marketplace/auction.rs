//! Auction state machine and bid selection

use serde::{Deserialize, Serialize};

use crate::models::marketplace::Bid;

/// Stage of a marketplace deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStage {
    /// Deployment transaction being submitted
    Submitting,

    /// Order open, waiting for provider bids
    AwaitingBids,

    /// Lease transaction for the winning bid being submitted
    Leasing,

    /// Manifest being sent to the winning provider
    ManifestPush,

    /// Workload accepted by the provider
    Running,

    /// Deploy attempt abandoned
    Failed,
}

/// Auction event
#[derive(Debug, Clone)]
pub enum AuctionEvent {
    /// Deployment transaction accepted
    OrderCreated,

    /// A winning bid was selected
    BidSelected,

    /// Lease transaction accepted
    LeaseCreated,

    /// Manifest accepted by the provider
    ManifestAccepted,

    /// Bid window closed with no bids
    BidTimeout,

    /// A network or transaction step failed
    Error(String),
}

/// Tracks the stage of one deploy attempt
#[derive(Debug, Clone)]
pub struct AuctionFsm {
    stage: AuctionStage,
    error: Option<String>,
}

impl AuctionFsm {
    pub fn new() -> Self {
        Self {
            stage: AuctionStage::Submitting,
            error: None,
        }
    }

    pub fn stage(&self) -> &AuctionStage {
        &self.stage
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition stage
    pub fn process(&mut self, event: AuctionEvent) -> Result<(), String> {
        let next = match (&self.stage, &event) {
            (AuctionStage::Submitting, AuctionEvent::OrderCreated) => AuctionStage::AwaitingBids,
            (AuctionStage::AwaitingBids, AuctionEvent::BidSelected) => AuctionStage::Leasing,
            (AuctionStage::AwaitingBids, AuctionEvent::BidTimeout) => {
                self.error = Some("no bids received".to_string());
                AuctionStage::Failed
            }
            (AuctionStage::Leasing, AuctionEvent::LeaseCreated) => AuctionStage::ManifestPush,
            (AuctionStage::ManifestPush, AuctionEvent::ManifestAccepted) => AuctionStage::Running,

            // Any network step can fail
            (
                AuctionStage::Submitting
                | AuctionStage::AwaitingBids
                | AuctionStage::Leasing
                | AuctionStage::ManifestPush,
                AuctionEvent::Error(err),
            ) => {
                self.error = Some(err.clone());
                AuctionStage::Failed
            }

            (stage, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", stage, event));
            }
        };

        self.stage = next;
        Ok(())
    }
}

impl Default for AuctionFsm {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick the cheapest bid. Ties resolve to the first bid in enumeration order.
pub fn select_cheapest(bids: &[Bid]) -> Option<&Bid> {
    let mut sorted: Vec<&Bid> = bids.iter().collect();
    // `sort_by_key` is stable
    sorted.sort_by_key(|bid| bid.price);
    sorted.first().copied()
}

/// Parse a decimal chain amount (e.g. `"12.345000000000000000"`) into thousandths.
///
/// Digits beyond the third decimal place are truncated.
pub fn parse_price(amount: &str) -> Option<u64> {
    let amount = amount.trim();
    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut milli = String::from(&frac[..frac.len().min(3)]);
    while milli.len() < 3 {
        milli.push('0');
    }
    let milli: u64 = milli.parse().ok()?;
    whole.checked_mul(1000)?.checked_add(milli)
}
