//! Marketplace chain access
//!
//! Transaction signing and broadcast are delegated to the marketplace's own command line
//! client. [`MarketplaceChain`] describes what has to be sent; [`ProviderServicesCli`]
//! sends it by shelling out with JSON output.

use std::io::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, error};

use crate::errors::AgentError;
use crate::models::marketplace::{Bid, LeaseId, LeaseState, TxResult};
use crate::providers::marketplace::auction::parse_price;
use crate::providers::marketplace::manifest::RenderedManifest;

/// Transactions and queries the marketplace backend needs
#[async_trait]
pub trait MarketplaceChain: Send + Sync {
    /// Address owning deployments and paying escrow
    fn owner(&self) -> &str;

    /// Open an order for the manifest, with `deposit` smallest units of escrow
    async fn create_deployment(
        &self,
        manifest: &RenderedManifest,
        dseq: u64,
        deposit: u64,
    ) -> Result<TxResult, AgentError>;

    /// Open bids for the owner's order `dseq`, in chain enumeration order
    async fn open_bids(&self, dseq: u64) -> Result<Vec<Bid>, AgentError>;

    async fn create_lease(&self, lease: &LeaseId) -> Result<TxResult, AgentError>;

    async fn lease_state(&self, lease: &LeaseId) -> Result<LeaseState, AgentError>;

    async fn close_lease(&self, lease: &LeaseId) -> Result<TxResult, AgentError>;

    async fn close_deployment(&self, dseq: u64) -> Result<TxResult, AgentError>;

    /// Top up the escrow of order `dseq`
    async fn deposit(&self, dseq: u64, amount: u64) -> Result<TxResult, AgentError>;

    /// Owner balance in the smallest unit of `denom`
    async fn balance(&self, denom: &str) -> Result<u128, AgentError>;

    /// Service endpoint registered by a provider
    async fn provider_host_uri(&self, provider: &str) -> Result<String, AgentError>;
}

/// Reject a transaction with a non-zero result code
pub fn ensure_success(tx: TxResult) -> Result<TxResult, AgentError> {
    if tx.is_success() {
        Ok(tx)
    } else {
        Err(AgentError::TransactionError {
            code: tx.code,
            message: tx.raw_log,
        })
    }
}

/// Options for the command line chain client
#[derive(Debug, Clone)]
pub struct CliOptions {
    /// Client binary
    pub binary: String,

    /// Owner address
    pub owner: String,

    /// Keyring entry used to sign
    pub from: String,

    pub chain_id: String,

    /// RPC node URL (with explicit port)
    pub node: String,

    pub gas: String,

    pub gas_prices: String,

    pub gas_adjustment: f64,

    pub keyring_backend: String,

    pub denom: String,

    /// Upper bound for a single command
    pub command_timeout: Duration,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            binary: "provider-services".to_string(),
            owner: String::new(),
            from: "default".to_string(),
            chain_id: "akashnet-2".to_string(),
            node: "https://rpc.akashnet.net:443".to_string(),
            gas: "auto".to_string(),
            gas_prices: "0.025uakt".to_string(),
            gas_adjustment: 1.5,
            keyring_backend: "os".to_string(),
            denom: "uakt".to_string(),
            command_timeout: Duration::from_secs(90),
        }
    }
}

/// [`MarketplaceChain`] backed by the marketplace CLI
pub struct ProviderServicesCli {
    options: CliOptions,
}

impl ProviderServicesCli {
    pub fn new(options: CliOptions) -> Self {
        Self { options }
    }

    async fn run_json(&self, args: &[String]) -> Result<Value, AgentError> {
        debug!("{} {}", self.options.binary, args.join(" "));

        let output = tokio::time::timeout(
            self.options.command_timeout,
            Command::new(&self.options.binary)
                .args(args)
                .args(["--node", self.options.node.as_str()])
                .args(["--output", "json"])
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            AgentError::Timeout(format!(
                "{} {} exceeded {:?}",
                self.options.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                self.options.command_timeout
            ))
        })?
        .map_err(|e| AgentError::RemoteError(format!("Failed to run {}: {}", self.options.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("{} failed: {}", self.options.binary, stderr);
            return Err(AgentError::RemoteError(stderr));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn tx(&self, mut args: Vec<String>) -> Result<TxResult, AgentError> {
        let o = &self.options;
        args.extend(
            [
                "--from",
                o.from.as_str(),
                "--chain-id",
                o.chain_id.as_str(),
                "--keyring-backend",
                o.keyring_backend.as_str(),
                "--gas",
                o.gas.as_str(),
                "--gas-prices",
                o.gas_prices.as_str(),
                "--yes",
            ]
            .into_iter()
            .map(String::from),
        );
        args.push("--gas-adjustment".to_string());
        args.push(o.gas_adjustment.to_string());

        let value = self.run_json(&args).await?;
        parse_tx(&value)
    }

    fn lease_args(&self, lease: &LeaseId) -> Vec<String> {
        vec![
            "--owner".to_string(),
            lease.owner.clone(),
            "--dseq".to_string(),
            lease.dseq.to_string(),
            "--gseq".to_string(),
            lease.gseq.to_string(),
            "--oseq".to_string(),
            lease.oseq.to_string(),
            "--provider".to_string(),
            lease.provider.clone(),
        ]
    }
}

#[async_trait]
impl MarketplaceChain for ProviderServicesCli {
    fn owner(&self) -> &str {
        &self.options.owner
    }

    async fn create_deployment(
        &self,
        manifest: &RenderedManifest,
        dseq: u64,
        deposit: u64,
    ) -> Result<TxResult, AgentError> {
        let mut file = tempfile::Builder::new()
            .prefix("phoenix-sdl")
            .suffix(".yml")
            .tempfile()?;
        write!(file, "{}", manifest.yaml)?;
        let path = file.path().to_string_lossy().to_string();

        self.tx(vec![
            "tx".to_string(),
            "deployment".to_string(),
            "create".to_string(),
            path,
            "--dseq".to_string(),
            dseq.to_string(),
            "--deposit".to_string(),
            format!("{}{}", deposit, self.options.denom),
        ])
        .await
    }

    async fn open_bids(&self, dseq: u64) -> Result<Vec<Bid>, AgentError> {
        let value = self
            .run_json(&[
                "query".to_string(),
                "market".to_string(),
                "bid".to_string(),
                "list".to_string(),
                "--owner".to_string(),
                self.options.owner.clone(),
                "--dseq".to_string(),
                dseq.to_string(),
                "--state".to_string(),
                "open".to_string(),
            ])
            .await?;
        Ok(parse_bids(&value))
    }

    async fn create_lease(&self, lease: &LeaseId) -> Result<TxResult, AgentError> {
        let mut args = vec!["tx".to_string(), "market".to_string(), "lease".to_string(), "create".to_string()];
        args.extend(self.lease_args(lease));
        self.tx(args).await
    }

    async fn lease_state(&self, lease: &LeaseId) -> Result<LeaseState, AgentError> {
        let mut args = vec!["query".to_string(), "market".to_string(), "lease".to_string(), "get".to_string()];
        args.extend(self.lease_args(lease));
        let value = self.run_json(&args).await?;
        let state = value["lease"]["state"]
            .as_str()
            .ok_or_else(|| AgentError::DeployError("lease query returned no state".to_string()))?;
        Ok(LeaseState::parse(state))
    }

    async fn close_lease(&self, lease: &LeaseId) -> Result<TxResult, AgentError> {
        let mut args = vec!["tx".to_string(), "market".to_string(), "lease".to_string(), "close".to_string()];
        args.extend(self.lease_args(lease));
        self.tx(args).await
    }

    async fn close_deployment(&self, dseq: u64) -> Result<TxResult, AgentError> {
        self.tx(vec![
            "tx".to_string(),
            "deployment".to_string(),
            "close".to_string(),
            "--dseq".to_string(),
            dseq.to_string(),
        ])
        .await
    }

    async fn deposit(&self, dseq: u64, amount: u64) -> Result<TxResult, AgentError> {
        self.tx(vec![
            "tx".to_string(),
            "deployment".to_string(),
            "deposit".to_string(),
            format!("{}{}", amount, self.options.denom),
            "--dseq".to_string(),
            dseq.to_string(),
        ])
        .await
    }

    async fn balance(&self, denom: &str) -> Result<u128, AgentError> {
        let value = self
            .run_json(&[
                "query".to_string(),
                "bank".to_string(),
                "balances".to_string(),
                self.options.owner.clone(),
            ])
            .await?;
        Ok(parse_balance(&value, denom))
    }

    async fn provider_host_uri(&self, provider: &str) -> Result<String, AgentError> {
        let value = self
            .run_json(&[
                "query".to_string(),
                "provider".to_string(),
                "get".to_string(),
                provider.to_string(),
            ])
            .await?;
        value["host_uri"]
            .as_str()
            .or_else(|| value["provider"]["host_uri"].as_str())
            .map(String::from)
            .ok_or_else(|| AgentError::DeployError(format!("provider {} has no host_uri", provider)))
    }
}

/// Numbers come back either as JSON numbers or as decimal strings
fn json_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn parse_tx(value: &Value) -> Result<TxResult, AgentError> {
    let hash = value["txhash"]
        .as_str()
        .ok_or_else(|| AgentError::DeployError("transaction response has no txhash".to_string()))?;
    Ok(TxResult {
        hash: hash.to_string(),
        // an out-of-range code is still a failure
        code: json_u64(&value["code"]).map_or(0, |code| u32::try_from(code).unwrap_or(u32::MAX)),
        raw_log: value["raw_log"].as_str().unwrap_or_default().to_string(),
        height: json_u64(&value["height"]).unwrap_or(0),
    })
}

fn parse_bids(value: &Value) -> Vec<Bid> {
    let Some(entries) = value["bids"].as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let bid = &entry["bid"];
            let state = bid["state"].as_str().unwrap_or_default();
            if state != "open" {
                return None;
            }
            let id = &bid["bid_id"];
            Some(Bid {
                provider: id["provider"].as_str()?.to_string(),
                gseq: u32::try_from(json_u64(&id["gseq"])?).ok()?,
                oseq: u32::try_from(json_u64(&id["oseq"])?).ok()?,
                price: parse_price(bid["price"]["amount"].as_str()?)?,
            })
        })
        .collect()
}

fn parse_balance(value: &Value, denom: &str) -> u128 {
    value["balances"]
        .as_array()
        .and_then(|balances| {
            balances
                .iter()
                .find(|b| b["denom"].as_str() == Some(denom))
                .and_then(|b| b["amount"].as_str())
                .and_then(|a| a.parse().ok())
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_bids_keeps_open_in_order() {
        let value = json!({
            "bids": [
                {"bid": {"bid_id": {"provider": "p1", "gseq": 1, "oseq": "1"}, "state": "open",
                         "price": {"denom": "uakt", "amount": "5.500000000000000000"}}},
                {"bid": {"bid_id": {"provider": "p2", "gseq": 1, "oseq": 1}, "state": "closed",
                         "price": {"denom": "uakt", "amount": "1.0"}}},
                {"bid": {"bid_id": {"provider": "p3", "gseq": "1", "oseq": 1}, "state": "open",
                         "price": {"denom": "uakt", "amount": "3"}}}
            ]
        });
        let bids = parse_bids(&value);
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].provider, "p1");
        assert_eq!(bids[0].price, 5_500);
        assert_eq!(bids[1].provider, "p3");
        assert_eq!(bids[1].price, 3_000);
    }

    #[test]
    fn test_parse_bids_drops_out_of_range_sequences() {
        let value = json!({
            "bids": [
                {"bid": {"bid_id": {"provider": "p1", "gseq": 4294967297u64, "oseq": 1}, "state": "open",
                         "price": {"denom": "uakt", "amount": "1"}}},
                {"bid": {"bid_id": {"provider": "p2", "gseq": 1, "oseq": "4294967296"}, "state": "open",
                         "price": {"denom": "uakt", "amount": "1"}}},
                {"bid": {"bid_id": {"provider": "p3", "gseq": 1, "oseq": 1}, "state": "open",
                         "price": {"denom": "uakt", "amount": "2"}}}
            ]
        });
        let bids = parse_bids(&value);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].provider, "p3");
    }

    #[test]
    fn test_parse_tx_out_of_range_code_is_failure() {
        let tx = parse_tx(&json!({"txhash": "GHI", "code": 4294967296u64})).unwrap();
        assert!(!tx.is_success());
    }

    #[test]
    fn test_parse_bids_empty() {
        assert!(parse_bids(&json!({"bids": []})).is_empty());
        assert!(parse_bids(&json!({})).is_empty());
    }

    #[test]
    fn test_parse_tx() {
        let tx = parse_tx(&json!({"txhash": "ABC", "code": 0, "raw_log": "", "height": "120"})).unwrap();
        assert!(tx.is_success());
        assert_eq!(tx.height, 120);

        let tx = parse_tx(&json!({"txhash": "DEF", "code": 5, "raw_log": "insufficient funds"})).unwrap();
        let err = ensure_success(tx).unwrap_err();
        assert!(matches!(err, AgentError::TransactionError { code: 5, .. }));
    }

    #[test]
    fn test_parse_balance() {
        let value = json!({"balances": [{"denom": "ibc/xyz", "amount": "9"}, {"denom": "uakt", "amount": "2500000"}]});
        assert_eq!(parse_balance(&value, "uakt"), 2_500_000);
        assert_eq!(parse_balance(&value, "uusdc"), 0);
    }
}
