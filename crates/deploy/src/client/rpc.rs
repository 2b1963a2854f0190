//! Ethereum JSON-RPC implementation of [`NetworkClient`].

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use super::{NetworkClient, Receipt};
use crate::{error::ClientError, params::GasParams};

/// Timeout for a single RPC request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between receipt polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Transaction receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    contract_address: Option<Address>,
    /// Absent on pre-Byzantium chains, where failure cannot be detected.
    status: Option<String>,
}

/// Deserialize a u64 from a hex string (with 0x prefix).
fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}

fn parse_hex_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
}

/// Client talking to a node over HTTP JSON-RPC.
///
/// Transactions are sent with `eth_sendTransaction`, so the sending account
/// must be unlocked on the node.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: Url,
    from: Option<Address>,
    poll_interval: Duration,
}

impl JsonRpcClient {
    pub fn new(url: Url, from: Option<Address>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            url,
            from,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Make a JSON-RPC call and deserialize the result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ClientError> {
        let response = self
            .http
            .post(self.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("failed to send {method} request: {e}")))?;

        let result: Value = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(format!("failed to parse {method} response: {e}")))?;

        if let Some(error) = result.get("error") {
            return Err(ClientError::Rpc(
                error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            ));
        }

        let result_value = result
            .get("result")
            .ok_or_else(|| ClientError::Response(format!("no result in {method} response")))?
            .clone();

        serde_json::from_value(result_value)
            .map_err(|e| ClientError::Response(format!("failed to deserialize {method} result: {e}")))
    }

    pub async fn block_number(&self) -> Result<u64, ClientError> {
        let hex: String = self.call("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex).map_err(|e| ClientError::Response(format!("bad block number {hex}: {e}")))
    }

    /// The configured sender, or the first account unlocked on the node.
    async fn sender(&self) -> Result<Address, ClientError> {
        if let Some(from) = self.from {
            return Ok(from);
        }

        let accounts: Vec<Address> = self.call("eth_accounts", vec![]).await?;
        accounts
            .first()
            .copied()
            .ok_or_else(|| ClientError::Response("node has no unlocked accounts".to_string()))
    }

    async fn send_transaction(
        &self,
        to: Option<Address>,
        data: Bytes,
        gas: GasParams,
    ) -> Result<B256, ClientError> {
        let from = self.sender().await?;

        let mut tx = serde_json::json!({
            "from": from,
            "data": data,
            "gas": format!("0x{:x}", gas.gas),
            "gasPrice": format!("0x{:x}", gas.gas_price),
        });
        if let Some(to) = to {
            tx["to"] = serde_json::json!(to);
        }

        let tx_hash: B256 = self.call("eth_sendTransaction", vec![tx]).await?;

        tracing::debug!(
            tx_hash = %tx_hash,
            from = %from,
            to = ?to,
            gas = gas.gas,
            "Transaction submitted"
        );
        Ok(tx_hash)
    }

    /// The receipt of `tx_hash` once it is `confirmations` blocks deep.
    async fn poll_receipt(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> Result<Option<Receipt>, ClientError> {
        let receipt: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await?;
        let Some(receipt) = receipt else {
            tracing::trace!(tx_hash = %tx_hash, "Transaction pending");
            return Ok(None);
        };

        let head = self.block_number().await?;
        let depth = head.saturating_sub(receipt.block_number) + 1;
        if depth < confirmations {
            tracing::trace!(tx_hash = %tx_hash, depth, confirmations, "Waiting for confirmations");
            return Ok(None);
        }

        Ok(Some(Receipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            contract_address: receipt.contract_address,
            status: receipt.status.as_deref() != Some("0x0"),
        }))
    }
}

impl NetworkClient for JsonRpcClient {
    async fn network_id(&self) -> Result<u64, ClientError> {
        let version: String = self.call("net_version", vec![]).await?;
        version
            .parse()
            .map_err(|_| ClientError::Response(format!("bad net_version `{version}`")))
    }

    async fn deploy_contract(&self, data: Bytes, gas: GasParams) -> Result<B256, ClientError> {
        self.send_transaction(None, data, gas).await
    }

    async fn call_method(
        &self,
        to: Address,
        data: Bytes,
        gas: GasParams,
    ) -> Result<B256, ClientError> {
        self.send_transaction(Some(to), data, gas).await
    }

    async fn await_confirmation(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> Result<Receipt, ClientError> {
        loop {
            // Polling is read-only, so transport hiccups are waited out; the
            // caller's timeout bounds the loop.
            match self.poll_receipt(tx_hash, confirmations).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(ClientError::Transport(e)) => {
                    tracing::warn!(tx_hash = %tx_hash, error = %e, "Receipt poll failed, retrying...");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
