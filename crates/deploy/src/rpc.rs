//! Ethereum JSON-RPC implementation of [`NetworkClient`].

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U64, U256};
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::{
    config::NetworkConfig,
    error::TransportError,
    network::{NetworkClient, Receipt, TransactionOutcome, TransactionRequest},
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: U64,
    contract_address: Option<Address>,
    gas_used: U64,
    /// `0x1` on success, `0x0` on revert. Absent on pre-Byzantium chains.
    status: Option<U64>,
}

impl RpcReceipt {
    fn into_outcome(self) -> TransactionOutcome {
        let succeeded = self.status.is_none_or(|status| status == U64::from(1));
        let receipt = Receipt {
            transaction_hash: self.transaction_hash,
            block_number: self.block_number.to::<u64>(),
            contract_address: self.contract_address,
            gas_used: self.gas_used.to::<u64>(),
        };
        if succeeded {
            TransactionOutcome::Confirmed(receipt)
        } else {
            TransactionOutcome::Reverted(receipt)
        }
    }
}

/// Reason a receipt poll did not produce a receipt.
enum ReceiptPoll {
    Pending,
    Transport(TransportError),
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| TransportError::rpc("client", e))
}

/// Make a JSON-RPC call and deserialize its `result`.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T, TransportError> {
    let response = client
        .post(url.clone())
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| TransportError::rpc(method, e))?;

    let result: Value = response
        .json()
        .await
        .map_err(|e| TransportError::malformed(method, e))?;

    if let Some(error) = result.get("error") {
        return Err(TransportError::rpc(
            method,
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown"),
        ));
    }

    let result_value = result
        .get("result")
        .ok_or_else(|| TransportError::malformed(method, "no result in response"))?
        .clone();

    serde_json::from_value(result_value).map_err(|e| TransportError::malformed(method, e))
}

/// JSON-RPC network client sending from an account unlocked on the node.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: Url,
    from: Address,
    confirmations: u64,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl JsonRpcClient {
    pub fn new(config: &NetworkConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: create_client()?,
            url: config.rpc_url.clone(),
            from: config.from,
            confirmations: config.confirmations.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        tracing::trace!(method, url = %self.url, "JSON-RPC call");
        json_rpc_call(&self.client, &self.url, method, params).await
    }

    fn max_polls(&self) -> usize {
        let polls = self.receipt_timeout.as_millis() / self.poll_interval.as_millis().max(1);
        polls.max(1) as usize
    }

    async fn poll_receipt(&self, hash: B256) -> Result<RpcReceipt, ReceiptPoll> {
        let receipt: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", vec![serde_json::json!(hash)])
            .await
            .map_err(ReceiptPoll::Transport)?;
        receipt.ok_or(ReceiptPoll::Pending)
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        let number: U64 = self.call("eth_blockNumber", vec![]).await?;
        Ok(number.to::<u64>())
    }

    /// Wait until `block` is buried under the configured number of confirmations.
    async fn wait_for_depth(&self, block: u64) -> Result<(), TransportError> {
        let target = block + self.confirmations - 1;
        let backoff = ConstantBuilder::default()
            .with_delay(self.poll_interval)
            .with_max_times(self.max_polls());

        (|| async move {
            let head = self.block_number().await?;
            if head >= target {
                Ok(())
            } else {
                Err(TransportError::rpc(
                    "eth_blockNumber",
                    format!("head {head} below confirmation target {target}"),
                ))
            }
        })
        .retry(backoff)
        .await
    }
}

impl NetworkClient for JsonRpcClient {
    async fn submit_transaction(&self, tx: TransactionRequest) -> Result<B256, TransportError> {
        let mut params = serde_json::json!({
            "from": self.from,
            "data": tx.data,
            "value": tx.value,
        });
        if let Some(to) = tx.to {
            params["to"] = serde_json::json!(to);
        }

        let hash: B256 = self.call("eth_sendTransaction", vec![params]).await?;
        tracing::debug!(tx_hash = %hash, to = ?tx.to, "Transaction submitted");
        Ok(hash)
    }

    async fn wait_for_transaction(&self, hash: B256) -> Result<TransactionOutcome, TransportError> {
        let backoff = ConstantBuilder::default()
            .with_delay(self.poll_interval)
            .with_max_times(self.max_polls());

        let receipt = (|| async move { self.poll_receipt(hash).await })
            .retry(backoff)
            .when(|e| matches!(e, ReceiptPoll::Pending))
            .await;

        let receipt = match receipt {
            Ok(receipt) => receipt,
            Err(ReceiptPoll::Pending) => {
                tracing::warn!(tx_hash = %hash, timeout = ?self.receipt_timeout, "No receipt, transaction considered dropped");
                return Ok(TransactionOutcome::Dropped);
            }
            Err(ReceiptPoll::Transport(e)) => return Err(e),
        };

        if self.confirmations > 1 {
            self.wait_for_depth(receipt.block_number.to::<u64>()).await?;
        }

        Ok(receipt.into_outcome())
    }

    async fn read_storage_slot(&self, address: Address, slot: B256) -> Result<B256, TransportError> {
        let value: U256 = self
            .call(
                "eth_getStorageAt",
                vec![
                    serde_json::json!(address),
                    serde_json::json!(slot),
                    serde_json::json!("latest"),
                ],
            )
            .await?;
        Ok(B256::from(value.to_be_bytes::<32>()))
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, TransportError> {
        self.call(
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }
}
