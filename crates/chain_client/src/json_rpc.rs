use std::borrow::Cow;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use prometheus_exporter::prometheus::IntCounterVec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strata_common_types::{
    Address, BlockHash, Bytes, ChainHeader, RawLog, Receipt, Topic, TxHash,
};
use tracing::*;
use url::Url;

use crate::{ChainClient, LogFilter, TopicFilter};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A [`ChainClient`] that talks to an Ethereum JSON-RPC endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    name: String,
    endpoint: Url,
    timeout: Duration,
    client: reqwest::Client,
    // Metrics
    // -------
    rpc_requests: IntCounterVec,
}

impl JsonRpcClient {
    /// `rpc_requests` must have the labels `method` and `success`.
    pub fn new(name: impl Into<String>, endpoint: Url, rpc_requests: IntCounterVec) -> Self {
        Self {
            name: name.into(),
            endpoint,
            timeout: REQUEST_TIMEOUT,
            client: reqwest::Client::new(),
            rpc_requests,
        }
    }

    /// Sets the timeout of every request. The default is 30 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call<P, O>(&self, method: &'static str, params: P) -> anyhow::Result<O>
    where
        P: Serialize + Send,
        O: DeserializeOwned,
    {
        let result = self.call_inner(method, params).await;

        let success = if result.is_ok() { "1" } else { "0" };
        if let Ok(counter) = self
            .rpc_requests
            .get_metric_with_label_values(&[method, success])
        {
            counter.inc();
        }

        if let Err(error) = &result {
            debug!(node = %self.name, method, %error, "JSON-RPC request failed");
        }
        result
    }

    async fn call_inner<P, O>(&self, method: &'static str, params: P) -> anyhow::Result<O>
    where
        P: Serialize + Send,
        O: DeserializeOwned,
    {
        trace!(node = %self.name, method, "Sending JSON-RPC request");

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let response: JsonRpcResponse = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(anyhow!(
                "{} returned error {}: {}",
                method,
                error.code,
                error.message
            ));
        }

        let result = response.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    fn name(&self) -> Cow<str> {
        Cow::Borrowed(&self.name)
    }

    async fn chain_head(&self) -> anyhow::Result<ChainHeader> {
        let header: Option<WireHeader> = self
            .call("eth_getBlockByNumber", ("latest", false))
            .await?;
        header
            .map(Into::into)
            .ok_or_else(|| anyhow!("node returned no latest block"))
    }

    async fn header_by_number(&self, number: u64) -> anyhow::Result<Option<ChainHeader>> {
        let header: Option<WireHeader> = self
            .call("eth_getBlockByNumber", (format!("{:#x}", number), false))
            .await?;
        Ok(header.map(Into::into))
    }

    async fn logs(&self, filter: &LogFilter) -> anyhow::Result<Vec<RawLog>> {
        let params = WireLogFilter {
            address: &filter.addresses,
            topics: &filter.topics,
            block_hash: &filter.block_hash,
        };
        let logs: Vec<WireLog> = self.call("eth_getLogs", [params]).await?;
        Ok(logs.into_iter().map(Into::into).collect())
    }

    async fn block_receipts(&self, block_hash: &BlockHash) -> anyhow::Result<Vec<Receipt>> {
        let receipts: Option<Vec<WireReceipt>> =
            self.call("eth_getBlockReceipts", [block_hash]).await?;
        Ok(receipts
            .unwrap_or_default()
            .into_iter()
            .map(Into::into)
            .collect())
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: P,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireLogFilter<'a> {
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    address: &'a [Address],
    topics: &'a TopicFilter,
    block_hash: &'a BlockHash,
}

/// A hex-encoded JSON-RPC quantity, e.g. `"0x1b4"`. Values that don't fit
/// in `T` fail to deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Quantity<T = u64>(T);

impl<'de, T> Deserialize<'de> for Quantity<T>
where
    T: TryFrom<u64>,
    T::Error: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| serde::de::Error::custom("quantity without 0x prefix"))?;
        let value = u64::from_str_radix(digits, 16).map_err(serde::de::Error::custom)?;
        T::try_from(value)
            .map(Quantity)
            .map_err(|err| serde::de::Error::custom(format!("quantity {s} out of range: {err}")))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHeader {
    number: Quantity,
    hash: BlockHash,
    parent_hash: BlockHash,
}

impl From<WireHeader> for ChainHeader {
    fn from(header: WireHeader) -> Self {
        Self {
            number: header.number.0,
            hash: header.hash,
            parent_hash: header.parent_hash,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLog {
    address: Address,
    topics: Vec<Topic>,
    data: Bytes,
    block_number: Quantity,
    block_hash: BlockHash,
    transaction_hash: TxHash,
    transaction_index: Quantity<u32>,
    log_index: Quantity<u32>,
    #[serde(default)]
    removed: bool,
}

impl From<WireLog> for RawLog {
    fn from(log: WireLog) -> Self {
        Self {
            address: log.address,
            topics: log.topics,
            data: log.data,
            block_number: log.block_number.0,
            block_hash: log.block_hash,
            transaction_hash: log.transaction_hash,
            transaction_index: log.transaction_index.0,
            log_index: log.log_index.0,
            removed: log.removed,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceipt {
    transaction_hash: TxHash,
    transaction_index: Quantity<u32>,
    // Absent on pre-Byzantium receipts, which carry a state root instead.
    #[serde(default)]
    status: Option<Quantity<u8>>,
    logs: Vec<WireLog>,
}

impl From<WireReceipt> for Receipt {
    fn from(receipt: WireReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            transaction_index: receipt.transaction_index.0,
            status: receipt.status.map_or(1, |status| status.0),
            logs: receipt.logs.into_iter().map(Into::into).collect(),
        }
    }
}
