//! Minimal JSON-RPC client for the handful of calls the ingesters need.

use alloy_primitives::{aliases::U64, Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use serde_json::json;

use tally_store::model::BlockData;

use crate::IngestError;

#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl<T> RpcResponse<T> {
    fn into_result(self) -> Result<T, IngestError> {
        if let Some(error) = self.error {
            return Err(IngestError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        self.result
            .ok_or_else(|| IngestError::MissingData("rpc result".into()))
    }
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    number: U64,
    timestamp: U64,
    hash: B256,
}

/// One undecoded log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: U64,
    pub log_index: U64,
}

#[derive(Debug, Serialize)]
struct CallRequest {
    to: Address,
    data: Bytes,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, IngestError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response.into_result()
    }

    pub async fn block_number(&self) -> Result<u64, IngestError> {
        let number: U64 = self.request("eth_blockNumber", json!([])).await?;
        Ok(number.to::<u64>())
    }

    pub async fn chain_id(&self) -> Result<u64, IngestError> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    /// Fetch a contiguous block range with one batched request.
    pub async fn blocks(&self, from: u64, to: u64) -> Result<Vec<(u64, BlockData)>, IngestError> {
        let batch: Vec<serde_json::Value> = (from..=to)
            .map(|number| {
                json!({
                    "jsonrpc": "2.0",
                    "id": number - from,
                    "method": "eth_getBlockByNumber",
                    "params": [format!("{:#x}", number), false],
                })
            })
            .collect();

        let responses: Vec<RpcResponse<RawBlock>> = self
            .http
            .post(&self.url)
            .json(&batch)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut out = Vec::with_capacity(responses.len());
        for response in responses {
            let block = response.into_result()?;
            out.push((
                block.number.to::<u64>(),
                BlockData {
                    timestamp: block.timestamp.to::<u64>(),
                    hash: block.hash,
                },
            ));
        }

        Ok(out)
    }

    /// `eth_getLogs` over a block range, any of the addresses, any of the
    /// topics in the first position.
    pub async fn get_logs(
        &self,
        addresses: &[Address],
        topics: &[B256],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IngestError> {
        let filter = json!({
            "fromBlock": format!("{:#x}", from),
            "toBlock": format!("{:#x}", to),
            "address": addresses,
            "topics": [topics],
        });

        self.request("eth_getLogs", json!([filter])).await
    }

    /// `eth_call` against the latest state unless a block is given.
    pub async fn call(
        &self,
        to: Address,
        data: Vec<u8>,
        block: Option<u64>,
    ) -> Result<Vec<u8>, IngestError> {
        let at = match block {
            Some(number) => format!("{number:#x}"),
            None => "latest".to_string(),
        };

        let request = CallRequest {
            to,
            data: data.into(),
        };

        let output: Bytes = self.request("eth_call", json!([request, at])).await?;

        Ok(output.to_vec())
    }
}
