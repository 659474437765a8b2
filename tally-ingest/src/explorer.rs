//! Blockscout client, used once to resolve the vault factory's creation
//! block. The result is cached in the `genesis` cursor so the lookup never
//! repeats.

use alloy_primitives::Address;
use serde::Deserialize;
use tracing::info;

use tally_store::model::cursor;
use tally_store::{StateRead, Store};

use crate::IngestError;

#[derive(Clone)]
pub struct ExplorerClient {
    http: reqwest::Client,
    host: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreationResponse {
    result: Vec<CreationEntry>,
}

#[derive(Debug, Deserialize)]
struct CreationEntry {
    #[serde(rename = "txHash")]
    tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct TxInfoResponse {
    result: TxInfo,
}

#[derive(Debug, Deserialize)]
struct TxInfo {
    #[serde(rename = "blockNumber")]
    block_number: String,
}

impl ExplorerClient {
    pub fn new(host: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into(),
            api_key,
        }
    }

    pub async fn creation_block(&self, contract: Address) -> Result<u64, IngestError> {
        let url = format!("https://{}/api", self.host);
        let key = self.api_key.clone().unwrap_or_default();

        let creation: CreationResponse = self
            .http
            .get(&url)
            .query(&[
                ("module", "contract"),
                ("action", "getcontractcreation"),
                ("contractaddresses", &contract.to_string()),
                ("apikey", &key),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let tx_hash = &creation
            .result
            .first()
            .ok_or_else(|| IngestError::MissingData("contract creation entry".into()))?
            .tx_hash;

        let tx_info: TxInfoResponse = self
            .http
            .get(&url)
            .query(&[
                ("module", "transaction"),
                ("action", "gettxinfo"),
                ("txhash", tx_hash),
                ("apikey", &key),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = &tx_info.result.block_number;
        let parsed = match text.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => text.parse(),
        };

        parsed.map_err(|_| IngestError::Decode("creation block number".into()))
    }
}

/// The vault factory's creation block, resolved once and cached in the
/// `genesis` cursor.
pub async fn ensure_genesis(
    store: &Store,
    explorer: &ExplorerClient,
    vault_factory: Address,
) -> Result<u64, IngestError> {
    if let Some(genesis) = store.cursor(cursor::GENESIS)? {
        return Ok(genesis);
    }

    let creation = explorer.creation_block(vault_factory).await?;
    info!(creation, "resolved vault factory creation block");

    let mut batch = store.batch();
    batch.put_cursor(cursor::GENESIS, creation);
    batch.commit()?;

    Ok(creation)
}
