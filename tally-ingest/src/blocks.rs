//! Ingests finalized block headers in batched chunks and advances the
//! `blocks` cursor.

use tracing::info;

use tally_store::model::cursor;
use tally_store::{StateRead, Store};

use crate::explorer::{ensure_genesis, ExplorerClient};
use crate::rpc::RpcClient;
use crate::{CoreAddresses, IngestError, FINALITY_OFFSET};

const CHUNK_SIZE: u64 = 1_000;

/// Blocks ingested before the factory creation, so the first prices have a
/// resolvable block.
const GENESIS_MARGIN: u64 = 100;

pub struct BlocksSync<'a> {
    rpc: &'a RpcClient,
    explorer: &'a ExplorerClient,
    store: &'a Store,
    addresses: &'a CoreAddresses,
}

impl<'a> BlocksSync<'a> {
    pub fn new(
        rpc: &'a RpcClient,
        explorer: &'a ExplorerClient,
        store: &'a Store,
        addresses: &'a CoreAddresses,
    ) -> Self {
        Self {
            rpc,
            explorer,
            store,
            addresses,
        }
    }

    async fn start_block(&self) -> Result<u64, IngestError> {
        if let Some(processed) = self.store.cursor(cursor::BLOCKS)? {
            return Ok(processed + 1);
        }

        let genesis =
            ensure_genesis(self.store, self.explorer, self.addresses.vault_factory).await?;

        Ok(genesis.saturating_sub(GENESIS_MARGIN))
    }

    /// Ingest every finalized block past the cursor. Returns the number of
    /// blocks written.
    pub async fn sync(&self) -> Result<u64, IngestError> {
        let start = self.start_block().await?;
        let end = self.rpc.block_number().await?.saturating_sub(FINALITY_OFFSET);

        if start > end {
            return Ok(0);
        }

        info!(start, end, "ingesting blocks");

        let mut written = 0;
        let mut from = start;

        while from <= end {
            let to = end.min(from + CHUNK_SIZE - 1);

            let mut batch = self.store.batch();
            for (number, block) in self.rpc.blocks(from, to).await? {
                batch.put_block(number, block);
                written += 1;
            }
            batch.put_cursor(cursor::BLOCKS, to);
            batch.commit()?;

            from = to + 1;
        }

        Ok(written)
    }
}
