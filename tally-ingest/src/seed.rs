//! One-off seeding: collateral metadata fetched over `eth_call` and the
//! per-subnetwork points parameters. Both are idempotent against rows that
//! already exist.

use alloy_primitives::{aliases::U96, Address, U256};
use tracing::info;

use tally_store::model::{Collateral, NetworkPointsConfig, Subnetwork};
use tally_store::Store;

use crate::decode;
use crate::rpc::RpcClient;
use crate::IngestError;

#[derive(Debug, Clone)]
pub struct CollateralSeed {
    pub address: Address,
    pub cmc_id: u32,
}

#[derive(Debug, Clone)]
pub struct NetworkSeed {
    pub network: Address,
    pub identifier: U96,
    pub max_rate: U256,
    pub target_stake: Option<U256>,
    pub network_fee: Option<u64>,
    pub operator_fee: u64,
    pub start_from: Option<u64>,
}

/// Upsert collateral metadata, reading decimals/symbol/name from the token.
pub async fn seed_collaterals(
    rpc: &RpcClient,
    store: &Store,
    seeds: &[CollateralSeed],
) -> Result<(), IngestError> {
    let mut batch = store.batch();

    for seed in seeds {
        let decimals_raw = rpc
            .call(seed.address, decode::selector("decimals()"), None)
            .await?;
        let decimals = decode::word_u64(&decimals_raw, 0)? as u32;

        let symbol_raw = rpc
            .call(seed.address, decode::selector("symbol()"), None)
            .await?;
        let symbol = decode::decode_string(&symbol_raw)?;

        let name_raw = rpc
            .call(seed.address, decode::selector("name()"), None)
            .await?;
        let name = decode::decode_string(&name_raw)?;

        info!(collateral = %seed.address, symbol, "seeding collateral");

        batch.put_collateral(
            seed.address,
            Collateral {
                decimals,
                name,
                symbol,
                cmc_id: seed.cmc_id,
            },
        );
    }

    batch.commit()?;

    Ok(())
}

/// Write points parameters for the configured subnetworks, leaving already
/// configured rows untouched.
pub fn seed_networks(store: &Store, seeds: &[NetworkSeed]) -> Result<(), IngestError> {
    let mut batch = store.batch();

    for seed in seeds {
        let subnetwork = Subnetwork::new(seed.network, seed.identifier);
        let written = batch.put_network_points_config_if_absent(
            subnetwork,
            NetworkPointsConfig {
                max_rate: seed.max_rate,
                target_stake: seed.target_stake,
                network_fee: seed.network_fee,
                operator_fee: seed.operator_fee,
                block_number_processed: seed.start_from,
            },
        )?;

        if written {
            info!(network = %seed.network, identifier = %seed.identifier, "seeded network");
        }
    }

    batch.commit()?;

    Ok(())
}
