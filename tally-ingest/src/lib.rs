//! Ingesters that feed the store: finalized blocks and decoded logs over
//! JSON-RPC, USD prices from CoinMarketCap or Alchemy, and the one-off
//! collateral/network seeding. The core reducer and points engine only ever
//! consume what lands here.

use alloy_primitives::Address;
use thiserror::Error;

pub mod blocks;
pub mod decode;
pub mod events;
pub mod explorer;
pub mod prices;
pub mod rpc;
pub mod seed;

#[cfg(test)]
mod tests;

pub use blocks::BlocksSync;
pub use events::EventsSync;
pub use prices::{PriceProvider, PricesSync};

/// Finalized head: latest minus this many blocks.
pub const FINALITY_OFFSET: u64 = 160;

/// Chain-level addresses of the core protocol contracts.
#[derive(Debug, Clone)]
pub struct CoreAddresses {
    pub operator_network_opt_in_service: Address,
    pub operator_vault_opt_in_service: Address,
    pub vault_factory: Address,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] tally_store::Error),

    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("undecodable payload: {0}")]
    Decode(String),

    #[error("provider response missing {0}")]
    MissingData(String),

    #[error("price data gap for {collateral} between {from} and {to}")]
    PriceGap {
        collateral: Address,
        from: u64,
        to: u64,
    },
}

impl IngestError {
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Store(inner) => inner.is_transient(),
            IngestError::Http(_) | IngestError::Rpc { .. } | IngestError::PriceGap { .. } => true,
            _ => false,
        }
    }
}
