//! Deterministic replay of normalized on-chain logs into the materialized
//! vault/delegator state, plus the pure effective-stake projection over it.

use alloy_primitives::Address;
use thiserror::Error;

pub mod reducer;
pub mod stake;


pub use reducer::Reducer;
pub use stake::StakeResolver;

#[derive(Error, Debug)]
pub enum StateError {
    #[error(transparent)]
    Store(#[from] tally_store::Error),

    #[error("no global vars recorded for {0}")]
    MissingGlobalVars(Address),

    #[error("block {0} not ingested")]
    MissingBlock(u64),

    #[error("{event} is not valid for delegator {delegator} of kind {kind}")]
    UnsupportedDelegator {
        event: &'static str,
        delegator: Address,
        kind: u8,
    },

    #[error("negative quantity applying {context} for {address} at block {block}")]
    NegativeQuantity {
        context: &'static str,
        address: Address,
        block: u64,
    },

    #[error("arithmetic overflow applying {context} for {address} at block {block}")]
    Overflow {
        context: &'static str,
        address: Address,
        block: u64,
    },

    #[error("invalid epoch configuration for vault {0}")]
    BadEpochConfig(Address),

    #[error("negative epoch for vault {vault} at timestamp {timestamp}")]
    NegativeEpoch { vault: Address, timestamp: u64 },
}

impl StateError {
    /// Only storage I/O is retryable; every other variant means the reducer
    /// and the chain disagree and continuing would corrupt points.
    pub fn is_transient(&self) -> bool {
        matches!(self, StateError::Store(inner) if inner.is_transient())
    }
}
