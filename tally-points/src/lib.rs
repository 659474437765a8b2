//! Time-integrated reward accrual over resolved effective stake, plus the
//! forward-only driver that replays blocks through the engine and the state
//! reducer.

use alloy_primitives::Address;
use thiserror::Error;

pub mod driver;
pub mod engine;

#[cfg(test)]
mod tests;

pub use driver::Driver;
pub use engine::Engine;

#[derive(Error, Debug)]
pub enum PointsError {
    #[error(transparent)]
    Store(#[from] tally_store::Error),

    #[error(transparent)]
    State(#[from] tally_state::StateError),

    #[error("block {0} not ingested")]
    MissingBlock(u64),

    #[error("no collateral metadata for {0}")]
    MissingCollateral(Address),

    #[error("arithmetic overflow computing {0}")]
    Math(&'static str),
}

impl PointsError {
    pub fn is_transient(&self) -> bool {
        match self {
            PointsError::Store(inner) => inner.is_transient(),
            PointsError::State(inner) => inner.is_transient(),
            _ => false,
        }
    }
}
