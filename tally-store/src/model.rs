//! Domain records shared by the indexer, the reducer and the points engine.

use alloy_primitives::{aliases::U96, Address, B256, U256, U512};
use serde::{Deserialize, Serialize};

/// Prices are stored as USD × 10^24.
pub const USD_DECIMALS: u32 = 24;

/// Points and reward rates live at scale 10^48.
pub const RATE_DECIMALS: u32 = 48;

/// Fees are expressed in basis points over this denominator.
pub const FEE_BASE: u64 = 10_000;

/// A historical snapshot of the points tables is taken every this many blocks.
pub const SNAPSHOT_INTERVAL: u64 = 200;

pub fn pow10(exp: u32) -> U256 {
    U256::from(10u8).pow(U256::from(exp))
}

fn narrow(value: U512) -> Option<U256> {
    let bytes = value.to_be_bytes::<64>();

    if bytes[..32].iter().any(|b| *b != 0) {
        return None;
    }

    Some(U256::from_be_slice(&bytes[32..]))
}

/// `a · b ÷ denom` with floor division, widened through 512 bits so the
/// product never truncates. `None` on a zero denominator or a quotient beyond
/// 256 bits.
pub fn mul_div(a: U256, b: U256, denom: U256) -> Option<U256> {
    if denom.is_zero() {
        return None;
    }

    let product = U512::from(a).checked_mul(U512::from(b))?;

    narrow(product / U512::from(denom))
}

/// `a · b · c ÷ denom`, same contract as [`mul_div`].
pub fn mul3_div(a: U256, b: U256, c: U256, denom: U256) -> Option<U256> {
    if denom.is_zero() {
        return None;
    }

    let product = U512::from(a)
        .checked_mul(U512::from(b))?
        .checked_mul(U512::from(c))?;

    narrow(product / U512::from(denom))
}

/// Cursor names for the `ProcessedTimepoints` table. `GENESIS` holds the vault
/// factory creation block resolved once by the ingester; the others advance
/// forward only.
pub mod cursor {
    pub const BLOCKS: &str = "blocks";
    pub const PRICES: &str = "prices";
    pub const EVENTS: &str = "events";
    pub const STATE: &str = "state";
    pub const POINTS: &str = "points";
    pub const GENESIS: &str = "genesis";
}

/// One network slot: a network address plus a 96-bit identifier, the split of
/// the on-chain `bytes32 subnetwork` value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subnetwork {
    pub network: Address,
    pub identifier: U96,
}

impl Subnetwork {
    pub fn new(network: Address, identifier: U96) -> Self {
        Self {
            network,
            identifier,
        }
    }

    pub fn from_raw(raw: B256) -> Self {
        let network = Address::from_slice(&raw[0..20]);
        let identifier: [u8; 12] = raw[20..32].try_into().unwrap();

        Self {
            network,
            identifier: U96::from_be_bytes(identifier),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub timestamp: u64,
    pub hash: B256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collateral {
    pub decimals: u32,
    pub name: String,
    pub symbol: String,
    pub cmc_id: u32,
}

/// The four delegator variants. The discriminator is part of the vault's
/// immutable configuration and selects which limit tables apply.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegatorKind {
    /// Type 0: shares-based allocation across operators.
    NetworkRestake,
    /// Type 1: per-operator absolute limits.
    FullRestake,
    /// Type 2: a single fixed operator.
    OperatorSpecific,
    /// Type 3: a single fixed operator on a single fixed network.
    OperatorNetworkSpecific,
}

impl DelegatorKind {
    pub fn from_type(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::NetworkRestake),
            1 => Some(Self::FullRestake),
            2 => Some(Self::OperatorSpecific),
            3 => Some(Self::OperatorNetworkSpecific),
            _ => None,
        }
    }

    pub fn as_type(&self) -> u8 {
        match self {
            Self::NetworkRestake => 0,
            Self::FullRestake => 1,
            Self::OperatorSpecific => 2,
            Self::OperatorNetworkSpecific => 3,
        }
    }
}

/// Per-vault immutable configuration collected at vault creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVars {
    pub vault: Address,
    pub delegator: Address,
    pub kind: DelegatorKind,
    pub collateral: Address,
    pub epoch_duration_init: u64,
    pub epoch_duration: u64,
    /// Fixed operator for kinds 2 and 3.
    pub operator: Option<Address>,
    /// Fixed network for kind 3.
    pub network: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultGlobalState {
    pub active_shares: U256,
    pub active_stake: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalsState {
    pub withdrawal_shares: U256,
    pub withdrawals: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegator0NetworkState {
    pub network_limit: U256,
    pub total_operator_network_shares: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPointsConfig {
    pub max_rate: U256,
    pub target_stake: Option<U256>,
    pub network_fee: Option<u64>,
    pub operator_fee: u64,
    pub block_number_processed: Option<u64>,
}

// ---------------------------------------------------------------------------
// Normalized log records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositLog {
    pub depositor: Address,
    pub on_behalf_of: Address,
    pub amount: U256,
    pub shares: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawLog {
    pub withdrawer: Address,
    pub claimer: Address,
    pub amount: U256,
    pub burned_shares: U256,
    pub minted_shares: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnSlashLog {
    pub amount: U256,
    pub capture_timestamp: u64,
    pub slashed_amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLog {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLimitLog {
    pub subnetwork: Subnetwork,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOperatorSharesLog {
    pub subnetwork: Subnetwork,
    pub operator: Address,
    pub shares: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOperatorLimitLog {
    pub subnetwork: Subnetwork,
    pub operator: Address,
    pub amount: U256,
}

/// The decoded payload of one normalized log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    OperatorNetworkOptIn {
        operator: Address,
        network: Address,
        opted_in: bool,
    },
    OperatorVaultOptIn {
        operator: Address,
        vault: Address,
        opted_in: bool,
    },
    Deposit(DepositLog),
    Withdraw(WithdrawLog),
    OnSlash(OnSlashLog),
    Transfer(TransferLog),
    SetMaxNetworkLimit(SetLimitLog),
    SetNetworkLimit(SetLimitLog),
    SetOperatorNetworkShares(SetOperatorSharesLog),
    SetOperatorNetworkLimit(SetOperatorLimitLog),
}

/// One normalized log at a specific chain position. `address` is the emitting
/// vault or delegator; for the opt-in services it is the zero address, which
/// only participates as the ordering tie-breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub block_number: u64,
    pub log_index: u64,
    pub address: Address,
    pub event: LogEvent,
}

impl LogRecord {
    /// Total order inside a block: `(log_index, address)`. The log index is
    /// already unique per block on-chain; the address tag keeps the order
    /// total even for synthetic inputs.
    pub fn sort_key(&self) -> (u64, Address) {
        (self.log_index, self.address)
    }
}

/// A resolved effective-stake row for one `(subnetwork, operator, vault)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeRow {
    pub subnetwork: Subnetwork,
    pub operator: Address,
    pub vault: Address,
    pub collateral: Address,
    pub stake: U256,
}
