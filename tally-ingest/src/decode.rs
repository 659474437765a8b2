//! Raw-log decoding: topic0 dispatch against the known event signatures,
//! indexed arguments from topics, static arguments from 32-byte data words.

use alloy_primitives::{keccak256, Address, B256, U256};
use once_cell::sync::Lazy;

use tally_store::model::*;

use crate::IngestError;

pub static ADD_ENTITY: Lazy<B256> = Lazy::new(|| keccak256("AddEntity(address)"));
pub static OPT_IN: Lazy<B256> = Lazy::new(|| keccak256("OptIn(address,address)"));
pub static OPT_OUT: Lazy<B256> = Lazy::new(|| keccak256("OptOut(address,address)"));
pub static DEPOSIT: Lazy<B256> =
    Lazy::new(|| keccak256("Deposit(address,address,uint256,uint256)"));
pub static WITHDRAW: Lazy<B256> =
    Lazy::new(|| keccak256("Withdraw(address,address,uint256,uint256,uint256)"));
pub static ON_SLASH: Lazy<B256> = Lazy::new(|| keccak256("OnSlash(uint256,uint48,uint256)"));
pub static TRANSFER: Lazy<B256> = Lazy::new(|| keccak256("Transfer(address,address,uint256)"));
pub static SET_MAX_NETWORK_LIMIT: Lazy<B256> =
    Lazy::new(|| keccak256("SetMaxNetworkLimit(bytes32,uint256)"));
pub static SET_NETWORK_LIMIT: Lazy<B256> =
    Lazy::new(|| keccak256("SetNetworkLimit(bytes32,uint256)"));
pub static SET_OPERATOR_NETWORK_SHARES: Lazy<B256> =
    Lazy::new(|| keccak256("SetOperatorNetworkShares(bytes32,address,uint256)"));
pub static SET_OPERATOR_NETWORK_LIMIT: Lazy<B256> =
    Lazy::new(|| keccak256("SetOperatorNetworkLimit(bytes32,address,uint256)"));

/// Which contract class emitted a log; selects the decodable event set.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContractClass {
    OperatorNetworkOptInService,
    OperatorVaultOptInService,
    Vault,
    Delegator,
}

pub fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic[12..32])
}

pub fn word_u256(data: &[u8], index: usize) -> Result<U256, IngestError> {
    let start = index * 32;
    let end = start + 32;

    if data.len() < end {
        return Err(IngestError::Decode(format!(
            "data too short for word {index}"
        )));
    }

    Ok(U256::from_be_slice(&data[start..end]))
}

pub fn word_u64(data: &[u8], index: usize) -> Result<u64, IngestError> {
    let word = word_u256(data, index)?;

    word.try_into()
        .map_err(|_| IngestError::Decode(format!("word {index} exceeds u64")))
}

fn topic_at(raw: &crate::rpc::RawLog, index: usize) -> Result<&B256, IngestError> {
    raw.topics
        .get(index)
        .ok_or_else(|| IngestError::Decode(format!("missing topic {index}")))
}

/// Decode one raw log into a normalized record. An unrecognized signature on
/// a known contract class is a decoding error, never skipped silently.
pub fn decode_log(raw: &crate::rpc::RawLog, class: ContractClass) -> Result<LogRecord, IngestError> {
    let topic0 = topic_at(raw, 0)?;
    let data = raw.data.as_ref();

    let (address, event) = match class {
        ContractClass::OperatorNetworkOptInService => {
            let operator = topic_address(topic_at(raw, 1)?);
            let network = topic_address(topic_at(raw, 2)?);

            let opted_in = if topic0 == &*OPT_IN {
                true
            } else if topic0 == &*OPT_OUT {
                false
            } else {
                return Err(unknown_signature(topic0, class));
            };

            (
                Address::ZERO,
                LogEvent::OperatorNetworkOptIn {
                    operator,
                    network,
                    opted_in,
                },
            )
        }
        ContractClass::OperatorVaultOptInService => {
            let operator = topic_address(topic_at(raw, 1)?);
            let vault = topic_address(topic_at(raw, 2)?);

            let opted_in = if topic0 == &*OPT_IN {
                true
            } else if topic0 == &*OPT_OUT {
                false
            } else {
                return Err(unknown_signature(topic0, class));
            };

            (
                Address::ZERO,
                LogEvent::OperatorVaultOptIn {
                    operator,
                    vault,
                    opted_in,
                },
            )
        }
        ContractClass::Vault => {
            let event = if topic0 == &*DEPOSIT {
                LogEvent::Deposit(DepositLog {
                    depositor: topic_address(topic_at(raw, 1)?),
                    on_behalf_of: topic_address(topic_at(raw, 2)?),
                    amount: word_u256(data, 0)?,
                    shares: word_u256(data, 1)?,
                })
            } else if topic0 == &*WITHDRAW {
                LogEvent::Withdraw(WithdrawLog {
                    withdrawer: topic_address(topic_at(raw, 1)?),
                    claimer: topic_address(topic_at(raw, 2)?),
                    amount: word_u256(data, 0)?,
                    burned_shares: word_u256(data, 1)?,
                    minted_shares: word_u256(data, 2)?,
                })
            } else if topic0 == &*ON_SLASH {
                LogEvent::OnSlash(OnSlashLog {
                    amount: word_u256(data, 0)?,
                    capture_timestamp: word_u64(data, 1)?,
                    slashed_amount: word_u256(data, 2)?,
                })
            } else if topic0 == &*TRANSFER {
                LogEvent::Transfer(TransferLog {
                    from: topic_address(topic_at(raw, 1)?),
                    to: topic_address(topic_at(raw, 2)?),
                    value: word_u256(data, 0)?,
                })
            } else {
                return Err(unknown_signature(topic0, class));
            };

            (raw.address, event)
        }
        ContractClass::Delegator => {
            let subnetwork = Subnetwork::from_raw(*topic_at(raw, 1)?);

            let event = if topic0 == &*SET_MAX_NETWORK_LIMIT {
                LogEvent::SetMaxNetworkLimit(SetLimitLog {
                    subnetwork,
                    amount: word_u256(data, 0)?,
                })
            } else if topic0 == &*SET_NETWORK_LIMIT {
                LogEvent::SetNetworkLimit(SetLimitLog {
                    subnetwork,
                    amount: word_u256(data, 0)?,
                })
            } else if topic0 == &*SET_OPERATOR_NETWORK_SHARES {
                LogEvent::SetOperatorNetworkShares(SetOperatorSharesLog {
                    subnetwork,
                    operator: topic_address(topic_at(raw, 2)?),
                    shares: word_u256(data, 0)?,
                })
            } else if topic0 == &*SET_OPERATOR_NETWORK_LIMIT {
                LogEvent::SetOperatorNetworkLimit(SetOperatorLimitLog {
                    subnetwork,
                    operator: topic_address(topic_at(raw, 2)?),
                    amount: word_u256(data, 0)?,
                })
            } else {
                return Err(unknown_signature(topic0, class));
            };

            (raw.address, event)
        }
    };

    Ok(LogRecord {
        block_number: raw.block_number.to::<u64>(),
        log_index: raw.log_index.to::<u64>(),
        address,
        event,
    })
}

fn unknown_signature(topic0: &B256, class: ContractClass) -> IngestError {
    IngestError::Decode(format!("unknown event signature {topic0} on {class:?}"))
}

/// ABI function selector.
pub fn selector(signature: &str) -> Vec<u8> {
    keccak256(signature)[..4].to_vec()
}

/// Decode a solidity `string` return value; tolerates the legacy
/// bytes32-style encoding some tokens use.
pub fn decode_string(data: &[u8]) -> Result<String, IngestError> {
    if data.len() == 32 {
        let trimmed: Vec<u8> = data.iter().copied().take_while(|b| *b != 0).collect();
        return String::from_utf8(trimmed)
            .map_err(|_| IngestError::Decode("string return is not utf-8".into()));
    }

    let offset: usize = word_u64(data, 0)? as usize;
    let length = word_u64(data, offset / 32)? as usize;
    let start = offset + 32;

    if data.len() < start + length {
        return Err(IngestError::Decode("string return truncated".into()));
    }

    String::from_utf8(data[start..start + length].to_vec())
        .map_err(|_| IngestError::Decode("string return is not utf-8".into()))
}
