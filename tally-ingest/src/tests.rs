use alloy_primitives::{aliases::U64, aliases::U96, Address, B256, U256};

use tally_store::model::*;
use tally_store::{StateRead, Store};

use crate::decode::{self, ContractClass};
use crate::events::split_range;
use crate::prices::usd_to_fixed;
use crate::rpc::RawLog;
use crate::seed::{seed_networks, NetworkSeed};
use crate::IngestError;

fn addr(tag: u8) -> Address {
    Address::repeat_byte(tag)
}

fn topic_from_address(address: Address) -> B256 {
    let mut raw = [0u8; 32];
    raw[12..32].copy_from_slice(address.as_slice());
    B256::from(raw)
}

fn subnetwork_topic(network: Address, identifier: u64) -> B256 {
    let mut raw = [0u8; 32];
    raw[0..20].copy_from_slice(network.as_slice());
    raw[20..32].copy_from_slice(&U96::from(identifier).to_be_bytes::<12>());
    B256::from(raw)
}

fn words(values: &[U256]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 32);
    for value in values {
        out.extend_from_slice(&value.to_be_bytes::<32>());
    }
    out
}

fn raw_log(address: Address, topics: Vec<B256>, data: Vec<u8>) -> RawLog {
    RawLog {
        address,
        topics,
        data: data.into(),
        block_number: U64::from(77),
        log_index: U64::from(3),
    }
}

#[test]
fn test_decode_deposit() {
    let raw = raw_log(
        addr(0x11),
        vec![
            *decode::DEPOSIT,
            topic_from_address(addr(0x31)),
            topic_from_address(addr(0x32)),
        ],
        words(&[U256::from(1_000), U256::from(999)]),
    );

    let record = decode::decode_log(&raw, ContractClass::Vault).unwrap();

    assert_eq!(record.block_number, 77);
    assert_eq!(record.log_index, 3);
    assert_eq!(record.address, addr(0x11));
    match record.event {
        LogEvent::Deposit(log) => {
            assert_eq!(log.depositor, addr(0x31));
            assert_eq!(log.on_behalf_of, addr(0x32));
            assert_eq!(log.amount, U256::from(1_000));
            assert_eq!(log.shares, U256::from(999));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_decode_on_slash() {
    let raw = raw_log(
        addr(0x11),
        vec![*decode::ON_SLASH],
        words(&[
            U256::from(500),
            U256::from(1_726_000_000u64),
            U256::from(200),
        ]),
    );

    let record = decode::decode_log(&raw, ContractClass::Vault).unwrap();

    match record.event {
        LogEvent::OnSlash(log) => {
            assert_eq!(log.amount, U256::from(500));
            assert_eq!(log.capture_timestamp, 1_726_000_000);
            assert_eq!(log.slashed_amount, U256::from(200));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_decode_opt_in_and_out() {
    for (topic, expected) in [(*decode::OPT_IN, true), (*decode::OPT_OUT, false)] {
        let raw = raw_log(
            addr(0x99),
            vec![
                topic,
                topic_from_address(addr(0x21)),
                topic_from_address(addr(0x41)),
            ],
            Vec::new(),
        );

        let record =
            decode::decode_log(&raw, ContractClass::OperatorNetworkOptInService).unwrap();

        // the service address only matters for ordering, not identity
        assert_eq!(record.address, Address::ZERO);
        match record.event {
            LogEvent::OperatorNetworkOptIn {
                operator,
                network,
                opted_in,
            } => {
                assert_eq!(operator, addr(0x21));
                assert_eq!(network, addr(0x41));
                assert_eq!(opted_in, expected);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[test]
fn test_decode_subnetwork_split() {
    let raw = raw_log(
        addr(0x12),
        vec![
            *decode::SET_OPERATOR_NETWORK_SHARES,
            subnetwork_topic(addr(0x41), 7),
            topic_from_address(addr(0x21)),
        ],
        words(&[U256::from(55)]),
    );

    let record = decode::decode_log(&raw, ContractClass::Delegator).unwrap();

    match record.event {
        LogEvent::SetOperatorNetworkShares(log) => {
            assert_eq!(log.subnetwork.network, addr(0x41));
            assert_eq!(log.subnetwork.identifier, U96::from(7));
            assert_eq!(log.operator, addr(0x21));
            assert_eq!(log.shares, U256::from(55));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_unknown_signature_is_an_error() {
    let raw = raw_log(addr(0x11), vec![B256::repeat_byte(0xAB)], Vec::new());

    let err = decode::decode_log(&raw, ContractClass::Vault).unwrap_err();
    assert!(matches!(err, IngestError::Decode(_)));
    assert!(!err.is_transient());
}

#[test]
fn test_split_range_bisects() {
    assert_eq!(split_range(0, 9), Some(((0, 4), (5, 9))));
    assert_eq!(split_range(10, 11), Some(((10, 10), (11, 11))));
    assert_eq!(split_range(5, 5), None);
}

#[test]
fn test_usd_to_fixed() {
    assert_eq!(usd_to_fixed(-1.0), None);
    assert_eq!(usd_to_fixed(f64::NAN), None);
    assert_eq!(usd_to_fixed(0.0), Some(U256::ZERO));

    // the float path carries ~15 significant digits into the 10^24 scale
    let one = usd_to_fixed(1.0).unwrap();
    let exact = pow10(24);
    let error = one.abs_diff(exact);
    assert!(error * U256::from(1_000_000_000u64) < exact);

    let half = usd_to_fixed(0.5).unwrap();
    assert!(half < one);
    assert!(half.abs_diff(exact / U256::from(2u8)) * U256::from(1_000_000_000u64) < exact);
}

#[test]
fn test_decode_string_standard_and_bytes32() {
    // standard dynamic string: offset, length, bytes
    let mut data = words(&[U256::from(0x20), U256::from(6)]);
    data.extend_from_slice(b"wstETH");
    data.resize(96, 0);
    assert_eq!(decode::decode_string(&data).unwrap(), "wstETH");

    // legacy bytes32 symbol
    let mut legacy = [0u8; 32];
    legacy[..4].copy_from_slice(b"WBTC");
    assert_eq!(decode::decode_string(&legacy).unwrap(), "WBTC");
}

#[test]
fn test_seed_networks_is_idempotent() {
    let path = tempfile::tempdir().unwrap().into_path();
    let store = Store::open(path.clone()).unwrap();

    let seed = |rate: u64| NetworkSeed {
        network: addr(0x41),
        identifier: U96::from(1),
        max_rate: U256::from(rate),
        target_stake: None,
        network_fee: None,
        operator_fee: 300,
        start_from: Some(100),
    };

    seed_networks(&store, &[seed(10)]).unwrap();
    seed_networks(&store, &[seed(99)]).unwrap();

    let subnetwork = Subnetwork::new(addr(0x41), U96::from(1));
    let config = store.network_points_config(subnetwork).unwrap().unwrap();
    assert_eq!(config.max_rate, U256::from(10));
    assert_eq!(config.block_number_processed, Some(100));

    Store::destroy(path).unwrap();
}
