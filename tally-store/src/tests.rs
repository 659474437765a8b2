use alloy_primitives::{aliases::U96, Address, B256, U256};

use crate::model::*;
use crate::projections::ReceiverType;
use crate::store::StateRead;
use crate::Store;

fn with_tmp_store<T>(op: fn(store: Store) -> T) {
    let path = tempfile::tempdir().unwrap().into_path();
    let store = Store::open(path.clone()).unwrap();

    op(store);

    Store::destroy(path).unwrap();
}

fn addr(tag: u8) -> Address {
    Address::repeat_byte(tag)
}

fn subnet(tag: u8, identifier: u64) -> Subnetwork {
    Subnetwork::new(addr(tag), U96::from(identifier))
}

#[test]
fn test_batch_read_your_writes() {
    with_tmp_store(|store| {
        let vault = addr(0x11);

        let mut batch = store.batch();
        batch.put_vault_global_state(
            vault,
            VaultGlobalState {
                active_shares: U256::from(10),
                active_stake: U256::from(20),
            },
        );

        // pending write visible through the batch, not through the store
        assert_eq!(
            batch.vault_global_state(vault).unwrap().active_stake,
            U256::from(20)
        );
        assert_eq!(
            store.vault_global_state(vault).unwrap().active_stake,
            U256::ZERO
        );

        batch.commit().unwrap();

        assert_eq!(
            store.vault_global_state(vault).unwrap().active_stake,
            U256::from(20)
        );
    });
}

#[test]
fn test_uncommitted_batch_leaves_no_trace() {
    with_tmp_store(|store| {
        let vault = addr(0x22);

        {
            let mut batch = store.batch();
            batch.put_vault_global_state(
                vault,
                VaultGlobalState {
                    active_shares: U256::from(1),
                    active_stake: U256::from(1),
                },
            );
            // dropped without commit
        }

        assert_eq!(store.vault_global_state(vault).unwrap(), Default::default());
    });
}

#[test]
fn test_price_lookup_at_or_before() {
    with_tmp_store(|store| {
        let wsteth = addr(0x01);
        let wbtc = addr(0x02);

        let mut batch = store.batch();
        batch.put_price(wsteth, 100, U256::from(1_000));
        batch.put_price(wsteth, 200, U256::from(2_000));
        batch.put_price(wbtc, 150, U256::from(9_000));
        batch.commit().unwrap();

        assert_eq!(store.get_price(wsteth, 99).unwrap(), None);
        assert_eq!(store.get_price(wsteth, 100).unwrap(), Some(U256::from(1_000)));
        assert_eq!(store.get_price(wsteth, 199).unwrap(), Some(U256::from(1_000)));
        assert_eq!(store.get_price(wsteth, 500).unwrap(), Some(U256::from(2_000)));

        // a neighbour collateral must never leak into the lookup
        assert_eq!(store.get_price(wbtc, 149).unwrap(), None);
        assert_eq!(store.get_price(wbtc, 151).unwrap(), Some(U256::from(9_000)));
    });
}

#[test]
fn test_latest_prices_per_collateral() {
    with_tmp_store(|store| {
        let wsteth = addr(0x01);
        let wbtc = addr(0x02);

        let mut batch = store.batch();
        batch.put_collateral(
            wsteth,
            Collateral {
                decimals: 18,
                name: "Wrapped stETH".into(),
                symbol: "wstETH".into(),
                cmc_id: 1,
            },
        );
        batch.put_collateral(
            wbtc,
            Collateral {
                decimals: 8,
                name: "Wrapped BTC".into(),
                symbol: "WBTC".into(),
                cmc_id: 2,
            },
        );
        batch.put_price(wsteth, 10, U256::from(11));
        batch.put_price(wsteth, 20, U256::from(12));
        batch.commit().unwrap();

        // wbtc has no price yet and must simply be absent
        let prices = store.get_prices(15).unwrap();
        assert_eq!(prices, vec![(wsteth, U256::from(11))]);
    });
}

#[test]
fn test_block_at_or_before_timestamp() {
    with_tmp_store(|store| {
        let mut batch = store.batch();
        for (number, timestamp) in [(1u64, 1000u64), (2, 1012), (3, 1024)] {
            batch.put_block(
                number,
                BlockData {
                    timestamp,
                    hash: B256::repeat_byte(number as u8),
                },
            );
        }
        batch.commit().unwrap();

        assert_eq!(store.block_at_or_before(999).unwrap(), None);
        assert_eq!(store.block_at_or_before(1000).unwrap(), Some(1));
        assert_eq!(store.block_at_or_before(1020).unwrap(), Some(2));
        assert_eq!(store.block_at_or_before(5000).unwrap(), Some(3));
    });
}

#[test]
fn test_logs_ordered_by_index() {
    with_tmp_store(|store| {
        let vault = addr(0x11);
        let operator = addr(0x21);

        let mut batch = store.batch();
        batch
            .save_log(&LogRecord {
                block_number: 7,
                log_index: 5,
                address: vault,
                event: LogEvent::Deposit(DepositLog {
                    depositor: addr(0x31),
                    on_behalf_of: addr(0x31),
                    amount: U256::from(100),
                    shares: U256::from(100),
                }),
            })
            .unwrap();
        batch
            .save_log(&LogRecord {
                block_number: 7,
                log_index: 2,
                address: Address::ZERO,
                event: LogEvent::OperatorNetworkOptIn {
                    operator,
                    network: addr(0x41),
                    opted_in: true,
                },
            })
            .unwrap();
        batch
            .save_log(&LogRecord {
                block_number: 8,
                log_index: 0,
                address: vault,
                event: LogEvent::Transfer(TransferLog {
                    from: addr(0x31),
                    to: addr(0x32),
                    value: U256::from(1),
                }),
            })
            .unwrap();
        batch.commit().unwrap();

        let logs = store.logs_at(7).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].log_index, 2);
        assert_eq!(logs[1].log_index, 5);

        let logs = store.logs_at(8).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(matches!(logs[0].event, LogEvent::Transfer(_)));
    });
}

#[test]
fn test_log_rows_insert_if_absent() {
    with_tmp_store(|store| {
        let vault = addr(0x11);
        let deposit = |amount: u64| LogRecord {
            block_number: 3,
            log_index: 0,
            address: vault,
            event: LogEvent::Deposit(DepositLog {
                depositor: addr(0x31),
                on_behalf_of: addr(0x31),
                amount: U256::from(amount),
                shares: U256::from(amount),
            }),
        };

        let mut batch = store.batch();
        batch.save_log(&deposit(100)).unwrap();
        batch.commit().unwrap();

        // a re-ingested row must not clobber the original
        let mut batch = store.batch();
        batch.save_log(&deposit(999)).unwrap();
        batch.commit().unwrap();

        let logs = store.logs_at(3).unwrap();
        match &logs[0].event {
            LogEvent::Deposit(log) => assert_eq!(log.amount, U256::from(100)),
            other => panic!("unexpected event {other:?}"),
        }
    });
}

#[test]
fn test_cursors() {
    with_tmp_store(|store| {
        assert_eq!(store.cursor(cursor::POINTS).unwrap(), None);

        let mut batch = store.batch();
        batch.put_cursor(cursor::POINTS, 123);
        batch.put_cursor(cursor::STATE, 123);
        batch.commit().unwrap();

        assert_eq!(store.cursor(cursor::POINTS).unwrap(), Some(123));
        assert_eq!(store.cursor(cursor::STATE).unwrap(), Some(123));
        assert_eq!(store.cursor(cursor::EVENTS).unwrap(), None);
    });
}

#[test]
fn test_network_points_config_if_absent() {
    with_tmp_store(|store| {
        let subnetwork = subnet(0x41, 1);
        let config = |rate: u64| NetworkPointsConfig {
            max_rate: U256::from(rate),
            target_stake: None,
            network_fee: None,
            operator_fee: 300,
            block_number_processed: None,
        };

        let mut batch = store.batch();
        assert!(batch
            .put_network_points_config_if_absent(subnetwork, config(10))
            .unwrap());
        batch.commit().unwrap();

        let mut batch = store.batch();
        assert!(!batch
            .put_network_points_config_if_absent(subnetwork, config(99))
            .unwrap());
        batch.commit().unwrap();

        let stored = store.network_points_config(subnetwork).unwrap().unwrap();
        assert_eq!(stored.max_rate, U256::from(10));
    });
}

#[test]
fn test_snapshot_and_projections() {
    with_tmp_store(|store| {
        let network = addr(0x41);
        let subnetwork = subnet(0x41, 0);
        let vault = addr(0x11);
        let operator = addr(0x21);
        let staker = addr(0x31);

        let mut batch = store.batch();
        batch
            .add_network_operator_vault_points(subnetwork, operator, vault, U256::from(300))
            .unwrap();
        batch
            .add_network_vault_user_points(subnetwork, vault, staker, U256::from(700))
            .unwrap();
        // pending increments must be part of the snapshot
        batch.snapshot_points(200).unwrap();
        batch.commit().unwrap();

        assert_eq!(store.last_snapshot().unwrap(), Some(200));
        assert_eq!(store.closest_snapshot(199).unwrap(), None);
        assert_eq!(store.closest_snapshot(200).unwrap(), Some(200));
        assert_eq!(store.closest_snapshot(450).unwrap(), Some(200));

        let by_operator = store.points_by_operator(200, operator).unwrap();
        assert_eq!(by_operator.len(), 1);
        assert_eq!(by_operator[0].network, network);
        assert_eq!(by_operator[0].vault, vault);
        assert_eq!(by_operator[0].points, U256::from(300));

        let by_staker = store.points_by_staker(200, staker).unwrap();
        assert_eq!(by_staker.len(), 1);
        assert_eq!(by_staker[0].points, U256::from(700));

        let all = store.all_points(200, 0, 10).unwrap();
        assert_eq!(all.len(), 2);
        // ordered by receiver type within the same (network, vault)
        assert_eq!(all[0].receiver_type, ReceiverType::Operator);
        assert_eq!(all[1].receiver_type, ReceiverType::Staker);

        let page = store.all_points(200, 1, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].receiver_type, ReceiverType::Staker);

        let stats = store.points_stats(200, None).unwrap();
        assert_eq!(stats.total_points, U256::from(1_000));
        assert_eq!(stats.stakers, 1);
        assert_eq!(stats.operators, 1);
        assert_eq!(stats.networks, 0);

        let stats = store.points_stats(200, Some(ReceiverType::Staker)).unwrap();
        assert_eq!(stats.total_points, U256::from(700));
        assert_eq!(stats.stakers, 1);
        assert_eq!(stats.operators, 0);
    });
}

#[test]
fn test_snapshot_rows_accumulate_across_blocks() {
    with_tmp_store(|store| {
        let subnetwork = subnet(0x41, 0);
        let vault = addr(0x11);
        let staker = addr(0x31);

        let mut batch = store.batch();
        batch
            .add_network_vault_user_points(subnetwork, vault, staker, U256::from(100))
            .unwrap();
        batch.snapshot_points(200).unwrap();
        batch.commit().unwrap();

        let mut batch = store.batch();
        batch
            .add_network_vault_user_points(subnetwork, vault, staker, U256::from(50))
            .unwrap();
        batch.snapshot_points(400).unwrap();
        batch.commit().unwrap();

        // each snapshot keeps its own immutable copy
        assert_eq!(
            store.points_by_staker(200, staker).unwrap()[0].points,
            U256::from(100)
        );
        assert_eq!(
            store.points_by_staker(400, staker).unwrap()[0].points,
            U256::from(150)
        );
        assert_eq!(store.closest_snapshot(399).unwrap(), Some(200));
    });
}

#[test]
fn test_delegator_operator_scans() {
    with_tmp_store(|store| {
        let delegator = addr(0x51);
        let other_delegator = addr(0x52);
        let subnetwork = subnet(0x41, 0);
        let other_subnet = subnet(0x41, 1);

        let mut batch = store.batch();
        batch.put_delegator0_operator_shares(delegator, subnetwork, addr(0x21), U256::from(60));
        batch.put_delegator0_operator_shares(delegator, subnetwork, addr(0x22), U256::from(40));
        batch.put_delegator0_operator_shares(delegator, other_subnet, addr(0x23), U256::from(1));
        batch.put_delegator0_operator_shares(other_delegator, subnetwork, addr(0x24), U256::from(2));
        batch.commit().unwrap();

        let operators = store.delegator0_operators(delegator, subnetwork).unwrap();
        assert_eq!(
            operators,
            vec![
                (addr(0x21), U256::from(60)),
                (addr(0x22), U256::from(40)),
            ]
        );
    });
}
