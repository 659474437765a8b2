use alloy_primitives::{aliases::U96, Address, B256, U256};

use tally_store::model::*;
use tally_store::{StateRead, Store};

use crate::{Driver, Engine};

fn with_tmp_store<T>(op: fn(store: Store) -> T) {
    let path = tempfile::tempdir().unwrap().into_path();
    let store = Store::open(path.clone()).unwrap();

    op(store);

    Store::destroy(path).unwrap();
}

fn addr(tag: u8) -> Address {
    Address::repeat_byte(tag)
}

fn e(value: u64, exp: u32) -> U256 {
    U256::from(value) * pow10(exp)
}

const VAULT: u8 = 0x11;
const DELEGATOR: u8 = 0x12;
const COLLATERAL: u8 = 0x13;
const OPERATOR: u8 = 0x21;
const OPERATOR_2: u8 = 0x22;
const USER_1: u8 = 0x31;
const USER_2: u8 = 0x32;
const NETWORK: u8 = 0x41;

fn subnet0() -> Subnetwork {
    Subnetwork::new(addr(NETWORK), U96::ZERO)
}

fn put_blocks(store: &Store, count: u64, t0: u64, spacing: u64) {
    let mut batch = store.batch();
    for number in 1..=count {
        batch.put_block(
            number,
            BlockData {
                timestamp: t0 + (number - 1) * spacing,
                hash: B256::repeat_byte((number % 251) as u8),
            },
        );
    }
    batch.commit().unwrap();
}

fn seed_collateral_and_price(store: &Store, price_block: u64, price: U256) {
    let mut batch = store.batch();
    batch.put_collateral(
        addr(COLLATERAL),
        Collateral {
            decimals: 18,
            name: "Wrapped stETH".into(),
            symbol: "wstETH".into(),
            cmc_id: 1,
        },
    );
    batch.put_price(addr(COLLATERAL), price_block, price);
    batch.commit().unwrap();
}

fn seed_config(store: &Store, max_rate: U256, operator_fee: u64) {
    let mut batch = store.batch();
    batch.put_network_points_config(
        subnet0(),
        NetworkPointsConfig {
            max_rate,
            target_stake: None,
            network_fee: None,
            operator_fee,
            block_number_processed: None,
        },
    );
    batch.commit().unwrap();
}

fn seed_vault(store: &Store, kind: DelegatorKind) {
    let mut batch = store.batch();
    batch.put_global_vars(GlobalVars {
        vault: addr(VAULT),
        delegator: addr(DELEGATOR),
        kind,
        collateral: addr(COLLATERAL),
        epoch_duration_init: 0,
        epoch_duration: 1_000_000,
        operator: None,
        network: None,
    });
    batch.commit().unwrap();
}

/// Committed state equivalent to a single kind-0 vault with opted-in
/// operators holding the given share split and users holding the given
/// deposits.
fn seed_kind0_state(store: &Store, operators: &[(u8, u64)], deposits: &[(u8, U256)]) {
    seed_vault(store, DelegatorKind::NetworkRestake);

    let total_stake: U256 = deposits.iter().map(|(_, amount)| *amount).sum();
    let total_shares: u64 = operators.iter().map(|(_, shares)| shares).sum();

    let mut batch = store.batch();
    batch.put_vault_global_state(
        addr(VAULT),
        VaultGlobalState {
            active_shares: total_stake,
            active_stake: total_stake,
        },
    );

    for (user, amount) in deposits {
        batch.put_active_shares_of(addr(VAULT), addr(*user), *amount);
    }

    batch.put_delegator0_network(
        addr(DELEGATOR),
        subnet0(),
        Delegator0NetworkState {
            network_limit: U256::MAX,
            total_operator_network_shares: U256::from(total_shares),
        },
    );

    for (operator, shares) in operators {
        batch.put_opted_in_network(addr(*operator), addr(NETWORK), true);
        batch.put_opted_in_vault(addr(*operator), addr(VAULT), true);
        batch.put_delegator0_operator_shares(
            addr(DELEGATOR),
            subnet0(),
            addr(*operator),
            U256::from(*shares),
        );
    }

    batch.commit().unwrap();
}

fn integrate(store: &Store, previous: u64, block: u64) {
    let engine = Engine::new(store);
    let mut batch = store.batch();
    engine.integrate_block(&mut batch, previous, block).unwrap();
    batch.commit().unwrap();
}

// ---------------------------------------------------------------------------
// engine
// ---------------------------------------------------------------------------

#[test]
fn test_accrual_matches_budget() {
    with_tmp_store(|store| {
        // one vault, one operator, one staker, delta_t = 3600
        put_blocks(&store, 2, 1000, 3600);
        seed_collateral_and_price(&store, 1, pow10(USD_DECIMALS));
        seed_config(&store, pow10(USD_DECIMALS), 3000);
        seed_kind0_state(&store, &[(OPERATOR, 100)], &[(USER_1, e(1000, 18))]);

        integrate(&store, 1, 2);

        // p_nt = 1e24 * 1000e24 * 3600 / (1e24 * 3600) = 1000e24
        assert_eq!(
            store
                .network_operator_vault_points(subnet0(), addr(OPERATOR), addr(VAULT))
                .unwrap(),
            e(300, 24)
        );
        assert_eq!(
            store
                .network_vault_user_points(subnet0(), addr(VAULT), addr(USER_1))
                .unwrap(),
            e(700, 24)
        );

        let config = store.network_points_config(subnet0()).unwrap().unwrap();
        assert_eq!(config.block_number_processed, Some(2));
    });
}

#[test]
fn test_budget_closure_under_rounding() {
    with_tmp_store(|store| {
        put_blocks(&store, 2, 1000, 3600);
        seed_collateral_and_price(&store, 1, pow10(USD_DECIMALS));
        seed_config(&store, pow10(USD_DECIMALS), 1234);
        seed_kind0_state(
            &store,
            &[(OPERATOR, 7), (OPERATOR_2, 3)],
            &[
                (USER_1, U256::from(666_667u64) * pow10(12)),
                (USER_2, U256::from(333_337u64) * pow10(12)),
            ],
        );

        integrate(&store, 1, 2);

        let s_n = (U256::from(666_667u64) + U256::from(333_337u64)) * pow10(12) * pow10(6);
        let p_nt = mul3_div(
            pow10(USD_DECIMALS),
            s_n,
            U256::from(3600u64),
            pow10(USD_DECIMALS) * U256::from(3600u64),
        )
        .unwrap();

        let mut distributed = U256::ZERO;
        for operator in [OPERATOR, OPERATOR_2] {
            distributed += store
                .network_operator_vault_points(subnet0(), addr(operator), addr(VAULT))
                .unwrap();
        }
        for user in [USER_1, USER_2] {
            distributed += store
                .network_vault_user_points(subnet0(), addr(VAULT), addr(user))
                .unwrap();
        }

        // every floor division loses strictly less than one unit
        assert!(distributed <= p_nt);
        assert!(p_nt - distributed < U256::from(8));
    });
}

#[test]
fn test_full_restake_vaults_are_excluded() {
    with_tmp_store(|store| {
        put_blocks(&store, 2, 1000, 3600);
        seed_collateral_and_price(&store, 1, pow10(USD_DECIMALS));
        seed_config(&store, pow10(USD_DECIMALS), 3000);
        seed_vault(&store, DelegatorKind::FullRestake);

        let mut batch = store.batch();
        batch.put_vault_global_state(
            addr(VAULT),
            VaultGlobalState {
                active_shares: e(1000, 18),
                active_stake: e(1000, 18),
            },
        );
        batch.put_opted_in_network(addr(OPERATOR), addr(NETWORK), true);
        batch.put_opted_in_vault(addr(OPERATOR), addr(VAULT), true);
        batch.put_delegator1_network_limit(addr(DELEGATOR), subnet0(), U256::MAX);
        batch.put_delegator1_operator_limit(
            addr(DELEGATOR),
            subnet0(),
            addr(OPERATOR),
            U256::MAX,
        );
        batch.commit().unwrap();

        integrate(&store, 1, 2);

        assert_eq!(
            store
                .network_operator_vault_points(subnet0(), addr(OPERATOR), addr(VAULT))
                .unwrap(),
            U256::ZERO
        );
    });
}

#[test]
fn test_missing_price_accrues_nothing() {
    with_tmp_store(|store| {
        put_blocks(&store, 2, 1000, 3600);

        // collateral metadata exists but no price rows at all
        let mut batch = store.batch();
        batch.put_collateral(
            addr(COLLATERAL),
            Collateral {
                decimals: 18,
                name: "Wrapped stETH".into(),
                symbol: "wstETH".into(),
                cmc_id: 1,
            },
        );
        batch.commit().unwrap();

        seed_config(&store, pow10(USD_DECIMALS), 3000);
        seed_kind0_state(&store, &[(OPERATOR, 100)], &[(USER_1, e(1000, 18))]);

        integrate(&store, 1, 2);

        assert_eq!(
            store
                .network_operator_vault_points(subnet0(), addr(OPERATOR), addr(VAULT))
                .unwrap(),
            U256::ZERO
        );
        // zero effective stake also means the subnet cursor does not move
        let config = store.network_points_config(subnet0()).unwrap().unwrap();
        assert_eq!(config.block_number_processed, None);
    });
}

#[test]
fn test_processed_subnet_is_skipped() {
    with_tmp_store(|store| {
        put_blocks(&store, 2, 1000, 3600);
        seed_collateral_and_price(&store, 1, pow10(USD_DECIMALS));
        seed_config(&store, pow10(USD_DECIMALS), 3000);
        seed_kind0_state(&store, &[(OPERATOR, 100)], &[(USER_1, e(1000, 18))]);

        integrate(&store, 1, 2);
        let first = store
            .network_vault_user_points(subnet0(), addr(VAULT), addr(USER_1))
            .unwrap();

        // a replay of the same interval must not double-count
        integrate(&store, 1, 2);
        let second = store
            .network_vault_user_points(subnet0(), addr(VAULT), addr(USER_1))
            .unwrap();

        assert_eq!(first, second);
    });
}

#[test]
fn test_points_are_monotonic() {
    with_tmp_store(|store| {
        put_blocks(&store, 3, 1000, 600);
        seed_collateral_and_price(&store, 1, pow10(USD_DECIMALS));
        seed_config(&store, pow10(USD_DECIMALS), 3000);
        seed_kind0_state(&store, &[(OPERATOR, 100)], &[(USER_1, e(1000, 18))]);

        integrate(&store, 1, 2);
        let after_first = store
            .network_vault_user_points(subnet0(), addr(VAULT), addr(USER_1))
            .unwrap();

        integrate(&store, 2, 3);
        let after_second = store
            .network_vault_user_points(subnet0(), addr(VAULT), addr(USER_1))
            .unwrap();

        assert!(after_first > U256::ZERO);
        assert!(after_second > after_first);
    });
}

#[test]
fn test_snapshot_policy() {
    with_tmp_store(|store| {
        let engine = Engine::new(&store);

        // off-grid block: no snapshot
        let mut batch = store.batch();
        engine.maybe_snapshot(&mut batch, 199).unwrap();
        batch.commit().unwrap();
        assert_eq!(store.last_snapshot().unwrap(), None);

        let mut batch = store.batch();
        engine.maybe_snapshot(&mut batch, 200).unwrap();
        batch.commit().unwrap();
        assert_eq!(store.last_snapshot().unwrap(), Some(200));

        // replaying the same grid block is a no-op
        let mut batch = store.batch();
        engine.maybe_snapshot(&mut batch, 200).unwrap();
        batch.commit().unwrap();
        assert_eq!(store.last_snapshot().unwrap(), Some(200));
    });
}

// ---------------------------------------------------------------------------
// driver
// ---------------------------------------------------------------------------

fn seed_chain(store: &Store, blocks: u64) {
    put_blocks(store, blocks, 1000, 12);
    seed_collateral_and_price(store, 1, pow10(USD_DECIMALS));
    seed_config(store, pow10(USD_DECIMALS), 3000);
    seed_vault(store, DelegatorKind::NetworkRestake);

    let mut batch = store.batch();
    batch.put_delegator0_network(
        addr(DELEGATOR),
        subnet0(),
        Delegator0NetworkState {
            network_limit: U256::MAX,
            total_operator_network_shares: U256::from(100u64),
        },
    );
    batch.put_delegator0_operator_shares(
        addr(DELEGATOR),
        subnet0(),
        addr(OPERATOR),
        U256::from(100u64),
    );
    batch.put_opted_in_network(addr(OPERATOR), addr(NETWORK), true);
    batch.put_opted_in_vault(addr(OPERATOR), addr(VAULT), true);

    batch
        .save_log(&LogRecord {
            block_number: 1,
            log_index: 0,
            address: addr(VAULT),
            event: LogEvent::Deposit(DepositLog {
                depositor: addr(USER_1),
                on_behalf_of: addr(USER_1),
                amount: e(1000, 18),
                shares: e(1000, 18),
            }),
        })
        .unwrap();

    batch.put_cursor(cursor::GENESIS, 1);
    batch.commit().unwrap();
}

fn set_frontier(store: &Store, events_block: u64, prices_block: u64) {
    let prices_timestamp = store.block(prices_block).unwrap().unwrap().timestamp;

    let mut batch = store.batch();
    batch.put_cursor(cursor::EVENTS, events_block);
    batch.put_cursor(cursor::PRICES, prices_timestamp);
    batch.commit().unwrap();
}

#[test]
fn test_driver_without_genesis_does_nothing() {
    with_tmp_store(|store| {
        assert_eq!(Driver::new(store.clone()).run().unwrap(), 0);
    });
}

#[test]
fn test_driver_end_is_capped_by_prices() {
    with_tmp_store(|store| {
        seed_chain(&store, 10);
        set_frontier(&store, 10, 5);

        let processed = Driver::new(store.clone()).run().unwrap();

        assert_eq!(processed, 5);
        assert_eq!(store.cursor(cursor::POINTS).unwrap(), Some(5));
        assert_eq!(store.cursor(cursor::STATE).unwrap(), Some(5));
    });
}

#[test]
fn test_driver_accrues_and_snapshots() {
    with_tmp_store(|store| {
        seed_chain(&store, 200);
        set_frontier(&store, 200, 200);

        let processed = Driver::new(store.clone()).run().unwrap();
        assert_eq!(processed, 200);

        // the deposit landed at block 1 and earned from block 2 onward
        let user_points = store
            .network_vault_user_points(subnet0(), addr(VAULT), addr(USER_1))
            .unwrap();
        let operator_points = store
            .network_operator_vault_points(subnet0(), addr(OPERATOR), addr(VAULT))
            .unwrap();
        assert!(user_points > U256::ZERO);
        assert!(operator_points > U256::ZERO);

        // snapshot grid
        assert_eq!(store.closest_snapshot(199).unwrap(), None);
        assert_eq!(store.closest_snapshot(200).unwrap(), Some(200));
        assert_eq!(store.closest_snapshot(450).unwrap(), Some(200));

        let snapshot = store.points_by_staker(200, addr(USER_1)).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].points, user_points);

        // a re-run with no new frontier is a no-op
        assert_eq!(Driver::new(store.clone()).run().unwrap(), 0);
        assert_eq!(
            store
                .network_vault_user_points(subnet0(), addr(VAULT), addr(USER_1))
                .unwrap(),
            user_points
        );
    });
}

#[test]
fn test_driver_restart_matches_uninterrupted_run() {
    let uninterrupted_path = tempfile::tempdir().unwrap().into_path();
    let interrupted_path = tempfile::tempdir().unwrap().into_path();

    let uninterrupted = Store::open(uninterrupted_path.clone()).unwrap();
    let interrupted = Store::open(interrupted_path.clone()).unwrap();

    seed_chain(&uninterrupted, 200);
    set_frontier(&uninterrupted, 200, 200);
    Driver::new(uninterrupted.clone()).run().unwrap();

    // the interrupted run stops at block 100, then resumes to the frontier
    seed_chain(&interrupted, 200);
    set_frontier(&interrupted, 100, 200);
    Driver::new(interrupted.clone()).run().unwrap();
    set_frontier(&interrupted, 200, 200);
    Driver::new(interrupted.clone()).run().unwrap();

    for store in [&uninterrupted, &interrupted] {
        assert_eq!(store.cursor(cursor::POINTS).unwrap(), Some(200));
    }

    assert_eq!(
        uninterrupted
            .network_vault_user_points(subnet0(), addr(VAULT), addr(USER_1))
            .unwrap(),
        interrupted
            .network_vault_user_points(subnet0(), addr(VAULT), addr(USER_1))
            .unwrap()
    );
    assert_eq!(
        uninterrupted
            .network_operator_vault_points(subnet0(), addr(OPERATOR), addr(VAULT))
            .unwrap(),
        interrupted
            .network_operator_vault_points(subnet0(), addr(OPERATOR), addr(VAULT))
            .unwrap()
    );
    assert_eq!(
        uninterrupted.points_by_staker(200, addr(USER_1)).unwrap(),
        interrupted.points_by_staker(200, addr(USER_1)).unwrap()
    );

    Store::destroy(uninterrupted_path).unwrap();
    Store::destroy(interrupted_path).unwrap();
}
