//! Staged writes for one driver step. All mutations of a block are buffered
//! here and land in a single atomic RocksDB write on commit, while reads
//! through the batch observe the pending values first.

use std::collections::BTreeMap;
use std::ops::Bound;

use alloy_primitives::{Address, U256};
use rocksdb::WriteBatch;

use crate::kvtable::*;
use crate::model::*;
use crate::store::*;

pub struct Batch<'a> {
    store: &'a Store,
    overlay: BTreeMap<(&'static str, Box<[u8]>), Box<[u8]>>,
}

impl Store {
    pub fn batch(&self) -> Batch<'_> {
        Batch {
            store: self,
            overlay: BTreeMap::new(),
        }
    }
}

impl StateRead for Batch<'_> {
    fn raw_get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Box<[u8]>>, Error> {
        if let Some(value) = self.overlay.get(&(cf, Box::from(key))) {
            return Ok(Some(value.clone()));
        }

        self.store.raw_get(cf, key)
    }
}

impl<'a> Batch<'a> {
    pub fn store(&self) -> &'a Store {
        self.store
    }

    pub fn put<T, K, V>(&mut self, key: K, value: V)
    where
        T: KVTable<K, V>,
        K: From<Box<[u8]>>,
        Box<[u8]>: From<K>,
        V: From<Box<[u8]>>,
        Box<[u8]>: From<V>,
    {
        self.overlay
            .insert((T::CF_NAME, Box::from(key)), Box::from(value));
    }

    /// Pending entries merged over the committed rows of one table, in key
    /// order.
    pub fn scan_merged<T, K, V>(&self) -> Result<Vec<(K, V)>, Error>
    where
        T: KVTable<K, V>,
        K: From<Box<[u8]>>,
        Box<[u8]>: From<K>,
        V: From<Box<[u8]>>,
        Box<[u8]>: From<V>,
    {
        let mut merged: BTreeMap<Box<[u8]>, Box<[u8]>> =
            self.store.raw_scan(T::CF_NAME)?.into_iter().collect();

        let from: (&'static str, Box<[u8]>) = (T::CF_NAME, Box::default());
        for ((cf, key), value) in self
            .overlay
            .range((Bound::Included(from), Bound::Unbounded))
        {
            if *cf != T::CF_NAME {
                break;
            }
            merged.insert(key.clone(), value.clone());
        }

        Ok(merged
            .into_iter()
            .map(|(k, v)| (K::from(k), V::from(v)))
            .collect())
    }

    pub fn commit(self) -> Result<(), Error> {
        let mut batch = WriteBatch::default();
        let store = self.store;
        let db = store.db();

        for ((cf, key), value) in self.overlay {
            let handle = db
                .cf_handle(cf)
                .ok_or_else(|| Error::Corrupt(format!("missing column family {cf}")))?;
            batch.put_cf(&handle, key, value);
        }

        db.write(batch)?;

        Ok(())
    }

    // -- typed upserts ------------------------------------------------------

    pub fn put_cursor(&mut self, name: &str, timepoint: u64) {
        self.put::<TimepointsKV, _, _>(DBBytes(name.as_bytes().to_vec()), DBInt(timepoint));
    }

    pub fn put_block(&mut self, number: u64, block: BlockData) {
        self.put::<BlockByTimestampKV, _, _>(
            DBKey2(DBInt(block.timestamp), DBInt(number)),
            DBInt(number),
        );
        self.put::<BlocksKV, _, _>(DBInt(number), DBSerde(block));
    }

    pub fn put_collateral(&mut self, address: Address, collateral: Collateral) {
        self.put::<CollateralsKV, _, _>(DBAddr(address), DBSerde(collateral));
    }

    pub fn put_price(&mut self, collateral: Address, block: u64, price: U256) {
        self.put::<PricesKV, _, _>(DBKey2(DBAddr(collateral), DBInt(block)), DBU256(price));
    }

    pub fn put_global_vars(&mut self, vars: GlobalVars) {
        self.put::<DelegatorIndexKV, _, _>(DBAddr(vars.delegator), DBAddr(vars.vault));
        self.put::<GlobalVarsKV, _, _>(DBAddr(vars.vault), DBSerde(vars));
    }

    pub fn put_network_points_config(
        &mut self,
        subnetwork: Subnetwork,
        config: NetworkPointsConfig,
    ) {
        self.put::<NetworkPointsConfigKV, _, _>(DBSubnet(subnetwork), DBSerde(config));
    }

    /// Insert-if-absent variant used by seeding: an already-configured
    /// subnetwork keeps its parameters and its processed cursor.
    pub fn put_network_points_config_if_absent(
        &mut self,
        subnetwork: Subnetwork,
        config: NetworkPointsConfig,
    ) -> Result<bool, Error> {
        if self.network_points_config(subnetwork)?.is_some() {
            return Ok(false);
        }

        self.put_network_points_config(subnetwork, config);
        Ok(true)
    }

    pub fn put_opted_in_network(&mut self, operator: Address, network: Address, status: bool) {
        self.put::<OperatorNetworkOptInStateKV, _, _>(
            DBKey2(DBAddr(operator), DBAddr(network)),
            DBBool(status),
        );
    }

    pub fn put_opted_in_vault(&mut self, operator: Address, vault: Address, status: bool) {
        self.put::<OperatorVaultOptInStateKV, _, _>(
            DBKey2(DBAddr(operator), DBAddr(vault)),
            DBBool(status),
        );
    }

    pub fn put_vault_global_state(&mut self, vault: Address, state: VaultGlobalState) {
        self.put::<VaultGlobalStateKV, _, _>(DBAddr(vault), DBSerde(state));
    }

    pub fn put_active_shares_of(&mut self, vault: Address, user: Address, shares: U256) {
        self.put::<VaultUserStateKV, _, _>(DBKey2(DBAddr(vault), DBAddr(user)), DBU256(shares));
    }

    pub fn put_withdrawals_state(&mut self, vault: Address, epoch: u64, state: WithdrawalsState) {
        self.put::<VaultGlobalWithdrawalsKV, _, _>(
            DBKey2(DBAddr(vault), DBInt(epoch)),
            DBSerde(state),
        );
    }

    pub fn put_withdrawal_shares_of(
        &mut self,
        vault: Address,
        epoch: u64,
        user: Address,
        shares: U256,
    ) {
        self.put::<VaultUserWithdrawalsKV, _, _>(
            DBKey3(DBAddr(vault), DBInt(epoch), DBAddr(user)),
            DBU256(shares),
        );
    }

    pub fn put_max_network_limit(
        &mut self,
        delegator: Address,
        subnetwork: Subnetwork,
        amount: U256,
    ) {
        self.put::<DelegatorNetworkStateKV, _, _>(
            DBKey2(DBAddr(delegator), DBSubnet(subnetwork)),
            DBU256(amount),
        );
    }

    pub fn put_delegator0_network(
        &mut self,
        delegator: Address,
        subnetwork: Subnetwork,
        state: Delegator0NetworkState,
    ) {
        self.put::<Delegator0NetworkKV, _, _>(
            DBKey2(DBAddr(delegator), DBSubnet(subnetwork)),
            DBSerde(state),
        );
    }

    pub fn put_delegator0_operator_shares(
        &mut self,
        delegator: Address,
        subnetwork: Subnetwork,
        operator: Address,
        shares: U256,
    ) {
        self.put::<Delegator0OperatorNetworkKV, _, _>(
            DBKey3(DBAddr(delegator), DBSubnet(subnetwork), DBAddr(operator)),
            DBU256(shares),
        );
    }

    pub fn put_delegator1_network_limit(
        &mut self,
        delegator: Address,
        subnetwork: Subnetwork,
        limit: U256,
    ) {
        self.put::<Delegator1NetworkKV, _, _>(
            DBKey2(DBAddr(delegator), DBSubnet(subnetwork)),
            DBU256(limit),
        );
    }

    pub fn put_delegator1_operator_limit(
        &mut self,
        delegator: Address,
        subnetwork: Subnetwork,
        operator: Address,
        limit: U256,
    ) {
        self.put::<Delegator1OperatorNetworkKV, _, _>(
            DBKey3(DBAddr(delegator), DBSubnet(subnetwork), DBAddr(operator)),
            DBU256(limit),
        );
    }

    pub fn put_delegator2_network_limit(
        &mut self,
        delegator: Address,
        subnetwork: Subnetwork,
        limit: U256,
    ) {
        self.put::<Delegator2NetworkKV, _, _>(
            DBKey2(DBAddr(delegator), DBSubnet(subnetwork)),
            DBU256(limit),
        );
    }

    // -- points accumulation ------------------------------------------------

    pub fn add_network_operator_vault_points(
        &mut self,
        subnetwork: Subnetwork,
        operator: Address,
        vault: Address,
        delta: U256,
    ) -> Result<(), Error> {
        let current = self.network_operator_vault_points(subnetwork, operator, vault)?;
        let updated = current
            .checked_add(delta)
            .ok_or_else(|| Error::Corrupt("points overflow".into()))?;

        self.put::<NetworkOperatorVaultPointsKV, _, _>(
            DBKey3(DBSubnet(subnetwork), DBAddr(operator), DBAddr(vault)),
            DBU256(updated),
        );

        Ok(())
    }

    pub fn add_network_vault_user_points(
        &mut self,
        subnetwork: Subnetwork,
        vault: Address,
        staker: Address,
        delta: U256,
    ) -> Result<(), Error> {
        let current = self.network_vault_user_points(subnetwork, vault, staker)?;
        let updated = current
            .checked_add(delta)
            .ok_or_else(|| Error::Corrupt("points overflow".into()))?;

        self.put::<NetworkVaultUserPointsKV, _, _>(
            DBKey3(DBSubnet(subnetwork), DBAddr(vault), DBAddr(staker)),
            DBU256(updated),
        );

        Ok(())
    }

    // -- normalized logs (insert-if-absent) ---------------------------------

    pub fn save_log(&mut self, record: &LogRecord) -> Result<(), Error> {
        let block = DBInt(record.block_number);
        let index = DBInt(record.log_index);

        match &record.event {
            LogEvent::OperatorNetworkOptIn {
                operator,
                network,
                opted_in,
            } => {
                let key = DBKey2(block, index);
                let row = DBSerde((*operator, *network));
                if *opted_in {
                    self.insert_if_absent::<OperatorNetworkOptInLogKV, _, _>(key, row)?;
                } else {
                    self.insert_if_absent::<OperatorNetworkOptOutLogKV, _, _>(key, row)?;
                }
            }
            LogEvent::OperatorVaultOptIn {
                operator,
                vault,
                opted_in,
            } => {
                let key = DBKey2(block, index);
                let row = DBSerde((*operator, *vault));
                if *opted_in {
                    self.insert_if_absent::<OperatorVaultOptInLogKV, _, _>(key, row)?;
                } else {
                    self.insert_if_absent::<OperatorVaultOptOutLogKV, _, _>(key, row)?;
                }
            }
            LogEvent::Deposit(log) => {
                let key = DBKey3(block, index, DBAddr(record.address));
                self.insert_if_absent::<VaultDepositLogKV, _, _>(key, DBSerde(log.clone()))?;
            }
            LogEvent::Withdraw(log) => {
                let key = DBKey3(block, index, DBAddr(record.address));
                self.insert_if_absent::<VaultWithdrawLogKV, _, _>(key, DBSerde(log.clone()))?;
            }
            LogEvent::OnSlash(log) => {
                let key = DBKey3(block, index, DBAddr(record.address));
                self.insert_if_absent::<VaultOnSlashLogKV, _, _>(key, DBSerde(log.clone()))?;
            }
            LogEvent::Transfer(log) => {
                let key = DBKey3(block, index, DBAddr(record.address));
                self.insert_if_absent::<VaultTransferLogKV, _, _>(key, DBSerde(log.clone()))?;
            }
            LogEvent::SetMaxNetworkLimit(log) => {
                let key = DBKey3(block, index, DBAddr(record.address));
                self.insert_if_absent::<SetMaxNetworkLimitLogKV, _, _>(key, DBSerde(log.clone()))?;
            }
            LogEvent::SetNetworkLimit(log) => {
                let key = DBKey3(block, index, DBAddr(record.address));
                self.insert_if_absent::<SetNetworkLimitLogKV, _, _>(key, DBSerde(log.clone()))?;
            }
            LogEvent::SetOperatorNetworkShares(log) => {
                let key = DBKey3(block, index, DBAddr(record.address));
                self.insert_if_absent::<SetOperatorNetworkSharesLogKV, _, _>(
                    key,
                    DBSerde(log.clone()),
                )?;
            }
            LogEvent::SetOperatorNetworkLimit(log) => {
                let key = DBKey3(block, index, DBAddr(record.address));
                self.insert_if_absent::<SetOperatorNetworkLimitLogKV, _, _>(
                    key,
                    DBSerde(log.clone()),
                )?;
            }
        }

        Ok(())
    }

    fn insert_if_absent<T, K, V>(&mut self, key: K, value: V) -> Result<(), Error>
    where
        T: KVTable<K, V>,
        K: From<Box<[u8]>>,
        Box<[u8]>: From<K>,
        V: From<Box<[u8]>>,
        Box<[u8]>: From<V>,
    {
        let raw_key = Box::<[u8]>::from(key);

        if self.raw_get(T::CF_NAME, &raw_key)?.is_some() {
            return Ok(());
        }

        self.overlay
            .insert((T::CF_NAME, raw_key), Box::from(value));

        Ok(())
    }

    // -- historical snapshots -----------------------------------------------

    /// Copy the three live points tables, including this batch's pending
    /// increments, into their historical twins keyed by `block`.
    pub fn snapshot_points(&mut self, block: u64) -> Result<(), Error> {
        let vault_points = self.scan_merged::<NetworkVaultPointsKV, _, _>()?;
        for (DBKey2(subnetwork, vault), points) in vault_points {
            self.put::<NetworkVaultPointsHistoricalKV, _, DBU256>(
                DBKey3(DBInt(block), subnetwork, vault),
                points,
            );
        }

        let operator_points = self.scan_merged::<NetworkOperatorVaultPointsKV, _, _>()?;
        for (DBKey3(subnetwork, operator, vault), points) in operator_points {
            self.put::<NetworkOperatorVaultPointsHistoricalKV, _, DBU256>(
                DBKey4(DBInt(block), subnetwork, operator, vault),
                points,
            );
        }

        let user_points = self.scan_merged::<NetworkVaultUserPointsKV, _, _>()?;
        for (DBKey3(subnetwork, vault, staker), points) in user_points {
            self.put::<NetworkVaultUserPointsHistoricalKV, _, DBU256>(
                DBKey4(DBInt(block), subnetwork, vault, staker),
                points,
            );
        }

        self.put::<SnapshotBlocksKV, _, _>(DBInt(block), DBBool(true));

        Ok(())
    }
}
