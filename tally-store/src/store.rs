use std::path::Path;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use rocksdb::{Options, DB};

use crate::kvtable::*;
use crate::model::*;

// ---------------------------------------------------------------------------
// Tables (one column family each)
// ---------------------------------------------------------------------------

// number -> block data
pub struct BlocksKV;

impl KVTable<DBInt, DBSerde<BlockData>> for BlocksKV {
    const CF_NAME: &'static str = "BlocksKV";
}

// (timestamp, number) -> number, reverse lookup for block_at_or_before
pub struct BlockByTimestampKV;

impl KVTable<DBKey2<DBInt, DBInt>, DBInt> for BlockByTimestampKV {
    const CF_NAME: &'static str = "BlockByTimestampKV";
}

// cursor name -> timepoint
pub struct TimepointsKV;

impl KVTable<DBBytes, DBInt> for TimepointsKV {
    const CF_NAME: &'static str = "TimepointsKV";
}

// collateral -> static metadata
pub struct CollateralsKV;

impl KVTable<DBAddr, DBSerde<Collateral>> for CollateralsKV {
    const CF_NAME: &'static str = "CollateralsKV";
}

// subnetwork -> points parameters
pub struct NetworkPointsConfigKV;

impl KVTable<DBSubnet, DBSerde<NetworkPointsConfig>> for NetworkPointsConfigKV {
    const CF_NAME: &'static str = "NetworkPointsConfigKV";
}

// vault -> immutable per-vault config
pub struct GlobalVarsKV;

impl KVTable<DBAddr, DBSerde<GlobalVars>> for GlobalVarsKV {
    const CF_NAME: &'static str = "GlobalVarsKV";
}

// delegator -> vault, reverse lookup into GlobalVarsKV
pub struct DelegatorIndexKV;

impl KVTable<DBAddr, DBAddr> for DelegatorIndexKV {
    const CF_NAME: &'static str = "DelegatorIndexKV";
}

// (collateral, block) -> usd price at 10^24
pub struct PricesKV;

impl KVTable<DBKey2<DBAddr, DBInt>, DBU256> for PricesKV {
    const CF_NAME: &'static str = "PricesKV";
}

// log tables, (block, log_index[, emitter]) keyed, insert-if-absent

pub struct OperatorNetworkOptInLogKV;

impl KVTable<DBKey2<DBInt, DBInt>, DBSerde<(Address, Address)>> for OperatorNetworkOptInLogKV {
    const CF_NAME: &'static str = "OperatorNetworkOptInLogKV";
}

pub struct OperatorNetworkOptOutLogKV;

impl KVTable<DBKey2<DBInt, DBInt>, DBSerde<(Address, Address)>> for OperatorNetworkOptOutLogKV {
    const CF_NAME: &'static str = "OperatorNetworkOptOutLogKV";
}

pub struct OperatorVaultOptInLogKV;

impl KVTable<DBKey2<DBInt, DBInt>, DBSerde<(Address, Address)>> for OperatorVaultOptInLogKV {
    const CF_NAME: &'static str = "OperatorVaultOptInLogKV";
}

pub struct OperatorVaultOptOutLogKV;

impl KVTable<DBKey2<DBInt, DBInt>, DBSerde<(Address, Address)>> for OperatorVaultOptOutLogKV {
    const CF_NAME: &'static str = "OperatorVaultOptOutLogKV";
}

pub struct VaultDepositLogKV;

impl KVTable<DBKey3<DBInt, DBInt, DBAddr>, DBSerde<DepositLog>> for VaultDepositLogKV {
    const CF_NAME: &'static str = "VaultDepositLogKV";
}

pub struct VaultWithdrawLogKV;

impl KVTable<DBKey3<DBInt, DBInt, DBAddr>, DBSerde<WithdrawLog>> for VaultWithdrawLogKV {
    const CF_NAME: &'static str = "VaultWithdrawLogKV";
}

pub struct VaultOnSlashLogKV;

impl KVTable<DBKey3<DBInt, DBInt, DBAddr>, DBSerde<OnSlashLog>> for VaultOnSlashLogKV {
    const CF_NAME: &'static str = "VaultOnSlashLogKV";
}

pub struct VaultTransferLogKV;

impl KVTable<DBKey3<DBInt, DBInt, DBAddr>, DBSerde<TransferLog>> for VaultTransferLogKV {
    const CF_NAME: &'static str = "VaultTransferLogKV";
}

pub struct SetMaxNetworkLimitLogKV;

impl KVTable<DBKey3<DBInt, DBInt, DBAddr>, DBSerde<SetLimitLog>> for SetMaxNetworkLimitLogKV {
    const CF_NAME: &'static str = "SetMaxNetworkLimitLogKV";
}

pub struct SetNetworkLimitLogKV;

impl KVTable<DBKey3<DBInt, DBInt, DBAddr>, DBSerde<SetLimitLog>> for SetNetworkLimitLogKV {
    const CF_NAME: &'static str = "SetNetworkLimitLogKV";
}

pub struct SetOperatorNetworkSharesLogKV;

impl KVTable<DBKey3<DBInt, DBInt, DBAddr>, DBSerde<SetOperatorSharesLog>>
    for SetOperatorNetworkSharesLogKV
{
    const CF_NAME: &'static str = "SetOperatorNetworkSharesLogKV";
}

pub struct SetOperatorNetworkLimitLogKV;

impl KVTable<DBKey3<DBInt, DBInt, DBAddr>, DBSerde<SetOperatorLimitLog>>
    for SetOperatorNetworkLimitLogKV
{
    const CF_NAME: &'static str = "SetOperatorNetworkLimitLogKV";
}

// materialized state

pub struct OperatorNetworkOptInStateKV;

impl KVTable<DBKey2<DBAddr, DBAddr>, DBBool> for OperatorNetworkOptInStateKV {
    const CF_NAME: &'static str = "OperatorNetworkOptInStateKV";
}

pub struct OperatorVaultOptInStateKV;

impl KVTable<DBKey2<DBAddr, DBAddr>, DBBool> for OperatorVaultOptInStateKV {
    const CF_NAME: &'static str = "OperatorVaultOptInStateKV";
}

pub struct VaultGlobalStateKV;

impl KVTable<DBAddr, DBSerde<VaultGlobalState>> for VaultGlobalStateKV {
    const CF_NAME: &'static str = "VaultGlobalStateKV";
}

// (vault, staker) -> activeSharesOf
pub struct VaultUserStateKV;

impl KVTable<DBKey2<DBAddr, DBAddr>, DBU256> for VaultUserStateKV {
    const CF_NAME: &'static str = "VaultUserStateKV";
}

// (vault, epoch) -> withdrawal pool
pub struct VaultGlobalWithdrawalsKV;

impl KVTable<DBKey2<DBAddr, DBInt>, DBSerde<WithdrawalsState>> for VaultGlobalWithdrawalsKV {
    const CF_NAME: &'static str = "VaultGlobalWithdrawalsKV";
}

// (vault, epoch, claimer) -> withdrawalSharesOf
pub struct VaultUserWithdrawalsKV;

impl KVTable<DBKey3<DBAddr, DBInt, DBAddr>, DBU256> for VaultUserWithdrawalsKV {
    const CF_NAME: &'static str = "VaultUserWithdrawalsKV";
}

// (delegator, subnetwork) -> maxNetworkLimit
pub struct DelegatorNetworkStateKV;

impl KVTable<DBKey2<DBAddr, DBSubnet>, DBU256> for DelegatorNetworkStateKV {
    const CF_NAME: &'static str = "DelegatorNetworkStateKV";
}

pub struct Delegator0NetworkKV;

impl KVTable<DBKey2<DBAddr, DBSubnet>, DBSerde<Delegator0NetworkState>> for Delegator0NetworkKV {
    const CF_NAME: &'static str = "Delegator0NetworkKV";
}

// (delegator, subnetwork, operator) -> operatorNetworkShares
pub struct Delegator0OperatorNetworkKV;

impl KVTable<DBKey3<DBAddr, DBSubnet, DBAddr>, DBU256> for Delegator0OperatorNetworkKV {
    const CF_NAME: &'static str = "Delegator0OperatorNetworkKV";
}

pub struct Delegator1NetworkKV;

impl KVTable<DBKey2<DBAddr, DBSubnet>, DBU256> for Delegator1NetworkKV {
    const CF_NAME: &'static str = "Delegator1NetworkKV";
}

// (delegator, subnetwork, operator) -> operatorNetworkLimit
pub struct Delegator1OperatorNetworkKV;

impl KVTable<DBKey3<DBAddr, DBSubnet, DBAddr>, DBU256> for Delegator1OperatorNetworkKV {
    const CF_NAME: &'static str = "Delegator1OperatorNetworkKV";
}

pub struct Delegator2NetworkKV;

impl KVTable<DBKey2<DBAddr, DBSubnet>, DBU256> for Delegator2NetworkKV {
    const CF_NAME: &'static str = "Delegator2NetworkKV";
}

// live points, running totals at scale 10^48

pub struct NetworkVaultPointsKV;

impl KVTable<DBKey2<DBSubnet, DBAddr>, DBU256> for NetworkVaultPointsKV {
    const CF_NAME: &'static str = "NetworkVaultPointsKV";
}

// (subnetwork, operator, vault) -> points
pub struct NetworkOperatorVaultPointsKV;

impl KVTable<DBKey3<DBSubnet, DBAddr, DBAddr>, DBU256> for NetworkOperatorVaultPointsKV {
    const CF_NAME: &'static str = "NetworkOperatorVaultPointsKV";
}

// (subnetwork, vault, staker) -> points
pub struct NetworkVaultUserPointsKV;

impl KVTable<DBKey3<DBSubnet, DBAddr, DBAddr>, DBU256> for NetworkVaultUserPointsKV {
    const CF_NAME: &'static str = "NetworkVaultUserPointsKV";
}

// historical copies, keyed additionally by snapshot block

pub struct NetworkVaultPointsHistoricalKV;

impl KVTable<DBKey3<DBInt, DBSubnet, DBAddr>, DBU256> for NetworkVaultPointsHistoricalKV {
    const CF_NAME: &'static str = "NetworkVaultPointsHistoricalKV";
}

pub struct NetworkOperatorVaultPointsHistoricalKV;

impl KVTable<DBKey4<DBInt, DBSubnet, DBAddr, DBAddr>, DBU256>
    for NetworkOperatorVaultPointsHistoricalKV
{
    const CF_NAME: &'static str = "NetworkOperatorVaultPointsHistoricalKV";
}

pub struct NetworkVaultUserPointsHistoricalKV;

impl KVTable<DBKey4<DBInt, DBSubnet, DBAddr, DBAddr>, DBU256>
    for NetworkVaultUserPointsHistoricalKV
{
    const CF_NAME: &'static str = "NetworkVaultUserPointsHistoricalKV";
}

// index of taken snapshots; the authoritative source for closest-snapshot
// lookups
pub struct SnapshotBlocksKV;

impl KVTable<DBInt, DBBool> for SnapshotBlocksKV {
    const CF_NAME: &'static str = "SnapshotBlocksKV";
}

const ALL_CFS: &[&str] = &[
    BlocksKV::CF_NAME,
    BlockByTimestampKV::CF_NAME,
    TimepointsKV::CF_NAME,
    CollateralsKV::CF_NAME,
    NetworkPointsConfigKV::CF_NAME,
    GlobalVarsKV::CF_NAME,
    DelegatorIndexKV::CF_NAME,
    PricesKV::CF_NAME,
    OperatorNetworkOptInLogKV::CF_NAME,
    OperatorNetworkOptOutLogKV::CF_NAME,
    OperatorVaultOptInLogKV::CF_NAME,
    OperatorVaultOptOutLogKV::CF_NAME,
    VaultDepositLogKV::CF_NAME,
    VaultWithdrawLogKV::CF_NAME,
    VaultOnSlashLogKV::CF_NAME,
    VaultTransferLogKV::CF_NAME,
    SetMaxNetworkLimitLogKV::CF_NAME,
    SetNetworkLimitLogKV::CF_NAME,
    SetOperatorNetworkSharesLogKV::CF_NAME,
    SetOperatorNetworkLimitLogKV::CF_NAME,
    OperatorNetworkOptInStateKV::CF_NAME,
    OperatorVaultOptInStateKV::CF_NAME,
    VaultGlobalStateKV::CF_NAME,
    VaultUserStateKV::CF_NAME,
    VaultGlobalWithdrawalsKV::CF_NAME,
    VaultUserWithdrawalsKV::CF_NAME,
    DelegatorNetworkStateKV::CF_NAME,
    Delegator0NetworkKV::CF_NAME,
    Delegator0OperatorNetworkKV::CF_NAME,
    Delegator1NetworkKV::CF_NAME,
    Delegator1OperatorNetworkKV::CF_NAME,
    Delegator2NetworkKV::CF_NAME,
    NetworkVaultPointsKV::CF_NAME,
    NetworkOperatorVaultPointsKV::CF_NAME,
    NetworkVaultUserPointsKV::CF_NAME,
    NetworkVaultPointsHistoricalKV::CF_NAME,
    NetworkOperatorVaultPointsHistoricalKV::CF_NAME,
    NetworkVaultUserPointsHistoricalKV::CF_NAME,
    SnapshotBlocksKV::CF_NAME,
];

// ---------------------------------------------------------------------------
// Read surface shared by the store (committed data) and a pending batch
// (read-your-writes)
// ---------------------------------------------------------------------------

pub trait StateRead {
    fn raw_get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Box<[u8]>>, Error>;

    fn entry<T, K, V>(&self, key: K) -> Result<Option<V>, Error>
    where
        T: KVTable<K, V>,
        K: From<Box<[u8]>>,
        Box<[u8]>: From<K>,
        V: From<Box<[u8]>>,
        Box<[u8]>: From<V>,
    {
        let raw_key = Box::<[u8]>::from(key);
        Ok(self.raw_get(T::CF_NAME, &raw_key)?.map(V::from))
    }

    fn cursor(&self, name: &str) -> Result<Option<u64>, Error> {
        let value =
            self.entry::<TimepointsKV, _, DBInt>(DBBytes(name.as_bytes().to_vec()))?;
        Ok(value.map(|x| x.0))
    }

    fn block(&self, number: u64) -> Result<Option<BlockData>, Error> {
        let value = self.entry::<BlocksKV, _, DBSerde<BlockData>>(DBInt(number))?;
        Ok(value.map(|x| x.0))
    }

    fn collateral(&self, collateral: Address) -> Result<Option<Collateral>, Error> {
        let value = self.entry::<CollateralsKV, _, DBSerde<Collateral>>(DBAddr(collateral))?;
        Ok(value.map(|x| x.0))
    }

    fn global_vars(&self, vault: Address) -> Result<Option<GlobalVars>, Error> {
        let value = self.entry::<GlobalVarsKV, _, DBSerde<GlobalVars>>(DBAddr(vault))?;
        Ok(value.map(|x| x.0))
    }

    fn global_vars_by_delegator(&self, delegator: Address) -> Result<Option<GlobalVars>, Error> {
        let vault = self.entry::<DelegatorIndexKV, _, DBAddr>(DBAddr(delegator))?;

        match vault {
            Some(DBAddr(vault)) => self.global_vars(vault),
            None => Ok(None),
        }
    }

    fn network_points_config(
        &self,
        subnetwork: Subnetwork,
    ) -> Result<Option<NetworkPointsConfig>, Error> {
        let value = self
            .entry::<NetworkPointsConfigKV, _, DBSerde<NetworkPointsConfig>>(DBSubnet(subnetwork))?;
        Ok(value.map(|x| x.0))
    }

    fn opted_in_network(&self, operator: Address, network: Address) -> Result<bool, Error> {
        let value = self.entry::<OperatorNetworkOptInStateKV, _, DBBool>(DBKey2(
            DBAddr(operator),
            DBAddr(network),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or(false))
    }

    fn opted_in_vault(&self, operator: Address, vault: Address) -> Result<bool, Error> {
        let value = self.entry::<OperatorVaultOptInStateKV, _, DBBool>(DBKey2(
            DBAddr(operator),
            DBAddr(vault),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or(false))
    }

    fn vault_global_state(&self, vault: Address) -> Result<VaultGlobalState, Error> {
        let value = self.entry::<VaultGlobalStateKV, _, DBSerde<VaultGlobalState>>(DBAddr(vault))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }

    fn active_shares_of(&self, vault: Address, user: Address) -> Result<U256, Error> {
        let value =
            self.entry::<VaultUserStateKV, _, DBU256>(DBKey2(DBAddr(vault), DBAddr(user)))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }

    fn withdrawals_state(&self, vault: Address, epoch: u64) -> Result<WithdrawalsState, Error> {
        let value = self.entry::<VaultGlobalWithdrawalsKV, _, DBSerde<WithdrawalsState>>(DBKey2(
            DBAddr(vault),
            DBInt(epoch),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }

    fn withdrawal_shares_of(
        &self,
        vault: Address,
        epoch: u64,
        user: Address,
    ) -> Result<U256, Error> {
        let value = self.entry::<VaultUserWithdrawalsKV, _, DBU256>(DBKey3(
            DBAddr(vault),
            DBInt(epoch),
            DBAddr(user),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }

    fn max_network_limit(
        &self,
        delegator: Address,
        subnetwork: Subnetwork,
    ) -> Result<U256, Error> {
        let value = self.entry::<DelegatorNetworkStateKV, _, DBU256>(DBKey2(
            DBAddr(delegator),
            DBSubnet(subnetwork),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }

    fn delegator0_network(
        &self,
        delegator: Address,
        subnetwork: Subnetwork,
    ) -> Result<Delegator0NetworkState, Error> {
        let value = self.entry::<Delegator0NetworkKV, _, DBSerde<Delegator0NetworkState>>(DBKey2(
            DBAddr(delegator),
            DBSubnet(subnetwork),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }

    fn delegator0_operator_shares(
        &self,
        delegator: Address,
        subnetwork: Subnetwork,
        operator: Address,
    ) -> Result<U256, Error> {
        let value = self.entry::<Delegator0OperatorNetworkKV, _, DBU256>(DBKey3(
            DBAddr(delegator),
            DBSubnet(subnetwork),
            DBAddr(operator),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }

    fn delegator1_network_limit(
        &self,
        delegator: Address,
        subnetwork: Subnetwork,
    ) -> Result<U256, Error> {
        let value = self.entry::<Delegator1NetworkKV, _, DBU256>(DBKey2(
            DBAddr(delegator),
            DBSubnet(subnetwork),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }

    fn delegator1_operator_limit(
        &self,
        delegator: Address,
        subnetwork: Subnetwork,
        operator: Address,
    ) -> Result<U256, Error> {
        let value = self.entry::<Delegator1OperatorNetworkKV, _, DBU256>(DBKey3(
            DBAddr(delegator),
            DBSubnet(subnetwork),
            DBAddr(operator),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }

    fn delegator2_network_limit(
        &self,
        delegator: Address,
        subnetwork: Subnetwork,
    ) -> Result<U256, Error> {
        let value = self.entry::<Delegator2NetworkKV, _, DBU256>(DBKey2(
            DBAddr(delegator),
            DBSubnet(subnetwork),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }

    fn network_operator_vault_points(
        &self,
        subnetwork: Subnetwork,
        operator: Address,
        vault: Address,
    ) -> Result<U256, Error> {
        let value = self.entry::<NetworkOperatorVaultPointsKV, _, DBU256>(DBKey3(
            DBSubnet(subnetwork),
            DBAddr(operator),
            DBAddr(vault),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }

    fn network_vault_user_points(
        &self,
        subnetwork: Subnetwork,
        vault: Address,
        staker: Address,
    ) -> Result<U256, Error> {
        let value = self.entry::<NetworkVaultUserPointsKV, _, DBU256>(DBKey3(
            DBSubnet(subnetwork),
            DBAddr(vault),
            DBAddr(staker),
        ))?;
        Ok(value.map(|x| x.0).unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Store {
    db: Arc<DB>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, ALL_CFS)?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn destroy(path: impl AsRef<Path>) -> Result<(), Error> {
        DB::destroy(&Options::default(), path).map_err(Error::from)
    }

    pub(crate) fn db(&self) -> &DB {
        &self.db
    }

    pub(crate) fn raw_scan(
        &self,
        cf: &'static str,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, Error> {
        let handle = self
            .db
            .cf_handle(cf)
            .ok_or_else(|| Error::Corrupt(format!("missing column family {cf}")))?;

        let mut out = Vec::new();
        for entry in self.db.iterator_cf(&handle, rocksdb::IteratorMode::Start) {
            let (key, value) = entry?;
            out.push((key, value));
        }

        Ok(out)
    }

    pub fn block_at_or_before(&self, timestamp: u64) -> Result<Option<u64>, Error> {
        let found = BlockByTimestampKV::last_entry_at_or_before(
            &self.db,
            DBKey2(DBInt(timestamp), DBInt(u64::MAX)),
        )?;

        match found {
            Some((DBKey2(DBInt(ts), _), DBInt(number))) if ts <= timestamp => Ok(Some(number)),
            _ => Ok(None),
        }
    }

    /// Latest price at or before the given block.
    pub fn get_price(&self, collateral: Address, block: u64) -> Result<Option<U256>, Error> {
        let found =
            PricesKV::last_entry_at_or_before(&self.db, DBKey2(DBAddr(collateral), DBInt(block)))?;

        match found {
            Some((DBKey2(DBAddr(c), _), DBU256(price))) if c == collateral => Ok(Some(price)),
            _ => Ok(None),
        }
    }

    /// Latest price per collateral at or before the given block. Collaterals
    /// without any price row are absent from the result.
    pub fn get_prices(&self, block: u64) -> Result<Vec<(Address, U256)>, Error> {
        let mut out = Vec::new();

        for entry in CollateralsKV::iter_entries_start(&self.db) {
            let (DBAddr(collateral), _) = entry?;

            if let Some(price) = self.get_price(collateral, block)? {
                out.push((collateral, price));
            }
        }

        Ok(out)
    }

    pub fn collaterals(&self) -> Result<Vec<(Address, Collateral)>, Error> {
        let mut out = Vec::new();

        for entry in CollateralsKV::iter_entries_start(&self.db) {
            let (DBAddr(collateral), value) = entry?;
            out.push((collateral, value.0));
        }

        Ok(out)
    }

    pub fn global_vars_all(&self) -> Result<Vec<GlobalVars>, Error> {
        let mut out = Vec::new();

        for entry in GlobalVarsKV::iter_entries_start(&self.db) {
            let (_, value) = entry?;
            out.push(value.0);
        }

        Ok(out)
    }

    pub fn network_points_configs(
        &self,
    ) -> Result<Vec<(Subnetwork, NetworkPointsConfig)>, Error> {
        let mut out = Vec::new();

        for entry in NetworkPointsConfigKV::iter_entries_start(&self.db) {
            let (DBSubnet(subnetwork), value) = entry?;
            out.push((subnetwork, value.0));
        }

        Ok(out)
    }

    /// Per-operator shares rows of a type-0 delegator for one subnetwork.
    pub fn delegator0_operators(
        &self,
        delegator: Address,
        subnetwork: Subnetwork,
    ) -> Result<Vec<(Address, U256)>, Error> {
        let mut prefix = Vec::with_capacity(DBAddr::WIDTH + DBSubnet::WIDTH);
        DBAddr(delegator).write(&mut prefix);
        DBSubnet(subnetwork).write(&mut prefix);

        let mut out = Vec::new();
        for entry in Delegator0OperatorNetworkKV::iter_prefix(&self.db, prefix.into()) {
            let (DBKey3(_, _, DBAddr(operator)), DBU256(shares)) = entry?;
            out.push((operator, shares));
        }

        Ok(out)
    }

    /// Per-operator limit rows of a type-1 delegator for one subnetwork.
    pub fn delegator1_operators(
        &self,
        delegator: Address,
        subnetwork: Subnetwork,
    ) -> Result<Vec<(Address, U256)>, Error> {
        let mut prefix = Vec::with_capacity(DBAddr::WIDTH + DBSubnet::WIDTH);
        DBAddr(delegator).write(&mut prefix);
        DBSubnet(subnetwork).write(&mut prefix);

        let mut out = Vec::new();
        for entry in Delegator1OperatorNetworkKV::iter_prefix(&self.db, prefix.into()) {
            let (DBKey3(_, _, DBAddr(operator)), DBU256(limit)) = entry?;
            out.push((operator, limit));
        }

        Ok(out)
    }

    /// All share holders of a vault.
    pub fn vault_user_shares(&self, vault: Address) -> Result<Vec<(Address, U256)>, Error> {
        let mut prefix = Vec::with_capacity(DBAddr::WIDTH);
        DBAddr(vault).write(&mut prefix);

        let mut out = Vec::new();
        for entry in VaultUserStateKV::iter_prefix(&self.db, prefix.into()) {
            let (DBKey2(_, DBAddr(user)), DBU256(shares)) = entry?;
            out.push((user, shares));
        }

        Ok(out)
    }

    /// All normalized logs at one block, in `(log_index, address)` order.
    pub fn logs_at(&self, block: u64) -> Result<Vec<LogRecord>, Error> {
        let mut out = Vec::new();
        let block_prefix: Box<[u8]> = {
            let mut raw = Vec::with_capacity(DBInt::WIDTH);
            DBInt(block).write(&mut raw);
            raw.into()
        };

        for entry in OperatorNetworkOptInLogKV::iter_prefix(&self.db, block_prefix.clone()) {
            let (DBKey2(_, DBInt(log_index)), value) = entry?;
            let (operator, network) = value.0;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: Address::ZERO,
                event: LogEvent::OperatorNetworkOptIn {
                    operator,
                    network,
                    opted_in: true,
                },
            });
        }

        for entry in OperatorNetworkOptOutLogKV::iter_prefix(&self.db, block_prefix.clone()) {
            let (DBKey2(_, DBInt(log_index)), value) = entry?;
            let (operator, network) = value.0;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: Address::ZERO,
                event: LogEvent::OperatorNetworkOptIn {
                    operator,
                    network,
                    opted_in: false,
                },
            });
        }

        for entry in OperatorVaultOptInLogKV::iter_prefix(&self.db, block_prefix.clone()) {
            let (DBKey2(_, DBInt(log_index)), value) = entry?;
            let (operator, vault) = value.0;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: Address::ZERO,
                event: LogEvent::OperatorVaultOptIn {
                    operator,
                    vault,
                    opted_in: true,
                },
            });
        }

        for entry in OperatorVaultOptOutLogKV::iter_prefix(&self.db, block_prefix.clone()) {
            let (DBKey2(_, DBInt(log_index)), value) = entry?;
            let (operator, vault) = value.0;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: Address::ZERO,
                event: LogEvent::OperatorVaultOptIn {
                    operator,
                    vault,
                    opted_in: false,
                },
            });
        }

        for entry in VaultDepositLogKV::iter_prefix(&self.db, block_prefix.clone()) {
            let (DBKey3(_, DBInt(log_index), DBAddr(vault)), value) = entry?;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: vault,
                event: LogEvent::Deposit(value.0),
            });
        }

        for entry in VaultWithdrawLogKV::iter_prefix(&self.db, block_prefix.clone()) {
            let (DBKey3(_, DBInt(log_index), DBAddr(vault)), value) = entry?;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: vault,
                event: LogEvent::Withdraw(value.0),
            });
        }

        for entry in VaultOnSlashLogKV::iter_prefix(&self.db, block_prefix.clone()) {
            let (DBKey3(_, DBInt(log_index), DBAddr(vault)), value) = entry?;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: vault,
                event: LogEvent::OnSlash(value.0),
            });
        }

        for entry in VaultTransferLogKV::iter_prefix(&self.db, block_prefix.clone()) {
            let (DBKey3(_, DBInt(log_index), DBAddr(vault)), value) = entry?;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: vault,
                event: LogEvent::Transfer(value.0),
            });
        }

        for entry in SetMaxNetworkLimitLogKV::iter_prefix(&self.db, block_prefix.clone()) {
            let (DBKey3(_, DBInt(log_index), DBAddr(delegator)), value) = entry?;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: delegator,
                event: LogEvent::SetMaxNetworkLimit(value.0),
            });
        }

        for entry in SetNetworkLimitLogKV::iter_prefix(&self.db, block_prefix.clone()) {
            let (DBKey3(_, DBInt(log_index), DBAddr(delegator)), value) = entry?;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: delegator,
                event: LogEvent::SetNetworkLimit(value.0),
            });
        }

        for entry in SetOperatorNetworkSharesLogKV::iter_prefix(&self.db, block_prefix.clone()) {
            let (DBKey3(_, DBInt(log_index), DBAddr(delegator)), value) = entry?;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: delegator,
                event: LogEvent::SetOperatorNetworkShares(value.0),
            });
        }

        for entry in SetOperatorNetworkLimitLogKV::iter_prefix(&self.db, block_prefix) {
            let (DBKey3(_, DBInt(log_index), DBAddr(delegator)), value) = entry?;
            out.push(LogRecord {
                block_number: block,
                log_index,
                address: delegator,
                event: LogEvent::SetOperatorNetworkLimit(value.0),
            });
        }

        out.sort_by_key(|record| record.sort_key());

        Ok(out)
    }
}

impl StateRead for Store {
    fn raw_get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Box<[u8]>>, Error> {
        let handle = self
            .db
            .cf_handle(cf)
            .ok_or_else(|| Error::Corrupt(format!("missing column family {cf}")))?;

        let value = self.db.get_cf(&handle, key)?;

        Ok(value.map(|x| Box::from(x.as_slice())))
    }
}
