//! Grouped-sum queries over the historical points tables. These back the HTTP
//! read surface and always return rows in a total order so that pagination is
//! stable.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, U256};

use crate::kvtable::*;
use crate::store::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReceiverType {
    Staker,
    Network,
    Operator,
}

impl ReceiverType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverType::Staker => "staker",
            ReceiverType::Network => "network",
            ReceiverType::Operator => "operator",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "staker" => Some(ReceiverType::Staker),
            "network" => Some(ReceiverType::Network),
            "operator" => Some(ReceiverType::Operator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverPoints {
    pub network: Address,
    pub vault: Address,
    pub points: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllPointsRow {
    pub network: Address,
    pub vault: Address,
    pub receiver: Address,
    pub receiver_type: ReceiverType,
    pub points: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointsStats {
    pub total_points: U256,
    pub stakers: u64,
    pub networks: u64,
    pub operators: u64,
}

fn block_prefix(block: u64) -> Box<[u8]> {
    let mut raw = Vec::with_capacity(DBInt::WIDTH);
    DBInt(block).write(&mut raw);
    raw.into()
}

impl Store {
    pub fn last_snapshot(&self) -> Result<Option<u64>, Error> {
        let last = SnapshotBlocksKV::last_entry(self.db())?;
        Ok(last.map(|(DBInt(block), _)| block))
    }

    /// Largest snapshot block at or before the given block.
    pub fn closest_snapshot(&self, block: u64) -> Result<Option<u64>, Error> {
        let found = SnapshotBlocksKV::last_entry_at_or_before(self.db(), DBInt(block))?;
        Ok(found.map(|(DBInt(snapshot), _)| snapshot))
    }

    /// Snapshot points of one staker, summed per `(network, vault)`.
    pub fn points_by_staker(
        &self,
        block: u64,
        staker: Address,
    ) -> Result<Vec<ReceiverPoints>, Error> {
        let mut grouped: BTreeMap<(Address, Address), U256> = BTreeMap::new();

        for entry in
            NetworkVaultUserPointsHistoricalKV::iter_prefix(self.db(), block_prefix(block))
        {
            let (DBKey4(_, DBSubnet(subnetwork), DBAddr(vault), DBAddr(user)), DBU256(points)) =
                entry?;

            if user != staker {
                continue;
            }

            let slot = grouped.entry((subnetwork.network, vault)).or_default();
            *slot += points;
        }

        Ok(grouped
            .into_iter()
            .map(|((network, vault), points)| ReceiverPoints {
                network,
                vault,
                points,
            })
            .collect())
    }

    /// Snapshot points of one network, summed per vault.
    pub fn points_by_network(
        &self,
        block: u64,
        network: Address,
    ) -> Result<Vec<ReceiverPoints>, Error> {
        // the network address is the leading segment of the subnetwork key, so
        // the scan can be narrowed past the block prefix
        let mut prefix = Vec::with_capacity(DBInt::WIDTH + DBAddr::WIDTH);
        DBInt(block).write(&mut prefix);
        DBAddr(network).write(&mut prefix);

        let mut grouped: BTreeMap<Address, U256> = BTreeMap::new();

        for entry in NetworkVaultPointsHistoricalKV::iter_prefix(self.db(), prefix.into()) {
            let (DBKey3(_, _, DBAddr(vault)), DBU256(points)) = entry?;
            *grouped.entry(vault).or_default() += points;
        }

        Ok(grouped
            .into_iter()
            .map(|(vault, points)| ReceiverPoints {
                network,
                vault,
                points,
            })
            .collect())
    }

    /// Snapshot points of one operator, summed per `(network, vault)`.
    pub fn points_by_operator(
        &self,
        block: u64,
        operator: Address,
    ) -> Result<Vec<ReceiverPoints>, Error> {
        let mut grouped: BTreeMap<(Address, Address), U256> = BTreeMap::new();

        for entry in
            NetworkOperatorVaultPointsHistoricalKV::iter_prefix(self.db(), block_prefix(block))
        {
            let (DBKey4(_, DBSubnet(subnetwork), DBAddr(op), DBAddr(vault)), DBU256(points)) =
                entry?;

            if op != operator {
                continue;
            }

            let slot = grouped.entry((subnetwork.network, vault)).or_default();
            *slot += points;
        }

        Ok(grouped
            .into_iter()
            .map(|((network, vault), points)| ReceiverPoints {
                network,
                vault,
                points,
            })
            .collect())
    }

    fn network_rows(&self, block: u64) -> Result<Vec<AllPointsRow>, Error> {
        let mut grouped: BTreeMap<(Address, Address), U256> = BTreeMap::new();

        for entry in NetworkVaultPointsHistoricalKV::iter_prefix(self.db(), block_prefix(block)) {
            let (DBKey3(_, DBSubnet(subnetwork), DBAddr(vault)), DBU256(points)) = entry?;
            *grouped.entry((subnetwork.network, vault)).or_default() += points;
        }

        Ok(grouped
            .into_iter()
            .map(|((network, vault), points)| AllPointsRow {
                network,
                vault,
                receiver: network,
                receiver_type: ReceiverType::Network,
                points,
            })
            .collect())
    }

    fn operator_rows(&self, block: u64) -> Result<Vec<AllPointsRow>, Error> {
        let mut grouped: BTreeMap<(Address, Address, Address), U256> = BTreeMap::new();

        for entry in
            NetworkOperatorVaultPointsHistoricalKV::iter_prefix(self.db(), block_prefix(block))
        {
            let (DBKey4(_, DBSubnet(subnetwork), DBAddr(operator), DBAddr(vault)), DBU256(points)) =
                entry?;

            let slot = grouped
                .entry((subnetwork.network, vault, operator))
                .or_default();
            *slot += points;
        }

        Ok(grouped
            .into_iter()
            .map(|((network, vault, operator), points)| AllPointsRow {
                network,
                vault,
                receiver: operator,
                receiver_type: ReceiverType::Operator,
                points,
            })
            .collect())
    }

    fn staker_rows(&self, block: u64) -> Result<Vec<AllPointsRow>, Error> {
        let mut grouped: BTreeMap<(Address, Address, Address), U256> = BTreeMap::new();

        for entry in
            NetworkVaultUserPointsHistoricalKV::iter_prefix(self.db(), block_prefix(block))
        {
            let (DBKey4(_, DBSubnet(subnetwork), DBAddr(vault), DBAddr(staker)), DBU256(points)) =
                entry?;

            let slot = grouped
                .entry((subnetwork.network, vault, staker))
                .or_default();
            *slot += points;
        }

        Ok(grouped
            .into_iter()
            .map(|((network, vault, staker), points)| AllPointsRow {
                network,
                vault,
                receiver: staker,
                receiver_type: ReceiverType::Staker,
                points,
            })
            .collect())
    }

    /// Paginated snapshot rows for one receiver kind, ordered by
    /// `(network, vault, receiver)`.
    pub fn points_all(
        &self,
        block: u64,
        receiver_type: ReceiverType,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AllPointsRow>, Error> {
        let rows = match receiver_type {
            ReceiverType::Network => self.network_rows(block)?,
            ReceiverType::Operator => self.operator_rows(block)?,
            ReceiverType::Staker => self.staker_rows(block)?,
        };

        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    /// Paginated union over the three receiver kinds, ordered by
    /// `(network, vault, receiver, receiver_type)`.
    pub fn all_points(
        &self,
        block: u64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<AllPointsRow>, Error> {
        let mut rows = self.network_rows(block)?;
        rows.extend(self.operator_rows(block)?);
        rows.extend(self.staker_rows(block)?);

        rows.sort_by(|a, b| {
            (a.network, a.vault, a.receiver, a.receiver_type.as_str()).cmp(&(
                b.network,
                b.vault,
                b.receiver,
                b.receiver_type.as_str(),
            ))
        });

        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    /// Total points and distinct receiver counts at a snapshot block, for one
    /// receiver kind or for all of them.
    pub fn points_stats(
        &self,
        block: u64,
        receiver_type: Option<ReceiverType>,
    ) -> Result<PointsStats, Error> {
        let mut stats = PointsStats::default();

        let want = |kind: ReceiverType| receiver_type.is_none() || receiver_type == Some(kind);

        if want(ReceiverType::Staker) {
            let mut receivers: BTreeSet<Address> = BTreeSet::new();

            for entry in
                NetworkVaultUserPointsHistoricalKV::iter_prefix(self.db(), block_prefix(block))
            {
                let (DBKey4(_, _, _, DBAddr(staker)), DBU256(points)) = entry?;
                stats.total_points += points;
                receivers.insert(staker);
            }

            stats.stakers = receivers.len() as u64;
        }

        if want(ReceiverType::Network) {
            let mut receivers: BTreeSet<Address> = BTreeSet::new();

            for entry in
                NetworkVaultPointsHistoricalKV::iter_prefix(self.db(), block_prefix(block))
            {
                let (DBKey3(_, DBSubnet(subnetwork), _), DBU256(points)) = entry?;
                stats.total_points += points;
                receivers.insert(subnetwork.network);
            }

            stats.networks = receivers.len() as u64;
        }

        if want(ReceiverType::Operator) {
            let mut receivers: BTreeSet<Address> = BTreeSet::new();

            for entry in
                NetworkOperatorVaultPointsHistoricalKV::iter_prefix(self.db(), block_prefix(block))
            {
                let (DBKey4(_, _, DBAddr(operator), _), DBU256(points)) = entry?;
                stats.total_points += points;
                receivers.insert(operator);
            }

            stats.operators = receivers.len() as u64;
        }

        Ok(stats)
    }
}
