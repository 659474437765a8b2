//! Per-block reward integration. Stakes are valued in USD with the previous
//! block's prices, the subnet budget is split hierarchically between
//! operators and stakers, and every division floors after multiplying.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{Address, U256};
use tracing::debug;

use tally_state::StakeResolver;
use tally_store::model::*;
use tally_store::{Batch, StateRead, Store};

use crate::PointsError;

pub struct Engine<'s> {
    store: &'s Store,
}

impl<'s> Engine<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self { store }
    }

    /// Accrue points for the interval `(previous_block, block]`, integrating
    /// over the state and prices as they stood entering `block`.
    pub fn integrate_block(
        &self,
        batch: &mut Batch,
        previous_block: u64,
        block: u64,
    ) -> Result<(), PointsError> {
        let configs = self.store.network_points_configs()?;

        if configs.is_empty() {
            return Ok(());
        }

        let collaterals: HashMap<Address, Collateral> =
            self.store.collaterals()?.into_iter().collect();
        let prices: HashMap<Address, U256> =
            self.store.get_prices(previous_block)?.into_iter().collect();

        let timestamp = self.block_timestamp(block)?;
        let previous_timestamp = self.block_timestamp(previous_block)?;
        let elapsed = timestamp.saturating_sub(previous_timestamp);

        for (subnetwork, config) in configs {
            if config
                .block_number_processed
                .map_or(false, |processed| processed >= block)
            {
                continue;
            }

            self.integrate_subnet(
                batch,
                subnetwork,
                config,
                &collaterals,
                &prices,
                elapsed,
                block,
            )?;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn integrate_subnet(
        &self,
        batch: &mut Batch,
        subnetwork: Subnetwork,
        mut config: NetworkPointsConfig,
        collaterals: &HashMap<Address, Collateral>,
        prices: &HashMap<Address, U256>,
        elapsed: u64,
        block: u64,
    ) -> Result<(), PointsError> {
        let resolver = StakeResolver::new(self.store);

        // USD-valued stake per (operator, vault), with the per-operator,
        // per-vault and total aggregates
        let mut s_onv: BTreeMap<Address, BTreeMap<Address, U256>> = BTreeMap::new();
        let mut s_on: BTreeMap<Address, U256> = BTreeMap::new();
        let mut s_vn: BTreeMap<Address, U256> = BTreeMap::new();
        let mut s_n = U256::ZERO;

        for row in resolver.subnet_stakes(subnetwork)? {
            let vars = self
                .store
                .global_vars(row.vault)?
                .ok_or(tally_state::StateError::MissingGlobalVars(row.vault))?;

            // full-restake vaults are excluded from points
            if vars.kind == DelegatorKind::FullRestake {
                continue;
            }

            let value = self.usd_value(row.stake, row.collateral, collaterals, prices)?;

            *s_onv
                .entry(row.operator)
                .or_default()
                .entry(row.vault)
                .or_default() += value;
            *s_on.entry(row.operator).or_default() += value;
            *s_vn.entry(row.vault).or_default() += value;
            s_n += value;
        }

        if s_n.is_zero() {
            debug!(?subnetwork, "no effective stake, skipping subnet");
            return Ok(());
        }

        // USD-valued active balances per vault
        let mut s_uv: BTreeMap<Address, BTreeMap<Address, U256>> = BTreeMap::new();
        let mut s_v: BTreeMap<Address, U256> = BTreeMap::new();

        for vault in s_vn.keys() {
            let vars = self
                .store
                .global_vars(*vault)?
                .ok_or(tally_state::StateError::MissingGlobalVars(*vault))?;

            for (user, balance) in resolver.active_balances(*vault)? {
                let value = self.usd_value(balance, vars.collateral, collaterals, prices)?;

                *s_uv.entry(*vault).or_default().entry(user).or_default() += value;
                *s_v.entry(*vault).or_default() += value;
            }
        }

        if config.operator_fee > FEE_BASE {
            return Err(PointsError::Math("operator fee above basis-point base"));
        }

        let operator_fee = U256::from(config.operator_fee);
        let fee_base = U256::from(FEE_BASE);

        // reward budget for this subnet over the elapsed interval
        let p_nt = mul3_div(
            config.max_rate,
            s_n,
            U256::from(elapsed),
            pow10(USD_DECIMALS) * U256::from(3600u64),
        )
        .ok_or(PointsError::Math("subnet budget"))?;

        for (operator, operator_stake) in &s_on {
            let p_no = mul3_div(operator_fee, p_nt, *operator_stake, fee_base * s_n)
                .ok_or(PointsError::Math("operator points"))?;

            for (vault, stake) in &s_onv[operator] {
                let p_onv = if operator_stake.is_zero() {
                    U256::ZERO
                } else {
                    mul_div(p_no, *stake, *operator_stake)
                        .ok_or(PointsError::Math("operator vault points"))?
                };

                batch.add_network_operator_vault_points(subnetwork, *operator, *vault, p_onv)?;
            }
        }

        for (vault, vault_stake) in &s_vn {
            let p_nv = mul3_div(fee_base - operator_fee, p_nt, *vault_stake, fee_base * s_n)
                .ok_or(PointsError::Math("vault points"))?;

            let vault_balance = s_v.get(vault).copied().unwrap_or_default();

            for (user, balance) in s_uv.get(vault).into_iter().flatten() {
                let p_nvu = if vault_balance.is_zero() {
                    U256::ZERO
                } else {
                    mul_div(p_nv, *balance, vault_balance)
                        .ok_or(PointsError::Math("staker points"))?
                };

                batch.add_network_vault_user_points(subnetwork, *vault, *user, p_nvu)?;
            }
        }

        config.block_number_processed = Some(block);
        batch.put_network_points_config(subnetwork, config);

        Ok(())
    }

    /// Take a historical snapshot of the live points tables if the block sits
    /// on the snapshot grid and no snapshot at or past it exists yet.
    pub fn maybe_snapshot(&self, batch: &mut Batch, block: u64) -> Result<(), PointsError> {
        if block % SNAPSHOT_INTERVAL != 0 {
            return Ok(());
        }

        if let Some(last) = self.store.last_snapshot()? {
            if last >= block {
                return Ok(());
            }
        }

        debug!(block, "taking points snapshot");
        batch.snapshot_points(block)?;

        Ok(())
    }

    fn block_timestamp(&self, block: u64) -> Result<u64, PointsError> {
        let data = self
            .store
            .block(block)?
            .ok_or(PointsError::MissingBlock(block))?;

        Ok(data.timestamp)
    }

    /// `stake · price ÷ 10^decimals`, at USD scale 10^24. A collateral with
    /// no price at the reference block values to zero.
    fn usd_value(
        &self,
        stake: U256,
        collateral: Address,
        collaterals: &HashMap<Address, Collateral>,
        prices: &HashMap<Address, U256>,
    ) -> Result<U256, PointsError> {
        let meta = collaterals
            .get(&collateral)
            .ok_or(PointsError::MissingCollateral(collateral))?;

        let price = prices.get(&collateral).copied().unwrap_or_default();

        mul_div(stake, price, pow10(meta.decimals))
            .ok_or(PointsError::Math("usd stake value"))
    }
}
