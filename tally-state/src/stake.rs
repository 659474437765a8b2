//! Closed-form projection from the materialized state to the effective stake
//! a network can slash, parameterized by the vault's delegator variant.

use alloy_primitives::{Address, U256};

use tally_store::model::*;
use tally_store::{StateRead, Store};

use crate::StateError;

pub struct StakeResolver<'a> {
    store: &'a Store,
}

impl<'a> StakeResolver<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Effective stake of `(subnetwork, operator)` in the given vault.
    pub fn effective_stake(
        &self,
        vars: &GlobalVars,
        subnetwork: Subnetwork,
        operator: Address,
    ) -> Result<U256, StateError> {
        let opted_in = self.store.opted_in_network(operator, subnetwork.network)?
            && self.store.opted_in_vault(operator, vars.vault)?;

        if !opted_in {
            return Ok(U256::ZERO);
        }

        let active_stake = self.store.vault_global_state(vars.vault)?.active_stake;

        let stake = match vars.kind {
            DelegatorKind::NetworkRestake => {
                let network = self
                    .store
                    .delegator0_network(vars.delegator, subnetwork)?;

                if network.total_operator_network_shares.is_zero() {
                    return Ok(U256::ZERO);
                }

                let shares = self.store.delegator0_operator_shares(
                    vars.delegator,
                    subnetwork,
                    operator,
                )?;

                mul_div(
                    shares,
                    active_stake.min(network.network_limit),
                    network.total_operator_network_shares,
                )
                .unwrap_or_default()
            }
            DelegatorKind::FullRestake => {
                let network_limit = self
                    .store
                    .delegator1_network_limit(vars.delegator, subnetwork)?;
                let operator_limit = self.store.delegator1_operator_limit(
                    vars.delegator,
                    subnetwork,
                    operator,
                )?;

                active_stake.min(network_limit).min(operator_limit)
            }
            DelegatorKind::OperatorSpecific => {
                if vars.operator != Some(operator) {
                    return Ok(U256::ZERO);
                }

                let network_limit = self
                    .store
                    .delegator2_network_limit(vars.delegator, subnetwork)?;

                active_stake.min(network_limit)
            }
            DelegatorKind::OperatorNetworkSpecific => {
                if vars.operator != Some(operator) || vars.network != Some(subnetwork.network) {
                    return Ok(U256::ZERO);
                }

                let cap = self
                    .store
                    .max_network_limit(vars.delegator, subnetwork)?;

                active_stake.min(cap)
            }
        };

        Ok(stake)
    }

    /// Operators that can possibly hold stake in the vault for the
    /// subnetwork, per delegator variant.
    fn operators(
        &self,
        vars: &GlobalVars,
        subnetwork: Subnetwork,
    ) -> Result<Vec<Address>, StateError> {
        let operators = match vars.kind {
            DelegatorKind::NetworkRestake => self
                .store
                .delegator0_operators(vars.delegator, subnetwork)?
                .into_iter()
                .map(|(operator, _)| operator)
                .collect(),
            DelegatorKind::FullRestake => self
                .store
                .delegator1_operators(vars.delegator, subnetwork)?
                .into_iter()
                .map(|(operator, _)| operator)
                .collect(),
            DelegatorKind::OperatorSpecific | DelegatorKind::OperatorNetworkSpecific => {
                vars.operator.into_iter().collect()
            }
        };

        Ok(operators)
    }

    /// Non-zero effective-stake rows of every vault for one subnetwork.
    pub fn subnet_stakes(&self, subnetwork: Subnetwork) -> Result<Vec<StakeRow>, StateError> {
        let mut out = Vec::new();

        for vars in self.store.global_vars_all()? {
            for operator in self.operators(&vars, subnetwork)? {
                let stake = self.effective_stake(&vars, subnetwork, operator)?;

                if stake.is_zero() {
                    continue;
                }

                out.push(StakeRow {
                    subnetwork,
                    operator,
                    vault: vars.vault,
                    collateral: vars.collateral,
                    stake,
                });
            }
        }

        Ok(out)
    }

    /// `activeSharesOf · activeStake ÷ activeShares`, zero for an empty vault.
    pub fn active_balance_of(&self, vault: Address, user: Address) -> Result<U256, StateError> {
        let global = self.store.vault_global_state(vault)?;

        if global.active_shares.is_zero() {
            return Ok(U256::ZERO);
        }

        let shares = self.store.active_shares_of(vault, user)?;

        Ok(mul_div(shares, global.active_stake, global.active_shares).unwrap_or_default())
    }

    /// Non-zero active balances of every share holder in the vault.
    pub fn active_balances(&self, vault: Address) -> Result<Vec<(Address, U256)>, StateError> {
        let global = self.store.vault_global_state(vault)?;

        if global.active_shares.is_zero() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for (user, shares) in self.store.vault_user_shares(vault)? {
            let balance =
                mul_div(shares, global.active_stake, global.active_shares).unwrap_or_default();

            if balance.is_zero() {
                continue;
            }

            out.push((user, balance));
        }

        Ok(out)
    }
}
