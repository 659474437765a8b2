//! Replays one block's ordered logs into the materialized state. Mutations
//! are staged on the surrounding batch and only land when the driver commits
//! the whole block.

use alloy_primitives::{Address, U256};
use tracing::debug;

use tally_store::model::*;
use tally_store::{Batch, StateRead};

use crate::StateError;

pub struct Reducer<'a, 'b> {
    batch: &'a mut Batch<'b>,
}

impl<'a, 'b> Reducer<'a, 'b> {
    pub fn new(batch: &'a mut Batch<'b>) -> Self {
        Self { batch }
    }

    /// Apply every log at `block_number` in `(log_index, address)` order and
    /// advance the state cursor.
    pub fn process_block(&mut self, block_number: u64) -> Result<(), StateError> {
        let logs = self.batch.store().logs_at(block_number)?;

        debug!(block_number, count = logs.len(), "replaying logs");

        for log in &logs {
            self.apply(log)?;
        }

        self.batch.put_cursor(cursor::STATE, block_number);

        Ok(())
    }

    fn apply(&mut self, record: &LogRecord) -> Result<(), StateError> {
        match &record.event {
            LogEvent::OperatorNetworkOptIn {
                operator,
                network,
                opted_in,
            } => {
                self.batch.put_opted_in_network(*operator, *network, *opted_in);
                Ok(())
            }
            LogEvent::OperatorVaultOptIn {
                operator,
                vault,
                opted_in,
            } => {
                self.batch.put_opted_in_vault(*operator, *vault, *opted_in);
                Ok(())
            }
            LogEvent::Deposit(log) => self.apply_deposit(record, log),
            LogEvent::Withdraw(log) => self.apply_withdraw(record, log),
            LogEvent::OnSlash(log) => self.apply_on_slash(record, log),
            LogEvent::Transfer(log) => self.apply_transfer(record, log),
            LogEvent::SetMaxNetworkLimit(log) => self.apply_set_max_network_limit(record, log),
            LogEvent::SetNetworkLimit(log) => self.apply_set_network_limit(record, log),
            LogEvent::SetOperatorNetworkShares(log) => {
                self.apply_set_operator_network_shares(record, log)
            }
            LogEvent::SetOperatorNetworkLimit(log) => {
                self.apply_set_operator_network_limit(record, log)
            }
        }
    }

    fn apply_deposit(&mut self, record: &LogRecord, log: &DepositLog) -> Result<(), StateError> {
        let vault = record.address;
        let mut global = self.batch.vault_global_state(vault)?;

        global.active_shares = self.add(global.active_shares, log.shares, "deposit", record)?;
        global.active_stake = self.add(global.active_stake, log.amount, "deposit", record)?;
        self.batch.put_vault_global_state(vault, global);

        let shares = self.batch.active_shares_of(vault, log.on_behalf_of)?;
        let shares = self.add(shares, log.shares, "deposit", record)?;
        self.batch
            .put_active_shares_of(vault, log.on_behalf_of, shares);

        Ok(())
    }

    fn apply_withdraw(&mut self, record: &LogRecord, log: &WithdrawLog) -> Result<(), StateError> {
        let vault = record.address;
        let mut global = self.batch.vault_global_state(vault)?;

        global.active_shares =
            self.sub(global.active_shares, log.burned_shares, "withdraw", record)?;
        global.active_stake = self.sub(global.active_stake, log.amount, "withdraw", record)?;
        self.batch.put_vault_global_state(vault, global);

        let shares = self.batch.active_shares_of(vault, log.withdrawer)?;
        let shares = self.sub(shares, log.burned_shares, "withdraw", record)?;
        self.batch.put_active_shares_of(vault, log.withdrawer, shares);

        // withdrawn stake queues in the next epoch's pool until claimable
        let timestamp = self.block_timestamp(record.block_number)?;
        let epoch = self.epoch_at(vault, timestamp)? + 1;
        let epoch = self.non_negative_epoch(vault, epoch, timestamp)?;

        let mut pool = self.batch.withdrawals_state(vault, epoch)?;
        pool.withdrawal_shares =
            self.add(pool.withdrawal_shares, log.minted_shares, "withdraw", record)?;
        pool.withdrawals = self.add(pool.withdrawals, log.amount, "withdraw", record)?;
        self.batch.put_withdrawals_state(vault, epoch, pool);

        let claimer_shares = self.batch.withdrawal_shares_of(vault, epoch, log.claimer)?;
        let claimer_shares = self.add(claimer_shares, log.minted_shares, "withdraw", record)?;
        self.batch
            .put_withdrawal_shares_of(vault, epoch, log.claimer, claimer_shares);

        Ok(())
    }

    /// Slash redistribution. The slashed amount is split between the active
    /// stake and the withdrawal pools that were slashable at capture time,
    /// proportionally to their sizes. Shares are never touched, so the value
    /// of every share dilutes equally.
    fn apply_on_slash(&mut self, record: &LogRecord, log: &OnSlashLog) -> Result<(), StateError> {
        if log.slashed_amount.is_zero() {
            return Ok(());
        }

        let vault = record.address;
        let timestamp = self.block_timestamp(record.block_number)?;
        let event_epoch = self.epoch_at(vault, timestamp)?;
        let event_epoch = self.non_negative_epoch(vault, event_epoch, timestamp)?;
        let capture_epoch = self.epoch_at(vault, log.capture_timestamp)?;

        let mut global = self.batch.vault_global_state(vault)?;
        let active_stake = global.active_stake;
        let slashed = log.slashed_amount;

        let mut next_pool = self.batch.withdrawals_state(vault, event_epoch + 1)?;

        if capture_epoch == event_epoch as i64 {
            debug!(%vault, event_epoch, "slash captured in the current epoch");

            let total = self.add(active_stake, next_pool.withdrawals, "slash", record)?;
            let active_slashed = self.mul_div(slashed, active_stake, total, record)?;
            let next_slashed = self.sub(slashed, active_slashed, "slash", record)?;

            global.active_stake = self.sub(active_stake, active_slashed, "slash", record)?;
            next_pool.withdrawals =
                self.sub(next_pool.withdrawals, next_slashed, "slash", record)?;

            self.batch.put_vault_global_state(vault, global);
            self.batch
                .put_withdrawals_state(vault, event_epoch + 1, next_pool);
        } else {
            debug!(%vault, event_epoch, capture_epoch, "cross-epoch slash");

            let mut current_pool = self.batch.withdrawals_state(vault, event_epoch)?;

            let total = self.add(active_stake, current_pool.withdrawals, "slash", record)?;
            let total = self.add(total, next_pool.withdrawals, "slash", record)?;

            let active_slashed = self.mul_div(slashed, active_stake, total, record)?;
            let mut next_slashed =
                self.mul_div(slashed, next_pool.withdrawals, total, record)?;
            let remainder = self.sub(slashed, active_slashed, "slash", record)?;
            let mut current_slashed = self.sub(remainder, next_slashed, "slash", record)?;

            // the rounding remainder is charged to the older pool; whatever it
            // cannot cover shifts onto the next one
            if current_pool.withdrawals < current_slashed {
                let overflow =
                    self.sub(current_slashed, current_pool.withdrawals, "slash", record)?;
                next_slashed = self.add(next_slashed, overflow, "slash", record)?;
                current_slashed = current_pool.withdrawals;
            }

            global.active_stake = self.sub(active_stake, active_slashed, "slash", record)?;
            current_pool.withdrawals =
                self.sub(current_pool.withdrawals, current_slashed, "slash", record)?;
            next_pool.withdrawals =
                self.sub(next_pool.withdrawals, next_slashed, "slash", record)?;

            self.batch.put_vault_global_state(vault, global);
            self.batch
                .put_withdrawals_state(vault, event_epoch, current_pool);
            self.batch
                .put_withdrawals_state(vault, event_epoch + 1, next_pool);
        }

        Ok(())
    }

    fn apply_transfer(&mut self, record: &LogRecord, log: &TransferLog) -> Result<(), StateError> {
        // mints and burns are already covered by deposit/withdraw
        if log.from == Address::ZERO || log.to == Address::ZERO {
            return Ok(());
        }

        let vault = record.address;

        let from_shares = self.batch.active_shares_of(vault, log.from)?;
        let from_shares = self.sub(from_shares, log.value, "transfer", record)?;
        self.batch.put_active_shares_of(vault, log.from, from_shares);

        let to_shares = self.batch.active_shares_of(vault, log.to)?;
        let to_shares = self.add(to_shares, log.value, "transfer", record)?;
        self.batch.put_active_shares_of(vault, log.to, to_shares);

        Ok(())
    }

    fn apply_set_max_network_limit(
        &mut self,
        record: &LogRecord,
        log: &SetLimitLog,
    ) -> Result<(), StateError> {
        let delegator = record.address;
        let vars = self.delegator_vars(delegator)?;

        self.batch
            .put_max_network_limit(delegator, log.subnetwork, log.amount);

        // lowering the cap also clamps the variant's live limit
        match vars.kind {
            DelegatorKind::NetworkRestake => {
                let mut state = self.batch.delegator0_network(delegator, log.subnetwork)?;
                state.network_limit = state.network_limit.min(log.amount);
                self.batch
                    .put_delegator0_network(delegator, log.subnetwork, state);
            }
            DelegatorKind::FullRestake => {
                let limit = self
                    .batch
                    .delegator1_network_limit(delegator, log.subnetwork)?;
                self.batch.put_delegator1_network_limit(
                    delegator,
                    log.subnetwork,
                    limit.min(log.amount),
                );
            }
            DelegatorKind::OperatorSpecific => {
                let limit = self
                    .batch
                    .delegator2_network_limit(delegator, log.subnetwork)?;
                self.batch.put_delegator2_network_limit(
                    delegator,
                    log.subnetwork,
                    limit.min(log.amount),
                );
            }
            // kind 3 is bounded by the cap alone
            DelegatorKind::OperatorNetworkSpecific => {}
        }

        Ok(())
    }

    fn apply_set_network_limit(
        &mut self,
        record: &LogRecord,
        log: &SetLimitLog,
    ) -> Result<(), StateError> {
        let delegator = record.address;
        let vars = self.delegator_vars(delegator)?;

        match vars.kind {
            DelegatorKind::NetworkRestake => {
                let mut state = self.batch.delegator0_network(delegator, log.subnetwork)?;
                state.network_limit = log.amount;
                self.batch
                    .put_delegator0_network(delegator, log.subnetwork, state);
                Ok(())
            }
            DelegatorKind::FullRestake => {
                self.batch
                    .put_delegator1_network_limit(delegator, log.subnetwork, log.amount);
                Ok(())
            }
            DelegatorKind::OperatorSpecific => {
                self.batch
                    .put_delegator2_network_limit(delegator, log.subnetwork, log.amount);
                Ok(())
            }
            DelegatorKind::OperatorNetworkSpecific => Err(StateError::UnsupportedDelegator {
                event: "SetNetworkLimit",
                delegator,
                kind: vars.kind.as_type(),
            }),
        }
    }

    fn apply_set_operator_network_shares(
        &mut self,
        record: &LogRecord,
        log: &SetOperatorSharesLog,
    ) -> Result<(), StateError> {
        let delegator = record.address;
        let vars = self.delegator_vars(delegator)?;

        if vars.kind != DelegatorKind::NetworkRestake {
            return Err(StateError::UnsupportedDelegator {
                event: "SetOperatorNetworkShares",
                delegator,
                kind: vars.kind.as_type(),
            });
        }

        let previous =
            self.batch
                .delegator0_operator_shares(delegator, log.subnetwork, log.operator)?;
        self.batch.put_delegator0_operator_shares(
            delegator,
            log.subnetwork,
            log.operator,
            log.shares,
        );

        let mut state = self.batch.delegator0_network(delegator, log.subnetwork)?;
        let reduced = self.sub(
            state.total_operator_network_shares,
            previous,
            "operator shares",
            record,
        )?;
        state.total_operator_network_shares = self.add(reduced, log.shares, "operator shares", record)?;
        self.batch
            .put_delegator0_network(delegator, log.subnetwork, state);

        Ok(())
    }

    fn apply_set_operator_network_limit(
        &mut self,
        record: &LogRecord,
        log: &SetOperatorLimitLog,
    ) -> Result<(), StateError> {
        let delegator = record.address;
        let vars = self.delegator_vars(delegator)?;

        if vars.kind != DelegatorKind::FullRestake {
            return Err(StateError::UnsupportedDelegator {
                event: "SetOperatorNetworkLimit",
                delegator,
                kind: vars.kind.as_type(),
            });
        }

        self.batch.put_delegator1_operator_limit(
            delegator,
            log.subnetwork,
            log.operator,
            log.amount,
        );

        Ok(())
    }

    // -- helpers ------------------------------------------------------------

    fn delegator_vars(&self, delegator: Address) -> Result<GlobalVars, StateError> {
        self.batch
            .global_vars_by_delegator(delegator)?
            .ok_or(StateError::MissingGlobalVars(delegator))
    }

    fn block_timestamp(&self, block_number: u64) -> Result<u64, StateError> {
        let block = self
            .batch
            .block(block_number)?
            .ok_or(StateError::MissingBlock(block_number))?;

        Ok(block.timestamp)
    }

    /// `(t − epochDurationInit) ÷ epochDuration`, floored. Timestamps before
    /// the vault's first epoch yield negative values.
    fn epoch_at(&self, vault: Address, timestamp: u64) -> Result<i64, StateError> {
        let vars = self
            .batch
            .global_vars(vault)?
            .ok_or(StateError::MissingGlobalVars(vault))?;

        if vars.epoch_duration == 0 {
            return Err(StateError::BadEpochConfig(vault));
        }

        let delta = timestamp as i128 - vars.epoch_duration_init as i128;
        Ok(delta.div_euclid(vars.epoch_duration as i128) as i64)
    }

    fn non_negative_epoch(
        &self,
        vault: Address,
        epoch: i64,
        timestamp: u64,
    ) -> Result<u64, StateError> {
        u64::try_from(epoch).map_err(|_| StateError::NegativeEpoch { vault, timestamp })
    }

    fn add(
        &self,
        a: U256,
        b: U256,
        context: &'static str,
        record: &LogRecord,
    ) -> Result<U256, StateError> {
        a.checked_add(b).ok_or(StateError::Overflow {
            context,
            address: record.address,
            block: record.block_number,
        })
    }

    fn sub(
        &self,
        a: U256,
        b: U256,
        context: &'static str,
        record: &LogRecord,
    ) -> Result<U256, StateError> {
        a.checked_sub(b).ok_or(StateError::NegativeQuantity {
            context,
            address: record.address,
            block: record.block_number,
        })
    }

    fn mul_div(
        &self,
        a: U256,
        b: U256,
        denom: U256,
        record: &LogRecord,
    ) -> Result<U256, StateError> {
        mul_div(a, b, denom).ok_or(StateError::NegativeQuantity {
            context: "slash over empty slashable stake",
            address: record.address,
            block: record.block_number,
        })
    }
}
