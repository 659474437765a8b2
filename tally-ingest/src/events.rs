//! Ingests protocol logs: vault discovery through the factory, opt-in
//! services, vault and delegator events. Fetches run over bounded concurrent
//! workers with adaptive range bisection when the provider rejects a span.

use alloy_primitives::{Address, B256};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use tally_store::model::*;
use tally_store::{StateRead, Store};

use crate::decode::{self, ContractClass};
use crate::explorer::{ensure_genesis, ExplorerClient};
use crate::rpc::{RawLog, RpcClient};
use crate::{CoreAddresses, IngestError, FINALITY_OFFSET};

const CHUNK_SIZE: u64 = 5_000;
const MAX_WORKERS: usize = 4;
const GENESIS_MARGIN: u64 = 100;

/// Halve a range for retry after a provider failure. `None` once the range
/// cannot shrink further.
pub(crate) fn split_range(from: u64, to: u64) -> Option<((u64, u64), (u64, u64))> {
    if from >= to {
        return None;
    }

    let mid = from + (to - from) / 2;
    Some(((from, mid), (mid + 1, to)))
}

pub struct EventsSync<'a> {
    rpc: &'a RpcClient,
    explorer: &'a ExplorerClient,
    store: &'a Store,
    addresses: &'a CoreAddresses,
}

impl<'a> EventsSync<'a> {
    pub fn new(
        rpc: &'a RpcClient,
        explorer: &'a ExplorerClient,
        store: &'a Store,
        addresses: &'a CoreAddresses,
    ) -> Self {
        Self {
            rpc,
            explorer,
            store,
            addresses,
        }
    }

    /// Fetch logs over the range, splitting spans the provider rejects until
    /// single blocks remain.
    async fn get_logs_bisect(
        &self,
        addresses: Vec<Address>,
        topics: Vec<B256>,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IngestError> {
        let mut pending = vec![(from, to)];
        let mut tasks: JoinSet<(u64, u64, Result<Vec<RawLog>, IngestError>)> = JoinSet::new();
        let mut logs = Vec::new();

        loop {
            while !pending.is_empty() && tasks.len() < MAX_WORKERS {
                let (chunk_from, chunk_to) = pending.pop().unwrap();
                let rpc = self.rpc.clone();
                let addresses = addresses.clone();
                let topics = topics.clone();

                tasks.spawn(async move {
                    let result = rpc.get_logs(&addresses, &topics, chunk_from, chunk_to).await;
                    (chunk_from, chunk_to, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            let (chunk_from, chunk_to, result) =
                joined.map_err(|err| IngestError::MissingData(err.to_string()))?;

            match result {
                Ok(chunk_logs) => {
                    debug!(chunk_from, chunk_to, count = chunk_logs.len(), "fetched logs");
                    logs.extend(chunk_logs);
                }
                Err(err) => match split_range(chunk_from, chunk_to) {
                    Some((left, right)) => {
                        warn!(chunk_from, chunk_to, ?err, "splitting log range");
                        pending.push(left);
                        pending.push(right);
                    }
                    None => return Err(err),
                },
            }
        }

        Ok(logs)
    }

    /// New vaults registered at the factory, with their immutable config
    /// collected over `eth_call`.
    async fn discover_vaults(&self, from: u64, to: u64) -> Result<Vec<GlobalVars>, IngestError> {
        let raw_logs = self
            .get_logs_bisect(
                vec![self.addresses.vault_factory],
                vec![*decode::ADD_ENTITY],
                from,
                to,
            )
            .await?;

        let mut out = Vec::new();

        for raw in raw_logs {
            if raw.topics.first() != Some(&*decode::ADD_ENTITY) {
                return Err(IngestError::Decode(
                    "unknown event signature on vault factory".into(),
                ));
            }

            let vault = decode::topic_address(
                raw.topics
                    .get(1)
                    .ok_or_else(|| IngestError::Decode("AddEntity without entity".into()))?,
            );

            if let Some(vars) = self.collect_global_vars(vault).await? {
                out.push(vars);
            }
        }

        Ok(out)
    }

    async fn call_address(&self, to: Address, signature: &str) -> Result<Address, IngestError> {
        let output = self.rpc.call(to, decode::selector(signature), None).await?;

        if output.len() < 32 {
            return Err(IngestError::Decode(format!("{signature} returned short")));
        }

        Ok(Address::from_slice(&output[12..32]))
    }

    async fn call_u64(&self, to: Address, signature: &str) -> Result<u64, IngestError> {
        let output = self.rpc.call(to, decode::selector(signature), None).await?;
        decode::word_u64(&output, 0)
    }

    async fn collect_global_vars(
        &self,
        vault: Address,
    ) -> Result<Option<GlobalVars>, IngestError> {
        let delegator = self.call_address(vault, "delegator()").await?;

        if delegator == Address::ZERO {
            debug!(%vault, "vault without delegator, skipping");
            return Ok(None);
        }

        let collateral = self.call_address(vault, "collateral()").await?;
        let epoch_duration_init = self.call_u64(vault, "epochDurationInit()").await?;
        let epoch_duration = self.call_u64(vault, "epochDuration()").await?;

        let kind_raw = self.call_u64(delegator, "TYPE()").await?;
        let kind = DelegatorKind::from_type(kind_raw)
            .ok_or_else(|| IngestError::Decode(format!("delegator type {kind_raw}")))?;

        let operator = match kind {
            DelegatorKind::OperatorSpecific | DelegatorKind::OperatorNetworkSpecific => {
                Some(self.call_address(delegator, "operator()").await?)
            }
            _ => None,
        };

        let network = match kind {
            DelegatorKind::OperatorNetworkSpecific => {
                Some(self.call_address(delegator, "network()").await?)
            }
            _ => None,
        };

        Ok(Some(GlobalVars {
            vault,
            delegator,
            kind,
            collateral,
            epoch_duration_init,
            epoch_duration,
            operator,
            network,
        }))
    }

    async fn parse_chunk(&self, from: u64, to: u64) -> Result<(), IngestError> {
        let mut vaults: Vec<Address> = Vec::new();
        let mut delegators: Vec<Address> = Vec::new();

        for vars in self.store.global_vars_all()? {
            vaults.push(vars.vault);
            delegators.push(vars.delegator);
        }

        let discovered = self.discover_vaults(from, to).await?;

        let mut batch = self.store.batch();

        for vars in discovered {
            vaults.push(vars.vault);
            delegators.push(vars.delegator);
            batch.put_global_vars(vars);
        }

        let opt_in_topics = vec![*decode::OPT_IN, *decode::OPT_OUT];

        let network_service_logs = self
            .get_logs_bisect(
                vec![self.addresses.operator_network_opt_in_service],
                opt_in_topics.clone(),
                from,
                to,
            )
            .await?;
        for raw in &network_service_logs {
            let record = decode::decode_log(raw, ContractClass::OperatorNetworkOptInService)?;
            batch.save_log(&record)?;
        }

        let vault_service_logs = self
            .get_logs_bisect(
                vec![self.addresses.operator_vault_opt_in_service],
                opt_in_topics,
                from,
                to,
            )
            .await?;
        for raw in &vault_service_logs {
            let record = decode::decode_log(raw, ContractClass::OperatorVaultOptInService)?;
            batch.save_log(&record)?;
        }

        if !vaults.is_empty() {
            let vault_logs = self
                .get_logs_bisect(
                    vaults,
                    vec![
                        *decode::DEPOSIT,
                        *decode::WITHDRAW,
                        *decode::ON_SLASH,
                        *decode::TRANSFER,
                    ],
                    from,
                    to,
                )
                .await?;
            for raw in &vault_logs {
                let record = decode::decode_log(raw, ContractClass::Vault)?;
                batch.save_log(&record)?;
            }

            let delegator_logs = self
                .get_logs_bisect(
                    delegators,
                    vec![
                        *decode::SET_MAX_NETWORK_LIMIT,
                        *decode::SET_NETWORK_LIMIT,
                        *decode::SET_OPERATOR_NETWORK_SHARES,
                        *decode::SET_OPERATOR_NETWORK_LIMIT,
                    ],
                    from,
                    to,
                )
                .await?;
            for raw in &delegator_logs {
                let record = decode::decode_log(raw, ContractClass::Delegator)?;
                batch.save_log(&record)?;
            }
        }

        batch.put_cursor(cursor::EVENTS, to);
        batch.commit()?;

        Ok(())
    }

    async fn start_block(&self) -> Result<u64, IngestError> {
        if let Some(processed) = self.store.cursor(cursor::EVENTS)? {
            return Ok(processed + 1);
        }

        let genesis =
            ensure_genesis(self.store, self.explorer, self.addresses.vault_factory).await?;

        Ok(genesis.saturating_sub(GENESIS_MARGIN))
    }

    /// Ingest every finalized log past the cursor, one committed chunk at a
    /// time.
    pub async fn sync(&self) -> Result<(), IngestError> {
        let start = self.start_block().await?;
        let end = self.rpc.block_number().await?.saturating_sub(FINALITY_OFFSET);

        if start > end {
            return Ok(());
        }

        info!(start, end, "ingesting events");

        let mut from = start;
        while from <= end {
            let to = end.min(from + CHUNK_SIZE - 1);
            self.parse_chunk(from, to).await?;
            from = to + 1;
        }

        Ok(())
    }
}
