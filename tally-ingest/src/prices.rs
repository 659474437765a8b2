//! USD price ingestion from CoinMarketCap or Alchemy. Quotes land as
//! `usd × 10^24` rows keyed by the last block at or before the quote
//! timestamp; prolonged provider gaps raise instead of leaving silent holes.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use tally_store::model::{cursor, Collateral};
use tally_store::{Batch, StateRead, Store};

use crate::IngestError;

/// Three days of 5-minute quotes per provider request.
const CHUNK_RANGE: u64 = 3 * 24 * 60 * 60;

/// A provider gap larger than one quote interval plus a minute of slack.
const GAP_ALARM: u64 = 5 * 60 + 60;

/// Prices are backfilled from this far before the factory creation block.
const LEAD_TIME: u64 = 5 * 60;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PriceProvider {
    CoinMarketCap,
    Alchemy,
}

pub struct PricesSync<'a> {
    store: &'a Store,
    http: reqwest::Client,
    provider: PriceProvider,
    cmc_api_key: Option<String>,
    alchemy_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CmcResponse {
    data: HashMap<String, CmcCoin>,
}

#[derive(Debug, Deserialize)]
struct CmcCoin {
    quotes: Vec<CmcQuote>,
}

#[derive(Debug, Deserialize)]
struct CmcQuote {
    quote: CmcQuoteBody,
}

#[derive(Debug, Deserialize)]
struct CmcQuoteBody {
    #[serde(rename = "USD")]
    usd: CmcUsd,
}

#[derive(Debug, Deserialize)]
struct CmcUsd {
    timestamp: String,
    price: f64,
}

#[derive(Debug, Deserialize)]
struct AlchemyResponse {
    data: Vec<AlchemyQuote>,
}

#[derive(Debug, Deserialize)]
struct AlchemyQuote {
    timestamp: String,
    value: serde_json::Value,
}

/// `usd × 10^24` as an integer, the storage scale for prices.
pub(crate) fn usd_to_fixed(price: f64) -> Option<U256> {
    if !price.is_finite() || price < 0.0 {
        return None;
    }

    let scaled = price * 1e24;

    if scaled >= u128::MAX as f64 {
        return None;
    }

    Some(U256::from(scaled as u128))
}

fn parse_timestamp(value: &str) -> Result<u64, IngestError> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|_| IngestError::Decode(format!("quote timestamp {value}")))?;

    u64::try_from(parsed.timestamp())
        .map_err(|_| IngestError::Decode(format!("quote timestamp {value}")))
}

impl<'a> PricesSync<'a> {
    pub fn new(
        store: &'a Store,
        provider: PriceProvider,
        cmc_api_key: Option<String>,
        alchemy_api_key: Option<String>,
    ) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            provider,
            cmc_api_key,
            alchemy_api_key,
        }
    }

    fn start_timestamp(&self) -> Result<Option<u64>, IngestError> {
        if let Some(processed) = self.store.cursor(cursor::PRICES)? {
            return Ok(Some(processed + 1));
        }

        let Some(genesis) = self.store.cursor(cursor::GENESIS)? else {
            return Ok(None);
        };

        let Some(block) = self.store.block(genesis)? else {
            return Ok(None);
        };

        Ok(Some(block.timestamp.saturating_sub(LEAD_TIME)))
    }

    fn end_timestamp(&self) -> Result<Option<u64>, IngestError> {
        let Some(last_block) = self.store.cursor(cursor::BLOCKS)? else {
            return Ok(None);
        };

        let Some(block) = self.store.block(last_block)? else {
            return Ok(None);
        };

        Ok(Some(block.timestamp))
    }

    /// One `(collateral, timestamp, price)` row staged; returns the quote
    /// timestamp so the caller can track coverage.
    fn stage_quote(
        &self,
        batch: &mut Batch,
        collateral: Address,
        timestamp: u64,
        price: f64,
    ) -> Result<Option<u64>, IngestError> {
        let fixed = usd_to_fixed(price)
            .ok_or_else(|| IngestError::Decode(format!("price {price} out of range")))?;

        // quotes older than the first ingested block have no anchor
        let Some(block_number) = self.store.block_at_or_before(timestamp)? else {
            return Ok(None);
        };

        debug!(%collateral, block_number, "staging price");
        batch.put_price(collateral, block_number, fixed);

        Ok(Some(timestamp))
    }

    fn check_coverage(
        &self,
        collateral: Address,
        last_processed: Option<u64>,
        time_start: u64,
        time_end: u64,
    ) -> Result<(), IngestError> {
        match last_processed {
            None => {
                // acceptable only while the collateral has no history at all
                if self.store.get_price(collateral, u64::MAX)?.is_some() {
                    return Err(IngestError::PriceGap {
                        collateral,
                        from: time_start,
                        to: time_end,
                    });
                }
                Ok(())
            }
            Some(last) if time_end.saturating_sub(last) >= GAP_ALARM => {
                Err(IngestError::PriceGap {
                    collateral,
                    from: last,
                    to: time_end,
                })
            }
            Some(_) => Ok(()),
        }
    }

    async fn parse_cmc_chunk(
        &self,
        collaterals: &[(Address, Collateral)],
        time_start: u64,
        time_end: u64,
    ) -> Result<(), IngestError> {
        let ids = collaterals
            .iter()
            .map(|(_, meta)| meta.cmc_id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let api_key = self
            .cmc_api_key
            .clone()
            .ok_or_else(|| IngestError::MissingData("coinmarketcap api key".into()))?;

        let response: CmcResponse = self
            .http
            .get("https://pro-api.coinmarketcap.com/v3/cryptocurrency/quotes/historical")
            .header("X-CMC_PRO_API_KEY", api_key)
            .query(&[
                ("id", ids.as_str()),
                ("count", "10000"),
                ("interval", "5m"),
                ("time_start", &time_start.to_string()),
                ("time_end", &time_end.to_string()),
                ("skip_invalid", "false"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut batch = self.store.batch();

        for (address, meta) in collaterals {
            let quotes = response
                .data
                .get(&meta.cmc_id.to_string())
                .map(|coin| coin.quotes.as_slice())
                .unwrap_or_default();

            let mut sorted: Vec<(u64, f64)> = Vec::with_capacity(quotes.len());
            for quote in quotes {
                sorted.push((parse_timestamp(&quote.quote.usd.timestamp)?, quote.quote.usd.price));
            }
            sorted.sort_by_key(|(timestamp, _)| *timestamp);

            let mut last_processed = None;
            for (timestamp, price) in sorted {
                if let Some(covered) = self.stage_quote(&mut batch, *address, timestamp, price)? {
                    last_processed = Some(covered);
                }
            }

            self.check_coverage(*address, last_processed, time_start, time_end)?;
        }

        batch.put_cursor(cursor::PRICES, time_end);
        batch.commit()?;

        Ok(())
    }

    async fn parse_alchemy_chunk(
        &self,
        collaterals: &[(Address, Collateral)],
        time_start: u64,
        time_end: u64,
    ) -> Result<(), IngestError> {
        let api_key = self
            .alchemy_api_key
            .clone()
            .ok_or_else(|| IngestError::MissingData("alchemy api key".into()))?;
        let url = format!("https://api.g.alchemy.com/prices/v1/{api_key}/tokens/historical");

        let mut batch = self.store.batch();

        for (address, meta) in collaterals {
            let response: AlchemyResponse = self
                .http
                .post(&url)
                .json(&json!({
                    "symbol": meta.symbol,
                    "startTime": time_start,
                    "endTime": time_end,
                    "interval": "5m",
                }))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let mut sorted: Vec<(u64, f64)> = Vec::with_capacity(response.data.len());
            for quote in &response.data {
                let price = match &quote.value {
                    serde_json::Value::String(text) => text
                        .parse::<f64>()
                        .map_err(|_| IngestError::Decode(format!("quote value {text}")))?,
                    serde_json::Value::Number(number) => number
                        .as_f64()
                        .ok_or_else(|| IngestError::Decode("quote value".into()))?,
                    other => {
                        return Err(IngestError::Decode(format!("quote value {other}")));
                    }
                };
                sorted.push((parse_timestamp(&quote.timestamp)?, price));
            }
            sorted.sort_by_key(|(timestamp, _)| *timestamp);

            let mut last_processed = None;
            for (timestamp, price) in sorted {
                if let Some(covered) = self.stage_quote(&mut batch, *address, timestamp, price)? {
                    last_processed = Some(covered);
                }
            }

            self.check_coverage(*address, last_processed, time_start, time_end)?;
        }

        batch.put_cursor(cursor::PRICES, time_end);
        batch.commit()?;

        Ok(())
    }

    /// Ingest quotes up to the last ingested block's timestamp.
    pub async fn sync(&self) -> Result<(), IngestError> {
        let collaterals = self.store.collaterals()?;

        if collaterals.is_empty() {
            return Ok(());
        }

        let Some(start) = self.start_timestamp()? else {
            return Ok(());
        };
        let Some(end) = self.end_timestamp()? else {
            return Ok(());
        };

        if start > end {
            return Ok(());
        }

        info!(start, end, provider = ?self.provider, "ingesting prices");

        let mut from = start;
        while from <= end {
            let to = end.min(from + CHUNK_RANGE - 1);

            match self.provider {
                PriceProvider::CoinMarketCap => {
                    self.parse_cmc_chunk(&collaterals, from, to).await?
                }
                PriceProvider::Alchemy => self.parse_alchemy_chunk(&collaterals, from, to).await?,
            }

            from = to + 1;
        }

        Ok(())
    }
}
