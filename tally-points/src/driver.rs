//! Drives a forward-only cursor across block ranges. Every block is one
//! atomic store batch: points integration over the previous block's state,
//! the optional snapshot, the state replay, and both cursors.

use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use tally_state::Reducer;
use tally_store::model::cursor;
use tally_store::{StateRead, Store};

use crate::{Engine, PointsError};

const RETRY_ATTEMPTS: u32 = 5;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_JITTER_MS: u64 = 500;

pub struct Driver {
    store: Store,
}

struct Bounds {
    cold_start: bool,
    start: u64,
    end: u64,
}

impl Driver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Replay every block between the points cursor and the ingested
    /// frontier. Returns the number of blocks processed.
    pub fn run(&self) -> Result<u64, PointsError> {
        let Some(bounds) = self.bounds()? else {
            info!("nothing to process yet");
            return Ok(0);
        };

        info!(start = bounds.start, end = bounds.end, "processing blocks");

        // on a cold start the first interval is empty by construction
        let mut previous = if bounds.cold_start {
            bounds.start
        } else {
            bounds.start - 1
        };

        for block in bounds.start..=bounds.end {
            self.process_block_with_retry(previous, block)?;
            previous = block;
        }

        Ok(bounds.end - bounds.start + 1)
    }

    /// `start` resumes after the points cursor, falling back to the vault
    /// factory creation block on first run. `end` is capped by both the
    /// events cursor and the last block covered by prices.
    fn bounds(&self) -> Result<Option<Bounds>, PointsError> {
        let (cold_start, start) = match self.store.cursor(cursor::POINTS)? {
            Some(processed) => (false, processed + 1),
            None => match self.store.cursor(cursor::GENESIS)? {
                Some(genesis) => (true, genesis),
                None => return Ok(None),
            },
        };

        let Some(events_block) = self.store.cursor(cursor::EVENTS)? else {
            return Ok(None);
        };

        let Some(prices_timestamp) = self.store.cursor(cursor::PRICES)? else {
            return Ok(None);
        };

        let Some(prices_block) = self.store.block_at_or_before(prices_timestamp)? else {
            return Ok(None);
        };

        let end = events_block.min(prices_block);

        if start > end {
            return Ok(None);
        }

        Ok(Some(Bounds {
            cold_start,
            start,
            end,
        }))
    }

    fn process_block_with_retry(&self, previous: u64, block: u64) -> Result<(), PointsError> {
        let mut attempt = 0;

        loop {
            match self.process_block(previous, block) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt + 1 < RETRY_ATTEMPTS => {
                    let backoff = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    let jitter =
                        Duration::from_millis(rand::thread_rng().gen_range(0..RETRY_MAX_JITTER_MS));

                    warn!(block, attempt, ?err, "transient failure, backing off");
                    std::thread::sleep(backoff + jitter);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn process_block(&self, previous: u64, block: u64) -> Result<(), PointsError> {
        let mut batch = self.store.batch();
        let engine = Engine::new(&self.store);

        // points first: they integrate over the state entering this block
        engine.integrate_block(&mut batch, previous, block)?;
        engine.maybe_snapshot(&mut batch, block)?;

        let mut reducer = Reducer::new(&mut batch);
        reducer.process_block(block)?;

        batch.put_cursor(cursor::POINTS, block);
        batch.commit()?;

        Ok(())
    }
}
