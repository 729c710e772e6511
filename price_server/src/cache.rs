//! Instrument cache: latest-value and historical-series views over one ordered store.
//!
//! Every recorded quote is written twice:
//!
//! - `latest:<id>`: overwritten on each update, answers "what is the price now".
//! - `history:<id>:<timestamp>`: append-only, one entry per poll cycle.
//!
//! The timestamp in a history key is zero-padded to 20 decimal digits (enough for any
//! `u64`), so byte order equals chronological order and a range scan between two
//! history keys of the same id returns exactly that id's quotes in time order.
//!
//! The two writes are not atomic as a pair. A failure between them leaves the latest
//! entry updated without its history entry for that cycle.
use std::collections::BTreeMap;

use log::debug;
use price_common::instruments::validate_id;
use price_common::protocol::{HistoricalPrices, LatestPrices};
use price_common::store::OrderedStore;
use price_common::{CacheError, Quote};

const LATEST_PREFIX: &str = "latest:";
const HISTORY_PREFIX: &str = "history:";

/// Store key of the latest entry for `id`.
pub fn latest_key(id: &str) -> Vec<u8> {
    format!("{}{}", LATEST_PREFIX, id).into_bytes()
}

/// Store key of the historical entry for `id` at `timestamp`.
pub fn history_key(id: &str, timestamp: u64) -> Vec<u8> {
    format!("{}{}:{:020}", HISTORY_PREFIX, id, timestamp).into_bytes()
}

/// Typed latest/history access over an [`OrderedStore`].
pub struct InstrumentCache<S: OrderedStore> {
    store: S,
}

impl<S: OrderedStore> InstrumentCache<S> {
    /// Wrap `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Writes `quote` as the latest entry for its id, then appends it to the history.
    ///
    /// Returns the first failing write's error. If the latest write succeeded and the
    /// history write failed, the latest entry stays updated.
    pub fn record_quote(&self, quote: &Quote) -> Result<(), CacheError> {
        validate_id(&quote.id)?;
        let value = quote.to_json_bytes()?;
        self.store.put(&latest_key(&quote.id), &value)?;
        self.store.put(&history_key(&quote.id, quote.timestamp), &value)?;
        debug!("Recorded {} at {}", quote.id, quote.timestamp);
        Ok(())
    }

    /// Latest quote per id. Ids that were never recorded (or cannot be keys) are omitted.
    pub fn get_latest<I, T>(&self, ids: I) -> Result<LatestPrices, CacheError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut latest = BTreeMap::new();
        for id in ids {
            let id = id.as_ref();
            if validate_id(id).is_err() {
                continue;
            }
            if let Some(raw) = self.store.get(&latest_key(id))? {
                latest.insert(id.to_string(), decode_stored(&raw)?);
            }
        }
        Ok(latest)
    }

    /// Quotes per id with `from <= timestamp <= to`, oldest first.
    ///
    /// Every requested id appears in the result; an id with nothing in range maps to an
    /// empty list. `from > to` is not an error and yields empty lists.
    pub fn get_history<I, T>(&self, ids: I, from: u64, to: u64) -> Result<HistoricalPrices, CacheError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut history = BTreeMap::new();
        for id in ids {
            let id = id.as_ref();
            let mut quotes = Vec::new();
            if validate_id(id).is_ok() && from <= to {
                let entries = self.store.scan(&history_key(id, from), &history_key(id, to))?;
                for (_, raw) in entries {
                    quotes.push(decode_stored(&raw)?);
                }
            }
            history.insert(id.to_string(), quotes);
        }
        Ok(history)
    }
}

fn decode_stored(raw: &[u8]) -> Result<Quote, CacheError> {
    Quote::from_json_bytes(raw).map_err(|e| CacheError::Store(format!("corrupt quote value: {}", e)))
}
