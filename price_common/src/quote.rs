//! Instrument quote data model and JSON encoding helpers.
//!
//! A `Quote` is what the refresh poller stores and what the query procedures return.
//! It is stored as its JSON encoding, so the helpers here are used on both sides of the
//! store and on both sides of the wire.
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Price quote for a single instrument, taken at one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Instrument id (e.g. `bitcoin`).
    pub id: String,
    /// Display name reported by the data source.
    pub name: String,
    /// Ticker symbol reported by the data source.
    pub symbol: String,
    /// Last price in the quote currency.
    pub price: f64,
    /// Ingestion time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Quote {
    /// Encode the quote to JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, CacheError> {
        let json = serde_json::to_vec(self)?;
        Ok(json)
    }

    /// Decode a quote from JSON bytes.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Quote, CacheError> {
        let quote = serde_json::from_slice(bytes)?;
        Ok(quote)
    }
}
