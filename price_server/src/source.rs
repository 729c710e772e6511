//! External market-data source.
//!
//! The poller only needs "current quotes for this instrument set"; [`QuoteSource`] is that
//! contract. [`CoinGeckoSource`] implements it against the CoinGecko `/coins/markets`
//! endpoint with a blocking HTTP client, since the poller runs on its own thread.
//!
//! Records come back loosely typed ([`MarketRecord`]): any field may be missing or carry
//! the wrong JSON type, and such a field reads as `None` instead of failing the whole
//! batch. Deciding which records are usable is the poller's job, not the source's.
use std::time::Duration;

use log::debug;
use price_common::CacheError;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Public CoinGecko API base URL.
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// One instrument as reported by the data source, before validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MarketRecord {
    /// Instrument id.
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    /// Display name.
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    /// Ticker symbol.
    #[serde(default, deserialize_with = "lenient_string")]
    pub symbol: Option<String>,
    /// Current price in the quote currency.
    #[serde(default, alias = "price", deserialize_with = "lenient_number")]
    pub current_price: Option<f64>,
}

/// Any non-string value becomes `None`.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// Any non-numeric value becomes `None`; numeric strings are not accepted either.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        _ => None,
    })
}

/// Read-only provider of current quotes.
pub trait QuoteSource: Send {
    /// Current records for `instruments`. An empty answer is an error.
    fn fetch(&self, instruments: &[String]) -> Result<Vec<MarketRecord>, CacheError>;
}

/// CoinGecko `/coins/markets` client.
pub struct CoinGeckoSource {
    client: reqwest::blocking::Client,
    base_url: String,
    vs_currency: String,
}

impl CoinGeckoSource {
    /// Create a client for `base_url` (e.g. [`COINGECKO_API_URL`]).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("price_server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CacheError::Upstream(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            vs_currency: String::from("usd"),
        })
    }
}

impl QuoteSource for CoinGeckoSource {
    fn fetch(&self, instruments: &[String]) -> Result<Vec<MarketRecord>, CacheError> {
        let url = format!("{}/coins/markets", self.base_url);
        let ids = instruments.join(",");
        let per_page = instruments.len().max(1).to_string();
        debug!("Fetching {} from {}", ids, url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("vs_currency", self.vs_currency.as_str()),
                ("ids", ids.as_str()),
                ("order", "market_cap_desc"),
                ("per_page", per_page.as_str()),
                ("page", "1"),
                ("sparkline", "false"),
            ])
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| CacheError::Upstream(e.to_string()))?;

        let records: Vec<MarketRecord> = response
            .json()
            .map_err(|e| CacheError::Upstream(format!("malformed response: {}", e)))?;
        if records.is_empty() {
            return Err(CacheError::Upstream(String::from("no data received")));
        }
        Ok(records)
    }
}
