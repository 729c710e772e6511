//! Shared RPC protocol types used by client and server.
//!
//! Every procedure has a name (`Method`), a request shape and a response shape. Payloads
//! travel as UTF-8 JSON. Requests are decoded into the tagged [`Request`] enum at the
//! boundary, so a handler never sees a half-parsed payload; anything that does not fit
//! the procedure's shape becomes a [`CacheError::Decode`].
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::CacheError;
use crate::quote::Quote;

/// Names of the procedures served by the price cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum Method {
    /// Liveness/round-trip check.
    #[strum(serialize = "ping")]
    Ping,
    /// Latest quote for each requested instrument.
    #[strum(serialize = "getLatestPrices")]
    GetLatestPrices,
    /// Historical quotes for each requested instrument within a time range.
    #[strum(serialize = "getHistoricalPrices")]
    GetHistoricalPrices,
}

/// `ping` request and response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Arbitrary caller-chosen value; the reply carries `nonce + 1`.
    pub nonce: i64,
}

/// `getHistoricalPrices` request body. Both bounds are inclusive epoch millis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Instrument ids to look up.
    pub pairs: Vec<String>,
    /// Lower bound (inclusive).
    pub from: u64,
    /// Upper bound (inclusive).
    pub to: u64,
}

/// Body returned by any handler when the request cannot be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason, never empty.
    pub error: String,
}

/// Latest quotes keyed by instrument id. Ids without data are absent.
pub type LatestPrices = BTreeMap<String, Quote>;

/// Chronological quotes keyed by instrument id. Every requested id is present.
pub type HistoricalPrices = BTreeMap<String, Vec<Quote>>;

/// A decoded request, one variant per procedure.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// `ping`
    Ping(Ping),
    /// `getLatestPrices`
    GetLatestPrices(Vec<String>),
    /// `getHistoricalPrices`
    GetHistoricalPrices(HistoryQuery),
}

impl Request {
    /// Procedure this request belongs to.
    pub fn method(&self) -> Method {
        match self {
            Request::Ping(_) => Method::Ping,
            Request::GetLatestPrices(_) => Method::GetLatestPrices,
            Request::GetHistoricalPrices(_) => Method::GetHistoricalPrices,
        }
    }

    /// Decode a raw payload for `method`.
    pub fn decode(method: Method, payload: &[u8]) -> Result<Request, CacheError> {
        let request = match method {
            Method::Ping => Request::Ping(from_json(payload)?),
            Method::GetLatestPrices => Request::GetLatestPrices(from_json(payload)?),
            Method::GetHistoricalPrices => Request::GetHistoricalPrices(from_json(payload)?),
        };
        Ok(request)
    }

    /// Encode the request body to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        let bytes = match self {
            Request::Ping(ping) => serde_json::to_vec(ping)?,
            Request::GetLatestPrices(ids) => serde_json::to_vec(ids)?,
            Request::GetHistoricalPrices(query) => serde_json::to_vec(query)?,
        };
        Ok(bytes)
    }
}

/// A handler's reply, one variant per procedure plus the shared error shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `ping` reply.
    Pong(Ping),
    /// `getLatestPrices` reply.
    LatestPrices(LatestPrices),
    /// `getHistoricalPrices` reply.
    HistoricalPrices(HistoricalPrices),
    /// `{error}` reply for any procedure.
    Error(ErrorBody),
}

impl Response {
    /// Builds an error reply. An empty message is replaced so the field is never blank.
    pub fn error(message: impl Into<String>) -> Response {
        let mut error = message.into();
        if error.trim().is_empty() {
            error = String::from("unknown error");
        }
        Response::Error(ErrorBody { error })
    }

    /// Encode the reply to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        let bytes = match self {
            Response::Pong(ping) => serde_json::to_vec(ping)?,
            Response::LatestPrices(prices) => serde_json::to_vec(prices)?,
            Response::HistoricalPrices(prices) => serde_json::to_vec(prices)?,
            Response::Error(body) => serde_json::to_vec(body)?,
        };
        Ok(bytes)
    }

    /// Decode a reply to `method`. An `{error}` body is recognised for every method.
    pub fn decode(method: Method, payload: &[u8]) -> Result<Response, CacheError> {
        if let Ok(body) = serde_json::from_slice::<ErrorBody>(payload) {
            return Ok(Response::Error(body));
        }
        let response = match method {
            Method::Ping => Response::Pong(serde_json::from_slice(payload)?),
            Method::GetLatestPrices => Response::LatestPrices(serde_json::from_slice(payload)?),
            Method::GetHistoricalPrices => {
                Response::HistoricalPrices(serde_json::from_slice(payload)?)
            }
        };
        Ok(response)
    }
}

fn from_json<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, CacheError> {
    serde_json::from_slice(payload).map_err(|e| CacheError::Decode(e.to_string()))
}
