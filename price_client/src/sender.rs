//! Typed calls to the price server.
//!
//! This module wraps a [`Transport`] with one method per procedure: it encodes the request,
//! performs the round trip and decodes the reply. An `{error}` body from the server comes
//! back as `CacheError::Format`, so callers only ever see typed data or an error.
use log::{debug, info};
use price_common::CacheError;
use price_common::identity::PublicId;
use price_common::protocol::{
    HistoricalPrices, HistoryQuery, LatestPrices, Ping, Request, Response,
};
use price_common::transport::Transport;

/// Helper type for calling one server.
pub struct PriceCaller<T: Transport> {
    transport: T,
    server: PublicId,
}

impl<T: Transport> PriceCaller<T> {
    /// Calls will go to `server` over `transport`.
    pub fn new(transport: T, server: PublicId) -> Self {
        Self { transport, server }
    }

    /// `ping`; returns the nonce the server sent back.
    pub fn ping(&self, nonce: i64) -> Result<i64, CacheError> {
        match self.call(Request::Ping(Ping { nonce }))? {
            Response::Pong(pong) => Ok(pong.nonce),
            other => Err(unexpected(&other)),
        }
    }

    /// `getLatestPrices`
    pub fn get_latest_prices(&self, ids: Vec<String>) -> Result<LatestPrices, CacheError> {
        match self.call(Request::GetLatestPrices(ids))? {
            Response::LatestPrices(prices) => Ok(prices),
            other => Err(unexpected(&other)),
        }
    }

    /// `getHistoricalPrices`
    pub fn get_historical_prices(
        &self,
        pairs: Vec<String>,
        from: u64,
        to: u64,
    ) -> Result<HistoricalPrices, CacheError> {
        match self.call(Request::GetHistoricalPrices(HistoryQuery { pairs, from, to }))? {
            Response::HistoricalPrices(prices) => Ok(prices),
            other => Err(unexpected(&other)),
        }
    }

    fn call(&self, request: Request) -> Result<Response, CacheError> {
        let method = request.method();
        info!("Sending {} request to {}", method, self.server);
        let reply = self
            .transport
            .request(&self.server, &method.to_string(), &request.encode()?)?;
        debug!("Raw reply: {}", String::from_utf8_lossy(&reply));
        match Response::decode(method, &reply)? {
            Response::Error(body) => Err(CacheError::Format(format!("server error: {}", body.error))),
            response => Ok(response),
        }
    }
}

fn unexpected(response: &Response) -> CacheError {
    CacheError::Format(format!("unexpected response: {:?}", response))
}
