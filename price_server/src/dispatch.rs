//! RPC dispatch table: procedure name -> handler.
//!
//! A handler takes the raw request bytes and always produces response bytes. Payloads are
//! decoded into a typed [`Request`] first; a payload that does not fit, an unknown
//! procedure name or a failing store read is answered with an `{error}` body instead of
//! being propagated to the transport.
use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use price_common::CacheError;
use price_common::protocol::{Method, Ping, Request, Response};
use price_common::store::OrderedStore;
use strum::IntoEnumIterator;

use crate::cache::InstrumentCache;

/// Fallback body if even the error response cannot be encoded.
const INTERNAL_ERROR: &[u8] = br#"{"error":"internal error"}"#;

/// A registered procedure.
pub type Handler = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Name-to-handler map shared by every request thread.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<String, Handler>,
}

impl DispatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table serving `ping`, `getLatestPrices` and `getHistoricalPrices` from `cache`.
    pub fn for_cache<S: OrderedStore + 'static>(cache: Arc<InstrumentCache<S>>) -> Self {
        let mut table = Self::new();
        for method in Method::iter() {
            let cache = Arc::clone(&cache);
            table.register(method.to_string(), move |payload| {
                respond(method, payload, |request| handle(&*cache, request))
            });
        }
        table
    }

    /// Registers `handler` under `name`, replacing any previous handler.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Registered procedure names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Runs the handler for `method`. Unknown methods get an `{error}` body.
    pub fn dispatch(&self, method: &str, payload: &[u8]) -> Vec<u8> {
        match self.handlers.get(method) {
            Some(handler) => handler(payload),
            None => {
                warn!("Request for unknown method {:?}", method);
                encode(&Response::error(CacheError::UnknownMethod(method.to_string()).to_string()))
            }
        }
    }
}

/// Decode, run, encode. Every failure becomes an `{error}` body.
fn respond<F>(method: Method, payload: &[u8], run: F) -> Vec<u8>
where
    F: FnOnce(Request) -> Result<Response, CacheError>,
{
    let response = Request::decode(method, payload)
        .and_then(run)
        .unwrap_or_else(|e| {
            warn!("{} failed: {}", method, e);
            Response::error(e.to_string())
        });
    encode(&response)
}

fn handle<S: OrderedStore>(
    cache: &InstrumentCache<S>,
    request: Request,
) -> Result<Response, CacheError> {
    debug!("Handling {:?}", request);
    let response = match request {
        Request::Ping(Ping { nonce }) => Response::Pong(Ping {
            nonce: nonce.wrapping_add(1),
        }),
        Request::GetLatestPrices(ids) => Response::LatestPrices(cache.get_latest(&ids)?),
        Request::GetHistoricalPrices(query) => {
            Response::HistoricalPrices(cache.get_history(&query.pairs, query.from, query.to)?)
        }
    };
    Ok(response)
}

fn encode(response: &Response) -> Vec<u8> {
    response.encode().unwrap_or_else(|e| {
        warn!("Failed to encode response: {}", e);
        INTERNAL_ERROR.to_vec()
    })
}
